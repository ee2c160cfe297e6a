//! Telemetry Ingestion
//!
//! Inbound side of the relay.
//!
//! - `udp`: raw datagram receive loop feeding the broadcast hub
//! - `codec`: JSON telemetry decoding (agent and dashboard shapes)
//! - `decode_lane`: bounded, off-path decoding into the ingestion use case

mod codec;
mod decode_lane;
mod udp;

pub use codec::{CodecError, decode_telemetry};
pub use decode_lane::{DecodeLane, RawDatagram, decode_channel};
pub use udp::{DEFAULT_MAX_DATAGRAM, IngestionError, UdpIngestionConfig, UdpIngestionEndpoint};
