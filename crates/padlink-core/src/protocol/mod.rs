//! Protocol module containing message types, the packet codec and sequence numbering.

pub mod codec;
pub mod messages;
pub mod sequence;

pub use codec::{
    decode_body, encode_body, open_packet, packet_iv, seal_packet, seal_packet_with_iv, Framing,
    PacketFormat, ProtocolError, SEQUENCE_BYTES,
};
pub use messages::*;
pub use sequence::{SequenceCounter, SequenceWatermark, MAX_SEQUENCE};
