//! Consensus event payloads and wire frames.
//!
//! Every message a node gossips lives here: the three consensus event types
//! (score, reduction, agreement) with their common header, inventory
//! advertisements, and the frame codec that turns them into transport bytes.

mod agreement;
mod frame;
mod header;
mod reduction;
mod score;

pub use agreement::Agreement;
pub use frame::{
    decode_gossip, decode_kadcast, encode_gossip, encode_kadcast, CodecError, Inv, InvType,
    Payload, Topic,
};
pub use header::ConsensusHeader;
pub use reduction::Reduction;
pub use score::{Score, SELECTION_STEP};
