//! In-process event bus and RPC bus.
//!
//! The event bus routes typed messages by topic to any number of
//! subscribers; the RPC bus pairs a request with exactly one handler and a
//! one-shot reply. Together they form the only coupling between chain,
//! consensus and mempool; both are passed to constructors explicitly.

mod event_bus;
mod rpc_bus;

pub use event_bus::{EventBus, DEFAULT_SUBSCRIBER_CAPACITY};
pub use rpc_bus::{RpcBus, RpcError, RpcParams, RpcRequest, RpcResponse, RpcTopic};

use sba_messages::{Agreement, Reduction, Score};
use sba_types::{Block, ContractCall, RoundUpdate};

/// Event bus topics forming the integration contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// A block was accepted; the tip advanced.
    AcceptedBlock,
    /// The chain handed a fresh round to the consensus loop.
    RoundUpdate,
    /// Inbound transaction from the network.
    Tx,
    /// Inbound score (selection) event.
    Score,
    /// Inbound reduction vote.
    Reduction,
    /// Inbound agreement event.
    Agreement,
    /// Inbound full block.
    Block,
    /// Outbound pre-encoded frame for the gossip network.
    Gossip,
    /// Outbound pre-encoded frame for the kadcast network.
    Kadcast,
}

/// Messages traveling over the event bus.
///
/// Events are passed by value and discarded when a round ends; the bus
/// clones per subscriber.
#[derive(Debug, Clone)]
pub enum Message {
    /// An accepted block (tip advance).
    AcceptedBlock(Block),
    /// Round hand-off to consensus.
    RoundUpdate(RoundUpdate),
    /// Inbound transaction with its kadcast TTL (0 on gossip networks).
    Transaction {
        /// The transaction.
        call: ContractCall,
        /// TTL byte the frame arrived with.
        kad_height: u8,
    },
    /// Inbound score event.
    Score(Box<Score>),
    /// Inbound reduction vote.
    Reduction(Reduction),
    /// Inbound agreement event.
    Agreement(Box<Agreement>),
    /// Inbound full block with the peer that delivered it.
    Block {
        /// The block.
        block: Box<Block>,
        /// TTL byte the frame arrived with.
        kad_height: u8,
        /// Identifier of the delivering peer.
        source: String,
    },
    /// Pre-encoded wire frame bound for the transport layer.
    Frame(Vec<u8>),
}
