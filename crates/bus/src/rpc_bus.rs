//! Request-response bus between subsystems.
//!
//! One handler per topic; registering a topic twice is an error. Each
//! request carries a one-shot response channel, and callers bound every
//! call with a deadline.

use parking_lot::RwLock;
use sba_types::{Block, ContractCall, Hash};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

/// RPC topics forming the integration contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RpcTopic {
    /// All verified mempool transactions, fee-descending, with an optional
    /// txid filter.
    GetMempoolTxs,
    /// Highest-fee mempool subset bounded by total byte size.
    GetMempoolTxsBySize,
    /// Submit a transaction into the mempool.
    SendMempoolTx,
    /// Ask the chain to validate a candidate block statelessly.
    VerifyCandidateBlock,
}

/// Request parameters, one variant per topic.
#[derive(Debug, Clone)]
pub enum RpcParams {
    /// `GetMempoolTxs`: optional txid filter.
    TxFilter(Option<Hash>),
    /// `GetMempoolTxsBySize`: maximum total byte size.
    MaxSize(usize),
    /// `SendMempoolTx`: the transaction to admit.
    Transaction(ContractCall),
    /// `VerifyCandidateBlock`: the candidate.
    Candidate(Box<Block>),
}

/// Response payloads.
#[derive(Debug, Clone)]
pub enum RpcResponse {
    /// A list of transactions.
    Transactions(Vec<ContractCall>),
    /// A transaction id (successful submission).
    TxHash(Hash),
    /// No payload; the call succeeded.
    Empty,
}

/// Errors crossing the RPC bus.
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("topic already registered")]
    AlreadyRegistered,

    #[error("no handler registered for topic")]
    NotRegistered,

    #[error("handler dropped the request")]
    HandlerDropped,

    #[error("deadline exceeded")]
    DeadlineExceeded,

    #[error("{0}")]
    Handler(String),
}

/// A request in flight: parameters plus the one-shot reply channel.
#[derive(Debug)]
pub struct RpcRequest {
    /// Call parameters.
    pub params: RpcParams,
    /// Reply channel; the handler must send exactly once.
    pub response: oneshot::Sender<Result<RpcResponse, RpcError>>,
}

/// The process-wide RPC bus.
#[derive(Clone)]
pub struct RpcBus {
    handlers: Arc<RwLock<HashMap<RpcTopic, mpsc::Sender<RpcRequest>>>>,
}

impl RpcBus {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self {
            handlers: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register as the handler for `topic`.
    ///
    /// Returns the receiving end the handler must service. Fails if the
    /// topic already has a handler.
    pub fn register(&self, topic: RpcTopic) -> Result<mpsc::Receiver<RpcRequest>, RpcError> {
        let mut handlers = self.handlers.write();
        if handlers.contains_key(&topic) {
            return Err(RpcError::AlreadyRegistered);
        }
        let (tx, rx) = mpsc::channel(1);
        handlers.insert(topic, tx);
        Ok(rx)
    }

    /// Call `topic` with `params`, waiting up to `deadline` for the reply.
    pub async fn call(
        &self,
        topic: RpcTopic,
        params: RpcParams,
        deadline: Duration,
    ) -> Result<RpcResponse, RpcError> {
        let handler = self
            .handlers
            .read()
            .get(&topic)
            .cloned()
            .ok_or(RpcError::NotRegistered)?;

        let (response_tx, response_rx) = oneshot::channel();
        let request = RpcRequest {
            params,
            response: response_tx,
        };

        let exchange = async {
            handler
                .send(request)
                .await
                .map_err(|_| RpcError::HandlerDropped)?;
            response_rx.await.map_err(|_| RpcError::HandlerDropped)?
        };

        tokio::time::timeout(deadline, exchange)
            .await
            .map_err(|_| RpcError::DeadlineExceeded)?
    }
}

impl Default for RpcBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_call_roundtrip() {
        let bus = RpcBus::new();
        let mut rx = bus.register(RpcTopic::GetMempoolTxs).unwrap();

        tokio::spawn(async move {
            let req = rx.recv().await.unwrap();
            let _ = req.response.send(Ok(RpcResponse::Transactions(vec![])));
        });

        let resp = bus
            .call(
                RpcTopic::GetMempoolTxs,
                RpcParams::TxFilter(None),
                Duration::from_secs(1),
            )
            .await
            .unwrap();
        assert!(matches!(resp, RpcResponse::Transactions(txs) if txs.is_empty()));
    }

    #[tokio::test]
    async fn test_double_registration_fails() {
        let bus = RpcBus::new();
        let _rx = bus.register(RpcTopic::SendMempoolTx).unwrap();
        assert!(matches!(
            bus.register(RpcTopic::SendMempoolTx),
            Err(RpcError::AlreadyRegistered)
        ));
    }

    #[tokio::test]
    async fn test_unregistered_topic_fails() {
        let bus = RpcBus::new();
        let err = bus
            .call(
                RpcTopic::GetMempoolTxsBySize,
                RpcParams::MaxSize(1024),
                Duration::from_millis(50),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::NotRegistered));
    }

    #[tokio::test]
    async fn test_call_times_out_when_handler_is_silent() {
        let bus = RpcBus::new();
        let _rx = bus.register(RpcTopic::GetMempoolTxs).unwrap();

        let err = bus
            .call(
                RpcTopic::GetMempoolTxs,
                RpcParams::TxFilter(None),
                Duration::from_millis(20),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::DeadlineExceeded));
    }
}
