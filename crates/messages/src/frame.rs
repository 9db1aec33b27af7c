//! Wire frame encoding and decoding.
//!
//! # Frame layout
//!
//! ```text
//! Gossip:  [topic: u8][payload: SBOR-encoded event]
//! Kadcast: [ttl: u8][topic: u8][payload: SBOR-encoded event]
//! ```
//!
//! The transport layer ships these bytes as-is; consensus and chain publish
//! pre-encoded frames on the Gossip/Kadcast bus topics.

use crate::{Agreement, Reduction, Score};
use sba_types::{Block, ContractCall, Hash};
use sbor::prelude::*;
use thiserror::Error;

/// Wire topic tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Topic {
    /// Full transaction payload.
    Tx = 1,
    /// Full block payload.
    Block = 2,
    /// Selection-phase score event.
    Score = 3,
    /// Reduction vote.
    Reduction = 4,
    /// Agreement event.
    Agreement = 5,
    /// Inventory advertisement.
    Inv = 6,
}

impl Topic {
    fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(Topic::Tx),
            2 => Some(Topic::Block),
            3 => Some(Topic::Score),
            4 => Some(Topic::Reduction),
            5 => Some(Topic::Agreement),
            6 => Some(Topic::Inv),
            _ => None,
        }
    }
}

/// Inventory item kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, BasicSbor)]
pub enum InvType {
    /// A verified mempool transaction.
    MempoolTx,
    /// An accepted block.
    Block,
}

/// Inventory advertisement: hashes only, peers fetch bodies on demand.
#[derive(Debug, Clone, Default, PartialEq, Eq, BasicSbor)]
pub struct Inv {
    /// Advertised items.
    pub items: Vec<(InvType, Hash)>,
}

impl Inv {
    /// Add one item.
    pub fn add(&mut self, kind: InvType, hash: Hash) {
        self.items.push((kind, hash));
    }
}

/// A decoded wire payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Full transaction.
    Tx(ContractCall),
    /// Full block.
    Block(Box<Block>),
    /// Score event.
    Score(Box<Score>),
    /// Reduction vote.
    Reduction(Reduction),
    /// Agreement event.
    Agreement(Box<Agreement>),
    /// Inventory advertisement.
    Inv(Inv),
}

impl Payload {
    /// The topic tag this payload travels under.
    pub fn topic(&self) -> Topic {
        match self {
            Payload::Tx(_) => Topic::Tx,
            Payload::Block(_) => Topic::Block,
            Payload::Score(_) => Topic::Score,
            Payload::Reduction(_) => Topic::Reduction,
            Payload::Agreement(_) => Topic::Agreement,
            Payload::Inv(_) => Topic::Inv,
        }
    }
}

/// Errors that can occur during frame encoding/decoding.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Frame too short")]
    FrameTooShort,

    #[error("Unknown topic tag: {0}")]
    UnknownTopic(u8),

    #[error("SBOR decode error: {0}")]
    Decode(String),

    #[error("SBOR encode error: {0}")]
    Encode(String),
}

fn encode_payload(payload: &Payload) -> Result<Vec<u8>, CodecError> {
    let bytes = match payload {
        Payload::Tx(tx) => sbor::basic_encode(tx),
        Payload::Block(block) => sbor::basic_encode(block.as_ref()),
        Payload::Score(score) => sbor::basic_encode(score.as_ref()),
        Payload::Reduction(vote) => sbor::basic_encode(vote),
        Payload::Agreement(agreement) => sbor::basic_encode(agreement.as_ref()),
        Payload::Inv(inv) => sbor::basic_encode(inv),
    };
    bytes.map_err(|e| CodecError::Encode(format!("{e:?}")))
}

fn decode_payload(topic: Topic, bytes: &[u8]) -> Result<Payload, CodecError> {
    let decode_err = |e| CodecError::Decode(format!("{e:?}"));
    Ok(match topic {
        Topic::Tx => Payload::Tx(sbor::basic_decode(bytes).map_err(decode_err)?),
        Topic::Block => Payload::Block(Box::new(sbor::basic_decode(bytes).map_err(decode_err)?)),
        Topic::Score => Payload::Score(Box::new(sbor::basic_decode(bytes).map_err(decode_err)?)),
        Topic::Reduction => Payload::Reduction(sbor::basic_decode(bytes).map_err(decode_err)?),
        Topic::Agreement => {
            Payload::Agreement(Box::new(sbor::basic_decode(bytes).map_err(decode_err)?))
        }
        Topic::Inv => Payload::Inv(sbor::basic_decode(bytes).map_err(decode_err)?),
    })
}

/// Encode a payload as a gossip frame: topic tag then body.
pub fn encode_gossip(payload: &Payload) -> Result<Vec<u8>, CodecError> {
    let body = encode_payload(payload)?;
    let mut frame = Vec::with_capacity(1 + body.len());
    frame.push(payload.topic() as u8);
    frame.extend(body);
    Ok(frame)
}

/// Encode a payload as a kadcast frame: TTL byte, topic tag, body.
pub fn encode_kadcast(payload: &Payload, ttl: u8) -> Result<Vec<u8>, CodecError> {
    let body = encode_payload(payload)?;
    let mut frame = Vec::with_capacity(2 + body.len());
    frame.push(ttl);
    frame.push(payload.topic() as u8);
    frame.extend(body);
    Ok(frame)
}

/// Decode a gossip frame.
pub fn decode_gossip(frame: &[u8]) -> Result<Payload, CodecError> {
    let (&tag, body) = frame.split_first().ok_or(CodecError::FrameTooShort)?;
    let topic = Topic::from_tag(tag).ok_or(CodecError::UnknownTopic(tag))?;
    decode_payload(topic, body)
}

/// Decode a kadcast frame; returns the TTL alongside the payload.
pub fn decode_kadcast(frame: &[u8]) -> Result<(u8, Payload), CodecError> {
    let (&ttl, rest) = frame.split_first().ok_or(CodecError::FrameTooShort)?;
    let payload = decode_gossip(rest)?;
    Ok((ttl, payload))
}

#[cfg(test)]
mod tests {
    use super::*;
    use sba_types::test_utils::{test_keypair, test_transfer};

    #[test]
    fn test_gossip_roundtrip_tx() {
        let payload = Payload::Tx(test_transfer(1, 100));
        let frame = encode_gossip(&payload).unwrap();
        assert_eq!(frame[0], Topic::Tx as u8);

        let decoded = decode_gossip(&frame).unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn test_kadcast_roundtrip_preserves_ttl() {
        let vote = Reduction::new(&test_keypair(1), 3, 2, Hash::from_bytes(b"h"));
        let payload = Payload::Reduction(vote);

        let frame = encode_kadcast(&payload, 7).unwrap();
        let (ttl, decoded) = decode_kadcast(&frame).unwrap();

        assert_eq!(ttl, 7);
        assert_eq!(decoded, payload);
    }

    #[test]
    fn test_unknown_topic_rejected() {
        let err = decode_gossip(&[0xFF, 0, 0]).unwrap_err();
        assert!(matches!(err, CodecError::UnknownTopic(0xFF)));
    }

    #[test]
    fn test_short_frame_rejected() {
        assert!(matches!(decode_gossip(&[]), Err(CodecError::FrameTooShort)));
    }

    #[test]
    fn test_inv_roundtrip() {
        let mut inv = Inv::default();
        inv.add(InvType::MempoolTx, Hash::from_bytes(b"txid"));
        inv.add(InvType::Block, Hash::from_bytes(b"blk"));

        let frame = encode_gossip(&Payload::Inv(inv.clone())).unwrap();
        assert_eq!(decode_gossip(&frame).unwrap(), Payload::Inv(inv));
    }

    #[test]
    fn test_certified_block_roundtrip() {
        use sba_types::{Bitset, Block, Certificate, Header, Signature, StepVotes, BLOCK_VERSION};

        let mut signers = Bitset::new(4);
        signers.set(0);
        signers.set(2);
        let votes = StepVotes {
            aggregate_sig: Signature::Bls12381(vec![7u8; 96]),
            signers,
        };

        let block = Block::new(
            Header {
                version: BLOCK_VERSION,
                height: 9,
                timestamp: 1_234,
                prev_block_hash: Hash::from_bytes(b"prev"),
                seed: Hash::from_bytes(b"seed"),
                tx_root: Hash::ZERO,
                state_hash: Hash::from_bytes(b"state"),
                certificate: Certificate {
                    first_reduction: votes.clone(),
                    second_reduction: votes,
                    step: 2,
                },
            },
            vec![test_transfer(3, 42), test_transfer(4, 7)],
        );

        let frame = encode_gossip(&Payload::Block(Box::new(block.clone()))).unwrap();
        let decoded = decode_gossip(&frame).unwrap();
        assert_eq!(decoded, Payload::Block(Box::new(block)));
    }

    #[test]
    fn test_score_and_agreement_roundtrip() {
        use crate::{Agreement, Score};
        use sba_types::{Block, Certificate, Header, StepVotes, BLOCK_VERSION};

        let candidate = Block::new(
            Header {
                version: BLOCK_VERSION,
                height: 2,
                timestamp: 0,
                prev_block_hash: Hash::from_bytes(b"prev"),
                seed: Hash::from_bytes(b"seed"),
                tx_root: Hash::ZERO,
                state_hash: Hash::ZERO,
                certificate: Certificate::genesis(),
            },
            vec![],
        );

        let score = Score::new(
            &test_keypair(1),
            2,
            Hash::from_bytes(b"lottery"),
            vec![1, 2, 3],
            Hash::from_bytes(b"prev"),
            candidate,
        );
        let frame = encode_gossip(&Payload::Score(Box::new(score.clone()))).unwrap();
        assert_eq!(decode_gossip(&frame).unwrap(), Payload::Score(Box::new(score)));

        let agreement = Agreement::new(
            &test_keypair(2),
            2,
            3,
            Hash::from_bytes(b"winner"),
            StepVotes::empty(),
            StepVotes::empty(),
        );
        let frame = encode_gossip(&Payload::Agreement(Box::new(agreement.clone()))).unwrap();
        assert_eq!(
            decode_gossip(&frame).unwrap(),
            Payload::Agreement(Box::new(agreement))
        );
    }
}
