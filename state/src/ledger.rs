//! Block ledger - the hash-linked chain of accepted blocks

use serde::{Deserialize, Serialize};
use sibyl_core::{
    Address, BlockHash, BlockHeight, Hash, Hashable, RequestId, SibylError, SibylResult,
    Timestamp,
};
use sibyl_crypto::hashing::{hash_multiple, IncrementalHasher};
use std::collections::BTreeMap;

/// Hash the packed block message diviners sign:
/// `previous ‖ height(uint256) ‖ request ids… ‖ response data hash ‖ packed responses`
pub fn block_message_hash(
    previous: &BlockHash,
    height: BlockHeight,
    request_ids: &[RequestId],
    response_data_hash: &Hash,
    packed_responses: &[u8],
) -> Hash {
    let mut hasher = IncrementalHasher::new();
    hasher.update(previous.as_bytes());
    hasher.update(&height.to_word());
    for id in request_ids {
        hasher.update(id.as_bytes());
    }
    hasher.update(response_data_hash.as_bytes());
    hasher.update(packed_responses);
    hasher.finalize()
}

/// An accepted block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub previous: BlockHash,
    pub height: BlockHeight,
    pub request_ids: Vec<RequestId>,
    /// Commitment over the answers; served as the requests' supporting data
    pub response_data_hash: Hash,
    pub packed_responses: Vec<u8>,
    pub creator: Address,
    pub signers: Vec<Address>,
    pub created_at: Timestamp,
}

impl Block {
    /// Zero sentinel returned by lookups that miss
    pub fn empty() -> Self {
        Self {
            previous: Hash::ZERO,
            height: BlockHeight(0),
            request_ids: Vec::new(),
            response_data_hash: Hash::ZERO,
            packed_responses: Vec::new(),
            creator: Address::ZERO,
            signers: Vec::new(),
            created_at: Timestamp::default(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.creator.is_zero() && self.previous.is_zero() && self.request_ids.is_empty()
    }

    pub fn message_hash(&self) -> Hash {
        block_message_hash(
            &self.previous,
            self.height,
            &self.request_ids,
            &self.response_data_hash,
            &self.packed_responses,
        )
    }

    pub fn supporting_data(&self) -> Hash {
        self.response_data_hash
    }
}

impl Hashable for Block {
    fn hash(&self) -> Hash {
        hash_multiple(&[self.message_hash().as_bytes(), self.creator.as_bytes()])
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockLedger {
    blocks: BTreeMap<BlockHash, Block>,
    chain: Vec<BlockHash>,
    by_request: BTreeMap<RequestId, BlockHash>,
    latest: BlockHash,
}

impl BlockLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hash of the newest block, `Hash::ZERO` before the first block
    pub fn latest(&self) -> BlockHash {
        self.latest
    }

    /// Number of accepted blocks
    pub fn len(&self) -> usize {
        self.chain.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chain.is_empty()
    }

    /// Append a block on top of the current head
    pub fn append(&mut self, block: Block) -> SibylResult<BlockHash> {
        if block.previous != self.latest {
            return Err(SibylError::StalePrevious {
                expected: self.latest,
                got: block.previous,
            });
        }
        let hash = block.hash();
        if self.blocks.contains_key(&hash) {
            return Err(SibylError::Internal(format!("block {} already stored", hash)));
        }
        for id in &block.request_ids {
            self.by_request.insert(*id, hash);
        }
        self.blocks.insert(hash, block);
        self.chain.push(hash);
        self.latest = hash;
        Ok(hash)
    }

    pub fn get(&self, hash: &BlockHash) -> Option<&Block> {
        self.blocks.get(hash)
    }

    pub fn latest_block(&self) -> Option<&Block> {
        self.blocks.get(&self.latest)
    }

    /// Block that answered `id`, or the zero sentinel
    pub fn block_for_request(&self, id: &RequestId) -> Block {
        self.by_request
            .get(id)
            .and_then(|hash| self.blocks.get(hash))
            .cloned()
            .unwrap_or_else(Block::empty)
    }

    /// Supporting data hash of the block that answered `id`, or `Hash::ZERO`
    pub fn supporting_data_for_request(&self, id: &RequestId) -> Hash {
        self.by_request
            .get(id)
            .and_then(|hash| self.blocks.get(hash))
            .map(|b| b.supporting_data())
            .unwrap_or(Hash::ZERO)
    }

    /// Block hashes from genesis to head
    pub fn chain(&self) -> &[BlockHash] {
        &self.chain
    }
}
