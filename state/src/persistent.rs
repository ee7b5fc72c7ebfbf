//! Persistent ledger backed by sled

use sibyl_core::{BlockHash, Hashable, SibylError, SibylResult};
use sled::{Db, Tree};
use std::path::Path;
use tracing::debug;

use crate::ledger::Block;
use crate::snapshot::StateSnapshot;
use crate::store::ConsensusState;

const META_TREE: &str = "meta";
const BLOCKS_TREE: &str = "blocks";
const SNAPSHOT_KEY: &[u8] = b"snapshot";
const ATTACHMENT_PREFIX: &str = "attachment/";

/// Durable copy of the consensus state plus a block archive
pub struct PersistentLedger {
    db: Db,
    meta: Tree,
    blocks: Tree,
}

impl PersistentLedger {
    pub fn open<P: AsRef<Path>>(path: P) -> SibylResult<Self> {
        let db = sled::open(path).map_err(|e| SibylError::StorageError(e.to_string()))?;
        let meta = db
            .open_tree(META_TREE)
            .map_err(|e| SibylError::StorageError(e.to_string()))?;
        let blocks = db
            .open_tree(BLOCKS_TREE)
            .map_err(|e| SibylError::StorageError(e.to_string()))?;

        Ok(Self { db, meta, blocks })
    }

    /// Persist the full state and archive any blocks not stored yet
    pub fn save(&self, state: &ConsensusState) -> SibylResult<()> {
        self.save_with(state, &[])
    }

    /// Like [`Self::save`], also storing collaborator records keyed by name
    ///
    /// The snapshot and the attachments land in one batch, so a reload never
    /// pairs a state with attachments from another save.
    pub fn save_with(&self, state: &ConsensusState, attachments: &[(&str, Vec<u8>)]) -> SibylResult<()> {
        let snapshot = StateSnapshot::new(state)?;

        let mut batch = sled::Batch::default();
        for hash in state.ledger.chain() {
            if self
                .blocks
                .contains_key(hash.as_bytes())
                .map_err(|e| SibylError::StorageError(e.to_string()))?
            {
                continue;
            }
            if let Some(block) = state.ledger.get(hash) {
                let bytes = bincode::serialize(block)?;
                batch.insert(hash.as_bytes().as_slice(), bytes);
            }
        }
        self.blocks
            .apply_batch(batch)
            .map_err(|e| SibylError::StorageError(e.to_string()))?;

        let mut meta = sled::Batch::default();
        meta.insert(SNAPSHOT_KEY, snapshot.to_bytes()?);
        for (name, bytes) in attachments {
            meta.insert(attachment_key(name), bytes.as_slice());
        }
        self.meta
            .apply_batch(meta)
            .map_err(|e| SibylError::StorageError(e.to_string()))?;

        self.db
            .flush()
            .map_err(|e| SibylError::StorageError(e.to_string()))?;

        debug!(height = snapshot.height, "Persisted consensus state");
        Ok(())
    }

    /// Load the last saved state, `None` for a fresh database
    pub fn load(&self) -> SibylResult<Option<ConsensusState>> {
        match self
            .meta
            .get(SNAPSHOT_KEY)
            .map_err(|e| SibylError::StorageError(e.to_string()))?
        {
            Some(bytes) => {
                let snapshot = StateSnapshot::from_bytes(&bytes)?;
                Ok(Some(snapshot.restore()?))
            }
            None => Ok(None),
        }
    }

    /// Attachment stored by the last [`Self::save_with`] that named it
    pub fn attachment(&self, name: &str) -> SibylResult<Option<Vec<u8>>> {
        Ok(self
            .meta
            .get(attachment_key(name))
            .map_err(|e| SibylError::StorageError(e.to_string()))?
            .map(|bytes| bytes.to_vec()))
    }

    /// Archived block by hash
    pub fn block(&self, hash: &BlockHash) -> SibylResult<Option<Block>> {
        match self
            .blocks
            .get(hash.as_bytes())
            .map_err(|e| SibylError::StorageError(e.to_string()))?
        {
            Some(bytes) => {
                let block: Block = bincode::deserialize(&bytes)
                    .map_err(|e| SibylError::DeserializationError(e.to_string()))?;
                if &block.hash() != hash {
                    return Err(SibylError::DeserializationError(format!(
                        "stored block does not hash to {}",
                        hash
                    )));
                }
                Ok(Some(block))
            }
            None => Ok(None),
        }
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }
}

fn attachment_key(name: &str) -> Vec<u8> {
    format!("{}{}", ATTACHMENT_PREFIX, name).into_bytes()
}
