//! Answer delivery to the requesting collaborator

use sibyl_core::{Address, BlockHash, BlockHeight, RequestId, SibylResult};
use sibyl_state::registry::ResponseValue;
use sibyl_state::store::ConsensusState;

/// One resolved request handed to the collaborator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveredAnswer {
    pub request_id: RequestId,
    /// Account the request routes its answer to
    pub requester: Address,
    pub value: ResponseValue,
    pub height: BlockHeight,
    pub block: BlockHash,
}

/// Receiver of answers produced by accepted blocks
///
/// `deliver_answer` runs after every effect of the block has been applied to
/// the working state, which it sees read-only. An error aborts the block;
/// `rollback` is then called instead of `commit`.
pub trait AnswerCallback {
    fn deliver_answer(&mut self, view: &ConsensusState, answer: &DeliveredAnswer) -> SibylResult<()>;

    /// The block carrying the delivered answers was accepted
    fn commit(&mut self) {}

    /// The block was rejected; forget everything delivered since the last commit
    fn rollback(&mut self) {}
}

/// Collaborator that accepts and ignores every answer
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCallbacks;

impl AnswerCallback for NoCallbacks {
    fn deliver_answer(&mut self, _view: &ConsensusState, _answer: &DeliveredAnswer) -> SibylResult<()> {
        Ok(())
    }
}
