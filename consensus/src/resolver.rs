//! Response resolution
//!
//! Runs in two phases. [`apply_responses`] performs every state effect of a
//! block on a working copy: answers are recorded, withdrawals are paid and
//! bounties are summed. [`deliver_answers`] then hands each answer to the
//! collaborator with a read-only view of that working copy.

use sibyl_core::{
    Address, Amount, Asset, BlockHash, BlockHeight, RequestId, SibylError, SibylResult,
    Timestamp,
};
use sibyl_state::balances::ESCROW_ACCOUNT;
use sibyl_state::registry::{RequestKind, ResponseType};
use sibyl_state::store::ConsensusState;
use tracing::debug;

use crate::callback::{AnswerCallback, DeliveredAnswer};
use crate::response::decode_responses;
use crate::reward::BlockReward;

/// Outcome of the effects phase
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    /// Answers to deliver, in request order
    pub answers: Vec<DeliveredAnswer>,
    /// Paid withdrawals
    pub withdrawals: Vec<(Address, Amount)>,
    pub reward: BlockReward,
}

/// Record the answers of `request_ids` on `state`
pub fn apply_responses(
    state: &mut ConsensusState,
    request_ids: &[RequestId],
    packed_responses: &[u8],
    height: BlockHeight,
    block: BlockHash,
    now: Timestamp,
) -> SibylResult<Resolution> {
    let types = request_ids
        .iter()
        .map(|id| {
            state
                .requests
                .get(id)
                .map(|r| r.terms.kind.response_type())
                .ok_or(SibylError::RequestNotFound(*id))
        })
        .collect::<SibylResult<Vec<ResponseType>>>()?;
    let values = decode_responses(packed_responses, &types)?;

    let mut resolution = Resolution::default();
    for (id, value) in request_ids.iter().zip(values) {
        let released = state.requests.mark_answered(id, value, height, block)?;
        resolution.reward.add(released.native, released.token);

        let terms = state
            .requests
            .get(id)
            .map(|r| r.terms)
            .ok_or(SibylError::RequestNotFound(*id))?;

        match terms.kind {
            RequestKind::Withdrawal { beneficiary } => {
                let amount = Amount::new(value.as_uint());
                state.stakes.withdraw(&beneficiary, amount, now)?;
                state
                    .balances
                    .transfer(Asset::Token, ESCROW_ACCOUNT, beneficiary, amount)?;
                debug!(request = %id, beneficiary = %beneficiary, amount = %amount, "Withdrawal resolved");
                resolution.withdrawals.push((beneficiary, amount));
            }
            RequestKind::Answer { .. } => {
                debug!(request = %id, value = ?value, "Request answered");
                resolution.answers.push(DeliveredAnswer {
                    request_id: *id,
                    requester: terms.requester,
                    value,
                    height,
                    block,
                });
            }
        }
    }

    Ok(resolution)
}

/// Deliver answers to the collaborator; the first failure aborts
pub fn deliver_answers(
    view: &ConsensusState,
    answers: &[DeliveredAnswer],
    callbacks: &mut dyn AnswerCallback,
) -> SibylResult<()> {
    for answer in answers {
        callbacks
            .deliver_answer(view, answer)
            .map_err(|e| match e {
                SibylError::CallbackFailed(_) => e,
                other => SibylError::CallbackFailed(other.to_string()),
            })?;
    }
    Ok(())
}
