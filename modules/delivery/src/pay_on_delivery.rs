//! Pay-on-delivery collaborator
//!
//! Holds requester payments in its own account on the engine and registers
//! the matching oracle request with itself as the answer recipient.

use sibyl_consensus::{AnswerCallback, DeliveredAnswer, StakingConsensus};
use sibyl_core::{
    Address, Amount, Asset, RequestId, SibylError, SibylResult, Timestamp, TxContext,
};
use sibyl_state::registry::{RequestTerms, ResponseType};
use sibyl_state::store::ConsensusState;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{info, warn};

use crate::request::{DeliveryRequest, Payout};

/// Durable part of a [`PayOnDelivery`]: requests and unsettled payouts
///
/// Staged answers are never included; they only live within one block.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryBook {
    pub requests: Vec<DeliveryRequest>,
    pub payouts: Vec<Payout>,
}

impl DeliveryBook {
    pub fn to_bytes(&self) -> SibylResult<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> SibylResult<Self> {
        bincode::deserialize(bytes).map_err(|e| SibylError::DeserializationError(e.to_string()))
    }
}

pub struct PayOnDelivery {
    /// Engine account holding escrowed payments
    address: Address,
    requests: Vec<DeliveryRequest>,
    request_index: HashMap<RequestId, usize>,
    intersections: HashMap<RequestId, bool>,
    /// Answers delivered by a block that has not committed yet
    staged: Vec<DeliveredAnswer>,
    payouts: Vec<Payout>,
}

impl PayOnDelivery {
    pub fn new(address: Address) -> Self {
        Self {
            address,
            requests: Vec::new(),
            request_index: HashMap::new(),
            intersections: HashMap::new(),
            staged: Vec::new(),
            payouts: Vec::new(),
        }
    }

    /// Rebuild the book saved by [`Self::book`]
    pub fn restore(address: Address, book: DeliveryBook) -> Self {
        let mut pod = Self::new(address);
        for (index, request) in book.requests.iter().enumerate() {
            pod.request_index.insert(request.request_id, index);
            if let Some(answer) = &request.answer {
                pod.intersections.insert(request.request_id, answer.as_bool());
            }
        }
        pod.requests = book.requests;
        pod.payouts = book.payouts;
        pod
    }

    pub fn book(&self) -> DeliveryBook {
        DeliveryBook {
            requests: self.requests.clone(),
            payouts: self.payouts.clone(),
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// Boolean request paying `beneficiary` on a positive answer
    ///
    /// `value` is the native amount attached by the requester: the delivery
    /// payment plus the mining bounty, which is whatever exceeds
    /// `native_on_delivery`.
    #[allow(clippy::too_many_arguments)]
    pub fn request_pay_on_delivery(
        &mut self,
        engine: &mut StakingConsensus,
        ctx: &TxContext,
        request_id: RequestId,
        token_payment: Amount,
        token_bounty: Amount,
        native_on_delivery: Amount,
        beneficiary: Address,
        value: Amount,
    ) -> SibylResult<usize> {
        self.submit(
            engine,
            ctx,
            request_id,
            ResponseType::Bool,
            token_payment,
            token_bounty,
            native_on_delivery,
            beneficiary,
            value,
        )
    }

    /// Same as [`Self::request_pay_on_delivery`] for an integer answer
    #[allow(clippy::too_many_arguments)]
    pub fn submit_uint_request(
        &mut self,
        engine: &mut StakingConsensus,
        ctx: &TxContext,
        request_id: RequestId,
        token_payment: Amount,
        token_bounty: Amount,
        native_on_delivery: Amount,
        beneficiary: Address,
        value: Amount,
    ) -> SibylResult<usize> {
        self.submit(
            engine,
            ctx,
            request_id,
            ResponseType::Uint,
            token_payment,
            token_bounty,
            native_on_delivery,
            beneficiary,
            value,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn submit(
        &mut self,
        engine: &mut StakingConsensus,
        ctx: &TxContext,
        request_id: RequestId,
        response_type: ResponseType,
        token_payment: Amount,
        token_bounty: Amount,
        native_on_delivery: Amount,
        beneficiary: Address,
        value: Amount,
    ) -> SibylResult<usize> {
        if self.request_index.contains_key(&request_id) || engine.request(&request_id).is_some() {
            return Err(SibylError::DuplicateRequest(request_id));
        }
        let mining = value.checked_sub(native_on_delivery).ok_or_else(|| {
            SibylError::InvalidParameter(format!(
                "attached value {} does not cover delivery payment {}",
                value, native_on_delivery
            ))
        })?;
        let token_total = token_payment
            .checked_add(token_bounty)
            .ok_or_else(|| SibylError::InvalidParameter("token amount overflow".into()))?;

        for (asset, amount) in [(Asset::Token, token_total), (Asset::Native, value)] {
            let available = engine.balance(asset, &ctx.sender);
            if amount > available {
                return Err(SibylError::insufficient(amount.0, available.0));
            }
        }
        engine.transfer(ctx, Asset::Token, self.address, token_total)?;
        engine.transfer(ctx, Asset::Native, self.address, value)?;

        let own = TxContext::at(self.address, ctx.timestamp);
        let terms = RequestTerms::answer(self.address, token_bounty, mining)
            .with_response_type(response_type);
        if let Err(e) = engine.submit_request(&own, request_id, terms) {
            // Hand the escrow back before reporting
            engine.transfer(&own, Asset::Token, ctx.sender, token_total)?;
            engine.transfer(&own, Asset::Native, ctx.sender, value)?;
            return Err(e);
        }

        let index = self.requests.len();
        self.requests.push(DeliveryRequest {
            request_id,
            requester: ctx.sender,
            beneficiary,
            token_payment,
            native_payment: native_on_delivery,
            response_type,
            created_at: ctx.timestamp,
            response_at: 0,
            answer: None,
        });
        self.request_index.insert(request_id, index);

        info!("Pay-on-delivery request {} for {}", request_id, beneficiary);
        Ok(index)
    }

    /// Whether the answer to `request_id` was positive; false while pending
    pub fn did_intersect(&self, request_id: &RequestId) -> bool {
        self.intersections.get(request_id).copied().unwrap_or(false)
    }

    pub fn request_index(&self, request_id: &RequestId) -> Option<usize> {
        self.request_index.get(request_id).copied()
    }

    pub fn requests(&self, index: usize) -> Option<&DeliveryRequest> {
        self.requests.get(index)
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    /// Committed payouts waiting for [`Self::settle`]
    pub fn pending_payouts(&self) -> &[Payout] {
        &self.payouts
    }

    /// Execute committed payouts on the engine, oldest first
    ///
    /// Stops at the first failing transfer; the rest stay queued.
    pub fn settle(&mut self, engine: &mut StakingConsensus) -> SibylResult<usize> {
        let ctx = TxContext::at(self.address, Timestamp::now());
        let mut settled = 0;
        while let Some(payout) = self.payouts.first().copied() {
            engine.transfer(&ctx, payout.asset, payout.to, payout.amount)?;
            self.payouts.remove(0);
            settled += 1;
        }
        Ok(settled)
    }
}

impl AnswerCallback for PayOnDelivery {
    fn deliver_answer(&mut self, _view: &ConsensusState, answer: &DeliveredAnswer) -> SibylResult<()> {
        if answer.requester != self.address {
            return Ok(());
        }
        let index = self.request_index(&answer.request_id).ok_or_else(|| {
            SibylError::CallbackFailed(format!("unknown delivery request {}", answer.request_id))
        })?;
        let expected = self.requests[index].response_type;
        if answer.value.response_type() != expected {
            return Err(SibylError::CallbackFailed(format!(
                "request {} expects a {:?} answer",
                answer.request_id, expected
            )));
        }
        self.staged.push(answer.clone());
        Ok(())
    }

    fn commit(&mut self) {
        for answer in std::mem::take(&mut self.staged) {
            let Some(index) = self.request_index(&answer.request_id) else {
                warn!("Dropping answer for unknown request {}", answer.request_id);
                continue;
            };
            let request = &mut self.requests[index];
            request.response_at = answer.height.0;
            request.answer = Some(answer.value);
            let payouts = request.payouts(&answer.value);

            let intersected = answer.value.as_bool();
            self.intersections.insert(answer.request_id, intersected);
            self.payouts.extend(payouts);
            info!(
                "Intersect response for {}: {}",
                answer.request_id, intersected
            );
        }
    }

    fn rollback(&mut self) {
        self.staged.clear();
    }
}
