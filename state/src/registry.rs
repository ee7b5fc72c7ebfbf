//! Request registry - pending and answered oracle requests

use serde::{Deserialize, Serialize};
use sibyl_core::{
    Address, Amount, BlockHash, BlockHeight, GovernanceParams, RequestId, SibylError,
    SibylResult, Timestamp,
};
use std::collections::BTreeMap;

/// Wire type of a single response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseType {
    /// One byte, 0 or 1
    Bool,
    /// One 32-byte big-endian word
    Uint,
}

impl ResponseType {
    /// Width in bytes inside a packed payload
    pub fn width(&self) -> usize {
        match self {
            ResponseType::Bool => 1,
            ResponseType::Uint => 32,
        }
    }
}

/// Decoded response value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseValue {
    Bool(bool),
    Uint(u128),
}

impl ResponseValue {
    pub fn response_type(&self) -> ResponseType {
        match self {
            ResponseValue::Bool(_) => ResponseType::Bool,
            ResponseValue::Uint(_) => ResponseType::Uint,
        }
    }

    /// Truthiness: `true`, or a non-zero integer
    pub fn as_bool(&self) -> bool {
        match self {
            ResponseValue::Bool(b) => *b,
            ResponseValue::Uint(v) => *v != 0,
        }
    }

    pub fn as_uint(&self) -> u128 {
        match self {
            ResponseValue::Bool(b) => *b as u128,
            ResponseValue::Uint(v) => *v,
        }
    }
}

/// What a request asks the committee to do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestKind {
    /// A data request answered with a value of `response_type`
    Answer { response_type: ResponseType },
    /// Reward withdrawal for `beneficiary`; answered with the amount to release
    Withdrawal { beneficiary: Address },
}

impl RequestKind {
    pub fn response_type(&self) -> ResponseType {
        match self {
            RequestKind::Answer { response_type } => *response_type,
            RequestKind::Withdrawal { .. } => ResponseType::Uint,
        }
    }

    pub fn is_withdrawal(&self) -> bool {
        matches!(self, RequestKind::Withdrawal { .. })
    }
}

/// Economic terms supplied at registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestTerms {
    pub token_bounty: Amount,
    pub native_bounty: Amount,
    pub min_deposit: Amount,
    /// Account whose answer callback receives the response
    pub requester: Address,
    pub kind: RequestKind,
}

impl RequestTerms {
    /// Boolean data request with the given bounties
    pub fn answer(requester: Address, token_bounty: Amount, native_bounty: Amount) -> Self {
        Self {
            token_bounty,
            native_bounty,
            min_deposit: Amount::ZERO,
            requester,
            kind: RequestKind::Answer {
                response_type: ResponseType::Bool,
            },
        }
    }

    pub fn with_response_type(mut self, response_type: ResponseType) -> Self {
        self.kind = RequestKind::Answer { response_type };
        self
    }

    pub fn with_min_deposit(mut self, min_deposit: Amount) -> Self {
        self.min_deposit = min_deposit;
        self
    }

    /// Check the governance minimums; a zero minimum disables its check
    ///
    /// `min_deposit` is a declared amount compared against `p_min_deposit`
    /// only. Unlike the two bounties it is never escrowed, so registration
    /// does not move it out of the requester's balance.
    pub fn check_minimums(&self, params: &GovernanceParams) -> SibylResult<()> {
        let checks = [
            ("token_bounty", params.xy_xyo_request_bounty_min, self.token_bounty),
            ("native_bounty", params.xy_wei_mining_min, self.native_bounty),
            ("min_deposit", params.p_min_deposit, self.min_deposit),
        ];
        for (field, minimum, provided) in checks {
            if self.kind.is_withdrawal() && field != "native_bounty" {
                continue;
            }
            if minimum > 0 && provided.0 < minimum {
                return Err(SibylError::BelowMinimumBounty {
                    field,
                    minimum,
                    provided: provided.0,
                });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestStatus {
    Pending,
    Answered,
}

/// A registered request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub id: RequestId,
    pub terms: RequestTerms,
    pub created_at: Timestamp,
    pub status: RequestStatus,
    pub response: Option<ResponseValue>,
    pub answered_at: Option<BlockHeight>,
    pub answered_in: Option<BlockHash>,
}

impl Request {
    pub fn is_answered(&self) -> bool {
        self.status == RequestStatus::Answered
    }
}

/// Bounties released by answering a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReleasedBounty {
    pub token: Amount,
    pub native: Amount,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestRegistry {
    requests: BTreeMap<RequestId, Request>,
    order: Vec<RequestId>,
}

impl RequestRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new request; identifiers are never reused
    pub fn register(
        &mut self,
        id: RequestId,
        terms: RequestTerms,
        created_at: Timestamp,
    ) -> SibylResult<&Request> {
        if self.requests.contains_key(&id) {
            return Err(SibylError::DuplicateRequest(id));
        }
        let request = Request {
            id,
            terms,
            created_at,
            status: RequestStatus::Pending,
            response: None,
            answered_at: None,
            answered_in: None,
        };
        self.order.push(id);
        Ok(self.requests.entry(id).or_insert(request))
    }

    /// Record the answer of a pending request and release its bounties
    pub fn mark_answered(
        &mut self,
        id: &RequestId,
        value: ResponseValue,
        height: BlockHeight,
        block: BlockHash,
    ) -> SibylResult<ReleasedBounty> {
        let request = self
            .requests
            .get_mut(id)
            .ok_or(SibylError::RequestNotFound(*id))?;
        if request.status != RequestStatus::Pending {
            return Err(SibylError::RequestAlreadyAnswered(*id));
        }
        request.status = RequestStatus::Answered;
        request.response = Some(value);
        request.answered_at = Some(height);
        request.answered_in = Some(block);
        Ok(ReleasedBounty {
            token: request.terms.token_bounty,
            native: request.terms.native_bounty,
        })
    }

    pub fn get(&self, id: &RequestId) -> Option<&Request> {
        self.requests.get(id)
    }

    pub fn contains(&self, id: &RequestId) -> bool {
        self.requests.contains_key(id)
    }

    pub fn is_answered(&self, id: &RequestId) -> bool {
        self.requests.get(id).map(|r| r.is_answered()).unwrap_or(false)
    }

    /// Pending request ids in registration order
    pub fn pending(&self) -> Vec<RequestId> {
        self.order
            .iter()
            .filter(|id| !self.is_answered(id))
            .copied()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }
}
