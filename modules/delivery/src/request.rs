//! Escrowed delivery requests

use serde::{Deserialize, Serialize};
use sibyl_core::{Address, Amount, Asset, RequestId, Timestamp};
use sibyl_state::registry::{ResponseType, ResponseValue};

/// A payment waiting on an oracle answer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryRequest {
    pub request_id: RequestId,
    /// Who paid, and who is refunded on a negative answer
    pub requester: Address,
    pub beneficiary: Address,
    /// Token payment released on delivery
    pub token_payment: Amount,
    /// Native payment released on delivery
    pub native_payment: Amount,
    pub response_type: ResponseType,
    pub created_at: Timestamp,
    /// Height of the answering block, 0 while pending
    pub response_at: u64,
    pub answer: Option<ResponseValue>,
}

impl DeliveryRequest {
    pub fn is_answered(&self) -> bool {
        self.answer.is_some()
    }

    /// Transfers owed once `answer` is final
    pub fn payouts(&self, answer: &ResponseValue) -> Vec<Payout> {
        let to = if answer.as_bool() {
            self.beneficiary
        } else {
            self.requester
        };
        [
            (Asset::Token, self.token_payment),
            (Asset::Native, self.native_payment),
        ]
        .into_iter()
        .filter(|(_, amount)| !amount.is_zero())
        .map(|(asset, amount)| Payout {
            request_id: self.request_id,
            to,
            asset,
            amount,
        })
        .collect()
    }
}

/// A committed transfer not yet executed on the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payout {
    pub request_id: RequestId,
    pub to: Address,
    pub asset: Asset,
    pub amount: Amount,
}
