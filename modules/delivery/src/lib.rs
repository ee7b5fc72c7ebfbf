//! Pay-on-Delivery Module for SIBYL
//! 
//! A requester escrows a payment for a beneficiary together with the oracle
//! request. When the committee answers:
//! - a positive answer releases the payment to the beneficiary
//! - a negative answer refunds the requester
//! - payouts are settled only after the answering block committed

pub mod request;
pub mod pay_on_delivery;

pub use request::*;
pub use pay_on_delivery::*;
