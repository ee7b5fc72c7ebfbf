//! SIBYL Node Implementation
//!
//! Node library combining all components:
//! - Genesis configuration
//! - Consensus engine and pay-on-delivery book behind one lock
//! - HTTP API

mod api;
mod genesis;
mod node;
mod runtime;

pub use api::*;
pub use genesis::*;
pub use node::*;
pub use runtime::*;
