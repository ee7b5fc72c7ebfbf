//! SIBYL State Management
//! 
//! Owns every registry the consensus engine mutates: the stake cache, the
//! request registry, the block ledger and the balance book. All of them are
//! aggregated in [`ConsensusState`] so a block can be applied to a working
//! copy and committed or dropped as a unit.

pub mod balances;
pub mod stake;
pub mod registry;
pub mod ledger;
pub mod custody;
pub mod store;
pub mod snapshot;
pub mod persistent;

pub use balances::*;
pub use stake::*;
pub use registry::*;
pub use ledger::*;
pub use custody::*;
pub use store::*;
pub use snapshot::*;
pub use persistent::*;
