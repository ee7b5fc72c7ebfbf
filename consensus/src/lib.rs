//! SIBYL Consensus Engine
//! 
//! Accepts blocks co-signed by the diviner committee:
//! - recoverable signatures over a canonical block message
//! - stake-weighted quorum of the active committee
//! - all-or-nothing resolution of the requests a block answers

pub mod message;
pub mod quorum;
pub mod response;
pub mod callback;
pub mod resolver;
pub mod reward;
pub mod engine;

pub use message::*;
pub use quorum::*;
pub use response::*;
pub use callback::*;
pub use resolver::*;
pub use reward::*;
pub use engine::*;
