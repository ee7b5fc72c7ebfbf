//! SIBYL Core Library
//! 
//! Core types, errors, configuration and collaborator traits shared by the
//! SIBYL oracle consensus crates.

pub mod types;
pub mod traits;
pub mod error;
pub mod config;

pub use types::*;
pub use traits::*;
pub use error::*;
pub use config::*;
