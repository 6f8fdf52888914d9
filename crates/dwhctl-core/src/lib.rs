//! # dwhctl core
//!
//! Core types, the control plane trait and the two cluster workflows:
//! provisioning and decommissioning.

pub mod types;
pub mod error;
pub mod backend;
pub mod poll;
pub mod progress;
pub mod provision;
pub mod decommission;

#[cfg(test)]
mod testing;

pub use types::*;
pub use error::*;
pub use backend::*;
pub use poll::*;
pub use progress::*;
pub use provision::*;
pub use decommission::*;
