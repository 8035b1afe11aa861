//! zmqhub Core Types
//!
//! This crate defines the data structures shared by the relay, its taps and
//! the command-line front end: error kinds, the endpoint model and the
//! envelope header decoded by the capture tap.

mod endpoint;
mod envelope;
mod error;

pub use endpoint::*;
pub use envelope::*;
pub use error::*;
