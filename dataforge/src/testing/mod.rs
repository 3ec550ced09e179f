//! Testing utilities.
//!
//! Scripted completion transports for exercising the executor and the
//! completion client without a network. Pair them with
//! [`crate::store::InMemoryRowStore`].

mod mocks;

pub use mocks::{EchoTransport, ScriptedTransport};
