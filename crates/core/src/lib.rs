//! Core of the realtime voice assistant: the typed event model, the
//! transcript assembler, the tool dispatcher and the session lifecycle
//! controller, plus the wire contract and HTTP client of the backend proxy.
//!
//! Nothing in here touches audio devices or sockets directly; those sit
//! behind the traits in [`transport`].

pub mod assembler;
pub mod contract;
pub mod error;
pub mod events;
pub mod lifecycle;
pub mod proxy;
pub mod tools;
pub mod transcript;
pub mod transport;

#[cfg(test)]
mod test_support;

pub use lifecycle::{Command, ConnectionState, SessionConfig, SessionController, SessionPolicy};
