//! Parley API Library Crate
//!
//! The backend proxy: it mints ephemeral realtime sessions, forwards image
//! generation and web search to their providers, and serves the allow-listed
//! documents. The `api` binary is a thin wrapper around this library.

pub mod config;
pub mod files;
pub mod handlers;
pub mod instructions;
pub mod router;
pub mod state;
pub mod upstream;
