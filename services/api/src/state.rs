//! Shared Application State
//!
//! This module defines the `AppState` struct, which holds the configuration,
//! the upstream service clients and the document store.

use crate::{
    config::Config,
    files::FileStore,
    upstream::{ImageGenerator, SessionMinter, WebSearcher},
};
use std::sync::Arc;

/// The shared application state, created once at startup and passed to all handlers.
/// All fields are public to be accessible from other modules.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub sessions: Arc<dyn SessionMinter>,
    pub images: Arc<dyn ImageGenerator>,
    pub search: Arc<dyn WebSearcher>,
    pub files: FileStore,
    /// Instructions used when a session request does not override them.
    pub instructions: Arc<String>,
}
