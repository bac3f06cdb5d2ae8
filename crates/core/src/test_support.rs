use crate::transcript::{RenderSink, Turn, TurnId};
use std::sync::{Arc, Mutex};

#[derive(Debug, Default)]
struct SinkState {
    rendered: Vec<Turn>,
    appends: usize,
    updates: usize,
    statuses: Vec<String>,
}

/// Render sink that keeps everything in memory. Clones share state, so a test
/// can keep a handle after moving one into a controller.
#[derive(Debug, Default, Clone)]
pub(crate) struct MemorySink {
    state: Arc<Mutex<SinkState>>,
}

impl MemorySink {
    pub(crate) fn rendered(&self) -> Vec<Turn> {
        self.state.lock().unwrap().rendered.clone()
    }

    pub(crate) fn appends(&self) -> usize {
        self.state.lock().unwrap().appends
    }

    pub(crate) fn updates(&self) -> usize {
        self.state.lock().unwrap().updates
    }

    pub(crate) fn statuses(&self) -> Vec<String> {
        self.state.lock().unwrap().statuses.clone()
    }

    pub(crate) fn forget(&self, id: TurnId) {
        self.state.lock().unwrap().rendered.retain(|t| t.id != id);
    }
}

impl RenderSink for MemorySink {
    fn append(&mut self, turn: &Turn) {
        let mut state = self.state.lock().unwrap();
        state.appends += 1;
        state.rendered.push(turn.clone());
    }

    fn update(&mut self, turn: &Turn) -> bool {
        let mut state = self.state.lock().unwrap();
        state.updates += 1;
        match state.rendered.iter_mut().find(|t| t.id == turn.id) {
            Some(existing) => {
                *existing = turn.clone();
                true
            }
            None => false,
        }
    }

    fn status_line(&mut self, text: &str) {
        self.state.lock().unwrap().statuses.push(text.to_string());
    }
}
