//! Terminal rendering of the transcript.

use parley_core::transcript::{RenderSink, Turn, TurnId};
use std::{collections::HashSet, io::Write};

/// Streams turns onto the terminal. The line of the turn being presented
/// stays open and grows by the newly presented suffix; it is closed when the
/// turn finalizes. Text that was rewritten rather than extended is printed
/// again on a fresh line.
pub struct ConsoleSink<W: Write + Send> {
    out: W,
    known: HashSet<TurnId>,
    finished: HashSet<TurnId>,
    /// The turn whose line is open and what has been printed on it.
    open: Option<(TurnId, String)>,
}

impl<W: Write + Send> ConsoleSink<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            known: HashSet::new(),
            finished: HashSet::new(),
            open: None,
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn close_line(&mut self) {
        if self.open.take().is_some() {
            let _ = writeln!(self.out);
        }
    }

    fn render(&mut self, turn: &Turn) {
        if self.finished.contains(&turn.id) {
            return;
        }
        let line = turn.plain();
        match self.open.take() {
            Some((id, printed)) if id == turn.id && line.starts_with(&printed) => {
                let _ = write!(self.out, "{}", &line[printed.len()..]);
            }
            Some(_) => {
                let _ = writeln!(self.out);
                let _ = write!(self.out, "{line}");
            }
            None => {
                let _ = write!(self.out, "{line}");
            }
        }

        if turn.is_streaming() {
            self.open = Some((turn.id, line));
        } else {
            self.finished.insert(turn.id);
            let _ = writeln!(self.out);
        }
        let _ = self.out.flush();
    }
}

impl<W: Write + Send> RenderSink for ConsoleSink<W> {
    fn append(&mut self, turn: &Turn) {
        self.known.insert(turn.id);
        self.render(turn);
    }

    fn update(&mut self, turn: &Turn) -> bool {
        if !self.known.contains(&turn.id) {
            return false;
        }
        self.render(turn);
        true
    }

    fn status_line(&mut self, text: &str) {
        self.close_line();
        let _ = writeln!(self.out, "-- {text} --");
        let _ = self.out.flush();
    }
}
