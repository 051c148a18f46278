//! Recent protocol traffic, kept for operators.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Lines kept before the oldest is dropped.
pub const MAX_LOG_LINES: usize = 100;

/// Bounded ring of protocol lines shared by every connection of a session.
#[derive(Clone, Default)]
pub struct ProtocolLog {
    lines: Arc<Mutex<VecDeque<String>>>,
}

impl ProtocolLog {
    pub fn push(&self, line: impl Into<String>) {
        let mut lines = self.lines.lock().unwrap();
        if lines.len() == MAX_LOG_LINES {
            lines.pop_front();
        }
        lines.push_back(line.into());
    }

    /// Oldest first.
    pub fn snapshot(&self) -> Vec<String> {
        self.lines.lock().unwrap().iter().cloned().collect()
    }
}
