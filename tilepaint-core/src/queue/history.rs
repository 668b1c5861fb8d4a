use std::collections::VecDeque;

use crate::changes::TrackedChange;

/// Changes undone and redone together.
pub(super) struct UndoStep {
    pub changes: Vec<TrackedChange>,
}
impl UndoStep {
    fn memory_usage(&self) -> usize {
        self.changes.iter().map(TrackedChange::memory_usage).sum()
    }
    fn finalize(self) {
        for change in self.changes {
            change.finalize();
        }
    }
}

/// Applied steps, oldest first, and reverted steps, most recently reverted last.
pub(super) struct History {
    undo: VecDeque<UndoStep>,
    redo: Vec<UndoStep>,
    max_steps: usize,
}
impl History {
    pub fn new(max_steps: usize) -> Self {
        Self {
            undo: VecDeque::new(),
            redo: Vec::new(),
            max_steps: max_steps.max(1),
        }
    }
    /// A new step. Anything that could be redone is lost.
    pub fn push(&mut self, step: UndoStep) {
        for stale in self.redo.drain(..) {
            stale.finalize();
        }
        self.push_undo(step);
    }
    /// A redone step, or a new one that keeps the redo stack.
    pub fn push_undo(&mut self, step: UndoStep) {
        self.undo.push_back(step);
        while self.undo.len() > self.max_steps {
            if let Some(oldest) = self.undo.pop_front() {
                oldest.finalize();
            }
        }
        log::debug!(
            "history: {} undo, {} redo, holding {}",
            self.undo.len(),
            self.redo.len(),
            human_bytes::human_bytes(self.memory_usage() as f64)
        );
    }
    pub fn pop_undo(&mut self) -> Option<UndoStep> {
        self.undo.pop_back()
    }
    pub fn push_redo(&mut self, step: UndoStep) {
        self.redo.push(step);
    }
    pub fn pop_redo(&mut self) -> Option<UndoStep> {
        self.redo.pop()
    }
    pub fn undo_len(&self) -> usize {
        self.undo.len()
    }
    pub fn redo_len(&self) -> usize {
        self.redo.len()
    }
    pub fn memory_usage(&self) -> usize {
        self.undo
            .iter()
            .chain(self.redo.iter())
            .map(UndoStep::memory_usage)
            .sum()
    }
    /// Finalize everything, making the current document state permanent.
    pub fn clear(&mut self) {
        for step in self.undo.drain(..).chain(self.redo.drain(..)) {
            step.finalize();
        }
    }
}
