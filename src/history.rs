//! Layered, undoable filter stack.
//!
//! Committed layers are not stored separately: they are the live prefix
//! `history[..live_len]` of the durable history log. `history_index` is
//! `live_len - 1`, so `layers().len() == history_index() + 1` holds after every
//! transition by construction.

use crate::state::{FilterValues, Layer};

/// Closed set of store transitions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StackCommand {
    SetWorkingLayer(FilterValues),
    ApplyWorkingLayer,
    Undo,
    Redo,
    ResetAll,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FilterStack {
    history: Vec<FilterValues>,
    live_len: usize,
    working: FilterValues,
}

impl Default for FilterStack {
    fn default() -> Self {
        Self::new()
    }
}

impl FilterStack {
    pub fn new() -> Self {
        Self {
            history: Vec::new(),
            live_len: 0,
            working: FilterValues::IDENTITY,
        }
    }

    /// Pure transition: returns the state after `cmd`, leaving `self` untouched.
    pub fn transition(&self, cmd: StackCommand) -> FilterStack {
        let next = match cmd {
            StackCommand::SetWorkingLayer(values) => Self {
                working: values,
                ..self.clone()
            },
            StackCommand::ApplyWorkingLayer => {
                let mut history = Vec::with_capacity(self.live_len + 1);
                history.extend_from_slice(&self.history[..self.live_len]);
                history.push(self.working);
                Self {
                    live_len: history.len(),
                    history,
                    working: FilterValues::IDENTITY,
                }
            }
            StackCommand::Undo => self.undone(),
            StackCommand::Redo => self.redone(),
            StackCommand::ResetAll => Self::new(),
        };
        tracing::debug!(
            ?cmd,
            history_index = next.history_index(),
            history_len = next.history.len(),
            "filter stack transition"
        );
        next
    }

    fn undone(&self) -> FilterStack {
        match self.live_len {
            0 => self.clone(),
            1 => Self {
                history: self.history.clone(),
                live_len: 0,
                working: FilterValues::IDENTITY,
            },
            n => {
                let Some(previous) = self.slot(n - 2) else {
                    return self.clone();
                };
                Self {
                    history: self.history.clone(),
                    live_len: n - 1,
                    working: previous,
                }
            }
        }
    }

    fn redone(&self) -> FilterStack {
        if self.live_len >= self.history.len() {
            return self.clone();
        }
        let Some(next) = self.slot(self.live_len) else {
            return self.clone();
        };
        Self {
            history: self.history.clone(),
            live_len: self.live_len + 1,
            working: next,
        }
    }

    /// Reads a history entry. A missing slot means the log and cursor have
    /// diverged, which is never recoverable by substituting a default.
    fn slot(&self, index: usize) -> Option<FilterValues> {
        let value = self.history.get(index).copied();
        if value.is_none() {
            tracing::error!(
                index,
                history_len = self.history.len(),
                live_len = self.live_len,
                "history slot missing"
            );
            debug_assert!(
                false,
                "history slot {index} missing (history_len={}, live_len={})",
                self.history.len(),
                self.live_len
            );
        }
        value
    }

    fn step(&mut self, cmd: StackCommand) {
        *self = self.transition(cmd);
    }

    pub fn set_working_layer(&mut self, values: FilterValues) {
        self.step(StackCommand::SetWorkingLayer(values));
    }

    pub fn apply_working_layer(&mut self) {
        self.step(StackCommand::ApplyWorkingLayer);
    }

    pub fn undo(&mut self) {
        self.step(StackCommand::Undo);
    }

    pub fn redo(&mut self) {
        self.step(StackCommand::Redo);
    }

    pub fn reset_all(&mut self) {
        self.step(StackCommand::ResetAll);
    }

    pub fn working_layer(&self) -> FilterValues {
        self.working
    }

    /// Committed values of the visible layers, in commit order.
    pub fn committed(&self) -> &[FilterValues] {
        &self.history[..self.live_len]
    }

    pub fn layers(&self) -> Vec<Layer> {
        self.committed().iter().copied().map(Layer::committed).collect()
    }

    pub fn history(&self) -> &[FilterValues] {
        &self.history
    }

    pub fn history_index(&self) -> isize {
        self.live_len as isize - 1
    }

    pub fn can_undo(&self) -> bool {
        self.live_len > 0
    }

    pub fn can_redo(&self) -> bool {
        self.live_len < self.history.len()
    }

    /// Passes for the render pipeline: committed layers in order, then the
    /// working layer when requested and not identity.
    pub fn render_layers(&self, include_working: bool) -> Vec<FilterValues> {
        let mut out = self.committed().to_vec();
        if include_working && !self.working.is_identity() {
            out.push(self.working);
        }
        out
    }
}
