//! Virtual devices that receive the remapped key presses
//!
//! ```text
//! Resolution { pressed, released } ──► OutputSink::apply
//!                                        1. release every `released`
//!                                        2. press every `pressed`
//! ```

pub mod uinput;

pub use uinput::UinputSink;

use crate::mapping::OutputBinding;
use std::sync::{Arc, Mutex};

#[derive(Debug, thiserror::Error)]
pub enum OutputError {
    #[error("Failed to create virtual device {name}: {source}")]
    Create {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to emit events: {0}")]
    Emit(#[source] std::io::Error),
}

pub trait OutputSink: Send {
    /// Releases first, then presses. Unbound bindings are skipped.
    fn apply(
        &mut self,
        pressed: &[OutputBinding],
        released: &[OutputBinding],
    ) -> Result<(), OutputError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkAction {
    Press(OutputBinding),
    Release(OutputBinding),
}

/// Arguments of one `apply` call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Batch {
    pub pressed: Vec<OutputBinding>,
    pub released: Vec<OutputBinding>,
}

/// Sink that only records what it was asked to do
///
/// Clones share the same log, so a test can keep one and hand the other to
/// the event loop.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    batches: Arc<Mutex<Vec<Batch>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn batches(&self) -> Vec<Batch> {
        self.batches
            .lock()
            .map(|batches| batches.clone())
            .unwrap_or_default()
    }

    /// Individual presses and releases in the order a device would see them
    pub fn actions(&self) -> Vec<SinkAction> {
        let mut actions = Vec::new();
        for batch in self.batches() {
            let released = batch.released.into_iter().filter(|b| !b.is_unbound());
            actions.extend(released.map(SinkAction::Release));
            let pressed = batch.pressed.into_iter().filter(|b| !b.is_unbound());
            actions.extend(pressed.map(SinkAction::Press));
        }
        actions
    }

    /// Bindings currently held according to the recorded actions
    pub fn held(&self) -> Vec<OutputBinding> {
        let mut held = Vec::new();
        for action in self.actions() {
            match action {
                SinkAction::Press(b) if !held.contains(&b) => held.push(b),
                SinkAction::Release(b) => held.retain(|h| *h != b),
                _ => {}
            }
        }
        held
    }
}

impl OutputSink for RecordingSink {
    fn apply(
        &mut self,
        pressed: &[OutputBinding],
        released: &[OutputBinding],
    ) -> Result<(), OutputError> {
        if let Ok(mut batches) = self.batches.lock() {
            batches.push(Batch {
                pressed: pressed.to_vec(),
                released: released.to_vec(),
            });
        }
        Ok(())
    }
}
