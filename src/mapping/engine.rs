//! Compiled mapping and edge-detecting resolution
//!
//! A [`ProfileDocument`] is flattened into per-index lookup tables once, and
//! every raw device event is then resolved against those tables into the
//! minimal set of outputs to press and release.
//!
//! # Resolution
//!
//! ```text
//! RawEvent ──► CompiledMapping::resolve ──► Resolution { pressed, released }
//!                     │      ▲
//!                     ▼      │
//!               ResolutionState
//!   (last hat value, last axis direction, currently pressed)
//! ```
//!
//! A binding is only ever reported as pressed when it is not already held and
//! only reported as released while it is held, so repeated identical raw
//! events never produce repeated output.

use super::mapping_types::{
    HatDirection, OutputBinding, ProfileDocument, RawEvent, RawEventKind,
};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use tracing::debug;

/// Lookup key for one direction of one hat, rendered as `<index>_<direction>`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HatKey {
    pub index: u8,
    pub direction: HatDirection,
}

impl fmt::Display for HatKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.index, self.direction)
    }
}

/// Read-only projection of a profile used on the event path
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompiledMapping {
    buttons: HashMap<u8, Vec<OutputBinding>>,
    axis_positive: HashMap<u8, Vec<OutputBinding>>,
    axis_negative: HashMap<u8, Vec<OutputBinding>>,
    hats: HashMap<HatKey, Vec<OutputBinding>>,
    deadzone: i16,
}

fn bound(bindings: &[OutputBinding]) -> Vec<OutputBinding> {
    bindings.iter().copied().filter(|b| !b.is_unbound()).collect()
}

impl CompiledMapping {
    /// Builds the lookup tables. Unbound entries (`code == 0`) are dropped here
    /// so they can never reach an output sink.
    pub fn compile(document: &ProfileDocument) -> Self {
        let buttons = document
            .buttons
            .iter()
            .map(|(index, bindings)| (*index, bound(bindings)))
            .collect();

        let mut axis_positive = HashMap::new();
        let mut axis_negative = HashMap::new();
        for (index, axis) in &document.axes {
            axis_positive.insert(*index, bound(&axis.positive));
            axis_negative.insert(*index, bound(&axis.negative));
        }

        let mut hats = HashMap::new();
        for (index, hat) in &document.hats {
            for direction in HatDirection::ALL {
                hats.insert(
                    HatKey {
                        index: *index,
                        direction,
                    },
                    bound(hat.get(direction)),
                );
            }
        }

        Self {
            buttons,
            axis_positive,
            axis_negative,
            hats,
            deadzone: document.axis_deadzone,
        }
    }

    pub fn deadzone(&self) -> i16 {
        self.deadzone
    }

    pub fn button(&self, index: u8) -> &[OutputBinding] {
        self.buttons.get(&index).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn hat(&self, key: HatKey) -> &[OutputBinding] {
        self.hats.get(&key).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Bindings for an axis direction: `1` positive, `-1` negative, `0` none.
    pub fn axis(&self, index: u8, direction: i8) -> &[OutputBinding] {
        let table = match direction {
            d if d > 0 => &self.axis_positive,
            d if d < 0 => &self.axis_negative,
            _ => return &[],
        };
        table.get(&index).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Direction of an axis value for this mapping's deadzone.
    ///
    /// The same threshold is used for engaging and disengaging, so input
    /// hovering exactly at `±deadzone` toggles on every sample. A centered
    /// axis has no direction even with a zero deadzone.
    pub fn axis_direction(&self, value: i16) -> i8 {
        if value == 0 {
            0
        } else if value <= self.deadzone.saturating_neg() {
            -1
        } else if value >= self.deadzone {
            1
        } else {
            0
        }
    }

    /// Resolves one raw event. Never fails; absent table entries simply
    /// produce no output.
    pub fn resolve(&self, state: &mut ResolutionState, event: RawEvent) -> Resolution {
        let mut resolution = Resolution::default();

        match event.kind {
            RawEventKind::Button => {
                let bindings = self.button(event.index);
                if event.value > 0 {
                    state.mark_pressed(bindings, &mut resolution);
                } else {
                    state.mark_released(bindings, &mut resolution);
                }
            }
            RawEventKind::Hat => {
                let previous = state.last_hat.get(&event.index).copied().unwrap_or(0);
                let prev_key = HatDirection::from_raw(previous).map(|direction| HatKey {
                    index: event.index,
                    direction,
                });
                let curr_key = HatDirection::from_raw(event.value).map(|direction| HatKey {
                    index: event.index,
                    direction,
                });

                if prev_key != curr_key {
                    if let Some(key) = prev_key {
                        state.mark_released(self.hat(key), &mut resolution);
                    }
                    if let Some(key) = curr_key {
                        state.mark_pressed(self.hat(key), &mut resolution);
                    }
                }
                state.last_hat.insert(event.index, event.value);
            }
            RawEventKind::Axis => {
                let direction = self.axis_direction(event.value);
                let previous = state
                    .last_axis_direction
                    .get(&event.index)
                    .copied()
                    .unwrap_or(0);

                if direction != previous {
                    if previous != 0 {
                        state.mark_released(self.axis(event.index, previous), &mut resolution);
                    }
                    if direction != 0 {
                        state.mark_pressed(self.axis(event.index, direction), &mut resolution);
                    }
                }
                state.last_axis_direction.insert(event.index, direction);
            }
        }

        if !resolution.is_empty() {
            debug!(
                "Resolved {:?} -> pressed {:?}, released {:?}",
                event, resolution.pressed, resolution.released
            );
        }
        resolution
    }
}

/// Outputs produced by resolving one event
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolution {
    pub pressed: Vec<OutputBinding>,
    pub released: Vec<OutputBinding>,
}

impl Resolution {
    pub fn is_empty(&self) -> bool {
        self.pressed.is_empty() && self.released.is_empty()
    }
}

/// What is physically and virtually held right now
///
/// Only the event path mutates this; it survives profile switches so that
/// bindings pressed under the old profile can still be released.
#[derive(Debug, Default)]
pub struct ResolutionState {
    last_hat: HashMap<u8, i16>,
    last_axis_direction: HashMap<u8, i8>,
    currently_pressed: BTreeSet<OutputBinding>,
}

impl ResolutionState {
    pub fn new() -> Self {
        Self::default()
    }

    fn mark_pressed(&mut self, bindings: &[OutputBinding], resolution: &mut Resolution) {
        for binding in bindings {
            if binding.is_unbound() {
                continue;
            }
            if self.currently_pressed.insert(*binding) {
                resolution.pressed.push(*binding);
            }
        }
    }

    fn mark_released(&mut self, bindings: &[OutputBinding], resolution: &mut Resolution) {
        for binding in bindings {
            if self.currently_pressed.remove(binding) {
                resolution.released.push(*binding);
            }
        }
    }

    pub fn is_pressed(&self, binding: &OutputBinding) -> bool {
        self.currently_pressed.contains(binding)
    }

    pub fn pressed_count(&self) -> usize {
        self.currently_pressed.len()
    }

    /// Returns every held binding as released and forgets all tracked hat and
    /// axis positions, so the next event is evaluated from neutral.
    pub fn release_all(&mut self) -> Vec<OutputBinding> {
        self.last_hat.clear();
        self.last_axis_direction.clear();
        std::mem::take(&mut self.currently_pressed)
            .into_iter()
            .collect()
    }
}
