//! Physical device input and the remapping event loop
//!
//! Implements a two-stage pipeline plus the handle that runs it:
//!
//! 1. [`event_collector`] - Locates the device, translates evdev events into
//!    [`RawEvent`](crate::mapping::RawEvent)s
//! 2. [`event_processor`] - Resolves raw events against the active profile and
//!    drives the output sink
//! 3. [`controller_handle`] - Spawns both stages and owns their lifecycle
//!
//! # Architecture
//!
//! ```text
//! /dev/input/by-id/*-event-joystick
//!        │ evdev
//!        ▼
//!   DeviceSession ──mpsc(RawEvent)──► run_event_loop ──► OutputSink (uinput)
//!   Locating→Open→Streaming                │
//!                                          └──► EventHub (joystick echo)
//! ```

pub mod controller_handle;
pub mod event_collector;
pub mod event_processor;

pub use controller_handle::{ControllerHandle, ControllerSettings};
pub use event_collector::{DeviceLocator, DeviceSession, EventTranslator, LocatedDevice};
pub use event_processor::run_event_loop;

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Failed to access {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read from device: {0}")]
    Read(#[source] std::io::Error),

    #[error("Failed to change exclusive grab: {0}")]
    Grab(#[source] std::io::Error),
}
