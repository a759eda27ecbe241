//! User-space remapping daemon for joystick-style keypads
//!
//! Raw button, axis and hat events from one evdev device are resolved against
//! the active profile into key and mouse-button presses on virtual uinput
//! devices.
//!
//! ```text
//! evdev ──► controller ──► mapping::CompiledMapping ──► output (uinput)
//!               │                  ▲
//!               ▼                  │ active profile
//!           broadcast        persistence::ProfileStore ◄── watcher / switcher
//! ```

pub mod broadcast;
pub mod config;
pub mod controller;
pub mod mapping;
pub mod output;
pub mod persistence;
pub mod switcher;
