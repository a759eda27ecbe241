//! Controller Handle - lifecycle of the device session and the event loop
//!
//! Connecting happens in two steps because the profile store needs the
//! device's product id before the event loop can start:
//!
//! ```text
//! ControllerHandle::connect ──► DeviceSession<Open> ──► (create store)
//!                                        │
//! ControllerHandle::spawn ◄──────────────┘
//!   ├── DeviceSession<Streaming>::run ──mpsc(event_queue)──┐
//!   └── run_event_loop ◄───────────────────────────────────┘
//! ```

use super::event_collector::{CollectorSettings, DeviceLocator, DeviceSession, Open};
use super::event_processor::run_event_loop;
use super::DeviceError;
use crate::broadcast::EventHub;
use crate::output::OutputSink;
use crate::persistence::{Metadata, Resolver};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Settings for the complete controller subsystem
#[derive(Clone, Debug)]
pub struct ControllerSettings {
    pub serial: Option<String>,
    pub product_id: Option<u16>,
    pub wait: bool,
    pub retry_interval: Duration,
    pub input_dir: PathBuf,
    /// Capacity of the queue between the device reader and the event loop
    pub event_queue: usize,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            serial: None,
            product_id: None,
            wait: false,
            retry_interval: Duration::from_secs(2),
            input_dir: PathBuf::from("/dev/input/by-id"),
            event_queue: 128,
        }
    }
}

impl ControllerSettings {
    fn collector_settings(&self) -> CollectorSettings {
        CollectorSettings {
            serial: self.serial.clone(),
            product_id: self.product_id,
            wait: self.wait,
            retry_interval: self.retry_interval,
        }
    }
}

/// Handles of the two running tasks
pub struct ControllerHandle {
    session: JoinHandle<Result<(), DeviceError>>,
    event_loop: JoinHandle<()>,
}

impl ControllerHandle {
    /// Locates and opens the device. `None` when cancelled while waiting.
    pub async fn connect(
        settings: &ControllerSettings,
        cancel: &CancellationToken,
    ) -> Result<Option<DeviceSession<Open>>, DeviceError> {
        let locator = DeviceLocator::new(&settings.input_dir);
        let session = DeviceSession::create(locator, settings.collector_settings());
        session.locate(cancel).await
    }

    /// Starts streaming from the opened device into the event loop.
    pub fn spawn<O: OutputSink + 'static>(
        session: DeviceSession<Open>,
        metadata: watch::Receiver<Arc<Metadata>>,
        resolver: Resolver,
        sink: O,
        hub: EventHub,
        settings: &ControllerSettings,
        cancel: CancellationToken,
    ) -> Result<Self, DeviceError> {
        let streaming = session.start_streaming(metadata)?;

        let (event_sender, event_receiver) = mpsc::channel(settings.event_queue.max(1));
        debug!("Created event channel with capacity {}", settings.event_queue);

        let session_cancel = cancel.clone();
        let session = tokio::spawn(async move {
            let result = streaming.run(event_sender, session_cancel).await;
            if let Err(e) = &result {
                error!("Device session terminated: {}", e);
            }
            result
        });

        let event_loop = tokio::spawn(async move {
            run_event_loop(event_receiver, resolver, sink, hub, cancel).await;
        });

        info!("Controller system started");
        Ok(Self {
            session,
            event_loop,
        })
    }

    /// Waits for both tasks; the session's result is returned.
    pub async fn join(self) -> Result<(), DeviceError> {
        let session = self.session.await;
        if let Err(e) = self.event_loop.await {
            error!("Event loop task failed: {}", e);
        }
        match session {
            Ok(result) => result,
            Err(e) => {
                error!("Device session task failed: {}", e);
                Ok(())
            }
        }
    }
}
