use super::DeviceError;
use crate::mapping::RawEvent;
use crate::persistence::Metadata;
use evdev::{AbsoluteAxisType, Device, EventStream, InputEvent, InputEventKind};
use statum::{machine, state};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const JOYSTICK_SUFFIX: &str = "event-joystick";
const HAT_INDEX: u8 = 0;

/// Maps an absolute axis reading from `[min, max]` onto the full `i16` range.
pub fn scale_axis(value: i32, min: i32, max: i32) -> i16 {
    if max == min {
        return 0;
    }
    let scaled = (i64::from(value) - i64::from(min)) * 65535 / (i64::from(max) - i64::from(min))
        - 32768;
    scaled.clamp(i64::from(i16::MIN), i64::from(i16::MAX)) as i16
}

/// Hat bitmask for one HAT0 axis reading: up=1, right=2, down=4, left=8.
pub fn hat_value(axis: AbsoluteAxisType, value: i32) -> i16 {
    match (axis, value) {
        (AbsoluteAxisType::ABS_HAT0X, -1) => 8,
        (AbsoluteAxisType::ABS_HAT0X, 1) => 2,
        (AbsoluteAxisType::ABS_HAT0Y, -1) => 1,
        (AbsoluteAxisType::ABS_HAT0Y, 1) => 4,
        _ => 0,
    }
}

/// Turns evdev events into [`RawEvent`]s for one device
#[derive(Debug, Clone, Default)]
pub struct EventTranslator {
    // key code -> position in the device's supported key set
    key_index: HashMap<u16, u8>,
    axis_ranges: HashMap<u16, (i32, i32)>,
    invert_axes: bool,
}

impl EventTranslator {
    /// `keys` must be in ascending code order.
    pub fn new(
        keys: impl IntoIterator<Item = u16>,
        axes: impl IntoIterator<Item = (u16, i32, i32)>,
        invert_axes: bool,
    ) -> Self {
        let key_index = keys
            .into_iter()
            .enumerate()
            .filter_map(|(i, code)| u8::try_from(i).ok().map(|i| (code, i)))
            .collect();
        let axis_ranges = axes
            .into_iter()
            .map(|(code, min, max)| (code, (min, max)))
            .collect();
        Self {
            key_index,
            axis_ranges,
            invert_axes,
        }
    }

    pub fn from_device(device: &Device, invert_axes: bool) -> std::io::Result<Self> {
        let keys: Vec<u16> = device
            .supported_keys()
            .map(|keys| keys.iter().map(|key| key.code()).collect())
            .unwrap_or_default();

        let mut axes = Vec::new();
        if let Some(supported) = device.supported_absolute_axes() {
            let state = device.get_abs_state()?;
            for axis in supported.iter() {
                if let Some(info) = state.get(usize::from(axis.0)) {
                    axes.push((axis.0, info.minimum, info.maximum));
                }
            }
        }

        debug!("Device exposes {} keys and {} axes", keys.len(), axes.len());
        Ok(Self::new(keys, axes, invert_axes))
    }

    pub fn set_invert_axes(&mut self, invert_axes: bool) {
        self.invert_axes = invert_axes;
    }

    pub fn translate_key(&self, code: u16, value: i32) -> Option<RawEvent> {
        let index = *self.key_index.get(&code)?;
        Some(RawEvent::button(index, value.clamp(0, 2) as i16))
    }

    pub fn translate_abs(&self, axis: AbsoluteAxisType, value: i32) -> Option<RawEvent> {
        if axis == AbsoluteAxisType::ABS_HAT0X || axis == AbsoluteAxisType::ABS_HAT0Y {
            return Some(RawEvent::hat(HAT_INDEX, hat_value(axis, value)));
        }
        let (min, max) = *self.axis_ranges.get(&axis.0)?;
        let index = u8::try_from(axis.0).ok()?;
        let mut scaled = scale_axis(value, min, max);
        if self.invert_axes {
            scaled = scaled.saturating_neg();
        }
        Some(RawEvent::axis(index, scaled))
    }

    pub fn translate(&self, event: &InputEvent) -> Option<RawEvent> {
        match event.kind() {
            InputEventKind::Key(key) => self.translate_key(key.code(), event.value()),
            InputEventKind::AbsAxis(axis) => self.translate_abs(axis, event.value()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocatedDevice {
    pub path: PathBuf,
    pub product_id: u16,
}

/// Finds the joystick node of a device under `/dev/input/by-id`
#[derive(Debug, Clone)]
pub struct DeviceLocator {
    input_dir: PathBuf,
}

impl DeviceLocator {
    pub fn new(input_dir: impl Into<PathBuf>) -> Self {
        Self {
            input_dir: input_dir.into(),
        }
    }

    /// Sorted `*event-joystick` entries of the input directory
    pub fn joystick_entries(&self) -> Result<Vec<PathBuf>, DeviceError> {
        let entries = std::fs::read_dir(&self.input_dir).map_err(|source| DeviceError::Io {
            path: self.input_dir.clone(),
            source,
        })?;

        let mut paths: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| is_joystick_entry(path))
            .collect();
        paths.sort();
        Ok(paths)
    }

    /// With a serial the entry name must contain it and the device's unique id
    /// must equal it; otherwise the first device with `product_id` wins.
    pub fn find(
        &self,
        serial: Option<&str>,
        product_id: Option<u16>,
    ) -> Result<LocatedDevice, DeviceError> {
        for path in self.joystick_entries()? {
            if let Some(serial) = serial {
                if !entry_mentions(&path, serial) {
                    continue;
                }
            }

            let device = match Device::open(&path) {
                Ok(device) => device,
                Err(e) => {
                    warn!("Failed to open input device {}: {}", path.display(), e);
                    continue;
                }
            };

            let found_product = device.input_id().product();
            let matched = match (serial, product_id) {
                (Some(serial), _) => device.unique_name() == Some(serial),
                (None, Some(product_id)) => found_product == product_id,
                (None, None) => false,
            };
            if matched {
                info!("Found device {} (product id {})", path.display(), found_product);
                return Ok(LocatedDevice {
                    path,
                    product_id: found_product,
                });
            }
        }

        let wanted = match (serial, product_id) {
            (Some(serial), _) => format!("serial '{}'", serial),
            (None, Some(product_id)) => format!("product id {:#06x}", product_id),
            (None, None) => "no serial or product id given".to_string(),
        };
        Err(DeviceError::DeviceNotFound(wanted))
    }
}

fn is_joystick_entry(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.ends_with(JOYSTICK_SUFFIX))
}

fn entry_mentions(path: &Path, serial: &str) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.contains(serial))
}

#[derive(Debug, Clone)]
pub struct CollectorSettings {
    pub serial: Option<String>,
    pub product_id: Option<u16>,
    /// Keep retrying instead of failing when the device is absent
    pub wait: bool,
    pub retry_interval: Duration,
}

#[state]
#[derive(Debug, Clone)]
pub enum SessionState {
    Locating,
    Open,
    Streaming,
}

/// Lifecycle of one physical device
#[machine]
pub struct DeviceSession<S: SessionState> {
    locator: DeviceLocator,
    settings: CollectorSettings,

    // Device-level settings; grab and axis inversion follow them live
    metadata: Option<watch::Receiver<Arc<Metadata>>>,

    located: Option<LocatedDevice>,
    device: Option<Device>,
    stream: Option<EventStream>,
    translator: Option<EventTranslator>,
    grabbed: bool,
}

impl<S: SessionState> DeviceSession<S> {
    pub fn located(&self) -> Option<&LocatedDevice> {
        self.located.as_ref()
    }
}

impl DeviceSession<Locating> {
    pub fn create(locator: DeviceLocator, settings: CollectorSettings) -> Self {
        debug!("Creating device session with settings: {:?}", settings);
        Self::new(locator, settings, None, None, None, None, None, false)
    }

    /// Looks for the device until it is found. Without `wait` a missing
    /// device is an error; `None` means cancelled while waiting.
    pub async fn locate(
        mut self,
        cancel: &CancellationToken,
    ) -> Result<Option<DeviceSession<Open>>, DeviceError> {
        info!("Connecting to device");
        let mut announced = false;

        loop {
            let result = self
                .locator
                .find(self.settings.serial.as_deref(), self.settings.product_id);

            match result {
                Ok(located) => {
                    let device = Device::open(&located.path).map_err(|source| DeviceError::Io {
                        path: located.path.clone(),
                        source,
                    })?;
                    info!("Connected to {}", device.name().unwrap_or("unnamed device"));
                    self.located = Some(located);
                    self.device = Some(device);
                    return Ok(Some(self.transition()));
                }
                // a missing input directory just means nothing is plugged in yet
                Err(e @ (DeviceError::DeviceNotFound(_) | DeviceError::Io { .. }))
                    if self.settings.wait =>
                {
                    if !announced {
                        info!(
                            "{}, retrying every {}s",
                            e,
                            self.settings.retry_interval.as_secs()
                        );
                        announced = true;
                    }
                    tokio::select! {
                        _ = cancel.cancelled() => return Ok(None),
                        _ = tokio::time::sleep(self.settings.retry_interval) => {}
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn set_grab(device: &mut Device, exclusive: bool, grabbed: &mut bool) -> Result<(), DeviceError> {
    if exclusive == *grabbed {
        return Ok(());
    }
    if exclusive {
        device.grab().map_err(DeviceError::Grab)?;
        info!("Exclusive access enabled");
    } else {
        device.ungrab().map_err(DeviceError::Grab)?;
        info!("Exclusive access disabled");
    }
    *grabbed = exclusive;
    Ok(())
}

impl DeviceSession<Open> {
    pub fn product_id(&self) -> Option<u16> {
        self.located.as_ref().map(|l| l.product_id)
    }

    /// Applies the current metadata and switches the device to async reads.
    /// The session keeps following `metadata` while streaming.
    pub fn start_streaming(
        mut self,
        mut metadata: watch::Receiver<Arc<Metadata>>,
    ) -> Result<DeviceSession<Streaming>, DeviceError> {
        let mut device = self
            .device
            .take()
            .ok_or_else(|| DeviceError::DeviceNotFound("session has no open device".into()))?;
        let path = self
            .located
            .as_ref()
            .map(|l| l.path.clone())
            .unwrap_or_default();

        let current = metadata.borrow_and_update().clone();
        let translator = EventTranslator::from_device(&device, current.invert_axes)
            .map_err(|source| DeviceError::Io {
                path: path.clone(),
                source,
            })?;
        set_grab(&mut device, current.exclusive_access, &mut self.grabbed)?;

        let stream = device
            .into_event_stream()
            .map_err(|source| DeviceError::Io { path, source })?;
        self.metadata = Some(metadata);
        self.translator = Some(translator);
        self.stream = Some(stream);
        Ok(self.transition())
    }
}

impl DeviceSession<Streaming> {
    /// Forwards translated events until cancelled or the consumer goes away.
    /// A read error ends the session.
    pub async fn run(
        mut self,
        events: mpsc::Sender<RawEvent>,
        cancel: CancellationToken,
    ) -> Result<(), DeviceError> {
        let (Some(mut stream), Some(mut translator), Some(mut metadata)) = (
            self.stream.take(),
            self.translator.take(),
            self.metadata.take(),
        ) else {
            return Err(DeviceError::DeviceNotFound("session is not streaming".into()));
        };
        let mut metadata_open = true;
        info!("Streaming device events");

        let result = loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Device session shutting down");
                    break Ok(());
                }
                changed = metadata.changed(), if metadata_open => {
                    if changed.is_err() {
                        metadata_open = false;
                        continue;
                    }
                    let current = metadata.borrow_and_update().clone();
                    translator.set_invert_axes(current.invert_axes);
                    if let Err(e) = set_grab(stream.device_mut(), current.exclusive_access, &mut self.grabbed) {
                        error!("{}", e);
                    }
                }
                event = stream.next_event() => {
                    let event = match event {
                        Ok(event) => event,
                        Err(e) => {
                            error!("Device read failed: {}", e);
                            break Err(DeviceError::Read(e));
                        }
                    };
                    let Some(raw) = translator.translate(&event) else {
                        continue;
                    };
                    if events.send(raw).await.is_err() {
                        debug!("Event consumer gone, stopping device session");
                        break Ok(());
                    }
                }
            }
        };

        if self.grabbed {
            if let Err(e) = stream.device_mut().ungrab() {
                warn!("Failed to release exclusive grab: {}", e);
            }
        }
        result
    }
}
