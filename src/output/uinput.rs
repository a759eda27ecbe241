use super::{OutputError, OutputSink};
use crate::mapping::codes::{self, BTN_LEFT, BTN_MIDDLE, BTN_RIGHT};
use crate::mapping::{KeyMode, OutputBinding};
use evdev::uinput::{VirtualDevice, VirtualDeviceBuilder};
use evdev::{AttributeSet, EventType, InputEvent, Key, RelativeAxisType};
use tracing::{debug, info};

const PRESS: i32 = 1;
const RELEASE: i32 = 0;

/// `<prefix>-<kind>-<last four characters of the device identifier>`
pub fn device_name(prefix: &str, kind: &str, identifier: &str) -> String {
    let chars: Vec<char> = identifier.chars().collect();
    let suffix: String = chars[chars.len().saturating_sub(4)..].iter().collect();
    format!("{}-{}-{}", prefix, kind, suffix)
}

fn is_mouse_button(code: u16) -> bool {
    matches!(code, BTN_LEFT | BTN_RIGHT | BTN_MIDDLE)
}

/// A virtual keyboard and a virtual mouse created through `/dev/uinput`
pub struct UinputSink {
    keyboard: VirtualDevice,
    mouse: VirtualDevice,
}

impl UinputSink {
    pub fn create(prefix: &str, identifier: &str) -> Result<Self, OutputError> {
        let keyboard_name = device_name(prefix, "keyboard", identifier);
        let mut keys = AttributeSet::<Key>::new();
        for code in codes::keyboard_codes() {
            keys.insert(Key::new(code));
        }
        let keyboard = VirtualDeviceBuilder::new()
            .and_then(|builder| builder.name(&keyboard_name).with_keys(&keys))
            .and_then(|builder| builder.build())
            .map_err(|source| OutputError::Create {
                name: keyboard_name.clone(),
                source,
            })?;

        let mouse_name = device_name(prefix, "mouse", identifier);
        let mut buttons = AttributeSet::<Key>::new();
        for code in [BTN_LEFT, BTN_RIGHT, BTN_MIDDLE] {
            buttons.insert(Key::new(code));
        }
        // pointer axes so the device is classified as a mouse
        let mut axes = AttributeSet::<RelativeAxisType>::new();
        axes.insert(RelativeAxisType::REL_X);
        axes.insert(RelativeAxisType::REL_Y);
        let mouse = VirtualDeviceBuilder::new()
            .and_then(|builder| builder.name(&mouse_name).with_keys(&buttons))
            .and_then(|builder| builder.with_relative_axes(&axes))
            .and_then(|builder| builder.build())
            .map_err(|source| OutputError::Create {
                name: mouse_name.clone(),
                source,
            })?;

        info!("Created virtual devices {} and {}", keyboard_name, mouse_name);
        Ok(Self { keyboard, mouse })
    }
}

impl OutputSink for UinputSink {
    fn apply(
        &mut self,
        pressed: &[OutputBinding],
        released: &[OutputBinding],
    ) -> Result<(), OutputError> {
        let mut keyboard_events = Vec::new();
        let mut mouse_events = Vec::new();

        let actions = released
            .iter()
            .map(|b| (b, RELEASE))
            .chain(pressed.iter().map(|b| (b, PRESS)));
        for (binding, value) in actions {
            if binding.is_unbound() {
                continue;
            }
            let event = InputEvent::new(EventType::KEY, binding.code, value);
            match binding.mode {
                KeyMode::Keyboard => keyboard_events.push(event),
                KeyMode::Mouse if is_mouse_button(binding.code) => mouse_events.push(event),
                KeyMode::Mouse => debug!("Ignoring unsupported mouse code {:#x}", binding.code),
            }
        }

        // emit appends the SYN_REPORT
        if !keyboard_events.is_empty() {
            self.keyboard.emit(&keyboard_events).map_err(OutputError::Emit)?;
        }
        if !mouse_events.is_empty() {
            self.mouse.emit(&mouse_events).map_err(OutputError::Emit)?;
        }
        Ok(())
    }
}
