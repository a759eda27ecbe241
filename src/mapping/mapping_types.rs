//! Shared data types for the mapping engine
//!
//! Contains the raw device event, the output binding and the editable profile
//! document together with its edit operations. The JSON layout of
//! [`ProfileDocument`] is the on-disk format of a profile:
//!
//! ```text
//! {
//!   "window_profiles": { "name": "^Steam$", "class": "steam" },
//!   "axes_deadzone": 12000,
//!   "axes":    { "0": { "positive_key": [..], "negative_key": [..] } },
//!   "buttons": { "5": [ { "code": 30, "mode": 0 } ] },
//!   "hats":    { "0": { "up": [..], "down": [..], "left": [..], "right": [..] } }
//! }
//! ```

use super::error::MappingError;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Source of a raw device event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RawEventKind {
    Button,
    Axis,
    Hat,
}

/// A single normalized change reported by the physical device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawEvent {
    #[serde(rename = "type")]
    pub kind: RawEventKind,
    pub index: u8,
    pub value: i16,
}

impl RawEvent {
    pub fn button(index: u8, value: i16) -> Self {
        Self {
            kind: RawEventKind::Button,
            index,
            value,
        }
    }

    pub fn axis(index: u8, value: i16) -> Self {
        Self {
            kind: RawEventKind::Axis,
            index,
            value,
        }
    }

    pub fn hat(index: u8, value: i16) -> Self {
        Self {
            kind: RawEventKind::Hat,
            index,
            value,
        }
    }
}

/// Virtual device an output code is injected into
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum KeyMode {
    #[default]
    Keyboard,
    Mouse,
}

impl TryFrom<u8> for KeyMode {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(KeyMode::Keyboard),
            1 => Ok(KeyMode::Mouse),
            other => Err(format!("invalid key mode {}", other)),
        }
    }
}

impl From<KeyMode> for u8 {
    fn from(mode: KeyMode) -> Self {
        match mode {
            KeyMode::Keyboard => 0,
            KeyMode::Mouse => 1,
        }
    }
}

impl fmt::Display for KeyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyMode::Keyboard => write!(f, "keyboard"),
            KeyMode::Mouse => write!(f, "mouse"),
        }
    }
}

/// One synthesized output. `code == 0` means "unbound" and is never emitted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OutputBinding {
    pub code: u16,
    pub mode: KeyMode,
}

impl OutputBinding {
    pub const UNBOUND: OutputBinding = OutputBinding {
        code: 0,
        mode: KeyMode::Keyboard,
    };

    pub fn keyboard(code: u16) -> Self {
        Self {
            code,
            mode: KeyMode::Keyboard,
        }
    }

    pub fn mouse(code: u16) -> Self {
        Self {
            code,
            mode: KeyMode::Mouse,
        }
    }

    pub fn is_unbound(&self) -> bool {
        self.code == 0
    }
}

/// Accepts `null` wherever a collection is expected.
fn nullable<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AxisBinding {
    #[serde(rename = "positive_key", default, deserialize_with = "nullable")]
    pub positive: Vec<OutputBinding>,
    #[serde(rename = "negative_key", default, deserialize_with = "nullable")]
    pub negative: Vec<OutputBinding>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HatBinding {
    #[serde(default, deserialize_with = "nullable")]
    pub up: Vec<OutputBinding>,
    #[serde(default, deserialize_with = "nullable")]
    pub down: Vec<OutputBinding>,
    #[serde(default, deserialize_with = "nullable")]
    pub left: Vec<OutputBinding>,
    #[serde(default, deserialize_with = "nullable")]
    pub right: Vec<OutputBinding>,
}

impl HatBinding {
    pub fn get(&self, direction: HatDirection) -> &[OutputBinding] {
        match direction {
            HatDirection::Up => &self.up,
            HatDirection::Down => &self.down,
            HatDirection::Left => &self.left,
            HatDirection::Right => &self.right,
        }
    }

    fn get_mut(&mut self, direction: HatDirection) -> &mut Vec<OutputBinding> {
        match direction {
            HatDirection::Up => &mut self.up,
            HatDirection::Down => &mut self.down,
            HatDirection::Left => &mut self.left,
            HatDirection::Right => &mut self.right,
        }
    }
}

/// Decoded hat switch position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum HatDirection {
    Up,
    Right,
    Down,
    Left,
}

impl HatDirection {
    pub const ALL: [HatDirection; 4] = [
        HatDirection::Up,
        HatDirection::Right,
        HatDirection::Down,
        HatDirection::Left,
    ];

    /// Decodes the hat bitmask. Combinations (diagonals) have no direction.
    pub fn from_raw(value: i16) -> Option<Self> {
        match value {
            1 => Some(HatDirection::Up),
            2 => Some(HatDirection::Right),
            4 => Some(HatDirection::Down),
            8 => Some(HatDirection::Left),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HatDirection::Up => "up",
            HatDirection::Right => "right",
            HatDirection::Down => "down",
            HatDirection::Left => "left",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|d| d.as_str() == name)
    }
}

impl fmt::Display for HatDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AxisSide {
    Positive,
    Negative,
}

/// Addresses one binding list inside a profile: kind plus sub-position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindingSlot {
    Button,
    Axis(AxisSide),
    Hat(HatDirection),
}

impl BindingSlot {
    /// Parses the `(kind, subkey)` pair used by editors, e.g. `("hat", "up")`.
    /// Buttons ignore the subkey.
    pub fn parse(kind: &str, subkey: &str) -> Result<Self, MappingError> {
        let unknown_subkey = || MappingError::UnknownSubkey {
            kind: kind.to_string(),
            subkey: subkey.to_string(),
        };
        match kind {
            "button" => Ok(BindingSlot::Button),
            "axis" => match subkey {
                "positive" => Ok(BindingSlot::Axis(AxisSide::Positive)),
                "negative" => Ok(BindingSlot::Axis(AxisSide::Negative)),
                _ => Err(unknown_subkey()),
            },
            "hat" => HatDirection::parse(subkey)
                .map(BindingSlot::Hat)
                .ok_or_else(unknown_subkey),
            other => Err(MappingError::UnknownKind(other.to_string())),
        }
    }
}

/// Optional window patterns that auto-select the owning profile
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowMatch {
    #[serde(rename = "name", default, skip_serializing_if = "Option::is_none")]
    pub name_pattern: Option<String>,
    #[serde(rename = "class", default, skip_serializing_if = "Option::is_none")]
    pub class_pattern: Option<String>,
}

impl WindowMatch {
    pub fn is_empty(&self) -> bool {
        self.name_pattern.is_none() && self.class_pattern.is_none()
    }
}

/// Editable representation of one profile. Its name is the file stem it was
/// loaded from and is not stored inside the document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileDocument {
    #[serde(rename = "window_profiles", default, deserialize_with = "nullable")]
    pub window_match: WindowMatch,
    #[serde(
        rename = "axes_deadzone",
        default,
        skip_serializing_if = "is_zero"
    )]
    pub axis_deadzone: i16,
    #[serde(default, deserialize_with = "nullable", skip_serializing_if = "BTreeMap::is_empty")]
    pub axes: BTreeMap<u8, AxisBinding>,
    #[serde(default, deserialize_with = "nullable", skip_serializing_if = "BTreeMap::is_empty")]
    pub buttons: BTreeMap<u8, Vec<OutputBinding>>,
    #[serde(default, deserialize_with = "nullable", skip_serializing_if = "BTreeMap::is_empty")]
    pub hats: BTreeMap<u8, HatBinding>,
}

fn is_zero(value: &i16) -> bool {
    *value == 0
}

impl ProfileDocument {
    /// Replaces the binding list at one position, creating the position if needed.
    pub fn update_binding(&mut self, slot: BindingSlot, index: u8, bindings: Vec<OutputBinding>) {
        match slot {
            BindingSlot::Button => {
                self.buttons.insert(index, bindings);
            }
            BindingSlot::Axis(side) => {
                let axis = self.axes.entry(index).or_default();
                match side {
                    AxisSide::Positive => axis.positive = bindings,
                    AxisSide::Negative => axis.negative = bindings,
                }
            }
            BindingSlot::Hat(direction) => {
                *self.hats.entry(index).or_default().get_mut(direction) = bindings;
            }
        }
    }

    /// Binding list at one position; empty when the position does not exist.
    pub fn bindings_at(&self, slot: BindingSlot, index: u8) -> &[OutputBinding] {
        let bindings = match slot {
            BindingSlot::Button => self.buttons.get(&index).map(Vec::as_slice),
            BindingSlot::Axis(AxisSide::Positive) => {
                self.axes.get(&index).map(|a| a.positive.as_slice())
            }
            BindingSlot::Axis(AxisSide::Negative) => {
                self.axes.get(&index).map(|a| a.negative.as_slice())
            }
            BindingSlot::Hat(direction) => self.hats.get(&index).map(|h| h.get(direction)),
        };
        bindings.unwrap_or(&[])
    }

    /// Resets every existing position to a single unbound binding. Positions
    /// stay in the document so an editor still shows them.
    pub fn clear_bindings(&mut self) {
        let cleared = || vec![OutputBinding::UNBOUND];
        for axis in self.axes.values_mut() {
            axis.positive = cleared();
            axis.negative = cleared();
        }
        for button in self.buttons.values_mut() {
            *button = cleared();
        }
        for hat in self.hats.values_mut() {
            for direction in HatDirection::ALL {
                *hat.get_mut(direction) = cleared();
            }
        }
    }

    /// Updates the per-profile settings. Empty patterns remove the rule.
    pub fn update_settings(&mut self, name_pattern: &str, class_pattern: &str, deadzone: i16) {
        let pattern = |p: &str| {
            let p = p.trim();
            (!p.is_empty()).then(|| p.to_string())
        };
        self.window_match = WindowMatch {
            name_pattern: pattern(name_pattern),
            class_pattern: pattern(class_pattern),
        };
        self.axis_deadzone = deadzone;
    }

    pub fn to_json(&self) -> Result<Vec<u8>, MappingError> {
        serde_json::to_vec_pretty(self).map_err(MappingError::Serialize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_event_wire_format() {
        let json = serde_json::to_value(RawEvent::hat(0, 4)).unwrap();
        assert_eq!(json["type"], "hat");
        assert_eq!(json["index"], 0);
        assert_eq!(json["value"], 4);
    }

    #[test]
    fn test_parse_document_fields() {
        let json = r#"{
            "window_profiles": {"name": "Steam"},
            "axes_deadzone": 9000,
            "axes": {"1": {"positive_key": [{"code": 32, "mode": 0}], "negative_key": null}},
            "buttons": {"5": [{"code": 30, "mode": 0}, {"code": 272, "mode": 1}]},
            "hats": {"0": {"up": [{"code": 103, "mode": 0}]}}
        }"#;
        let doc: ProfileDocument = serde_json::from_str(json).unwrap();

        assert_eq!(doc.window_match.name_pattern.as_deref(), Some("Steam"));
        assert_eq!(doc.window_match.class_pattern, None);
        assert_eq!(doc.axis_deadzone, 9000);
        assert_eq!(doc.axes[&1].positive, vec![OutputBinding::keyboard(32)]);
        assert!(doc.axes[&1].negative.is_empty());
        assert_eq!(
            doc.buttons[&5],
            vec![OutputBinding::keyboard(30), OutputBinding::mouse(0x110)]
        );
        assert_eq!(doc.hats[&0].up, vec![OutputBinding::keyboard(103)]);
        assert!(doc.hats[&0].left.is_empty());
    }

    #[test]
    fn test_empty_document_defaults() {
        let doc: ProfileDocument = serde_json::from_str("{}").unwrap();
        assert_eq!(doc, ProfileDocument::default());

        let json = serde_json::to_value(&doc).unwrap();
        assert!(json.get("axes_deadzone").is_none());
        assert!(json.get("buttons").is_none());
        assert!(json.get("window_profiles").is_some());
    }

    #[test]
    fn test_invalid_key_mode_rejected() {
        let err = serde_json::from_str::<OutputBinding>(r#"{"code": 30, "mode": 7}"#);
        assert!(err.is_err());
    }

    #[test]
    fn test_binding_slot_parse() {
        assert_eq!(BindingSlot::parse("button", "").unwrap(), BindingSlot::Button);
        assert_eq!(
            BindingSlot::parse("axis", "negative").unwrap(),
            BindingSlot::Axis(AxisSide::Negative)
        );
        assert_eq!(
            BindingSlot::parse("hat", "left").unwrap(),
            BindingSlot::Hat(HatDirection::Left)
        );
        assert!(matches!(
            BindingSlot::parse("axis", "sideways"),
            Err(MappingError::UnknownSubkey { .. })
        ));
        assert!(matches!(
            BindingSlot::parse("wheel", ""),
            Err(MappingError::UnknownKind(_))
        ));
    }

    #[test]
    fn test_update_binding_creates_positions() {
        let mut doc = ProfileDocument::default();
        doc.update_binding(BindingSlot::Button, 3, vec![OutputBinding::keyboard(57)]);
        doc.update_binding(
            BindingSlot::Axis(AxisSide::Negative),
            0,
            vec![OutputBinding::keyboard(30)],
        );
        doc.update_binding(
            BindingSlot::Hat(HatDirection::Right),
            0,
            vec![OutputBinding::keyboard(106), OutputBinding::keyboard(42)],
        );

        assert_eq!(doc.bindings_at(BindingSlot::Button, 3), &[OutputBinding::keyboard(57)]);
        assert_eq!(
            doc.bindings_at(BindingSlot::Axis(AxisSide::Negative), 0),
            &[OutputBinding::keyboard(30)]
        );
        assert!(doc.bindings_at(BindingSlot::Axis(AxisSide::Positive), 0).is_empty());
        assert_eq!(doc.bindings_at(BindingSlot::Hat(HatDirection::Right), 0).len(), 2);
        assert!(doc.bindings_at(BindingSlot::Button, 99).is_empty());
    }

    #[test]
    fn test_clear_bindings_keeps_positions() {
        let mut doc = ProfileDocument::default();
        doc.update_binding(BindingSlot::Button, 1, vec![OutputBinding::keyboard(30)]);
        doc.update_binding(
            BindingSlot::Hat(HatDirection::Up),
            0,
            vec![OutputBinding::keyboard(103)],
        );
        doc.clear_bindings();

        assert_eq!(doc.buttons[&1], vec![OutputBinding::UNBOUND]);
        for direction in HatDirection::ALL {
            assert_eq!(doc.hats[&0].get(direction), &[OutputBinding::UNBOUND]);
        }
    }

    #[test]
    fn test_update_settings() {
        let mut doc = ProfileDocument::default();
        doc.update_settings("  ^Factorio$ ", "", 4000);
        assert_eq!(doc.window_match.name_pattern.as_deref(), Some("^Factorio$"));
        assert_eq!(doc.window_match.class_pattern, None);
        assert_eq!(doc.axis_deadzone, 4000);

        doc.update_settings("", "", 0);
        assert!(doc.window_match.is_empty());
    }

    #[test]
    fn test_hat_direction_decode() {
        assert_eq!(HatDirection::from_raw(1), Some(HatDirection::Up));
        assert_eq!(HatDirection::from_raw(2), Some(HatDirection::Right));
        assert_eq!(HatDirection::from_raw(4), Some(HatDirection::Down));
        assert_eq!(HatDirection::from_raw(8), Some(HatDirection::Left));
        assert_eq!(HatDirection::from_raw(0), None);
        assert_eq!(HatDirection::from_raw(3), None);
        assert_eq!(HatDirection::from_raw(-1), None);
    }
}
