//! Built-in default profiles, one per supported device model

use super::error::StoreError;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceModel {
    Classic,
    Cyborg,
    Cryo,
    CyborgTansy,
    ClassicTansy,
    CryoLefty,
    Cyborg2,
    Keyzen,
}

impl DeviceModel {
    pub fn from_product_id(product_id: u16) -> Option<Self> {
        match product_id {
            3903 => Some(DeviceModel::Classic),
            4284 => Some(DeviceModel::Cyborg),
            4355 => Some(DeviceModel::Cryo),
            4412 => Some(DeviceModel::CyborgTansy),
            4498 => Some(DeviceModel::ClassicTansy),
            4626 => Some(DeviceModel::CryoLefty),
            4855 => Some(DeviceModel::Cyborg2),
            5098 => Some(DeviceModel::Keyzen),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            DeviceModel::Classic => "classic",
            DeviceModel::Cyborg => "cyborg",
            DeviceModel::Cryo => "cryo",
            DeviceModel::CyborgTansy => "cyborg-tansy",
            DeviceModel::ClassicTansy => "classic-tansy",
            DeviceModel::CryoLefty => "cryo-lefty",
            DeviceModel::Cyborg2 => "cyborg2",
            DeviceModel::Keyzen => "keyzen",
        }
    }

    /// Default profile document for this model, in the current schema
    pub fn template(&self) -> &'static str {
        match self {
            DeviceModel::Classic => include_str!("templates/classic.json"),
            DeviceModel::Cyborg => include_str!("templates/cyborg.json"),
            DeviceModel::Cryo => include_str!("templates/cryo.json"),
            DeviceModel::CyborgTansy => include_str!("templates/cyborg-tansy.json"),
            DeviceModel::ClassicTansy => include_str!("templates/classic-tansy.json"),
            DeviceModel::CryoLefty => include_str!("templates/cryo-lefty.json"),
            DeviceModel::Cyborg2 => include_str!("templates/cyborg2.json"),
            DeviceModel::Keyzen => include_str!("templates/keyzen.json"),
        }
    }
}

impl fmt::Display for DeviceModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

pub fn template_for(product_id: u16) -> Result<&'static str, StoreError> {
    DeviceModel::from_product_id(product_id)
        .map(|model| model.template())
        .ok_or(StoreError::UnknownDevice(product_id))
}
