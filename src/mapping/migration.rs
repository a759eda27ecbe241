//! Profile document parsing with fallback to the legacy schema
//!
//! The first document format stored exactly one [`OutputBinding`] per position.
//! A document that is valid JSON but fails the current schema with a type
//! error is re-read under that format and every binding becomes a one-element
//! list.

use super::error::MappingError;
use super::mapping_types::{
    AxisBinding, HatBinding, OutputBinding, ProfileDocument, WindowMatch,
};
use serde::Deserialize;
use serde_json::error::Category;
use std::collections::BTreeMap;
use tracing::debug;

#[derive(Debug, Default, Deserialize)]
struct LegacyAxis {
    #[serde(default)]
    positive_key: OutputBinding,
    #[serde(default)]
    negative_key: OutputBinding,
}

#[derive(Debug, Default, Deserialize)]
struct LegacyHat {
    #[serde(default)]
    up: OutputBinding,
    #[serde(default)]
    down: OutputBinding,
    #[serde(default)]
    left: OutputBinding,
    #[serde(default)]
    right: OutputBinding,
}

#[derive(Debug, Default, Deserialize)]
struct LegacyDocument {
    #[serde(rename = "window_profiles", default)]
    window_match: WindowMatch,
    #[serde(rename = "axes_deadzone", default)]
    axis_deadzone: i16,
    #[serde(default)]
    axes: BTreeMap<u8, LegacyAxis>,
    #[serde(default)]
    buttons: BTreeMap<u8, OutputBinding>,
    #[serde(default)]
    hats: BTreeMap<u8, LegacyHat>,
}

impl From<LegacyDocument> for ProfileDocument {
    fn from(legacy: LegacyDocument) -> Self {
        let axes = legacy
            .axes
            .into_iter()
            .map(|(index, axis)| {
                (
                    index,
                    AxisBinding {
                        positive: vec![axis.positive_key],
                        negative: vec![axis.negative_key],
                    },
                )
            })
            .collect();

        let buttons = legacy
            .buttons
            .into_iter()
            .map(|(index, binding)| (index, vec![binding]))
            .collect();

        let hats = legacy
            .hats
            .into_iter()
            .map(|(index, hat)| {
                (
                    index,
                    HatBinding {
                        up: vec![hat.up],
                        down: vec![hat.down],
                        left: vec![hat.left],
                        right: vec![hat.right],
                    },
                )
            })
            .collect();

        ProfileDocument {
            window_match: legacy.window_match,
            axis_deadzone: legacy.axis_deadzone,
            axes,
            buttons,
            hats,
        }
    }
}

/// Result of reading a document from storage
#[derive(Debug, Clone)]
pub struct ParsedDocument {
    pub document: ProfileDocument,
    /// The bytes were in the legacy schema and should be written back
    pub migrated: bool,
}

/// Parses a stored profile, migrating it from the legacy schema when needed.
///
/// Only type mismatches trigger the legacy attempt; syntax errors and
/// truncated input are reported as [`MappingError::Syntax`].
pub fn parse_document(bytes: &[u8]) -> Result<ParsedDocument, MappingError> {
    match serde_json::from_slice::<ProfileDocument>(bytes) {
        Ok(document) => Ok(ParsedDocument {
            document,
            migrated: false,
        }),
        Err(e) if e.classify() == Category::Data => {
            debug!("Current schema rejected document ({}), trying legacy schema", e);
            let legacy: LegacyDocument =
                serde_json::from_slice(bytes).map_err(MappingError::Schema)?;
            Ok(ParsedDocument {
                document: legacy.into(),
                migrated: true,
            })
        }
        Err(e) => Err(MappingError::Syntax(e)),
    }
}
