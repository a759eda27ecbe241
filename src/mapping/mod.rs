//! Profile documents and their translation into output actions.
//!
//! ```text
//! <name>.json ──► migration::parse_document ──► ProfileDocument
//!                                                   │ compile
//!                                                   ▼
//!              RawEvent ──────────────────► CompiledMapping ──► Resolution
//! ```

pub mod codes;
pub mod engine;
pub mod error;
pub mod mapping_types;
pub mod migration;

pub use engine::{CompiledMapping, HatKey, Resolution, ResolutionState};
pub use error::MappingError;
pub use mapping_types::{
    AxisBinding, AxisSide, BindingSlot, HatBinding, HatDirection, KeyMode, OutputBinding,
    ProfileDocument, RawEvent, RawEventKind, WindowMatch,
};
pub use migration::{parse_document, ParsedDocument};
