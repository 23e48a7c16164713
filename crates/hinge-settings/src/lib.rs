//! # hinge-settings
//!
//! Configuration with layered sources. Settings are resolved in priority order:
//! 1. **Compiled defaults**: [`HingeSettings::default()`]
//! 2. **User file**: `~/.hinge/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `HINGE_*` overrides (highest priority)
//!
//! There is no global instance: every client loads (or is handed)
//! its own [`HingeSettings`].

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{apply_overrides, deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;
