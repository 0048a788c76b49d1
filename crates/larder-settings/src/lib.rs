//! # larder-settings
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`LarderSettings::default()`]
//! 2. **User file**: `~/.larder/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `LARDER_*` overrides (highest priority)
//!
//! Credentials are never read from the settings file; see
//! [`larder_core::ClientCredentials::fatsecret_from_env`].

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, larder_home, load_settings, load_settings_from_path, settings_path};
pub use types::*;
