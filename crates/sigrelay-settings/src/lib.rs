//! # sigrelay-settings
//!
//! Configuration for the signaling relay, loaded from three layers (in
//! priority order):
//! 1. **Compiled defaults**: [`RelaySettings::default()`]
//! 2. **Settings file**: `~/.sigrelay/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `SIGRELAY_*` / `TELEGRAM_*` overrides
//!
//! # Usage
//!
//! ```no_run
//! let settings = sigrelay_settings::load_settings().unwrap_or_default();
//! println!("listening on port {}", settings.server.port);
//! ```

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;
