//! # handoff-settings
//!
//! Configuration management with layered sources for the hand-off broker.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`HandoffSettings::default()`]
//! 2. **User file**: `~/.handoff/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `HANDOFF_*` overrides (highest priority)
//!
//! Command-line flags of the binary are applied on top of the loaded value.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn re_exports_work() {
        let _settings = HandoffSettings::default();
        let _path = settings_path();
    }

    #[test]
    fn default_settings_are_valid() {
        let settings = HandoffSettings::default();
        assert_eq!(settings.name, "handoff");
        assert_eq!(settings.server.port, 8000);
        assert_eq!(settings.server.host, "0.0.0.0");
        assert_eq!(settings.broker.max_sessions, 1_000);
        assert_eq!(settings.logging.level, "info");
        assert!(!settings.logging.json);
        settings.validate().unwrap();
    }
}
