//! Process-wide engine settings

use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TessituraError};

static SETTINGS: OnceLock<Settings> = OnceLock::new();

/// Resolution, bounds and note-value generation parameters shared by the whole engine.
///
/// Settings are written at most once per process (see [`Settings::install`]) and read at call
/// time by every operation that needs them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Ticks per quarter note
    pub ppqn: u64,
    pub velocity_max: u8,
    pub velocity_bins: u8,
    /// Velocity assigned to notes decoded from vocabularies that carry none
    pub default_velocity: u8,
    pub note_lower_bound: u8,
    pub note_upper_bound: u8,
    /// Longest generated note value as a multiple of a quarter note
    pub note_value_upper_bound: u64,
    /// Shortest generated note value as a divisor of a quarter note
    pub note_value_lower_bound: u64,
    pub dotted_iterations: u32,
    /// Tuplet ratios as (numerator, denominator), e.g. (3, 2) for triplets
    pub valid_tuplets: Vec<(u64, u64)>,
    pub default_time_signature_numerator: u8,
    pub default_time_signature_denominator: u8,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            ppqn: 24,
            velocity_max: 127,
            velocity_bins: 8,
            default_velocity: 100,
            note_lower_bound: 21,
            note_upper_bound: 108,
            note_value_upper_bound: 4,
            note_value_lower_bound: 8,
            dotted_iterations: 1,
            valid_tuplets: vec![(3, 2)],
            default_time_signature_numerator: 4,
            default_time_signature_denominator: 4,
        }
    }
}

impl Settings {
    /// Returns the installed settings, or the defaults if none were installed.
    pub fn global() -> &'static Settings {
        SETTINGS.get_or_init(Settings::default)
    }

    /// Installs these settings for the rest of the process.
    ///
    /// Fails if settings were already installed or already read.
    pub fn install(self) -> Result<()> {
        SETTINGS
            .set(self)
            .map_err(|_| TessituraError::SettingsInstalled)?;
        tracing::debug!("Installed engine settings");
        Ok(())
    }

    /// Length of a bar in ticks for the given time signature.
    pub fn bar_capacity(&self, numerator: u8, denominator: u8) -> u64 {
        if denominator == 0 {
            return 0;
        }
        self.ppqn * 4 * u64::from(numerator) / u64::from(denominator)
    }

    pub fn default_time_signature(&self) -> (u8, u8) {
        (
            self.default_time_signature_numerator,
            self.default_time_signature_denominator,
        )
    }

    pub fn pitch_range(&self) -> std::ops::RangeInclusive<u8> {
        self.note_lower_bound..=self.note_upper_bound
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bar_capacity() {
        let settings = Settings::default();
        assert_eq!(settings.bar_capacity(4, 4), 96);
        assert_eq!(settings.bar_capacity(6, 8), 72);
        assert_eq!(settings.bar_capacity(3, 2), 144);
        assert_eq!(settings.bar_capacity(4, 0), 0);
    }

    #[test]
    fn test_partial_settings_deserialise_with_defaults() {
        let settings: Settings = serde_json::from_str(r#"{"ppqn": 48}"#).unwrap();
        assert_eq!(settings.ppqn, 48);
        assert_eq!(settings.note_lower_bound, 21);
        assert_eq!(settings.valid_tuplets, vec![(3, 2)]);
    }
}
