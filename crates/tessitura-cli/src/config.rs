use std::path::{Path, PathBuf};

use tessitura_core::Settings;
use tessitura_core::tokenisation::{MultiTrackConfig, TokenisationFlags};

#[derive(Debug, Default, serde::Serialize, serde::Deserialize)]
pub struct CliConfig {
    #[serde(default)]
    pub settings: Settings,
    #[serde(default)]
    pub tokeniser: TokenisationFlags,
    #[serde(default)]
    pub multi_track: MultiTrackSection,
}

/// Multi-track options that do not depend on the input file.
#[derive(Debug, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct MultiTrackSection {
    pub fused: bool,
    pub running_time_signature: bool,
}

impl Default for MultiTrackSection {
    fn default() -> Self {
        Self {
            fused: true,
            running_time_signature: false,
        }
    }
}

impl MultiTrackSection {
    /// Step sizes, note values and bin count come from the installed settings.
    pub fn build(&self, tracks: u8) -> MultiTrackConfig {
        MultiTrackConfig {
            tracks,
            fused: self.fused,
            running_time_signature: self.running_time_signature,
            ..Default::default()
        }
    }
}

pub fn config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tessitura")
        .join("config.toml")
}

pub fn load_config(path: Option<&Path>) -> CliConfig {
    let path = path.map_or_else(config_path, Path::to_path_buf);
    match std::fs::read_to_string(&path) {
        Ok(s) => toml::from_str(&s).unwrap_or_else(|e| {
            tracing::warn!(path = %path.display(), error = %e, "Ignoring malformed config");
            CliConfig::default()
        }),
        Err(_) => {
            tracing::debug!(path = %path.display(), "No config file, using defaults");
            CliConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config() {
        let config: CliConfig = toml::from_str(
            r#"
            [settings]
            ppqn = 48

            [tokeniser]
            running_value = true

            [multi_track]
            fused = false
            "#,
        )
        .unwrap();
        assert_eq!(config.settings.ppqn, 48);
        assert_eq!(config.settings.velocity_bins, 8);
        assert!(config.tokeniser.running_value);
        assert!(!config.tokeniser.running_pitch);
        assert!(!config.multi_track.fused);
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let config = load_config(Some(Path::new("/nonexistent/tessitura.toml")));
        assert_eq!(config.settings, Settings::default());
        assert!(config.multi_track.fused);
    }
}
