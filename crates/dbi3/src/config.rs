//! Configuration management for the DBI3 tool.
//!
//! This module provides configuration loading and validation using figment,
//! supporting TOML config files, environment variables, and defaults. The
//! resulting [`Config`] is passed explicitly to each component; nothing here
//! is global.

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::convert::{AltitudeMode, ConversionOptions, FieldSelection, TrackFormat};
use crate::error::{Error, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Application directory under the user config dir.
const APP_DIR_NAME: &str = "dbi3";

/// Default raw log directory under the user's documents.
const LOG_DIR_NAME: &str = "DBI3logs";

/// Default converted output directory, inside the log directory.
const KML_DIR_NAME: &str = "kml";

/// Environment variable prefix. Nested keys are separated by `__`,
/// e.g. `DBI3_DEVICE__COM_PORT`.
const ENV_PREFIX: &str = "DBI3_";

/// Application configuration.
///
/// Configuration is loaded from (in order of precedence, highest first):
/// 1. Environment variables (prefixed with `DBI3_`)
/// 2. TOML config file at `~/.config/dbi3/config.toml`
/// 3. Default values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Where logs and tracks live.
    pub paths: PathsConfig,
    /// Serial link settings.
    pub device: DeviceConfig,
    /// Track conversion defaults.
    pub conversion: ConversionConfig,
    /// Catalog selection filters.
    pub filter: FilterConfig,
}

/// Storage locations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Base directory for raw logs; one subdirectory per device serial.
    /// Defaults to `~/Documents/DBI3logs`
    pub log_path: Option<PathBuf>,
    /// Directory for converted tracks.
    /// Defaults to `~/Documents/DBI3logs/kml`
    pub kml_path: Option<PathBuf>,
}

/// Serial link configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Serial port name. When unset the port is found by USB identity.
    pub com_port: Option<String>,
    /// Line speed.
    pub baud_rate: u32,
    /// USB vendor id used for auto-detection.
    pub usb_vid: u16,
    /// USB product id used for auto-detection.
    pub usb_pid: u16,
    /// Wait for a one-line command reply, in milliseconds.
    pub response_timeout_ms: u64,
    /// Silence that ends a multi-line transfer, in milliseconds.
    pub idle_timeout_ms: u64,
    /// Wait for the acknowledgement after a delete, in milliseconds.
    pub delete_timeout_ms: u64,
}

/// Conversion defaults, overridable per log by a metadata file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversionConfig {
    /// Viewer altitude interpretation.
    pub altitude_mode: AltitudeMode,
    /// Draw the track extended down to the ground.
    pub extend_to_ground: bool,
    /// Extra data fields included in the track.
    pub fields: FieldSelection,
    /// Show extra fields in metric units instead of imperial.
    pub use_metric: bool,
    /// Use GPS altitude for track points when the log has it.
    pub prefer_gps: bool,
    /// Output format.
    pub format: TrackFormat,
}

/// Catalog and conversion list filters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Only download logs newer than the newest stored one.
    pub new_logs_only: bool,
    /// Skip logs too short to hold any GPS record.
    pub skip_invalid: bool,
    /// Ignore logs older than this many days.
    /// Set to 0 for unlimited.
    pub age_limit_days: u32,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            com_port: None, // Auto-detect by USB VID:PID
            baud_rate: 115_200,
            usb_vid: 0x0403, // FTDI FT230X
            usb_pid: 0x6015,
            response_timeout_ms: 2_000,
            idle_timeout_ms: 2_000,
            delete_timeout_ms: 20_000,
        }
    }
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            altitude_mode: AltitudeMode::Absolute,
            extend_to_ground: true,
            fields: FieldSelection::default(),
            use_metric: false,
            prefer_gps: true,
            format: TrackFormat::Kml,
        }
    }
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            new_logs_only: true,
            skip_invalid: true,
            age_limit_days: 0,
        }
    }
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load configuration with an optional custom config path.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load_from(config_path: Option<PathBuf>) -> Result<Self> {
        let config_file = config_path.unwrap_or_else(Self::default_config_path);

        let figment = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_file))
            .merge(Env::prefixed(ENV_PREFIX).split("__"));

        let config: Config = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Get the default configuration file path.
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join(APP_DIR_NAME)
            .join(CONFIG_FILE_NAME)
    }

    /// Get the default raw log directory.
    #[must_use]
    pub fn default_log_dir() -> PathBuf {
        dirs::document_dir()
            .or_else(|| dirs::home_dir().map(|home| home.join("Documents")))
            .unwrap_or_else(|| PathBuf::from("Documents"))
            .join(LOG_DIR_NAME)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("response_timeout_ms", self.device.response_timeout_ms),
            ("idle_timeout_ms", self.device.idle_timeout_ms),
            ("delete_timeout_ms", self.device.delete_timeout_ms),
        ] {
            if value == 0 {
                return Err(Error::ConfigValidation {
                    message: format!("{name} must be greater than 0"),
                });
            }
        }

        if self.device.baud_rate == 0 {
            return Err(Error::ConfigValidation {
                message: "baud_rate must be greater than 0".to_string(),
            });
        }

        if let Some(port) = &self.device.com_port {
            if port.trim().is_empty() {
                return Err(Error::ConfigValidation {
                    message: "com_port must not be empty; remove it to auto-detect".to_string(),
                });
            }
        }

        Ok(())
    }

    /// Get the raw log base directory, resolving defaults if not set.
    #[must_use]
    pub fn log_path(&self) -> PathBuf {
        self.paths
            .log_path
            .clone()
            .unwrap_or_else(Self::default_log_dir)
    }

    /// Get the converted track directory, resolving defaults if not set.
    #[must_use]
    pub fn kml_path(&self) -> PathBuf {
        self.paths
            .kml_path
            .clone()
            .unwrap_or_else(|| self.log_path().join(KML_DIR_NAME))
    }

    /// One-line reply timeout.
    #[must_use]
    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.device.response_timeout_ms)
    }

    /// End-of-transfer silence.
    #[must_use]
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.device.idle_timeout_ms)
    }

    /// Delete acknowledgement timeout.
    #[must_use]
    pub fn delete_timeout(&self) -> Duration {
        Duration::from_millis(self.device.delete_timeout_ms)
    }

    /// Get the age limit as a Duration.
    #[must_use]
    pub fn age_limit(&self) -> Option<chrono::Duration> {
        if self.filter.age_limit_days == 0 {
            None
        } else {
            Some(chrono::Duration::days(i64::from(self.filter.age_limit_days)))
        }
    }

    /// Conversion options seeded from the configured defaults.
    #[must_use]
    pub fn conversion_options(&self) -> ConversionOptions {
        ConversionOptions {
            fields: self.conversion.fields.clone(),
            altitude_mode: self.conversion.altitude_mode,
            extend_to_ground: self.conversion.extend_to_ground,
            use_metric: self.conversion.use_metric,
            prefer_gps: self.conversion.prefer_gps,
            format: self.conversion.format,
            ..ConversionOptions::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert!(config.paths.log_path.is_none());
        assert!(config.device.com_port.is_none());
        assert!(config.filter.new_logs_only);
        assert!(config.filter.skip_invalid);
        assert_eq!(config.conversion.fields, FieldSelection::default());
    }

    #[test]
    fn test_default_device_config() {
        let device = DeviceConfig::default();

        assert_eq!(device.baud_rate, 115_200);
        assert_eq!(device.usb_vid, 0x0403);
        assert_eq!(device.usb_pid, 0x6015);
        assert_eq!(device.response_timeout_ms, 2_000);
        assert_eq!(device.delete_timeout_ms, 20_000);
    }

    #[test]
    fn test_default_conversion_config() {
        let conversion = ConversionConfig::default();

        assert_eq!(conversion.altitude_mode, AltitudeMode::Absolute);
        assert!(conversion.extend_to_ground);
        assert!(!conversion.use_metric);
        assert!(conversion.prefer_gps);
        assert_eq!(conversion.format, TrackFormat::Kml);
    }

    #[test]
    fn test_validate_valid_config() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_validate_zero_timeout() {
        let mut config = Config::default();
        config.device.idle_timeout_ms = 0;

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("idle_timeout_ms"));
    }

    #[test]
    fn test_validate_empty_port() {
        let mut config = Config::default();
        config.device.com_port = Some("  ".to_string());

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("com_port"));
    }

    #[test]
    fn test_kml_path_follows_log_path() {
        let mut config = Config::default();
        config.paths.log_path = Some(PathBuf::from("/data/dbi3"));

        assert_eq!(config.log_path(), PathBuf::from("/data/dbi3"));
        assert_eq!(config.kml_path(), PathBuf::from("/data/dbi3/kml"));

        config.paths.kml_path = Some(PathBuf::from("/tracks"));
        assert_eq!(config.kml_path(), PathBuf::from("/tracks"));
    }

    #[test]
    fn test_default_log_dir() {
        let path = Config::default_log_dir();
        assert!(path.to_string_lossy().contains("DBI3logs"));
    }

    #[test]
    fn test_default_config_path() {
        let path = Config::default_config_path();
        assert!(path.to_string_lossy().contains("dbi3"));
        assert!(path.to_string_lossy().contains("config.toml"));
    }

    #[test]
    fn test_timeouts() {
        let config = Config::default();
        assert_eq!(config.response_timeout(), Duration::from_secs(2));
        assert_eq!(config.idle_timeout(), Duration::from_secs(2));
        assert_eq!(config.delete_timeout(), Duration::from_secs(20));
    }

    #[test]
    fn test_age_limit() {
        let mut config = Config::default();
        assert!(config.age_limit().is_none());

        config.filter.age_limit_days = 7;
        assert_eq!(config.age_limit(), Some(chrono::Duration::days(7)));
    }

    #[test]
    fn test_conversion_options_from_config() {
        let mut config = Config::default();
        config.conversion.use_metric = true;
        config.conversion.fields = FieldSelection::all();

        let options = config.conversion_options();
        assert!(options.use_metric);
        assert_eq!(options.fields, FieldSelection::all());
        assert!(options.altitude_offset_ft.is_none());
    }

    #[test]
    fn test_load_nonexistent_config() {
        // Loading from a nonexistent path should work (uses defaults)
        let result = Config::load_from(Some(PathBuf::from("/nonexistent/config.toml")));
        assert!(result.is_ok());
    }

    #[test]
    fn test_load_toml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[paths]
log_path = "/srv/dbi3"

[device]
com_port = "/dev/ttyUSB3"
idle_timeout_ms = 500

[conversion]
altitude_mode = "relative"
fields = ["SOG", "COG"]
format = "csv"
"#
        )
        .unwrap();

        let config = Config::load_from(Some(file.path().to_path_buf())).unwrap();
        assert_eq!(config.log_path(), PathBuf::from("/srv/dbi3"));
        assert_eq!(config.device.com_port.as_deref(), Some("/dev/ttyUSB3"));
        assert_eq!(config.idle_timeout(), Duration::from_millis(500));
        assert_eq!(
            config.conversion.altitude_mode,
            AltitudeMode::RelativeToGround
        );
        assert_eq!(config.conversion.fields, "SOG,COG".parse().unwrap());
        assert_eq!(config.conversion.format, TrackFormat::Csv);
        // Untouched sections keep their defaults.
        assert_eq!(config.filter, FilterConfig::default());
    }

    #[test]
    fn test_load_rejects_unknown_field_name() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[conversion]\nfields = [\"WIND\"]").unwrap();

        assert!(Config::load_from(Some(file.path().to_path_buf())).is_err());
    }

    #[test]
    fn test_config_serialize() {
        let json = serde_json::to_string(&Config::default()).unwrap();
        assert!(json.contains("response_timeout_ms"));
        assert!(json.contains("new_logs_only"));
    }
}
