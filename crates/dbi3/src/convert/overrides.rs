//! Per-log conversion overrides.
//!
//! A user may drop a JSON file next to a raw log to correct how that one log
//! converts. The file is named after the log with a leading dot and no
//! extension: `2021_07_04_06_30_10_DBI3.log` pairs with
//! `.2021_07_04_06_30_10_DBI3`.
//!
//! ```json
//! { "altitude_offset": 120.0, "trim_start_time": "20210704063500" }
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use serde::{Deserialize, Deserializer, Serialize};
use tracing::debug;

use super::fields::{AltitudeMode, FieldSelection};
use crate::error::{Error, Result};

/// Format of trim times in override files.
pub const TRIM_TIME_FORMAT: &str = "%Y%m%d%H%M%S";

/// Conversion settings for a single log. Every key is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MetadataOverride {
    /// Altitude correction in feet, added to every point.
    pub altitude_offset: Option<f64>,
    /// Drop points before this time.
    #[serde(with = "trim_time")]
    pub trim_start_time: Option<NaiveDateTime>,
    /// Drop points after this time.
    #[serde(with = "trim_time")]
    pub trim_end_time: Option<NaiveDateTime>,
    /// Viewer altitude interpretation.
    pub altitudemode: Option<AltitudeMode>,
    /// Draw the track extended down to the ground.
    pub extend_to_ground: Option<bool>,
    /// Show extra fields in metric units.
    pub kml_use_metric: Option<bool>,
    /// Extra fields to include, as a list or a comma separated string.
    #[serde(deserialize_with = "fields_list_or_text")]
    pub kml_fields: Option<FieldSelection>,
    /// Use GPS altitude for track points when available.
    pub prefer_gps: Option<bool>,
    /// One line of text shown with the track, e.g. passenger names.
    pub track_note: Option<String>,
}

impl MetadataOverride {
    /// Path of the override file that belongs to a raw log.
    #[must_use]
    pub fn path_for(raw_log: &Path) -> PathBuf {
        let stem = raw_log
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        raw_log.with_file_name(format!(".{stem}"))
    }

    /// Load the override for a raw log, if one exists.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Conversion`] when the file exists but is unreadable,
    /// is not valid JSON, has unknown keys, or describes an empty trim window.
    pub fn load(raw_log: &Path) -> Result<Option<Self>> {
        let path = Self::path_for(raw_log);
        if !path.is_file() {
            return Ok(None);
        }
        let text = fs::read_to_string(&path).map_err(|e| Error::conversion(&path, e.to_string()))?;
        let ov = Self::from_json(&text).map_err(|reason| Error::conversion(&path, reason))?;
        debug!("Loaded conversion override {}", path.display());
        Ok(Some(ov))
    }

    /// Parse and validate override JSON.
    ///
    /// # Errors
    ///
    /// Returns a description of the first problem found.
    pub fn from_json(text: &str) -> std::result::Result<Self, String> {
        let ov: Self = serde_json::from_str(text).map_err(|e| e.to_string())?;
        ov.validate()?;
        Ok(ov)
    }

    fn validate(&self) -> std::result::Result<(), String> {
        if let (Some(start), Some(end)) = (self.trim_start_time, self.trim_end_time) {
            if start > end {
                return Err(format!(
                    "trim_start_time {} is after trim_end_time {}",
                    start.format(TRIM_TIME_FORMAT),
                    end.format(TRIM_TIME_FORMAT)
                ));
            }
        }
        if let Some(offset) = self.altitude_offset {
            if !offset.is_finite() {
                return Err("altitude_offset must be a finite number".to_string());
            }
        }
        Ok(())
    }

    /// Whether a point time falls inside the trim window.
    #[must_use]
    pub fn keeps(&self, time: &NaiveDateTime) -> bool {
        self.trim_start_time.map_or(true, |start| *time >= start)
            && self.trim_end_time.map_or(true, |end| *time <= end)
    }
}

fn fields_list_or_text<'de, D>(deserializer: D) -> std::result::Result<Option<FieldSelection>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Fields {
        List(Vec<String>),
        Text(String),
    }

    match Option::<Fields>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Fields::List(names)) => FieldSelection::from_names(names)
            .map(Some)
            .map_err(serde::de::Error::custom),
        Some(Fields::Text(text)) => text.parse().map(Some).map_err(serde::de::Error::custom),
    }
}

mod trim_time {
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer};

    use super::TRIM_TIME_FORMAT;

    pub fn serialize<S: Serializer>(
        value: &Option<NaiveDateTime>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(dt) => serializer.serialize_str(&dt.format(TRIM_TIME_FORMAT).to_string()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<NaiveDateTime>, D::Error> {
        match Option::<String>::deserialize(deserializer)? {
            None => Ok(None),
            Some(text) => NaiveDateTime::parse_from_str(text.trim(), TRIM_TIME_FORMAT)
                .map(Some)
                .map_err(|e| {
                    serde::de::Error::custom(format!(
                        "invalid trim time '{text}', expected YYYYMMDDhhmmss: {e}"
                    ))
                }),
        }
    }
}
