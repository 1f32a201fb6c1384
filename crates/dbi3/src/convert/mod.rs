//! Raw log to track conversion.
//!
//! [`convert`] turns one raw log into an [`OutputTrack`]: parse, apply the
//! altitude offset, trim, project onto the selected fields. The batch driver
//! [`ConversionPipeline`] runs that over a device's stored logs and writes
//! KML or CSV files, skipping outputs that already exist.

mod csv;
mod fields;
mod kml;
mod overrides;
mod parser;

pub use fields::{
    c_to_f, ft_to_m, m_to_ft, m_to_mi, mps_to_fpm, mps_to_mph, round_to, AltitudeMode, FieldName,
    FieldSelection, TrackFormat, METERS_PER_FOOT,
};
pub use overrides::{MetadataOverride, TRIM_TIME_FORMAT};
pub use parser::{
    parse_ddmm, parse_log, ParseError, ParseStats, ParsedLog, StartRecord, TrackPoint,
    MISSING_TOPT_C, MISSING_TOPT_F, RECORD_INTERVAL_SECS,
};

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{Duration, NaiveDateTime};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::device::{DeviceSerial, RawLogRecord};
use crate::error::{Error, Result};
use crate::store::{LogStore, StoredLog};

/// Mean earth radius used for distances, in kilometers.
const EARTH_RADIUS_KM: f64 = 6371.0;

/// Settings for one conversion.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConversionOptions {
    /// Extra fields kept on each point.
    pub fields: FieldSelection,
    /// Viewer altitude interpretation.
    pub altitude_mode: AltitudeMode,
    /// Altitude correction in feet.
    pub altitude_offset_ft: Option<f64>,
    /// Draw the track extended down to the ground.
    pub extend_to_ground: bool,
    /// Show extra fields in metric units.
    pub use_metric: bool,
    /// Use GPS altitude for coordinates when the log has it.
    pub prefer_gps: bool,
    /// Text shown with the track.
    pub track_note: Option<String>,
    /// Output format.
    pub format: TrackFormat,
}

impl Default for ConversionOptions {
    fn default() -> Self {
        Self {
            fields: FieldSelection::default(),
            altitude_mode: AltitudeMode::Absolute,
            altitude_offset_ft: None,
            extend_to_ground: true,
            use_metric: false,
            prefer_gps: true,
            track_note: None,
            format: TrackFormat::Kml,
        }
    }
}

impl ConversionOptions {
    /// These options with a log's override applied on top.
    #[must_use]
    pub fn with_override(&self, ov: &MetadataOverride) -> Self {
        let mut options = self.clone();
        if let Some(offset) = ov.altitude_offset {
            options.altitude_offset_ft = Some(offset);
        }
        if let Some(mode) = ov.altitudemode {
            options.altitude_mode = mode;
        }
        if let Some(extrude) = ov.extend_to_ground {
            options.extend_to_ground = extrude;
        }
        if let Some(metric) = ov.kml_use_metric {
            options.use_metric = metric;
        }
        if let Some(fields) = &ov.kml_fields {
            options.fields = fields.clone();
        }
        if let Some(prefer_gps) = ov.prefer_gps {
            options.prefer_gps = prefer_gps;
        }
        if let Some(note) = &ov.track_note {
            options.track_note = Some(note.clone());
        }
        options
    }

    /// The altitude offset in meters.
    #[must_use]
    pub fn altitude_offset_m(&self) -> f64 {
        self.altitude_offset_ft.map_or(0.0, ft_to_m)
    }
}

/// Trip figures for a converted track.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackSummary {
    /// Distance along the track in meters.
    pub distance_m: f64,
    /// Lowest pressure altitude in meters.
    pub min_altitude_m: f64,
    /// Highest pressure altitude in meters.
    pub max_altitude_m: f64,
    /// Highest logged speed over ground in m/s.
    pub max_sog_mps: f64,
    /// Highest speed between consecutive points in m/s.
    pub max_point_speed_mps: f64,
    /// First point time.
    pub start_time: NaiveDateTime,
    /// Last point time.
    pub end_time: NaiveDateTime,
    /// Southern and northern bounds.
    pub lat_range: (f64, f64),
    /// Western and eastern bounds.
    pub lon_range: (f64, f64),
}

impl TrackSummary {
    /// Summarize points. Altitudes are pressure altitudes even when the
    /// track is drawn with GPS altitude.
    ///
    /// Returns `None` for an empty track.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn from_points(points: &[TrackPoint]) -> Option<Self> {
        let first = points.first()?;
        let last = points.last()?;
        let mut summary = Self {
            distance_m: 0.0,
            min_altitude_m: f64::INFINITY,
            max_altitude_m: f64::NEG_INFINITY,
            max_sog_mps: 0.0,
            max_point_speed_mps: 0.0,
            start_time: first.time,
            end_time: last.time,
            lat_range: (first.lat, first.lat),
            lon_range: (first.lon, first.lon),
        };

        let interval = RECORD_INTERVAL_SECS as f64;
        for (i, point) in points.iter().enumerate() {
            summary.min_altitude_m = summary.min_altitude_m.min(point.altitude);
            summary.max_altitude_m = summary.max_altitude_m.max(point.altitude);
            summary.lat_range = (summary.lat_range.0.min(point.lat), summary.lat_range.1.max(point.lat));
            summary.lon_range = (summary.lon_range.0.min(point.lon), summary.lon_range.1.max(point.lon));
            if let Some(sog) = point.field(FieldName::Sog) {
                summary.max_sog_mps = summary.max_sog_mps.max(sog);
            }
            if i > 0 {
                let prev = &points[i - 1];
                let step = distance_m((prev.lat, prev.lon), (point.lat, point.lon));
                summary.distance_m += step;
                summary.max_point_speed_mps = summary.max_point_speed_mps.max(step / interval);
            }
        }
        Some(summary)
    }

    /// Time between the first and last point.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.end_time - self.start_time
    }

    /// Average speed in m/s, zero for a single point.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn average_speed_mps(&self) -> f64 {
        let secs = self.elapsed().num_seconds();
        if secs > 0 {
            self.distance_m / secs as f64
        } else {
            0.0
        }
    }

    /// Center of the bounding box as `(lat, lon)`.
    #[must_use]
    pub fn center(&self) -> (f64, f64) {
        (
            (self.lat_range.0 + self.lat_range.1) / 2.0,
            (self.lon_range.0 + self.lon_range.1) / 2.0,
        )
    }

    /// Diagonal of the bounding box in meters.
    #[must_use]
    pub fn diagonal_m(&self) -> f64 {
        distance_m(
            (self.lat_range.0, self.lon_range.0),
            (self.lat_range.1, self.lon_range.1),
        )
    }
}

/// Great-circle distance between two `(lat, lon)` points in meters.
#[must_use]
pub fn distance_m(origin: (f64, f64), destination: (f64, f64)) -> f64 {
    let (lat1, lon1) = origin;
    let (lat2, lon2) = destination;
    let dlat = (lat2 - lat1).to_radians();
    let dlon = (lon2 - lon1).to_radians();
    let a = (dlat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (dlon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    EARTH_RADIUS_KM * c * 1000.0
}

/// A converted track, ready to render.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutputTrack {
    /// The log header; `None` only for an empty log.
    pub header: Option<StartRecord>,
    /// Serial number tag shown in the track description.
    pub serial: String,
    /// Retained points with only the selected fields.
    pub points: Vec<TrackPoint>,
    /// The effective options, after any override.
    pub options: ConversionOptions,
    /// Parse counts.
    pub stats: ParseStats,
    /// Points dropped by the trim window.
    pub trimmed: usize,
    /// Trip figures; `None` when there are no points.
    pub summary: Option<TrackSummary>,
}

impl OutputTrack {
    /// Whether there is nothing to write.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Whether the log carried GPS altitude.
    #[must_use]
    pub fn has_gps_altitude(&self) -> bool {
        self.points.first().is_some_and(|p| p.gps_altitude.is_some())
    }

    /// Whether coordinates use GPS rather than pressure altitude.
    #[must_use]
    pub fn coord_uses_gps(&self) -> bool {
        self.options.prefer_gps && self.has_gps_altitude()
    }

    /// The altitude placed in a point's coordinate, in meters.
    #[must_use]
    pub fn coord_altitude(&self, point: &TrackPoint) -> f64 {
        if self.coord_uses_gps() {
            point.gps_altitude.unwrap_or(point.altitude)
        } else {
            point.altitude
        }
    }

    /// Render in the configured format.
    ///
    /// # Errors
    ///
    /// Returns an error if the CSV writer fails.
    pub fn render(&self) -> Result<String> {
        match self.options.format {
            TrackFormat::Kml => Ok(kml::render(self)),
            TrackFormat::Csv => csv::render(self),
        }
    }
}

/// Convert one raw log.
///
/// The override, when given, replaces the matching options and supplies the
/// trim window. The altitude offset corrects pressure altitude only. An empty
/// log converts to an empty track.
///
/// # Errors
///
/// Returns [`ParseError`] when a non-empty log has no valid start record.
pub fn convert(
    raw: &RawLogRecord,
    ov: Option<&MetadataOverride>,
    options: &ConversionOptions,
) -> std::result::Result<OutputTrack, ParseError> {
    let options = ov.map_or_else(|| options.clone(), |ov| options.with_override(ov));
    let parsed = parse_log(raw.lines())?;

    let offset_m = options.altitude_offset_m();
    let before_trim = parsed.points.len();
    let mut points: Vec<TrackPoint> = parsed
        .points
        .into_iter()
        .filter(|p| ov.map_or(true, |ov| ov.keeps(&p.time)))
        .map(|mut p| {
            p.altitude += offset_m;
            p
        })
        .collect();
    let trimmed = before_trim - points.len();
    let summary = TrackSummary::from_points(&points);
    for p in &mut points {
        p.fields.retain(|name, _| options.fields.contains(*name));
    }

    let serial = parsed
        .start
        .as_ref()
        .map(|s| s.serial.clone())
        .unwrap_or_default();
    let track = OutputTrack {
        header: parsed.start,
        serial,
        points,
        options,
        stats: parsed.stats,
        trimmed,
        summary,
    };

    debug!(
        "Converted {} points ({} trimmed, {} without fix, {} bad lines)",
        track.points.len(),
        track.trimmed,
        track.stats.no_fix_lines,
        track.stats.bad_lines
    );
    Ok(track)
}

/// Result of converting one log file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversionOutcome {
    /// Output written, with its point count.
    Written {
        /// The output file.
        path: PathBuf,
        /// Points in the track.
        points: usize,
    },
    /// Output already existed.
    Skipped(PathBuf),
    /// The log had no fixed points; nothing written.
    Empty,
    /// The log has no end record; nothing written, so a later run retries it.
    Incomplete,
}

/// Outcome of a batch conversion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConversionReport {
    /// Outputs written.
    pub converted: Vec<PathBuf>,
    /// Outputs that already existed.
    pub skipped: Vec<PathBuf>,
    /// Raw logs with no fixed points.
    pub empty: Vec<PathBuf>,
    /// Raw logs without an end record.
    pub incomplete: Vec<PathBuf>,
    /// Raw logs that failed, with the reason.
    pub failed: Vec<(PathBuf, String)>,
}

impl std::fmt::Display for ConversionReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "converted {}, skipped {}, empty {}, incomplete {}, failed {}",
            self.converted.len(),
            self.skipped.len(),
            self.empty.len(),
            self.incomplete.len(),
            self.failed.len()
        )
    }
}

/// Output file name for a stored log: `YYYYMMDD_HHMM_<SN>.<ext>`.
#[must_use]
pub fn output_name(log: &StoredLog, serial: &DeviceSerial, format: TrackFormat) -> String {
    format!("{}_{}.{}", log.stamp, serial.output_tag(), format.extension())
}

/// Converts a device's stored logs into an output directory.
#[derive(Debug)]
pub struct ConversionPipeline<'a> {
    store: &'a LogStore,
    output_dir: PathBuf,
    options: ConversionOptions,
    force: bool,
}

impl<'a> ConversionPipeline<'a> {
    /// Create a pipeline writing into `output_dir`.
    pub fn new(store: &'a LogStore, output_dir: impl Into<PathBuf>, options: ConversionOptions) -> Self {
        Self {
            store,
            output_dir: output_dir.into(),
            options,
            force: false,
        }
    }

    /// Overwrite outputs that already exist.
    #[must_use]
    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// Convert every stored log of a device that lacks an output.
    ///
    /// Per-log failures are recorded and the run continues.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FilesystemUnavailable`] when the output directory is
    /// missing, or an error if the log directory cannot be listed.
    pub fn run(&self, serial: &DeviceSerial) -> Result<ConversionReport> {
        if !self.output_dir.is_dir() {
            return Err(Error::FilesystemUnavailable {
                path: self.output_dir.clone(),
            });
        }

        let mut report = ConversionReport::default();
        for log in self.store.list_raw_logs(serial)? {
            let output = self
                .output_dir
                .join(output_name(&log, serial, self.options.format));
            match convert_to(&log.path, &output, &self.options, Some(serial), self.force) {
                Ok(ConversionOutcome::Written { path, points }) => {
                    info!("Wrote {} ({} points)", path.display(), points);
                    report.converted.push(path);
                }
                Ok(ConversionOutcome::Skipped(path)) => report.skipped.push(path),
                Ok(ConversionOutcome::Empty) => report.empty.push(log.path),
                Ok(ConversionOutcome::Incomplete) => report.incomplete.push(log.path),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!("{}", e);
                    report.failed.push((log.path, e.to_string()));
                }
            }
        }

        info!("Conversion finished: {}", report);
        Ok(report)
    }
}

/// Convert an arbitrary log file, writing `<stem>_DBI3.<ext>` beside it.
///
/// # Errors
///
/// Returns an error if the log or its override cannot be read or converted,
/// or the output cannot be written.
pub fn convert_file(path: &Path, options: &ConversionOptions, force: bool) -> Result<ConversionOutcome> {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let output = path.with_file_name(format!("{stem}_DBI3.{}", options.format.extension()));
    convert_to(path, &output, options, None, force)
}

fn convert_to(
    raw_path: &Path,
    output: &Path,
    options: &ConversionOptions,
    serial: Option<&DeviceSerial>,
    force: bool,
) -> Result<ConversionOutcome> {
    if output.exists() && !force {
        debug!("{} exists, skipping", output.display());
        return Ok(ConversionOutcome::Skipped(output.to_path_buf()));
    }

    let raw = LogStore::read_raw(raw_path)?;
    let ov = MetadataOverride::load(raw_path)?;
    let mut track = convert(&raw, ov.as_ref(), options)
        .map_err(|e| Error::conversion(raw_path, e.to_string()))?;

    if track.header.is_some() && !track.stats.completed() {
        warn!("{} has no end record, skipping", raw_path.display());
        return Ok(ConversionOutcome::Incomplete);
    }
    if track.is_empty() {
        info!("{} has no GPS records, nothing to write", raw_path.display());
        return Ok(ConversionOutcome::Empty);
    }
    if let Some(serial) = serial {
        track.serial = serial.output_tag();
    }

    fs::write(output, track.render()?)?;
    Ok(ConversionOutcome::Written {
        path: output.to_path_buf(),
        points: track.points.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::LogCatalogEntry;
    use crate::timestamp::{EncodedTimestamp, FatTimestamp};
    use tempfile::TempDir;

    const START: &str = "FWVER=1.3 SN=SN11005 DATE=2021-07-04 TIME=06:30:00";
    const END: &str = "DATE=2021-07-04 TIME=06:31:00";

    fn data_line(alt: f64) -> String {
        format!(
            "ALT={alt} ROC=0.5 AMBT=20.0 GPSS=0 SOG=2.0 COG=90.0 LONG=09330.0000W \
             LAT=4458.5000N TOPTS=1 TOPT=80.0 BATM=4.01 BRDT=25.0 BAR=980.1"
        )
    }

    /// A log with ten fixed points at 06:30:00, :02, ... :18.
    fn ten_point_log() -> RawLogRecord {
        let mut lines = vec![START.to_string()];
        for i in 0..10 {
            lines.push(data_line(300.0 + f64::from(i)));
        }
        lines.push(END.to_string());
        RawLogRecord::from_lines(lines)
    }

    fn at(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, TRIM_TIME_FORMAT).unwrap()
    }

    #[test]
    fn test_trim_keeps_bounded_points_with_selected_fields() {
        let ov = MetadataOverride {
            trim_start_time: Some(at("20210704063004")),
            trim_end_time: Some(at("20210704063010")),
            ..MetadataOverride::default()
        };
        let track = convert(&ten_point_log(), Some(&ov), &ConversionOptions::default()).unwrap();

        assert_eq!(track.points.len(), 4);
        assert_eq!(track.trimmed, 6);
        assert_eq!(track.points[0].time, at("20210704063004"));
        assert_eq!(track.points[3].time, at("20210704063010"));
        for p in &track.points {
            let names: Vec<FieldName> = p.fields.keys().copied().collect();
            assert_eq!(names, vec![FieldName::Topt, FieldName::Ambt, FieldName::Diff]);
        }
    }

    #[test]
    fn test_altitude_offset_in_feet() {
        let options = ConversionOptions {
            altitude_offset_ft: Some(10.0),
            ..ConversionOptions::default()
        };
        let plain = convert(&ten_point_log(), None, &ConversionOptions::default()).unwrap();
        let shifted = convert(&ten_point_log(), None, &options).unwrap();

        for (a, b) in plain.points.iter().zip(&shifted.points) {
            assert!((b.altitude - a.altitude - 3.048).abs() < 1e-9);
        }
    }

    #[test]
    fn test_altitude_offset_leaves_gps_altitude() {
        let raw = RawLogRecord::from_lines([
            START.to_string(),
            format!("{} MSLALT=350.0", data_line(300.0)),
            END.to_string(),
        ]);
        let options = ConversionOptions {
            altitude_offset_ft: Some(10.0),
            ..ConversionOptions::default()
        };
        let track = convert(&raw, None, &options).unwrap();

        let p = &track.points[0];
        assert!((p.altitude - 303.048).abs() < 1e-9);
        assert_eq!(p.gps_altitude, Some(350.0));
        // GPS coordinates are drawn unshifted.
        assert!((track.coord_altitude(p) - 350.0).abs() < 1e-9);
    }

    #[test]
    fn test_override_offset_replaces_option() {
        let options = ConversionOptions {
            altitude_offset_ft: Some(100.0),
            ..ConversionOptions::default()
        };
        let ov = MetadataOverride {
            altitude_offset: Some(10.0),
            ..MetadataOverride::default()
        };
        let track = convert(&ten_point_log(), Some(&ov), &options).unwrap();
        assert!((track.points[0].altitude - (300.0 + 3.048)).abs() < 1e-9);
    }

    #[test]
    fn test_empty_log_is_successful_and_empty() {
        let track = convert(&RawLogRecord::default(), None, &ConversionOptions::default()).unwrap();
        assert!(track.is_empty());
        assert!(track.summary.is_none());
    }

    #[test]
    fn test_missing_start_record_fails() {
        let raw = RawLogRecord::from_lines([data_line(300.0)]);
        assert!(convert(&raw, None, &ConversionOptions::default()).is_err());
    }

    #[test]
    fn test_field_selection_all_and_none() {
        let all = ConversionOptions {
            fields: FieldSelection::all(),
            ..ConversionOptions::default()
        };
        let track = convert(&ten_point_log(), None, &all).unwrap();
        assert_eq!(track.points[0].fields.len(), 8);

        let none = ConversionOptions {
            fields: FieldSelection::none(),
            ..ConversionOptions::default()
        };
        let track = convert(&ten_point_log(), None, &none).unwrap();
        assert!(track.points[0].fields.is_empty());
    }

    #[test]
    fn test_altitude_mode_does_not_change_values() {
        let clamp = ConversionOptions {
            altitude_mode: AltitudeMode::ClampToGround,
            ..ConversionOptions::default()
        };
        let a = convert(&ten_point_log(), None, &ConversionOptions::default()).unwrap();
        let b = convert(&ten_point_log(), None, &clamp).unwrap();
        assert_eq!(a.points, b.points);
    }

    #[test]
    fn test_gps_altitude_preference() {
        let raw = RawLogRecord::from_lines([
            START.to_string(),
            format!("{} MSLALT=350.0", data_line(300.0)),
        ]);
        let track = convert(&raw, None, &ConversionOptions::default()).unwrap();
        assert!(track.coord_uses_gps());
        assert!((track.coord_altitude(&track.points[0]) - 350.0).abs() < 1e-9);

        let pressure = ConversionOptions {
            prefer_gps: false,
            ..ConversionOptions::default()
        };
        let track = convert(&raw, None, &pressure).unwrap();
        assert!(!track.coord_uses_gps());
        assert!((track.coord_altitude(&track.points[0]) - 300.0).abs() < 1e-9);
    }

    #[test]
    fn test_summary() {
        let track = convert(&ten_point_log(), None, &ConversionOptions::default()).unwrap();
        let summary = track.summary.unwrap();
        assert_eq!(summary.elapsed(), Duration::seconds(18));
        assert!((summary.min_altitude_m - 300.0).abs() < 1e-9);
        assert!((summary.max_altitude_m - 309.0).abs() < 1e-9);
        assert!((summary.max_sog_mps - 2.0).abs() < 1e-9);
        // All points share one position.
        assert!(summary.distance_m.abs() < 1e-9);
    }

    #[test]
    fn test_summary_uses_pressure_altitude() {
        let raw = RawLogRecord::from_lines([
            START.to_string(),
            format!("{} MSLALT=500.0", data_line(300.0)),
            format!("{} MSLALT=520.0", data_line(310.0)),
            END.to_string(),
        ]);
        let bare = ConversionOptions {
            fields: FieldSelection::none(),
            ..ConversionOptions::default()
        };
        let track = convert(&raw, None, &bare).unwrap();
        assert!(track.coord_uses_gps());

        let summary = track.summary.unwrap();
        assert!((summary.min_altitude_m - 300.0).abs() < 1e-9);
        assert!((summary.max_altitude_m - 310.0).abs() < 1e-9);
        // SOG counts even when the field is not kept on the points.
        assert!((summary.max_sog_mps - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_distance() {
        // One degree of latitude is about 111.2 km.
        let d = distance_m((44.0, -93.0), (45.0, -93.0));
        assert!((d - 111_195.0).abs() < 10.0);
        assert!(distance_m((10.0, 10.0), (10.0, 10.0)).abs() < 1e-9);
    }

    #[test]
    fn test_with_override_applies_every_key() {
        let ov = MetadataOverride::from_json(
            r#"{"altitudemode": "relativeToGround", "extend_to_ground": false,
                "kml_use_metric": true, "kml_fields": "ALL", "prefer_gps": false,
                "track_note": "hello"}"#,
        )
        .unwrap();
        let options = ConversionOptions::default().with_override(&ov);
        assert_eq!(options.altitude_mode, AltitudeMode::RelativeToGround);
        assert!(!options.extend_to_ground);
        assert!(options.use_metric);
        assert_eq!(options.fields, FieldSelection::all());
        assert!(!options.prefer_gps);
        assert_eq!(options.track_note.as_deref(), Some("hello"));
    }

    fn stored_fixture(dir: &TempDir, record: &RawLogRecord) -> (LogStore, DeviceSerial) {
        let store = LogStore::open(dir.path()).unwrap();
        let serial = DeviceSerial::new("SN11005").unwrap();
        let ts = FatTimestamp {
            year: 2021,
            month: 7,
            day: 4,
            hour: 6,
            minute: 30,
            second: 0,
        };
        let entry = LogCatalogEntry::new(EncodedTimestamp::from(&ts), EncodedTimestamp::from(&ts));
        store.write_raw(&serial, &entry, record).unwrap();
        (store, serial)
    }

    #[test]
    fn test_pipeline_writes_once() {
        let dir = TempDir::new().unwrap();
        let (store, serial) = stored_fixture(&dir, &ten_point_log());
        let out = TempDir::new().unwrap();
        let pipeline = ConversionPipeline::new(&store, out.path(), ConversionOptions::default());

        let first = pipeline.run(&serial).unwrap();
        assert_eq!(first.converted, vec![out.path().join("20210704_0630_SN11005.kml")]);

        let second = pipeline.run(&serial).unwrap();
        assert!(second.converted.is_empty());
        assert_eq!(second.skipped, first.converted);

        let forced = ConversionPipeline::new(&store, out.path(), ConversionOptions::default())
            .with_force(true)
            .run(&serial)
            .unwrap();
        assert_eq!(forced.converted.len(), 1);
    }

    #[test]
    fn test_pipeline_missing_output_dir_is_fatal() {
        let dir = TempDir::new().unwrap();
        let (store, serial) = stored_fixture(&dir, &ten_point_log());
        let err = ConversionPipeline::new(&store, dir.path().join("no-kml"), ConversionOptions::default())
            .run(&serial)
            .unwrap_err();
        assert!(matches!(err, Error::FilesystemUnavailable { .. }));
    }

    #[test]
    fn test_pipeline_bad_override_skips_log() {
        let dir = TempDir::new().unwrap();
        let (store, serial) = stored_fixture(&dir, &ten_point_log());
        let raw = store.list_raw_logs(&serial).unwrap().remove(0).path;
        fs::write(MetadataOverride::path_for(&raw), "{ not json").unwrap();

        let out = TempDir::new().unwrap();
        let report = ConversionPipeline::new(&store, out.path(), ConversionOptions::default())
            .run(&serial)
            .unwrap();
        assert_eq!(report.failed.len(), 1);
        assert!(report.converted.is_empty());
    }

    #[test]
    fn test_pipeline_no_fix_log_is_empty() {
        let dir = TempDir::new().unwrap();
        let record = RawLogRecord::from_lines([
            START.to_string(),
            data_line(1.0).replace("GPSS=0", "GPSS=2"),
            END.to_string(),
        ]);
        let (store, serial) = stored_fixture(&dir, &record);
        let out = TempDir::new().unwrap();

        let report = ConversionPipeline::new(&store, out.path(), ConversionOptions::default())
            .run(&serial)
            .unwrap();
        assert_eq!(report.empty.len(), 1);
        assert_eq!(fs::read_dir(out.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_pipeline_skips_log_without_end_record() {
        let dir = TempDir::new().unwrap();
        let record = RawLogRecord::from_lines([START.to_string(), data_line(300.0), data_line(301.0)]);
        let (store, serial) = stored_fixture(&dir, &record);
        let out = TempDir::new().unwrap();
        let pipeline = ConversionPipeline::new(&store, out.path(), ConversionOptions::default());

        let report = pipeline.run(&serial).unwrap();
        assert_eq!(report.incomplete.len(), 1);
        assert!(report.converted.is_empty());
        assert_eq!(fs::read_dir(out.path()).unwrap().count(), 0);

        // Nothing was written, so the next run looks at it again.
        let again = pipeline.run(&serial).unwrap();
        assert_eq!(again.incomplete.len(), 1);
        assert!(again.skipped.is_empty());
    }

    #[test]
    fn test_convert_file_beside_input() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("flight.log");
        fs::write(&path, ten_point_log().to_text()).unwrap();
        let options = ConversionOptions {
            format: TrackFormat::Csv,
            ..ConversionOptions::default()
        };

        let outcome = convert_file(&path, &options, false).unwrap();
        let expected = dir.path().join("flight_DBI3.csv");
        assert_eq!(
            outcome,
            ConversionOutcome::Written {
                path: expected.clone(),
                points: 10
            }
        );
        assert_eq!(
            convert_file(&path, &options, false).unwrap(),
            ConversionOutcome::Skipped(expected)
        );
    }
}
