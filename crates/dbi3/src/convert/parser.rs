//! Parser for the DBI3 `KEY=VALUE` log format.
//!
//! A log is a start record, a run of data records two seconds apart and an
//! end record:
//!
//! ```text
//! FWVER=1.3 SN=SN11005 DATE=2021-07-04 TIME=06:30:10
//! ALT=312.4 ROC=0.3 AMBT=18.2 GPSS=0 SOG=1.2 COG=87.0 LONG=09330.1234W LAT=4458.7654N TOPTS=1 TOPT=71.5 BATM=4.02 BRDT=24.1 BAR=979.3
//! ...
//! DATE=2021-07-04 TIME=07:45:02
//! ```

use std::collections::{BTreeMap, HashMap};

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, trace, warn};

use super::fields::{c_to_f, round_to, FieldName};

/// Spacing between data records.
pub const RECORD_INTERVAL_SECS: i64 = 2;

/// Top temperature reported when the sensor is absent (`TOPTS` != 1).
pub const MISSING_TOPT_C: f64 = 40.0;

/// The same stand-in as shown in imperial units.
pub const MISSING_TOPT_F: f64 = 100.0;

const START_FIELDS: [&str; 4] = ["FWVER", "SN", "DATE", "TIME"];
const DATA_FIELDS: [&str; 12] = [
    "ALT", "ROC", "AMBT", "GPSS", "SOG", "COG", "LONG", "LAT", "TOPTS", "TOPT", "BATM", "BRDT",
];

/// Log-level parse failures. Individual bad lines are counted, not raised.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// The first well-formed line is not a start record.
    #[error("log has no start record (missing {0})")]
    MissingStartRecord(String),

    /// The start record's date or time does not parse.
    #[error("invalid start record time '{0}'")]
    InvalidStartTime(String),
}

/// Header of a log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StartRecord {
    /// Firmware version.
    pub firmware: String,
    /// Serial number as written by the firmware.
    pub serial: String,
    /// Log start time (UTC).
    pub time: NaiveDateTime,
}

/// One GPS-fixed sample. All values are metric.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackPoint {
    /// Sample time (UTC).
    pub time: NaiveDateTime,
    /// Latitude in degrees, south negative.
    pub lat: f64,
    /// Longitude in degrees, west negative.
    pub lon: f64,
    /// Pressure altitude in meters.
    pub altitude: f64,
    /// GPS altitude above mean sea level in meters, when logged.
    pub gps_altitude: Option<f64>,
    /// Barometric pressure in hPa, when logged.
    pub pressure: Option<f64>,
    /// Extra fields: temperatures in °C, speeds in m/s, COG in degrees,
    /// battery in volts.
    pub fields: BTreeMap<FieldName, f64>,
    /// The top sensor was absent and `TOPT` holds [`MISSING_TOPT_C`].
    pub top_missing: bool,
}

impl TrackPoint {
    /// Value of an extra field.
    #[must_use]
    pub fn field(&self, name: FieldName) -> Option<f64> {
        self.fields.get(&name).copied()
    }

    /// Value of an extra field in display units.
    ///
    /// A missing top temperature reads [`MISSING_TOPT_F`] in imperial units,
    /// and the difference is taken from that figure.
    #[must_use]
    pub fn display_field(&self, name: FieldName, metric: bool) -> Option<f64> {
        let value = self.field(name)?;
        if self.top_missing && !metric {
            match name {
                FieldName::Topt => return Some(MISSING_TOPT_F),
                FieldName::Diff => {
                    let shift = c_to_f(MISSING_TOPT_C) - MISSING_TOPT_F;
                    return Some(round_to(value * 9.0 / 5.0 - shift, 1));
                }
                _ => {}
            }
        }
        Some(name.display_value(value, metric))
    }
}

/// Line counts gathered while parsing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ParseStats {
    /// Every line read.
    pub total_lines: usize,
    /// Data records with a GPS fix.
    pub fix_lines: usize,
    /// Data records without a GPS fix.
    pub no_fix_lines: usize,
    /// Lines that could not be used.
    pub bad_lines: usize,
    /// Time from the end record, when present.
    pub end_time: Option<NaiveDateTime>,
}

impl ParseStats {
    /// Whether the log ended with an end record.
    #[must_use]
    pub fn completed(&self) -> bool {
        self.end_time.is_some()
    }
}

/// A parsed log.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ParsedLog {
    /// The start record; `None` only for an empty log.
    pub start: Option<StartRecord>,
    /// Fixed points, in time order.
    pub points: Vec<TrackPoint>,
    /// Line counts.
    pub stats: ParseStats,
}

/// Parse log lines into track points.
///
/// Every data line after the start record advances the clock by two
/// seconds whether or not it has a fix or all its fields. Lines that are not
/// `KEY=VALUE` pairs are counted bad and do not advance the clock.
///
/// # Errors
///
/// Returns [`ParseError`] when a non-empty log does not open with a valid
/// start record.
pub fn parse_log<S: AsRef<str>>(lines: &[S]) -> Result<ParsedLog, ParseError> {
    let mut log = ParsedLog::default();
    let mut clock: Option<NaiveDateTime> = None;

    for line in lines {
        let line = line.as_ref();
        log.stats.total_lines += 1;

        let Some(vars) = split_pairs(line) else {
            trace!("Unparseable line: {}", line);
            log.stats.bad_lines += 1;
            continue;
        };

        let Some(now) = clock else {
            let start = parse_start(&vars)?;
            debug!("Log start {} firmware {}", start.time, start.firmware);
            clock = Some(start.time);
            log.start = Some(start);
            continue;
        };

        if vars.contains_key("DATE") {
            match record_time(&vars) {
                Some(end) => log.stats.end_time = Some(end),
                None => warn!("Malformed end record: {}", line),
            }
            break;
        }

        match parse_data(&vars, now) {
            DataLine::Fix(point) => {
                log.stats.fix_lines += 1;
                log.points.push(point);
            }
            DataLine::NoFix => log.stats.no_fix_lines += 1,
            DataLine::Bad(reason) => {
                trace!("Bad data line ({}): {}", reason, line);
                log.stats.bad_lines += 1;
            }
        }
        clock = Some(now + Duration::seconds(RECORD_INTERVAL_SECS));
    }

    if log.start.is_some() && !log.stats.completed() {
        warn!("Log has no end record");
    }
    Ok(log)
}

/// Convert `[d]ddmm.mmmmH` to signed decimal degrees.
///
/// The minutes are always the two digits before the decimal point, so the
/// same rule reads both latitude and longitude. `S` and `W` are negative.
/// Anything other than ASCII is rejected.
#[must_use]
pub fn parse_ddmm(text: &str) -> Option<f64> {
    let text = text.trim();
    if !text.is_ascii() {
        return None;
    }
    let hemisphere = text.chars().last()?;
    let body = &text[..text.len() - hemisphere.len_utf8()];
    let dot = body.find('.').unwrap_or(body.len());
    if dot < 3 {
        return None;
    }
    let degrees: f64 = body[..dot - 2].parse().ok()?;
    let minutes: f64 = body[dot - 2..].parse().ok()?;
    let value = degrees + minutes / 60.0;

    match hemisphere {
        'N' | 'E' => Some(value),
        'S' | 'W' => Some(-value),
        _ => None,
    }
}

enum DataLine {
    Fix(TrackPoint),
    NoFix,
    Bad(String),
}

fn split_pairs(line: &str) -> Option<HashMap<&str, &str>> {
    let mut vars = HashMap::new();
    for pair in line.split_whitespace() {
        let (key, value) = pair.split_once('=')?;
        if key.is_empty() || value.contains('=') {
            return None;
        }
        vars.insert(key, value);
    }
    if vars.is_empty() {
        None
    } else {
        Some(vars)
    }
}

fn record_time(vars: &HashMap<&str, &str>) -> Option<NaiveDateTime> {
    let date = NaiveDate::parse_from_str(vars.get("DATE")?, "%Y-%m-%d").ok()?;
    let time = NaiveTime::parse_from_str(vars.get("TIME")?, "%H:%M:%S").ok()?;
    Some(date.and_time(time))
}

fn parse_start(vars: &HashMap<&str, &str>) -> Result<StartRecord, ParseError> {
    if let Some(missing) = START_FIELDS.iter().find(|f| !vars.contains_key(*f)) {
        return Err(ParseError::MissingStartRecord((*missing).to_string()));
    }
    let time = record_time(vars).ok_or_else(|| {
        ParseError::InvalidStartTime(format!(
            "{} {}",
            vars.get("DATE").copied().unwrap_or_default(),
            vars.get("TIME").copied().unwrap_or_default()
        ))
    })?;

    Ok(StartRecord {
        firmware: vars.get("FWVER").copied().unwrap_or_default().to_string(),
        serial: vars.get("SN").copied().unwrap_or_default().to_string(),
        time,
    })
}

fn parse_data(vars: &HashMap<&str, &str>, time: NaiveDateTime) -> DataLine {
    if let Some(missing) = DATA_FIELDS.iter().find(|f| !vars.contains_key(*f)) {
        return DataLine::Bad(format!("missing {missing}"));
    }
    if vars.get("GPSS").copied() != Some("0") {
        return DataLine::NoFix;
    }
    match build_point(vars, time) {
        Some(point) => DataLine::Fix(point),
        None => DataLine::Bad("unreadable value".to_string()),
    }
}

fn build_point(vars: &HashMap<&str, &str>, time: NaiveDateTime) -> Option<TrackPoint> {
    let num = |key: &str| vars.get(key).and_then(|v| v.parse::<f64>().ok());

    let ambient = num("AMBT")?;
    let top_missing = vars.get("TOPTS").copied() != Some("1");
    let top = if top_missing { MISSING_TOPT_C } else { num("TOPT")? };

    let fields = BTreeMap::from([
        (FieldName::Roc, num("ROC")?),
        (FieldName::Topt, top),
        (FieldName::Ambt, ambient),
        (FieldName::Diff, top - ambient),
        (FieldName::Sog, num("SOG")?),
        (FieldName::Cog, num("COG")?),
        (FieldName::Batm, num("BATM")?),
        (FieldName::Brdt, num("BRDT")?),
    ]);

    Some(TrackPoint {
        time,
        lat: parse_ddmm(vars.get("LAT")?)?,
        lon: parse_ddmm(vars.get("LONG")?)?,
        altitude: num("ALT")?,
        gps_altitude: num("MSLALT"),
        pressure: num("BAR"),
        fields,
        top_missing,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const START: &str = "FWVER=1.3 SN=SN11005 DATE=2021-07-04 TIME=06:30:10";
    const END: &str = "DATE=2021-07-04 TIME=06:31:00";

    fn data(gpss: u8, alt: f64) -> String {
        format!(
            "ALT={alt} ROC=0.5 AMBT=20.0 GPSS={gpss} SOG=2.0 COG=90.0 LONG=09330.0000W \
             LAT=4458.5000N TOPTS=1 TOPT=80.0 BATM=4.01 BRDT=25.0 BAR=980.1"
        )
    }

    #[test]
    fn test_parse_ddmm() {
        assert!((parse_ddmm("4458.5000N").unwrap() - 44.975).abs() < 1e-9);
        assert!((parse_ddmm("09330.0000W").unwrap() + 93.5).abs() < 1e-9);
        assert!((parse_ddmm("0130.0000S").unwrap() + 1.5).abs() < 1e-9);
        assert!((parse_ddmm("13000.0000E").unwrap() - 130.0).abs() < 1e-9);
        assert!(parse_ddmm("4458.5000X").is_none());
        assert!(parse_ddmm("58.5N").is_none());
        assert!(parse_ddmm("").is_none());
    }

    #[test]
    fn test_parse_ddmm_rejects_non_ascii() {
        assert_eq!(parse_ddmm("\u{FFFD}1.0N"), None);
        assert_eq!(parse_ddmm("x\u{e9}1.0N"), None);
        assert_eq!(parse_ddmm("4458.5000\u{FFFD}"), None);

        // A corrupt coordinate makes the line bad instead of stopping the parse.
        let line = data(0, 300.0).replace("LAT=4458.5000N", "LAT=\u{FFFD}58.5000N");
        let log = parse_log(&[START.to_string(), line, data(0, 300.0)]).unwrap();
        assert_eq!(log.stats.bad_lines, 1);
        assert_eq!(log.points.len(), 1);
        assert_eq!(log.points[0].time.to_string(), "2021-07-04 06:30:12");
    }

    #[test]
    fn test_parse_basic_log() {
        let lines = vec![START.to_string(), data(0, 300.0), data(0, 310.0), END.to_string()];
        let log = parse_log(&lines).unwrap();

        let start = log.start.unwrap();
        assert_eq!(start.firmware, "1.3");
        assert_eq!(start.serial, "SN11005");
        assert_eq!(log.points.len(), 2);
        assert_eq!(log.points[0].time.to_string(), "2021-07-04 06:30:10");
        assert_eq!(log.points[1].time.to_string(), "2021-07-04 06:30:12");
        assert!(log.stats.completed());

        let p = &log.points[0];
        assert!((p.lat - 44.975).abs() < 1e-9);
        assert!((p.lon + 93.5).abs() < 1e-9);
        assert_eq!(p.pressure, Some(980.1));
        assert_eq!(p.gps_altitude, None);
        assert_eq!(p.field(FieldName::Diff), Some(60.0));
    }

    #[test]
    fn test_clock_advances_over_unfixed_lines() {
        let lines = vec![START.to_string(), data(1, 300.0), data(3, 300.0), data(0, 300.0)];
        let log = parse_log(&lines).unwrap();

        assert_eq!(log.stats.no_fix_lines, 2);
        assert_eq!(log.points.len(), 1);
        assert_eq!(log.points[0].time.to_string(), "2021-07-04 06:30:14");
    }

    #[test]
    fn test_garbage_line_does_not_advance_clock() {
        let lines = vec![START.to_string(), "@@ noise".to_string(), data(0, 300.0)];
        let log = parse_log(&lines).unwrap();

        assert_eq!(log.stats.bad_lines, 1);
        assert_eq!(log.points[0].time.to_string(), "2021-07-04 06:30:10");
    }

    #[test]
    fn test_missing_field_counts_bad_and_advances() {
        let lines = vec![START.to_string(), "ALT=1 GPSS=0".to_string(), data(0, 300.0)];
        let log = parse_log(&lines).unwrap();

        assert_eq!(log.stats.bad_lines, 1);
        assert_eq!(log.points[0].time.to_string(), "2021-07-04 06:30:12");
    }

    #[test]
    fn test_missing_top_temperature_defaults() {
        let line = data(0, 300.0).replace("TOPTS=1", "TOPTS=0");
        let log = parse_log(&[START.to_string(), line]).unwrap();

        let p = &log.points[0];
        assert_eq!(p.field(FieldName::Topt), Some(MISSING_TOPT_C));
        assert_eq!(p.field(FieldName::Diff), Some(MISSING_TOPT_C - 20.0));
        assert!(p.top_missing);

        // Imperial display: 100 F top, diff against 68 F ambient.
        assert_eq!(p.display_field(FieldName::Topt, false), Some(MISSING_TOPT_F));
        assert_eq!(p.display_field(FieldName::Diff, false), Some(32.0));
        assert_eq!(p.display_field(FieldName::Ambt, false), Some(68.0));
        assert_eq!(p.display_field(FieldName::Topt, true), Some(40.0));
        assert_eq!(p.display_field(FieldName::Diff, true), Some(20.0));
    }

    #[test]
    fn test_present_top_temperature_display() {
        let log = parse_log(&[START.to_string(), data(0, 300.0)]).unwrap();
        let p = &log.points[0];
        assert!(!p.top_missing);
        assert_eq!(p.display_field(FieldName::Topt, false), Some(176.0));
        assert_eq!(p.display_field(FieldName::Diff, false), Some(108.0));
    }

    #[test]
    fn test_gps_altitude_optional() {
        let line = format!("{} MSLALT=305.5", data(0, 300.0));
        let log = parse_log(&[START.to_string(), line]).unwrap();
        assert_eq!(log.points[0].gps_altitude, Some(305.5));
    }

    #[test]
    fn test_missing_end_record_is_reported() {
        let lines = vec![START.to_string(), data(0, 300.0)];
        let log = parse_log(&lines).unwrap();
        assert!(!log.stats.completed());
        assert_eq!(log.points.len(), 1);
    }

    #[test]
    fn test_lines_after_end_record_ignored() {
        let lines = vec![START.to_string(), END.to_string(), data(0, 300.0)];
        let log = parse_log(&lines).unwrap();
        assert!(log.points.is_empty());
        assert_eq!(log.stats.end_time.unwrap().to_string(), "2021-07-04 06:31:00");
    }

    #[test]
    fn test_no_start_record() {
        let err = parse_log(&[data(0, 300.0)]).unwrap_err();
        assert!(matches!(err, ParseError::MissingStartRecord(_)));

        let bad_time = "FWVER=1 SN=1 DATE=2021-13-04 TIME=06:30:10";
        assert!(matches!(
            parse_log(&[bad_time]),
            Err(ParseError::InvalidStartTime(_))
        ));
    }

    #[test]
    fn test_empty_log() {
        let log = parse_log::<&str>(&[]).unwrap();
        assert!(log.start.is_none());
        assert!(log.points.is_empty());
    }
}
