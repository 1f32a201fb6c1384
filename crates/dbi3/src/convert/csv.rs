//! CSV rendering, one row per point.
//!
//! Extra columns come from the selected fields; a column whose field is not
//! selected is left empty. A `gps_alt` column appears when the log carries GPS
//! altitude and a trailing `note` column when the track has a note.

use serde::Serialize;

use super::fields::{m_to_ft, round_to, FieldName};
use super::OutputTrack;
use crate::error::{Error, Result};

const TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// One output row. Columns skipped here are skipped for the whole track.
#[derive(Debug, Serialize)]
struct Row<'a> {
    timestamp: String,
    alt: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    gps_alt: Option<Option<f64>>,
    lat: f64,
    lon: f64,
    head: Option<f64>,
    speed: Option<f64>,
    bar: Option<f64>,
    temp: Option<f64>,
    diff_temp: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    note: Option<&'a str>,
}

fn header(gps: bool, note: bool) -> Vec<&'static str> {
    let mut columns = vec!["timestamp", "alt"];
    if gps {
        columns.push("gps_alt");
    }
    columns.extend(["lat", "lon", "head", "speed", "bar", "temp", "diff_temp"]);
    if note {
        columns.push("note");
    }
    columns
}

pub(super) fn render(track: &OutputTrack) -> Result<String> {
    let metric = track.options.use_metric;
    let gps = track.has_gps_altitude();
    let note = track.options.track_note.as_deref();
    let alt = |m: f64| round_to(if metric { m } else { m_to_ft(m) }, 1);

    let mut writer = ::csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());
    writer.write_record(header(gps, note.is_some()))?;

    for point in &track.points {
        let cell = |field: FieldName| point.display_field(field, metric);
        writer.serialize(Row {
            timestamp: point.time.format(TIME_FORMAT).to_string(),
            alt: alt(point.altitude),
            gps_alt: gps.then(|| point.gps_altitude.map(alt)),
            lat: point.lat,
            lon: point.lon,
            head: cell(FieldName::Cog),
            speed: cell(FieldName::Sog),
            bar: point.pressure,
            temp: cell(FieldName::Ambt),
            diff_temp: cell(FieldName::Diff),
            note,
        })?;
    }

    let bytes = writer.into_inner().map_err(|e| Error::Io(e.into_error()))?;
    String::from_utf8(bytes)
        .map_err(|e| Error::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))
}

#[cfg(test)]
mod tests {
    use super::super::{convert, ConversionOptions, FieldSelection, TrackFormat};
    use super::*;
    use crate::device::RawLogRecord;

    const START: &str = "FWVER=1.3 SN=SN11005 DATE=2021-07-04 TIME=06:30:00";
    const LINE: &str = "ALT=100 ROC=0.5 AMBT=20 GPSS=0 SOG=2 COG=90 LONG=09330.0000W \
                        LAT=4430.0000N TOPTS=1 TOPT=80 BATM=4.01 BRDT=25 BAR=980.5";

    fn options(fields: FieldSelection) -> ConversionOptions {
        ConversionOptions {
            fields,
            format: TrackFormat::Csv,
            ..ConversionOptions::default()
        }
    }

    #[test]
    fn test_render_rows() {
        let raw = RawLogRecord::from_lines([START, LINE]);
        let track = convert(&raw, None, &options(FieldSelection::all())).unwrap();
        let csv = render(&track).unwrap();
        let lines: Vec<&str> = csv.lines().collect();

        assert_eq!(lines[0], "timestamp,alt,lat,lon,head,speed,bar,temp,diff_temp");
        assert_eq!(lines[1], "2021-07-04T06:30:00,328.1,44.5,-93.5,90.0,4.5,980.5,68.0,108.0");
        assert_eq!(lines.len(), 2);
    }

    #[test]
    fn test_gps_column_and_unselected_fields() {
        let raw = RawLogRecord::from_lines([START.to_string(), format!("{LINE} MSLALT=200")]);
        let track = convert(&raw, None, &options(FieldSelection::none())).unwrap();
        let csv = render(&track).unwrap();
        let lines: Vec<&str> = csv.lines().collect();

        assert_eq!(lines[0], "timestamp,alt,gps_alt,lat,lon,head,speed,bar,temp,diff_temp");
        assert_eq!(lines[1], "2021-07-04T06:30:00,328.1,656.2,44.5,-93.5,,,980.5,,");
    }

    #[test]
    fn test_note_is_quoted() {
        let raw = RawLogRecord::from_lines([START, LINE, LINE]);
        let note = r#"Pilot: Sam, "Jr""#;
        let with_note = ConversionOptions {
            track_note: Some(note.to_string()),
            ..options(FieldSelection::default())
        };
        let track = convert(&raw, None, &with_note).unwrap();
        let csv = render(&track).unwrap();

        assert!(csv.contains(r#","Pilot: Sam, ""Jr""""#));

        let mut reader = ::csv::Reader::from_reader(csv.as_bytes());
        let headers = reader.headers().unwrap().clone();
        assert_eq!(headers.len(), 10);
        assert_eq!(&headers[9], "note");
        let rows: Vec<::csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 2);
        for row in &rows {
            assert_eq!(row.len(), 10);
            assert_eq!(&row[9], note);
            assert_eq!(&row[7], "68.0");
        }
    }

    #[test]
    fn test_missing_top_temperature_diff() {
        let line = LINE.replace("TOPTS=1", "TOPTS=0");
        let raw = RawLogRecord::from_lines([START.to_string(), line]);
        let track = convert(&raw, None, &options(FieldSelection::default())).unwrap();
        let csv = render(&track).unwrap();
        assert!(csv.lines().nth(1).unwrap().ends_with(",980.5,68.0,32.0"));
    }

    #[test]
    fn test_render_is_reached_through_track() {
        let raw = RawLogRecord::from_lines([START, LINE]);
        let track = convert(&raw, None, &options(FieldSelection::default())).unwrap();
        assert!(track.render().unwrap().starts_with("timestamp,"));
    }
}
