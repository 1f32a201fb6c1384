//! End-to-end tests: a scripted instrument is synced into a temporary log
//! directory and the downloaded logs are converted.

use std::fs;

use chrono::NaiveDate;
use tempfile::TempDir;

use dbi3::convert::{ConversionOptions, MetadataOverride, TrackFormat};
use dbi3::device::{DeviceClient, ScriptedTransport, Timeouts};
use dbi3::{
    CatalogFilter, ConversionPipeline, EncodedTimestamp, Error, FatTimestamp, LogCatalogEntry,
    LogStore, SyncEngine,
};

const START: &str = "FWVER=1.3 SN=11005 DATE=2021-07-04 TIME=06:30:00";
const FIX: &str = "ALT=300 ROC=0.5 AMBT=20 GPSS=0 SOG=2 COG=90 LONG=09330.0000W \
                   LAT=4430.0000N TOPTS=1 TOPT=80 BATM=4.01 BRDT=25 BAR=980.5";
const NO_FIX: &str = "ALT=300 ROC=0.5 AMBT=20 GPSS=2 SOG=0 COG=0 LONG=00000.0000W \
                      LAT=0000.0000N TOPTS=1 TOPT=80 BATM=4.01 BRDT=25";
const END: &str = "DATE=2021-07-04 TIME=06:31:00";

fn stamp(day: u8, hour: u8, minute: u8) -> EncodedTimestamp {
    EncodedTimestamp::from(&FatTimestamp {
        year: 2021,
        month: 7,
        day,
        hour,
        minute,
        second: 0,
    })
}

fn flight() -> LogCatalogEntry {
    LogCatalogEntry::new(stamp(4, 6, 30), stamp(4, 6, 31))
}

fn ground_test() -> LogCatalogEntry {
    LogCatalogEntry::new(stamp(5, 9, 0), stamp(5, 9, 1))
}

fn listing(entries: &[&LogCatalogEntry]) -> Vec<String> {
    entries
        .iter()
        .map(|e| format!("{} {}", e.start, e.stop))
        .collect()
}

fn connected(t: ScriptedTransport) -> ScriptedTransport {
    t.expect("md mach", &["ok"])
        .expect("fs stop", &["ok"])
        .expect("sn", &["11005"])
}

fn list(t: ScriptedTransport, lines: &[String]) -> ScriptedTransport {
    let lines: Vec<&str> = lines.iter().map(String::as_str).collect();
    t.expect("md mach", &["ok"])
        .expect("fs stop", &["nok"])
        .expect("fs list", &lines)
}

fn read(t: ScriptedTransport, entry: &LogCatalogEntry, lines: &[&str]) -> ScriptedTransport {
    t.expect("md mach", &["ok"])
        .expect("fs stop", &["nok"])
        .expect(&format!("fs read {}", entry.start), lines)
}

fn quiesce(t: ScriptedTransport) -> ScriptedTransport {
    t.expect("fs stop", &["ok"]).expect("md mach", &["ok"])
}

fn now() -> chrono::NaiveDateTime {
    NaiveDate::from_ymd_opt(2021, 7, 10)
        .and_then(|d| d.and_hms_opt(12, 0, 0))
        .unwrap()
}

#[test]
fn test_sync_then_convert() {
    let logs = TempDir::new().unwrap();
    let kml = TempDir::new().unwrap();
    let store = LogStore::open_or_create(logs.path()).unwrap();
    let (flight, ground) = (flight(), ground_test());

    let t = connected(ScriptedTransport::new());
    let t = list(t, &listing(&[&ground, &flight]));
    let t = read(t, &flight, &[START, FIX, FIX, FIX, END]);
    let t = read(t, &ground, &[START, NO_FIX, END]);
    let t = quiesce(t);

    let mut client = DeviceClient::new(t, Timeouts::default());
    let serial = client.initialize().unwrap();
    assert_eq!(serial.as_str(), "11005");

    let report = SyncEngine::new(&mut client, &store, serial.clone())
        .run(&CatalogFilter::default(), now())
        .unwrap();
    assert_eq!(report.downloaded, vec![flight.clone(), ground.clone()]);
    assert!(report.is_complete());
    assert_eq!(client.transport().remaining(), 0);

    let raw = store.raw_log_path(&serial, &flight);
    assert!(raw.ends_with("11005/2021_07_04_06_30_00_DBI3.log"));
    assert_eq!(fs::read_to_string(&raw).unwrap().lines().count(), 5);

    let pipeline = ConversionPipeline::new(&store, kml.path(), ConversionOptions::default());
    let report = pipeline.run(&serial).unwrap();
    assert_eq!(report.converted, vec![kml.path().join("20210704_0630_SN11005.kml")]);
    assert_eq!(report.empty.len(), 1);
    assert!(report.failed.is_empty());

    let text = fs::read_to_string(&report.converted[0]).unwrap();
    assert_eq!(text.matches("<when>").count(), 3);
    assert!(text.contains("DBI3  SN11005  FWVER 1.3"));
}

#[test]
fn test_second_sync_downloads_nothing() {
    let logs = TempDir::new().unwrap();
    let store = LogStore::open_or_create(logs.path()).unwrap();
    let flight = flight();

    let t = connected(ScriptedTransport::new());
    let t = list(t, &listing(&[&flight]));
    let t = quiesce(read(t, &flight, &[START, FIX, END]));
    let mut client = DeviceClient::new(t, Timeouts::default());
    let serial = client.initialize().unwrap();
    let first = SyncEngine::new(&mut client, &store, serial.clone())
        .run(&CatalogFilter::default(), now())
        .unwrap();
    assert_eq!(first.downloaded.len(), 1);
    let written = fs::read(store.raw_log_path(&serial, &flight)).unwrap();

    let t = quiesce(list(connected(ScriptedTransport::new()), &listing(&[&flight])));
    let mut client = DeviceClient::new(t, Timeouts::default());
    let serial = client.initialize().unwrap();
    let second = SyncEngine::new(&mut client, &store, serial.clone())
        .run(&CatalogFilter::default(), now())
        .unwrap();

    assert!(second.downloaded.is_empty());
    assert_eq!(second.skipped, vec![flight.clone()]);
    assert_eq!(fs::read(store.raw_log_path(&serial, &flight)).unwrap(), written);
    assert!(!client.transport().sent().iter().any(|c| c.starts_with("fs read")));
}

#[test]
fn test_silent_device_aborts_sync() {
    let logs = TempDir::new().unwrap();
    let store = LogStore::open_or_create(logs.path()).unwrap();
    let (flight, ground) = (flight(), ground_test());

    let t = connected(ScriptedTransport::new());
    let t = list(t, &listing(&[&flight, &ground]));
    let t = read(t, &flight, &[START, FIX, END]).expect_silence("md mach");
    let mut client = DeviceClient::new(t, Timeouts::default());
    let serial = client.initialize().unwrap();

    let report = SyncEngine::new(&mut client, &store, serial.clone())
        .run(&CatalogFilter::default(), now())
        .unwrap();

    assert_eq!(report.downloaded, vec![flight]);
    assert!(report.aborted.is_some());
    assert!(!report.is_complete());
    assert!(!store.contains(&serial, &ground));
}

#[test]
fn test_override_trims_and_offsets_csv() {
    let logs = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    let store = LogStore::open_or_create(logs.path()).unwrap();
    let flight = flight();

    let t = connected(ScriptedTransport::new());
    let t = list(t, &listing(&[&flight]));
    let t = quiesce(read(t, &flight, &[START, FIX, FIX, FIX, FIX, END]));
    let mut client = DeviceClient::new(t, Timeouts::default());
    let serial = client.initialize().unwrap();
    SyncEngine::new(&mut client, &store, serial.clone())
        .run(&CatalogFilter::default(), now())
        .unwrap();

    let raw = store.raw_log_path(&serial, &flight);
    fs::write(
        MetadataOverride::path_for(&raw),
        r#"{"trim_start_time": "20210704063002", "trim_end_time": "20210704063004",
            "altitude_offset": 10, "kml_use_metric": true}"#,
    )
    .unwrap();

    let options = ConversionOptions {
        format: TrackFormat::Csv,
        ..ConversionOptions::default()
    };
    let report = ConversionPipeline::new(&store, out.path(), options)
        .run(&serial)
        .unwrap();
    let csv = fs::read_to_string(out.path().join("20210704_0630_SN11005.csv")).unwrap();
    let rows: Vec<&str> = csv.lines().skip(1).collect();

    assert_eq!(report.converted.len(), 1);
    assert_eq!(rows.len(), 2);
    assert!(rows[0].starts_with("2021-07-04T06:30:02,303.0,"));
    assert!(rows[1].starts_with("2021-07-04T06:30:04,303.0,"));
}

#[test]
fn test_missing_output_dir_is_fatal() {
    let logs = TempDir::new().unwrap();
    let store = LogStore::open_or_create(logs.path()).unwrap();
    let serial = dbi3::DeviceSerial::new("11005").unwrap();

    let err = ConversionPipeline::new(&store, logs.path().join("missing"), ConversionOptions::default())
        .run(&serial)
        .unwrap_err();
    assert!(matches!(err, Error::FilesystemUnavailable { .. }));
}
