//! Instrument settings snapshot.
//!
//! Firmware upgrades can reset the instrument's settings, so the full set is
//! read back with the `g*` query commands and saved beside the logs.

use std::fmt::Write;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::catalog::DeviceSerial;

/// How a settings query answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryShape {
    /// One line with the value.
    Value,
    /// One line per sub-setting, each queried as `<command> <name>`.
    Subsettings(&'static [(&'static str, Option<&'static str>)]),
    /// Any number of lines; the end is marked by a trailing `md mach`.
    Lines,
}

/// One settings query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettingsQuery {
    /// Command sent to the device.
    pub command: &'static str,
    /// Section title.
    pub title: &'static str,
    /// Reply shape.
    pub shape: QueryShape,
}

const fn query(command: &'static str, title: &'static str, shape: QueryShape) -> SettingsQuery {
    SettingsQuery {
        command,
        title,
        shape,
    }
}

/// Every query in a settings snapshot, in report order.
pub const SETTINGS_QUERIES: [SettingsQuery; 10] = [
    query(
        "gu",
        "Get Units Settings",
        QueryShape::Subsettings(&[("alt", None), ("roc", None), ("bar", None), ("temp", None), ("sog", None)]),
    ),
    query(
        "ga",
        "Get Alarm Settings",
        QueryShape::Subsettings(&[("alth", None), ("altl", None), ("clmb", None), ("desc", None), ("topt", None)]),
    ),
    query(
        "gf",
        "Get Function Settings",
        QueryShape::Subsettings(&[
            ("aut", Some("Altimeter Unit Toggle Mode")),
            ("frs", Some("Flight Recorder Start Mode")),
            ("aof", Some("Instrument Auto Turn Off Mode")),
            ("dat", None),
        ]),
    ),
    query(
        "gv",
        "Get Variometer Settings",
        QueryShape::Subsettings(&[
            ("resp", Some("Response Time Seconds")),
            ("audio", Some("Variometer Audio Mode")),
            ("clmbt", Some("Climb Audio Threshold")),
            ("desct", Some("Descent Audio Threshold")),
        ]),
    ),
    query(
        "gt",
        "Get Temp Sensor Unit Codes",
        QueryShape::Subsettings(&[
            ("top 1", None),
            ("top 2", None),
            ("top 3", None),
            ("top 4", None),
            ("amb 1", None),
            ("amb 2", None),
        ]),
    ),
    query(
        "gi",
        "Get Nonvolatile Info",
        QueryShape::Subsettings(&[("mod", None), ("brd", None), ("date", None)]),
    ),
    query("sn", "DBI3 Serial Number", QueryShape::Value),
    query("vr", "Firmware Version", QueryShape::Value),
    query("cc", "Battery Fuel Gauge", QueryShape::Value),
    query("rd all", "DBI3 Current Flight Data", QueryShape::Lines),
];

/// One sub-setting reply. `value` is `None` when the device did not answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Subsetting {
    /// Sub-setting name, e.g. `alth`.
    pub name: &'static str,
    /// Reported value.
    pub value: Option<String>,
    /// Meaning of the value, where the manual names one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<&'static str>,
}

/// The answer to one query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SettingsValue {
    /// A single value; `None` when the device did not answer.
    Value(Option<String>),
    /// Sub-settings in query order.
    Subsettings(Vec<Subsetting>),
    /// Free-form lines.
    Lines(Vec<String>),
}

/// One report section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SettingsSection {
    /// The query command.
    pub command: &'static str,
    /// Section title.
    pub title: &'static str,
    /// What came back.
    pub value: SettingsValue,
}

/// Every settings section read from one instrument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceSettings {
    /// The instrument.
    pub serial: DeviceSerial,
    /// Sections in query order.
    pub sections: Vec<SettingsSection>,
}

impl DeviceSettings {
    /// Base file name of a snapshot taken at `taken`: `DBI3_<sn>_YYYYMMDD_HHMM`.
    #[must_use]
    pub fn file_stem(&self, taken: &DateTime<Utc>) -> String {
        format!("DBI3_{}_{}", self.serial, taken.format("%Y%m%d_%H%M"))
    }

    /// Plain-text report, one `CONFIG-<title>` block per section.
    #[must_use]
    pub fn report(&self, taken: &DateTime<Utc>) -> String {
        let mut out = format!(
            "DBI3 {} configuration data on {} UTC\n",
            self.serial,
            taken.format("%c")
        );
        for section in &self.sections {
            let _ = writeln!(out, "\nCONFIG-{}", section.title);
            match &section.value {
                SettingsValue::Value(value) => {
                    let _ = writeln!(out, "  {}", value.as_deref().unwrap_or(""));
                }
                SettingsValue::Subsettings(subs) => {
                    for sub in subs {
                        let line = format!("{}={}", sub.name, sub.value.as_deref().unwrap_or(""));
                        match sub.description {
                            // Descriptions start at column 18, at least two spaces out.
                            Some(desc) => {
                                let _ = writeln!(out, "  {line:<16}  {desc}");
                            }
                            None => {
                                let _ = writeln!(out, "  {line}");
                            }
                        }
                    }
                }
                SettingsValue::Lines(lines) => {
                    for line in lines {
                        let _ = writeln!(out, "  {line}");
                    }
                }
            }
        }
        out
    }
}
