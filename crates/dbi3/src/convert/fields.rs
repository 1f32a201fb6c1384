//! Extra data fields, altitude modes and unit conversions.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Meters per foot (exact).
pub const METERS_PER_FOOT: f64 = 0.3048;

/// Meters per statute mile (exact).
const METERS_PER_MILE: f64 = 1609.344;

/// Optional per-point data fields that can ride along with a track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FieldName {
    /// Rate of climb.
    Roc,
    /// Envelope top temperature.
    Topt,
    /// Ambient temperature.
    Ambt,
    /// Top minus ambient temperature (computed).
    Diff,
    /// Speed over ground.
    Sog,
    /// Course over ground.
    Cog,
    /// Battery voltage.
    Batm,
    /// Board temperature.
    Brdt,
}

impl FieldName {
    /// Every field, in log order.
    pub const ALL: [Self; 8] = [
        Self::Roc,
        Self::Topt,
        Self::Ambt,
        Self::Diff,
        Self::Sog,
        Self::Cog,
        Self::Batm,
        Self::Brdt,
    ];

    /// The name used in logs, config and on the command line.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Roc => "ROC",
            Self::Topt => "TOPT",
            Self::Ambt => "AMBT",
            Self::Diff => "DIFF",
            Self::Sog => "SOG",
            Self::Cog => "COG",
            Self::Batm => "BATM",
            Self::Brdt => "BRDT",
        }
    }

    /// Identifier of the KML schema array field.
    #[must_use]
    pub fn schema_name(self) -> &'static str {
        match self {
            Self::Roc => "roc",
            Self::Topt => "t_temp",
            Self::Ambt => "a_temp",
            Self::Diff => "d_temp",
            Self::Sog => "sog",
            Self::Cog => "cog",
            Self::Batm => "batm",
            Self::Brdt => "brdt",
        }
    }

    /// Human-readable label including the display unit.
    #[must_use]
    pub fn display_name(self, metric: bool) -> String {
        let temp = if metric { "C" } else { "F" };
        match self {
            Self::Roc => format!("ROC {}", if metric { "mps" } else { "FPM" }),
            Self::Topt => format!("Top {temp}"),
            Self::Ambt => format!("Ambient {temp}"),
            Self::Diff => format!("Diff {temp}"),
            Self::Sog => format!("SOG {}", if metric { "mps" } else { "MPH" }),
            Self::Cog => "COG".to_string(),
            Self::Batm => "BAT V".to_string(),
            Self::Brdt => format!("BRD {temp}"),
        }
    }

    /// Convert a stored metric value to display units, rounded as shown.
    #[must_use]
    pub fn display_value(self, value: f64, metric: bool) -> f64 {
        match self {
            Self::Topt | Self::Ambt | Self::Brdt if !metric => round_to(c_to_f(value), 1),
            // A temperature difference scales but does not shift.
            Self::Diff if !metric => round_to(value * 9.0 / 5.0, 1),
            Self::Sog if !metric => round_to(mps_to_mph(value), 1),
            Self::Roc if !metric => round_to(mps_to_fpm(value), 1),
            Self::Batm => round_to(value, 2),
            _ => round_to(value, 1),
        }
    }
}

impl fmt::Display for FieldName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FieldName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        Self::ALL
            .into_iter()
            .find(|field| field.as_str() == upper)
            .ok_or_else(|| {
                format!(
                    "unknown field '{s}', expected ALL or one of {}",
                    Self::ALL.map(Self::as_str).join(",")
                )
            })
    }
}

/// The set of extra fields projected into an output track.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct FieldSelection(BTreeSet<FieldName>);

impl Default for FieldSelection {
    fn default() -> Self {
        Self([FieldName::Ambt, FieldName::Topt, FieldName::Diff].into())
    }
}

impl FieldSelection {
    /// Select every field.
    #[must_use]
    pub fn all() -> Self {
        Self(FieldName::ALL.into())
    }

    /// Select nothing beyond position and altitude.
    #[must_use]
    pub fn none() -> Self {
        Self(BTreeSet::new())
    }

    /// Build a selection from names; `ALL` or `*` anywhere selects everything.
    ///
    /// # Errors
    ///
    /// Returns a message naming the first unknown field.
    pub fn from_names<I, S>(names: I) -> Result<Self, String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = BTreeSet::new();
        for name in names {
            let name = name.as_ref().trim();
            if name.is_empty() {
                continue;
            }
            if name == "*" || name.eq_ignore_ascii_case("ALL") {
                return Ok(Self::all());
            }
            set.insert(name.parse()?);
        }
        Ok(Self(set))
    }

    /// Whether a field is selected.
    #[must_use]
    pub fn contains(&self, field: FieldName) -> bool {
        self.0.contains(&field)
    }

    /// Selected fields in canonical order.
    pub fn iter(&self) -> impl Iterator<Item = FieldName> + '_ {
        self.0.iter().copied()
    }

    /// Number of selected fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no extra field is selected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromStr for FieldSelection {
    type Err = String;

    /// Parse a comma separated list such as `AMBT,TOPT` or `ALL`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_names(s.split(','))
    }
}

impl TryFrom<Vec<String>> for FieldSelection {
    type Error = String;

    fn try_from(value: Vec<String>) -> Result<Self, Self::Error> {
        Self::from_names(value)
    }
}

impl From<FieldSelection> for Vec<String> {
    fn from(value: FieldSelection) -> Self {
        value.iter().map(|f| f.as_str().to_string()).collect()
    }
}

impl fmt::Display for FieldSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.iter().map(FieldName::as_str).collect();
        f.write_str(&names.join(","))
    }
}

/// How a viewer should interpret track altitudes.
///
/// Only a rendering hint; altitude values are never changed by it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AltitudeMode {
    /// Altitude above mean sea level.
    #[default]
    Absolute,
    /// Ignore altitude and drape on terrain.
    #[serde(alias = "clamptoground")]
    ClampToGround,
    /// Altitude above the terrain.
    #[serde(alias = "relative", alias = "relativetoground")]
    RelativeToGround,
}

impl AltitudeMode {
    /// The KML `altitudeMode` value.
    #[must_use]
    pub fn as_kml(self) -> &'static str {
        match self {
            Self::Absolute => "absolute",
            Self::ClampToGround => "clampToGround",
            Self::RelativeToGround => "relativeToGround",
        }
    }
}

impl FromStr for AltitudeMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "absolute" => Ok(Self::Absolute),
            "clamptoground" => Ok(Self::ClampToGround),
            "relative" | "relativetoground" => Ok(Self::RelativeToGround),
            _ => Err(format!(
                "unknown altitude mode '{s}', expected absolute, clampToGround or relativeToGround"
            )),
        }
    }
}

impl fmt::Display for AltitudeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_kml())
    }
}

/// Output artifact format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackFormat {
    /// Google Earth KML with a `gx:Track`.
    #[default]
    Kml,
    /// Flat comma separated values.
    Csv,
}

impl TrackFormat {
    /// File extension without the dot.
    #[must_use]
    pub fn extension(self) -> &'static str {
        match self {
            Self::Kml => "kml",
            Self::Csv => "csv",
        }
    }
}

impl FromStr for TrackFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "kml" => Ok(Self::Kml),
            "csv" => Ok(Self::Csv),
            _ => Err(format!("unknown format '{s}', expected kml or csv")),
        }
    }
}

impl fmt::Display for TrackFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Convert Celsius to Fahrenheit.
#[must_use]
pub fn c_to_f(celsius: f64) -> f64 {
    celsius * 9.0 / 5.0 + 32.0
}

/// Convert meters to feet.
#[must_use]
pub fn m_to_ft(meters: f64) -> f64 {
    meters / METERS_PER_FOOT
}

/// Convert feet to meters.
#[must_use]
pub fn ft_to_m(feet: f64) -> f64 {
    feet * METERS_PER_FOOT
}

/// Convert meters to statute miles.
#[must_use]
pub fn m_to_mi(meters: f64) -> f64 {
    meters / METERS_PER_MILE
}

/// Convert meters per second to miles per hour.
#[must_use]
pub fn mps_to_mph(mps: f64) -> f64 {
    m_to_mi(mps * 3600.0)
}

/// Convert meters per second to feet per minute.
#[must_use]
pub fn mps_to_fpm(mps: f64) -> f64 {
    m_to_ft(mps * 60.0)
}

/// Round to a number of decimal places.
#[must_use]
pub fn round_to(value: f64, places: i32) -> f64 {
    let scale = 10f64.powi(places);
    (value * scale).round() / scale
}
