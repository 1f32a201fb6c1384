//! KML 2.2 rendering with a `gx:Track`.

use std::fmt::Write;

use chrono::{NaiveDateTime, Utc};

use super::fields::{m_to_ft, m_to_mi, mps_to_mph};
use super::{OutputTrack, TrackSummary};

const LINE_COLOR: &str = "ff0000ff";
const START_COLOR: &str = "ff00ff00";
const FINISH_COLOR: &str = "ff0000ff";
const PIN_ICON: &str = "http://maps.google.com/mapfiles/kml/shapes/placemark_circle.png";
const SCHEMA_ID: &str = "dbi3_fields";

/// Render a non-empty track as a KML document.
///
/// An empty track renders as an empty document.
pub(super) fn render(track: &OutputTrack) -> String {
    let mut out = String::new();
    out.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    out.push_str(
        "<kml xmlns=\"http://www.opengis.net/kml/2.2\" xmlns:gx=\"http://www.google.com/kml/ext/2.2\">\n",
    );

    let (Some(summary), Some(first), Some(last)) =
        (&track.summary, track.points.first(), track.points.last())
    else {
        out.push_str("<Document/>\n</kml>\n");
        return out;
    };

    let description = description(track, summary);
    let _ = writeln!(out, "<Document>");
    let _ = writeln!(out, "<name>{}</name>", summary.start_time.format("%Y%m%d_%H%MZ_DBI3"));
    let _ = writeln!(out, "<open>1</open>");
    let _ = writeln!(out, "<description>{description}</description>");

    write_styles(&mut out);
    write_schema(&mut out, track);

    // Track
    let (center_lat, center_lon) = summary.center();
    let _ = writeln!(out, "<Placemark>");
    let _ = writeln!(out, "<name>{}</name>", summary.start_time.format("%Y%m%d_%H%MZ Track"));
    let _ = writeln!(out, "<description>{description}</description>");
    let _ = writeln!(out, "<styleUrl>#track</styleUrl>");
    let _ = writeln!(out, "<LookAt>");
    let _ = writeln!(
        out,
        "<gx:TimeSpan><begin>{}</begin><end>{}</end></gx:TimeSpan>",
        iso(&summary.start_time),
        iso(&summary.end_time)
    );
    let _ = writeln!(out, "<longitude>{center_lon}</longitude>");
    let _ = writeln!(out, "<latitude>{center_lat}</latitude>");
    let _ = writeln!(out, "<range>{}</range>", summary.diagonal_m() * 1.5);
    let _ = writeln!(out, "</LookAt>");
    let _ = writeln!(out, "<gx:Track>");
    let _ = writeln!(out, "<extrude>{}</extrude>", u8::from(track.options.extend_to_ground));
    let _ = writeln!(
        out,
        "<altitudeMode>{}</altitudeMode>",
        track.options.altitude_mode.as_kml()
    );
    for point in &track.points {
        let _ = writeln!(out, "<when>{}</when>", iso(&point.time));
    }
    for point in &track.points {
        let _ = writeln!(
            out,
            "<gx:coord>{} {} {}</gx:coord>",
            point.lon,
            point.lat,
            track.coord_altitude(point)
        );
    }
    write_extended_data(&mut out, track);
    let _ = writeln!(out, "</gx:Track>");
    let _ = writeln!(out, "</Placemark>");

    write_pin(&mut out, "Start", "start", &first.time, first.lon, first.lat);
    write_pin(&mut out, "Finish", "finish", &last.time, last.lon, last.lat);

    let _ = writeln!(out, "</Document>");
    let _ = writeln!(out, "</kml>");
    out
}

fn iso(time: &NaiveDateTime) -> String {
    time.format("%Y-%m-%dT%H:%M:%S").to_string()
}

fn description(track: &OutputTrack, summary: &TrackSummary) -> String {
    let metric = track.options.use_metric;
    let (distance, dist_unit) = if metric {
        (summary.distance_m, "m")
    } else {
        (m_to_mi(summary.distance_m), "mi")
    };
    let alt = |m: f64| if metric { m } else { m_to_ft(m) };
    let alt_unit = if metric { "m" } else { "ft" };
    let speed = |mps: f64| if metric { mps } else { mps_to_mph(mps) };
    let speed_unit = if metric { "mps" } else { "MPH" };

    let elapsed = summary.elapsed().num_seconds().max(0);
    let (hours, minutes, seconds) = (elapsed / 3600, elapsed / 60 % 60, elapsed % 60);

    let note = track
        .options
        .track_note
        .as_deref()
        .map(|note| format!("<b>{}</b>\n", escape(note)))
        .unwrap_or_default();
    let firmware = track.header.as_ref().map_or("", |h| h.firmware.as_str());

    let mut table = String::new();
    let _ = writeln!(table, "<![CDATA[{note}<table>");
    let _ = writeln!(table, "<tr><td><b>Distance </b>{distance:.2} {dist_unit}</td></tr>");
    let _ = writeln!(table, "<tr><td><b>Min Alt </b>{:.2} {alt_unit}</td></tr>", alt(summary.min_altitude_m));
    let _ = writeln!(table, "<tr><td><b>Max Alt </b>{:.2} {alt_unit}</td></tr>", alt(summary.max_altitude_m));
    let _ = writeln!(
        table,
        "<tr><td><b>Avg Speed </b>{:.2} {speed_unit}</td></tr>",
        speed(summary.average_speed_mps())
    );
    let _ = writeln!(
        table,
        "<tr><td><b>Max Speed </b>{:.2}(SOG {:.2}) {speed_unit}</td></tr>",
        speed(summary.max_point_speed_mps),
        speed(summary.max_sog_mps)
    );
    let _ = writeln!(table, "<tr><td><b>Start Time </b>{}</td></tr>", iso(&summary.start_time));
    let _ = writeln!(table, "<tr><td><b>End Time </b>{}</td></tr>", iso(&summary.end_time));
    let _ = writeln!(
        table,
        "<tr><td><b>Elapsed </b>{hours:02}:{minutes:02}:{seconds:02}</td></tr>"
    );
    let _ = writeln!(
        table,
        "<tr><td>DBI3  {}  FWVER {}</td></tr>",
        escape(&track.serial),
        escape(firmware)
    );
    let _ = writeln!(
        table,
        "<tr><td>Formatted {}</td></tr>",
        Utc::now().format("%Y-%m-%d %H:%M:%S")
    );
    table.push_str("</table>]]>");
    table
}

fn write_styles(out: &mut String) {
    let _ = writeln!(
        out,
        "<Style id=\"track\"><LineStyle><color>{LINE_COLOR}</color><width>2</width></LineStyle>\
         <IconStyle><Icon><href>{PIN_ICON}</href></Icon></IconStyle></Style>"
    );
    for (id, color) in [("start", START_COLOR), ("finish", FINISH_COLOR)] {
        let _ = writeln!(
            out,
            "<Style id=\"{id}\"><IconStyle><Icon><href>{PIN_ICON}</href></Icon></IconStyle>\
             <LabelStyle><color>{color}</color></LabelStyle></Style>"
        );
    }
}

fn write_schema(out: &mut String, track: &OutputTrack) {
    if track.options.fields.is_empty() {
        return;
    }
    let _ = writeln!(out, "<Schema id=\"{SCHEMA_ID}\">");
    for field in track.options.fields.iter() {
        let _ = writeln!(
            out,
            "<gx:SimpleArrayField name=\"{}\" type=\"float\"><displayName>{}</displayName></gx:SimpleArrayField>",
            field.schema_name(),
            field.display_name(track.options.use_metric)
        );
    }
    let _ = writeln!(out, "</Schema>");
}

fn write_extended_data(out: &mut String, track: &OutputTrack) {
    if track.options.fields.is_empty() {
        return;
    }
    let metric = track.options.use_metric;
    let _ = writeln!(out, "<ExtendedData>");
    let _ = writeln!(out, "<SchemaData schemaUrl=\"#{SCHEMA_ID}\">");
    for field in track.options.fields.iter() {
        let _ = writeln!(out, "<gx:SimpleArrayData name=\"{}\">", field.schema_name());
        for point in &track.points {
            match point.display_field(field, metric) {
                Some(value) => {
                    let _ = writeln!(out, "<gx:value>{value}</gx:value>");
                }
                None => out.push_str("<gx:value/>\n"),
            }
        }
        let _ = writeln!(out, "</gx:SimpleArrayData>");
    }
    let _ = writeln!(out, "</SchemaData>");
    let _ = writeln!(out, "</ExtendedData>");
}

fn write_pin(out: &mut String, name: &str, style: &str, time: &NaiveDateTime, lon: f64, lat: f64) {
    let _ = writeln!(
        out,
        "<Placemark><name>{name}</name><description>{}</description><styleUrl>#{style}</styleUrl>\
         <Point><coordinates>{lon},{lat}</coordinates></Point></Placemark>",
        iso(time)
    );
}

fn escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}
