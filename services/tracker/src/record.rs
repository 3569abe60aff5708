//! Parsing of raw location and geofence records from either collaborator
//!
//! A record that is missing fields, carries an unparseable timestamp or
//! out-of-range coordinates yields `None`. Callers treat that exactly like
//! "no data"; nothing here is an error.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde_json::Value;

use crate::model::{GeofenceState, LocationSample, DEFAULT_GEOFENCE_RADIUS};

/// Devices report ISO dates, registration seeds use day-first dates
const DATE_FORMATS: [&str; 2] = ["%Y-%m-%d", "%d-%m-%Y"];
const TIME_FORMAT: &str = "%H:%M:%S";

pub fn parse_date_time(date: &str, time: &str) -> Option<NaiveDateTime> {
    let time = NaiveTime::parse_from_str(time.trim(), TIME_FORMAT).ok()?;
    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(date.trim(), format).ok())
        .map(|date| date.and_time(time))
}

/// Location from the realtime channel: `{"timestamp": "date,time,lat,lng"}`
pub fn location_from_realtime(record: &Value) -> Option<LocationSample> {
    let timestamp = record.get("timestamp")?.as_str()?;
    let mut fields = timestamp.split(',');
    let date = fields.next()?;
    let time = fields.next()?;
    let lat = fields.next()?.trim().parse::<f64>().ok()?;
    let lng = fields.next()?.trim().parse::<f64>().ok()?;
    sample(date, time, lat, lng)
}

/// Location from the polling endpoint: separate `date`, `time`, `latitude`, `longitude`
pub fn location_from_polling(record: &Value) -> Option<LocationSample> {
    let date = record.get("date")?.as_str()?;
    let time = record.get("time")?.as_str()?;
    let lat = number(record.get("latitude")?)?;
    let lng = number(record.get("longitude")?)?;
    sample(date, time, lat, lng)
}

/// Geofence from the realtime channel.
///
/// Telemetry read from the sibling `battery`/`main` paths wins over
/// fields embedded in the geofence record itself.
pub fn geofence_from_realtime(
    record: &Value,
    battery: Option<Value>,
    main: Option<Value>,
) -> Option<GeofenceState> {
    if !record.is_object() {
        return None;
    }
    let lat = number(record.get("lat")?)?;
    let lng = number(record.get("lng")?)?;
    let radius = radius(record.get("radius"))?;
    if !valid_coordinates(lat, lng) {
        return None;
    }
    Some(GeofenceState {
        lat,
        lng,
        radius,
        battery: telemetry(battery).or_else(|| telemetry(record.get("battery").cloned())),
        main: telemetry(main).or_else(|| telemetry(record.get("main").cloned())),
    })
}

/// Geofence from the polling endpoint. Only stored documents (with `_id`) count.
pub fn geofence_from_polling(record: &Value) -> Option<GeofenceState> {
    record.get("_id")?;
    let lat = number(record.get("latitude")?)?;
    let lng = number(record.get("longitude")?)?;
    let radius = radius(record.get("radius"))?;
    if !valid_coordinates(lat, lng) {
        return None;
    }
    Some(GeofenceState {
        lat,
        lng,
        radius,
        battery: telemetry(record.get("battery").cloned()),
        main: telemetry(record.get("main").cloned()),
    })
}

fn sample(date: &str, time: &str, lat: f64, lng: f64) -> Option<LocationSample> {
    parse_date_time(date, time)?;
    if !valid_coordinates(lat, lng) {
        return None;
    }
    Some(LocationSample {
        lat,
        lng,
        last_updated: format!("{} {}", date.trim(), time.trim()),
    })
}

/// A JSON number or a numeric string
fn number(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    parsed.is_finite().then_some(parsed)
}

/// Missing, null or zero radius means the default; anything non-numeric is malformed
fn radius(value: Option<&Value>) -> Option<f64> {
    match value {
        None | Some(Value::Null) => Some(DEFAULT_GEOFENCE_RADIUS),
        Some(value) => {
            let radius = number(value)?;
            if radius > 0.0 {
                Some(radius)
            } else {
                Some(DEFAULT_GEOFENCE_RADIUS)
            }
        }
    }
}

fn telemetry(value: Option<Value>) -> Option<Value> {
    value.filter(|v| !v.is_null())
}

fn valid_coordinates(lat: f64, lng: f64) -> bool {
    (-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lng)
}
