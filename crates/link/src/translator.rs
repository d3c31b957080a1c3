//! State document translation between the controller's typed state and the
//! compact JSON carried in `DATA:` frames.
//!
//! Encoding uses short keys and one-decimal strings for the climate readings
//! so a full snapshot stays well inside the bridge's frame budget. Decoding
//! is a sparse update: every field is optional, several spellings are
//! accepted per field, and numbers may arrive as JSON numbers or strings.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::device::Mode;
use crate::error::{DecodeError, EncodeError};

/// Largest DATA JSON body the controller will send.
pub const MAX_DATA_JSON: usize = 120;

// ---------------------------------------------------------------------------
// Typed state
// ---------------------------------------------------------------------------

/// Calibrated sensor values as produced by the controller.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorSnapshot {
    /// 0 (dark) ..= 100 (bright).
    pub light: u8,
    /// 0 (dry) ..= 100 (wet).
    pub soil_moisture: u8,
    pub rain: bool,
    pub temperature_c: f64,
    pub humidity_percent: f64,
}

/// Reported state of one actuator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActuatorReport {
    pub mode: Mode,
    pub active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceReports {
    pub pump: ActuatorReport,
    pub light: ActuatorReport,
    pub fan: ActuatorReport,
}

// ---------------------------------------------------------------------------
// Encode
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct WireSnapshot {
    light: u8,
    moisture: u8,
    rain: u8,
    temp: String,
    hum: String,
    pump: u8,
    #[serde(rename = "pMode")]
    p_mode: u8,
    #[serde(rename = "lMode")]
    l_mode: u8,
    fan: u8,
    #[serde(rename = "fMode")]
    f_mode: u8,
}

/// Serialize a snapshot into the JSON body of a `DATA:` frame.
pub fn encode(sensors: &SensorSnapshot, devices: &DeviceReports) -> Result<String, EncodeError> {
    encode_with_limit(sensors, devices, MAX_DATA_JSON)
}

pub fn encode_with_limit(
    sensors: &SensorSnapshot,
    devices: &DeviceReports,
    limit: usize,
) -> Result<String, EncodeError> {
    let wire = WireSnapshot {
        light: sensors.light,
        moisture: sensors.soil_moisture,
        rain: sensors.rain as u8,
        temp: format!("{:.1}", sensors.temperature_c),
        hum: format!("{:.1}", sensors.humidity_percent),
        pump: devices.pump.active as u8,
        p_mode: devices.pump.mode.as_u8(),
        l_mode: devices.light.mode.as_u8(),
        fan: devices.fan.active as u8,
        f_mode: devices.fan.mode.as_u8(),
    };
    let json = serde_json::to_string(&wire)?;
    if json.len() > limit {
        return Err(EncodeError::TooLarge {
            size: json.len(),
            limit,
        });
    }
    Ok(json)
}

// ---------------------------------------------------------------------------
// Decode
// ---------------------------------------------------------------------------

/// Fields present in one DATA document. `None` means "leave unchanged".
///
/// Values are kept as received (not range-checked); clamping happens where
/// the state is exposed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateUpdate {
    pub light: Option<i64>,
    pub soil: Option<i64>,
    pub rain: Option<i64>,
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub pump_active: Option<bool>,
    pub pump_mode: Option<i64>,
    pub light_mode: Option<i64>,
    pub fan_active: Option<bool>,
    pub fan_mode: Option<i64>,
}

impl StateUpdate {
    /// Number of fields carried by this update.
    pub fn field_count(&self) -> usize {
        [
            self.light.is_some(),
            self.soil.is_some(),
            self.rain.is_some(),
            self.temperature.is_some(),
            self.humidity.is_some(),
            self.pump_active.is_some(),
            self.pump_mode.is_some(),
            self.light_mode.is_some(),
            self.fan_active.is_some(),
            self.fan_mode.is_some(),
        ]
        .iter()
        .filter(|present| **present)
        .count()
    }
}

/// Parse the JSON body of a `DATA:` frame into a sparse update.
pub fn decode(json: &str) -> Result<StateUpdate, DecodeError> {
    let trimmed = json.trim_start();
    if !trimmed.starts_with('{') {
        return Err(DecodeError::MissingOpeningBrace);
    }
    let doc: Value = serde_json::from_str(trimmed)?;
    let Value::Object(obj) = doc else {
        return Err(DecodeError::NotAnObject);
    };

    Ok(StateUpdate {
        light: first(&obj, &["light"]).and_then(as_int),
        soil: first(&obj, &["moisture"]).and_then(as_int),
        rain: first(&obj, &["rain"]).and_then(as_int),
        temperature: first(&obj, &["temp", "temperature"]).and_then(as_float),
        humidity: first(&obj, &["hum", "humidity"]).and_then(as_float),
        pump_active: first(&obj, &["pump", "pumpActive"]).and_then(as_bool),
        pump_mode: first(&obj, &["pMode", "pumpMode"]).and_then(as_int),
        light_mode: first(&obj, &["lMode", "lightMode", "lightActive"]).and_then(as_int),
        fan_active: first(&obj, &["fan", "fanActive"]).and_then(as_bool),
        fan_mode: first(&obj, &["fMode", "fanMode"]).and_then(as_int),
    })
}

/// Value of the first key present, in priority order.
fn first<'a>(obj: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|k| obj.get(*k))
}

// ---------------------------------------------------------------------------
// Value normalization
// ---------------------------------------------------------------------------

/// Number, or a string holding a number. Anything else is unusable.
pub fn as_float(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

/// Integer view of a value. Fractions truncate toward zero.
pub fn as_int(v: &Value) -> Option<i64> {
    match v {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().filter(|f| f.is_finite()).map(|f| f as i64))
        }
        Value::Bool(b) => Some(*b as i64),
        _ => None,
    }
}

/// Booleans, numbers (non-zero is true) and the strings
/// `true`/`false`, `1`/`0`, `on`/`off`.
pub fn as_bool(v: &Value) -> Option<bool> {
    match v {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_f64().map(|f| f != 0.0),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "on" => Some(true),
            "false" | "0" | "off" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn snapshot() -> SensorSnapshot {
        SensorSnapshot {
            light: 75,
            soil_moisture: 12,
            rain: false,
            temperature_c: 24.3,
            humidity_percent: 60.0,
        }
    }

    fn reports() -> DeviceReports {
        DeviceReports {
            pump: ActuatorReport {
                mode: Mode::Auto,
                active: false,
            },
            light: ActuatorReport {
                mode: Mode::On,
                active: true,
            },
            fan: ActuatorReport {
                mode: Mode::Off,
                active: false,
            },
        }
    }

    // -- encode -------------------------------------------------------------

    #[test]
    fn encode_uses_short_keys_and_one_decimal() {
        let json = encode(&snapshot(), &reports()).unwrap();
        assert_eq!(
            json,
            r#"{"light":75,"moisture":12,"rain":0,"temp":"24.3","hum":"60.0","pump":0,"pMode":2,"lMode":1,"fan":0,"fMode":0}"#
        );
    }

    #[test]
    fn encode_worst_case_fits_limit() {
        let s = SensorSnapshot {
            light: 100,
            soil_moisture: 100,
            rain: true,
            temperature_c: -40.04,
            humidity_percent: 100.0,
        };
        let r = ActuatorReport {
            mode: Mode::Auto,
            active: true,
        };
        let json = encode(
            &s,
            &DeviceReports {
                pump: r,
                light: r,
                fan: r,
            },
        )
        .unwrap();
        assert!(json.len() <= MAX_DATA_JSON, "{} bytes", json.len());
    }

    #[test]
    fn encode_rejects_oversize_payload() {
        let mut s = snapshot();
        s.temperature_c = 1.0e30;
        let err = encode(&s, &reports()).unwrap_err();
        assert!(matches!(err, EncodeError::TooLarge { limit: 120, .. }));
    }

    #[test]
    fn encode_with_small_limit_fails() {
        let err = encode_with_limit(&snapshot(), &reports(), 40).unwrap_err();
        assert!(matches!(err, EncodeError::TooLarge { limit: 40, .. }));
    }

    #[test]
    fn encoded_snapshot_decodes_to_same_values() {
        let json = encode(&snapshot(), &reports()).unwrap();
        let u = decode(&json).unwrap();
        assert_eq!(u.light, Some(75));
        assert_eq!(u.soil, Some(12));
        assert_eq!(u.rain, Some(0));
        assert_eq!(u.temperature, Some(24.3));
        assert_eq!(u.humidity, Some(60.0));
        assert_eq!(u.pump_active, Some(false));
        assert_eq!(u.pump_mode, Some(2));
        assert_eq!(u.light_mode, Some(1));
        assert_eq!(u.fan_active, Some(false));
        assert_eq!(u.fan_mode, Some(0));
    }

    // -- decode: scenario payload -------------------------------------------

    #[test]
    fn decode_controller_payload() {
        let u = decode(
            r#"{"light":75,"moisture":12,"rain":0,"temp":"24.3","hum":"60.0","pump":0,"pMode":2}"#,
        )
        .unwrap();
        assert_eq!(u.light, Some(75));
        assert_eq!(u.soil, Some(12));
        assert_eq!(u.rain, Some(0));
        assert_eq!(u.temperature, Some(24.3));
        assert_eq!(u.humidity, Some(60.0));
        assert_eq!(u.pump_active, Some(false));
        assert_eq!(u.pump_mode, Some(2));
        assert_eq!(u.light_mode, None);
        assert_eq!(u.fan_active, None);
        assert_eq!(u.fan_mode, None);
        assert_eq!(u.field_count(), 7);
    }

    #[test]
    fn decode_is_deterministic() {
        let payload = r#"{"light":40,"moisture":55,"temp":21.5,"fanActive":true}"#;
        assert_eq!(decode(payload).unwrap(), decode(payload).unwrap());
    }

    // -- decode: aliases ----------------------------------------------------

    #[test]
    fn temperature_string_number_and_long_key_agree() {
        let a = decode(r#"{"temp":"23.5"}"#).unwrap().temperature;
        let b = decode(r#"{"temp":23.5}"#).unwrap().temperature;
        let c = decode(r#"{"temperature":23.5}"#).unwrap().temperature;
        assert_eq!(a, Some(23.5));
        assert_eq!(a, b);
        assert_eq!(b, c);
    }

    #[test]
    fn short_key_wins_over_long_key() {
        let u = decode(r#"{"temperature":30.0,"temp":"20.0","hum":50,"humidity":"70"}"#).unwrap();
        assert_eq!(u.temperature, Some(20.0));
        assert_eq!(u.humidity, Some(50.0));
    }

    #[test]
    fn long_form_humidity_as_string() {
        let u = decode(r#"{"humidity":"48.5"}"#).unwrap();
        assert_eq!(u.humidity, Some(48.5));
    }

    #[test]
    fn pump_active_aliases() {
        assert_eq!(decode(r#"{"pump":1}"#).unwrap().pump_active, Some(true));
        assert_eq!(
            decode(r#"{"pumpActive":true}"#).unwrap().pump_active,
            Some(true)
        );
        assert_eq!(
            decode(r#"{"pump":0,"pumpActive":true}"#).unwrap().pump_active,
            Some(false)
        );
    }

    #[test]
    fn mode_aliases() {
        let u = decode(r#"{"pumpMode":1,"fanMode":2,"lightMode":0}"#).unwrap();
        assert_eq!(u.pump_mode, Some(1));
        assert_eq!(u.fan_mode, Some(2));
        assert_eq!(u.light_mode, Some(0));

        let u = decode(r#"{"lMode":2,"lightMode":0}"#).unwrap();
        assert_eq!(u.light_mode, Some(2));
    }

    #[test]
    fn light_active_maps_to_light_mode() {
        assert_eq!(
            decode(r#"{"lightActive":true}"#).unwrap().light_mode,
            Some(1)
        );
        assert_eq!(
            decode(r#"{"lightActive":false}"#).unwrap().light_mode,
            Some(0)
        );
    }

    #[test]
    fn fan_active_aliases() {
        assert_eq!(decode(r#"{"fan":1}"#).unwrap().fan_active, Some(true));
        assert_eq!(
            decode(r#"{"fanActive":false}"#).unwrap().fan_active,
            Some(false)
        );
    }

    // -- decode: sparse and malformed ---------------------------------------

    #[test]
    fn empty_object_updates_nothing() {
        let u = decode("{}").unwrap();
        assert_eq!(u, StateUpdate::default());
        assert_eq!(u.field_count(), 0);
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let u = decode(r#"{"seq":7,"light":3}"#).unwrap();
        assert_eq!(u.light, Some(3));
        assert_eq!(u.field_count(), 1);
    }

    #[test]
    fn unusable_value_leaves_field_unset() {
        let u = decode(r#"{"temp":"warm","light":null}"#).unwrap();
        assert_eq!(u.temperature, None);
        assert_eq!(u.light, None);
    }

    #[test]
    fn missing_opening_brace_fails() {
        assert!(matches!(
            decode(r#""light":5}"#),
            Err(DecodeError::MissingOpeningBrace)
        ));
        assert!(matches!(decode(""), Err(DecodeError::MissingOpeningBrace)));
    }

    #[test]
    fn invalid_json_fails() {
        assert!(matches!(
            decode(r#"{"light":5,"moist}"#),
            Err(DecodeError::Json(_))
        ));
    }

    #[test]
    fn salvaged_payload_with_complete_fields_parses() {
        let u = decode(r#"{"light":50,"moisture":40}"#).unwrap();
        assert_eq!(u.light, Some(50));
        assert_eq!(u.soil, Some(40));
        assert_eq!(u.field_count(), 2);
    }

    #[test]
    fn salvaged_payload_cut_mid_key_fails_cleanly() {
        assert!(decode(r#"{"light":50,"mois}"#).is_err());
    }

    // -- normalization ------------------------------------------------------

    #[test]
    fn as_float_variants() {
        assert_eq!(as_float(&json!(1)), Some(1.0));
        assert_eq!(as_float(&json!(" 2.5 ")), Some(2.5));
        assert_eq!(as_float(&json!(true)), Some(1.0));
        assert_eq!(as_float(&json!("abc")), None);
        assert_eq!(as_float(&json!([1])), None);
        assert!(as_float(&json!("NaN")).unwrap().is_nan());
    }

    #[test]
    fn as_int_variants() {
        assert_eq!(as_int(&json!(42)), Some(42));
        assert_eq!(as_int(&json!(42.9)), Some(42));
        assert_eq!(as_int(&json!("7")), Some(7));
        assert_eq!(as_int(&json!("7.8")), Some(7));
        assert_eq!(as_int(&json!(false)), Some(0));
        assert_eq!(as_int(&json!({})), None);
    }

    #[test]
    fn as_bool_variants() {
        assert_eq!(as_bool(&json!(true)), Some(true));
        assert_eq!(as_bool(&json!(0)), Some(false));
        assert_eq!(as_bool(&json!(2)), Some(true));
        assert_eq!(as_bool(&json!("ON")), Some(true));
        assert_eq!(as_bool(&json!("1")), Some(true));
        assert_eq!(as_bool(&json!("off")), Some(false));
        assert_eq!(as_bool(&json!("maybe")), None);
        assert_eq!(as_bool(&json!(null)), None);
    }
}
