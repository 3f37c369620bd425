//! Typed health snapshot produced by one successful poll of a controller.
//!
//! A `Snapshot` is built whole by a transport's parsing step and never mutated
//! afterwards; the poller replaces it as a unit.

use std::collections::BTreeMap;
use std::fmt;

use serde::Deserialize;

/// A scalar reading as reported by the controller.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Number(f64),
    Text(String),
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Number(n) => write!(f, "{}", n),
            Scalar::Text(s) => write!(f, "{}", s),
        }
    }
}

/// A reading, either bare or as a `[value, unit]` pair.
///
/// The legacy management protocol reports most readings as pairs such as
/// `[35, "Celsius"]` or `[23, "Percentage"]`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Reading {
    Tagged(Scalar, String),
    Bare(Scalar),
}

impl Reading {
    /// The measurement itself; the unit tag of a pair is discarded.
    pub fn value(&self) -> &Scalar {
        match self {
            Reading::Tagged(value, _) | Reading::Bare(value) => value,
        }
    }
}

/// Installation/health status of a temperature sensor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SensorStatus {
    Ok,
    NotInstalled,
    Other(String),
}

impl From<&str> for SensorStatus {
    fn from(s: &str) -> Self {
        let normalized = s.trim();
        if normalized.eq_ignore_ascii_case("ok") {
            SensorStatus::Ok
        } else if normalized.eq_ignore_ascii_case("not installed")
            || normalized.eq_ignore_ascii_case("absent")
        {
            SensorStatus::NotInstalled
        } else {
            SensorStatus::Other(normalized.to_string())
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TemperatureReading {
    /// Degrees Celsius
    pub current: Option<Reading>,
    pub status: SensorStatus,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FanReading {
    /// Percent of full speed
    pub speed: Option<Reading>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "UPPERCASE")]
pub enum PowerStatus {
    On,
    Off,
    Unknown,
}

impl From<&str> for PowerStatus {
    fn from(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            // Transitional states report what the server is still doing.
            "on" | "poweringoff" => PowerStatus::On,
            "off" | "poweringon" => PowerStatus::Off,
            _ => PowerStatus::Unknown,
        }
    }
}

/// Health value reported when the controller does not report one.
pub const DEFAULT_HEALTH: &str = "OK";

/// One immutable, fully-populated result of a poll cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub temperatures: BTreeMap<String, TemperatureReading>,
    pub fans: BTreeMap<String, FanReading>,
    pub power_status: PowerStatus,
    pub power_on_minutes: u64,
    /// `None` when the controller reports no power reading.
    pub power_draw_watts: Option<u64>,
    /// Aggregate health as reported, e.g. "OK", "Warning", "Critical".
    pub health: String,
    pub serial_number: Option<String>,
    pub model: Option<String>,
    pub firmware_version: Option<String>,
}

impl Snapshot {
    /// Whether the aggregate health indicates a problem.
    pub fn has_problem(&self) -> bool {
        let health = self.health.trim();
        !(health.eq_ignore_ascii_case("ok") || health.eq_ignore_ascii_case("healthy"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot_with_health(health: &str) -> Snapshot {
        Snapshot {
            temperatures: BTreeMap::new(),
            fans: BTreeMap::new(),
            power_status: PowerStatus::On,
            power_on_minutes: 0,
            power_draw_watts: None,
            health: health.to_string(),
            serial_number: None,
            model: None,
            firmware_version: None,
        }
    }

    #[test]
    fn test_reading_pair_deserializes_to_tagged() {
        let r: Reading = serde_json::from_str(r#"["OK", "Celsius"]"#).unwrap();
        assert_eq!(
            r,
            Reading::Tagged(Scalar::Text("OK".to_string()), "Celsius".to_string())
        );
        assert_eq!(r.value(), &Scalar::Text("OK".to_string()));

        let r: Reading = serde_json::from_str(r#"[35, "Celsius"]"#).unwrap();
        assert_eq!(r.value(), &Scalar::Number(35.0));

        let r: Reading = serde_json::from_str("23").unwrap();
        assert_eq!(r, Reading::Bare(Scalar::Number(23.0)));
    }

    #[test]
    fn test_sensor_status_parsing() {
        assert_eq!(SensorStatus::from("OK"), SensorStatus::Ok);
        assert_eq!(SensorStatus::from("Not Installed"), SensorStatus::NotInstalled);
        assert_eq!(SensorStatus::from("Absent"), SensorStatus::NotInstalled);
        assert_eq!(
            SensorStatus::from("Critical"),
            SensorStatus::Other("Critical".to_string())
        );
    }

    #[test]
    fn test_power_status_parsing() {
        assert_eq!(PowerStatus::from("On"), PowerStatus::On);
        assert_eq!(PowerStatus::from("OFF"), PowerStatus::Off);
        assert_eq!(PowerStatus::from("PoweringOn"), PowerStatus::Off);
        assert_eq!(PowerStatus::from("Reset"), PowerStatus::Unknown);
        assert_eq!(PowerStatus::On.to_string(), "ON");
    }

    #[test]
    fn test_health_problem() {
        assert!(!snapshot_with_health("OK").has_problem());
        assert!(!snapshot_with_health("Healthy").has_problem());
        assert!(snapshot_with_health("Warning").has_problem());
        assert!(snapshot_with_health("Critical").has_problem());
    }
}
