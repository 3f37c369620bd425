//! Read-only entities projected from the cached snapshot.

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::Map;
use serde_json::Value;

use super::coordinator::Cache;
use super::snapshot::PowerStatus;
use super::snapshot::Scalar;
use super::snapshot::SensorStatus;
use super::snapshot::Snapshot;
use crate::engine::slugify;
use crate::engine::Entity;
use crate::engine::EntityState;
use crate::engine::Platform;
use crate::engine::StateValue;

/// Which field of the snapshot an entity reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Measurement {
    Temperature(String),
    Fan(String),
    PowerStatus,
    PowerDraw,
    PowerOnTime,
    /// On when the aggregate health is anything but OK
    HealthProblem,
}

fn scalar_value(scalar: &Scalar) -> StateValue {
    match scalar {
        Scalar::Number(n) => StateValue::Number(*n),
        Scalar::Text(s) => StateValue::Text(s.clone()),
    }
}

impl Measurement {
    /// Extract this measurement from a snapshot. `None` reports as unknown.
    pub fn project(&self, snapshot: &Snapshot) -> Option<StateValue> {
        match self {
            Measurement::Temperature(label) => {
                let reading = snapshot.temperatures.get(label)?;
                if reading.status == SensorStatus::NotInstalled {
                    return None;
                }
                reading.current.as_ref().map(|r| scalar_value(r.value()))
            }
            Measurement::Fan(label) => snapshot
                .fans
                .get(label)?
                .speed
                .as_ref()
                .map(|r| scalar_value(r.value())),
            Measurement::PowerStatus => match snapshot.power_status {
                PowerStatus::Unknown => None,
                status => Some(StateValue::Text(status.to_string())),
            },
            Measurement::PowerDraw => snapshot
                .power_draw_watts
                .map(|w| StateValue::Number(w as f64)),
            Measurement::PowerOnTime => {
                Some(StateValue::Number(snapshot.power_on_minutes as f64))
            }
            Measurement::HealthProblem => Some(StateValue::Bool(snapshot.has_problem())),
        }
    }

    pub fn unit(&self) -> Option<&'static str> {
        match self {
            Measurement::Temperature(_) => Some("°C"),
            Measurement::Fan(_) => Some("%"),
            Measurement::PowerDraw => Some("W"),
            Measurement::PowerOnTime => Some("min"),
            Measurement::PowerStatus | Measurement::HealthProblem => None,
        }
    }

    pub fn platform(&self) -> Platform {
        match self {
            Measurement::HealthProblem => Platform::BinarySensor,
            _ => Platform::Sensor,
        }
    }

    fn suffix(&self) -> String {
        match self {
            Measurement::Temperature(label) => format!("temp_{}", slugify(label)),
            Measurement::Fan(label) => format!("fan_{}", slugify(label)),
            Measurement::PowerStatus => "power".to_string(),
            Measurement::PowerDraw => "power_usage".to_string(),
            Measurement::PowerOnTime => "power_on_time".to_string(),
            Measurement::HealthProblem => "global_health".to_string(),
        }
    }

    fn label(&self) -> String {
        match self {
            Measurement::Temperature(label) => format!("Temp {}", label),
            Measurement::Fan(label) => format!("Fan {}", label),
            Measurement::PowerStatus => "Power Status".to_string(),
            Measurement::PowerDraw => "Power Usage".to_string(),
            Measurement::PowerOnTime => "Power On Time".to_string(),
            Measurement::HealthProblem => "Global Health".to_string(),
        }
    }
}

/// A sensor or binary sensor backed by one controller's cache
pub struct IloSensor {
    entity_id: String,
    name: String,
    measurement: Measurement,
    cache: Arc<Cache>,
}

impl IloSensor {
    pub fn new(
        device_slug: &str,
        device_name: &str,
        measurement: Measurement,
        cache: Arc<Cache>,
    ) -> Self {
        Self {
            entity_id: format!(
                "{}.{}_{}",
                measurement.platform(),
                device_slug,
                measurement.suffix()
            ),
            name: format!("{} {}", device_name, measurement.label()),
            measurement,
            cache,
        }
    }
}

impl Entity for IloSensor {
    fn entity_id(&self) -> &str {
        &self.entity_id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn platform(&self) -> Platform {
        self.measurement.platform()
    }

    fn state(&self) -> EntityState {
        let cache = self.cache.load();
        let snapshot = cache.snapshot.as_deref();

        let mut attributes = Map::new();
        if self.measurement == Measurement::HealthProblem {
            let status = snapshot.map_or("Unknown", |s| s.health.as_str());
            attributes.insert("status".to_string(), Value::from(status));
        }

        EntityState {
            entity_id: self.entity_id.clone(),
            name: self.name.clone(),
            platform: self.platform(),
            value: snapshot.and_then(|s| self.measurement.project(s)),
            unit: self.measurement.unit(),
            stale: cache.is_stale(),
            attributes,
        }
    }
}

/// Binary sensor that is on while the last poll of the controller failed
pub struct StaleSensor {
    entity_id: String,
    name: String,
    cache: Arc<Cache>,
}

impl StaleSensor {
    pub fn new(device_slug: &str, device_name: &str, cache: Arc<Cache>) -> Self {
        Self {
            entity_id: format!("binary_sensor.{}_stale", device_slug),
            name: format!("{} Data Stale", device_name),
            cache,
        }
    }
}

impl Entity for StaleSensor {
    fn entity_id(&self) -> &str {
        &self.entity_id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn platform(&self) -> Platform {
        Platform::BinarySensor
    }

    fn state(&self) -> EntityState {
        let cache = self.cache.load();

        let mut attributes = Map::new();
        if let Some(err) = &cache.last_error {
            attributes.insert("error".to_string(), Value::from(err.to_string()));
        }
        if let Some(secs) = cache
            .last_update
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_secs())
        {
            attributes.insert("last_update".to_string(), Value::from(secs));
        }

        EntityState {
            entity_id: self.entity_id.clone(),
            name: self.name.clone(),
            platform: Platform::BinarySensor,
            value: Some(StateValue::Bool(cache.is_stale())),
            unit: None,
            stale: false,
            attributes,
        }
    }
}

/// Reserve `base` in `taken`, appending `_2`, `_3`, ... until the id is free.
fn claim(taken: &mut HashSet<String>, base: &str) -> String {
    let mut id = base.to_string();
    let mut n = 2;
    while !taken.insert(id.clone()) {
        id = format!("{}_{}", base, n);
        n += 1;
    }
    id
}

/// Build the entities for a controller from the snapshot seen at setup.
///
/// Temperature sensors reported as not installed are left out. Labels that
/// slug to the same id are numbered so every entity id is unique.
pub fn discover(
    device_slug: &str,
    device_name: &str,
    snapshot: &Snapshot,
    cache: &Arc<Cache>,
) -> Vec<Arc<dyn Entity>> {
    let mut measurements: Vec<Measurement> = snapshot
        .temperatures
        .iter()
        .filter(|(_, t)| t.status != SensorStatus::NotInstalled)
        .map(|(label, _)| Measurement::Temperature(label.clone()))
        .collect();
    measurements.extend(
        snapshot
            .fans
            .keys()
            .map(|label| Measurement::Fan(label.clone())),
    );
    measurements.extend([
        Measurement::PowerStatus,
        Measurement::PowerDraw,
        Measurement::PowerOnTime,
        Measurement::HealthProblem,
    ]);

    let stale = StaleSensor::new(device_slug, device_name, cache.clone());
    let mut taken = HashSet::from([stale.entity_id.clone()]);

    let mut entities: Vec<Arc<dyn Entity>> = Vec::with_capacity(measurements.len() + 1);
    for m in measurements {
        let mut sensor = IloSensor::new(device_slug, device_name, m, cache.clone());
        sensor.entity_id = claim(&mut taken, &sensor.entity_id);
        entities.push(Arc::new(sensor));
    }
    entities.push(Arc::new(stale));
    entities
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::time::Duration;

    use super::*;
    use crate::integrations::ilo::client::ClientError;
    use crate::integrations::ilo::client::MockClient;
    use crate::integrations::ilo::coordinator::Coordinator;
    use crate::integrations::ilo::snapshot::FanReading;
    use crate::integrations::ilo::snapshot::Reading;
    use crate::integrations::ilo::snapshot::TemperatureReading;

    fn snapshot() -> Snapshot {
        let mut temperatures = BTreeMap::new();
        temperatures.insert(
            "01-Inlet Ambient".to_string(),
            TemperatureReading {
                current: Some(Reading::Tagged(
                    Scalar::Number(21.0),
                    "Celsius".to_string(),
                )),
                status: SensorStatus::Ok,
            },
        );
        temperatures.insert(
            "05-P1 DIMM".to_string(),
            TemperatureReading {
                current: Some(Reading::Tagged(
                    Scalar::Text("N/A".to_string()),
                    "Celsius".to_string(),
                )),
                status: SensorStatus::NotInstalled,
            },
        );
        let mut fans = BTreeMap::new();
        fans.insert(
            "Fan 1".to_string(),
            FanReading {
                speed: Some(Reading::Tagged(
                    Scalar::Text("OK".to_string()),
                    "Celsius".to_string(),
                )),
            },
        );
        Snapshot {
            temperatures,
            fans,
            power_status: PowerStatus::On,
            power_on_minutes: 1234,
            power_draw_watts: Some(215),
            health: "OK".to_string(),
            serial_number: Some("CZJ1234567".to_string()),
            model: None,
            firmware_version: None,
        }
    }

    #[test]
    fn test_pair_projects_to_value() {
        let s = snapshot();
        assert_eq!(
            Measurement::Fan("Fan 1".to_string()).project(&s),
            Some(StateValue::Text("OK".to_string()))
        );
        assert_eq!(
            Measurement::Temperature("01-Inlet Ambient".to_string()).project(&s),
            Some(StateValue::Number(21.0))
        );
    }

    #[test]
    fn test_missing_and_not_installed_project_to_absent() {
        let s = snapshot();
        assert_eq!(Measurement::Fan("Fan 9".to_string()).project(&s), None);
        assert_eq!(
            Measurement::Temperature("05-P1 DIMM".to_string()).project(&s),
            None
        );

        let mut s = snapshot();
        s.power_draw_watts = None;
        s.power_status = PowerStatus::Unknown;
        assert_eq!(Measurement::PowerDraw.project(&s), None);
        assert_eq!(Measurement::PowerStatus.project(&s), None);
    }

    #[test]
    fn test_scalar_projections() {
        let mut s = snapshot();
        assert_eq!(
            Measurement::PowerStatus.project(&s),
            Some(StateValue::Text("ON".to_string()))
        );
        assert_eq!(
            Measurement::PowerDraw.project(&s),
            Some(StateValue::Number(215.0))
        );
        assert_eq!(
            Measurement::PowerOnTime.project(&s),
            Some(StateValue::Number(1234.0))
        );
        assert_eq!(
            Measurement::HealthProblem.project(&s),
            Some(StateValue::Bool(false))
        );
        s.health = "Critical".to_string();
        assert_eq!(
            Measurement::HealthProblem.project(&s),
            Some(StateValue::Bool(true))
        );
    }

    #[test]
    fn test_discover_skips_not_installed_temperatures() {
        let cache = Arc::new(Cache::new());
        let entities = discover("rack1", "Rack 1", &snapshot(), &cache);
        let ids: Vec<&str> = entities.iter().map(|e| e.entity_id()).collect();

        assert_eq!(
            ids,
            vec![
                "sensor.rack1_temp_01_inlet_ambient",
                "sensor.rack1_fan_fan_1",
                "sensor.rack1_power",
                "sensor.rack1_power_usage",
                "sensor.rack1_power_on_time",
                "binary_sensor.rack1_global_health",
                "binary_sensor.rack1_stale",
            ]
        );
        assert_eq!(entities[0].name(), "Rack 1 Temp 01-Inlet Ambient");
    }

    #[test]
    fn test_colliding_labels_get_distinct_ids() {
        let mut s = snapshot();
        s.temperatures.clear();
        s.fans.clear();
        for label in ["Fan", "Fan #2", "Fan 2", "fan-2"] {
            s.fans.insert(label.to_string(), FanReading { speed: None });
        }

        let cache = Arc::new(Cache::new());
        let entities = discover("rack1", "Rack 1", &s, &cache);
        let fans: Vec<&str> = entities
            .iter()
            .map(|e| e.entity_id())
            .filter(|id| id.starts_with("sensor.rack1_fan_"))
            .collect();

        assert_eq!(
            fans,
            vec![
                "sensor.rack1_fan_fan",
                "sensor.rack1_fan_fan_2",
                "sensor.rack1_fan_fan_2_2",
                "sensor.rack1_fan_fan_2_3",
            ]
        );
        let unique: HashSet<&str> = entities.iter().map(|e| e.entity_id()).collect();
        assert_eq!(unique.len(), entities.len());
    }

    #[test]
    fn test_entity_without_snapshot_is_unknown() {
        let cache = Arc::new(Cache::new());
        let sensor = IloSensor::new("rack1", "Rack 1", Measurement::PowerStatus, cache);
        let state = sensor.state();
        assert_eq!(state.value, None);
        assert!(!state.stale);
    }

    #[tokio::test]
    async fn test_failed_poll_keeps_values_and_sets_stale() {
        let client = MockClient::new();
        client.push_fetch(Ok(snapshot()));
        client.push_fetch(Err(ClientError::Unreachable("timed out".to_string())));
        let coordinator = Coordinator::new("rack1".to_string(), client, Duration::from_secs(30));
        coordinator.refresh().await.unwrap();

        let cache = coordinator.cache();
        let power = IloSensor::new("rack1", "Rack 1", Measurement::PowerStatus, cache.clone());
        let usage = IloSensor::new("rack1", "Rack 1", Measurement::PowerDraw, cache.clone());
        let stale = StaleSensor::new("rack1", "Rack 1", cache.clone());
        assert_eq!(stale.state().value, Some(StateValue::Bool(false)));

        assert!(coordinator.refresh().await.is_err());

        let power_state = power.state();
        assert_eq!(power_state.value, Some(StateValue::Text("ON".to_string())));
        assert!(power_state.stale);
        assert_eq!(usage.state().value, Some(StateValue::Number(215.0)));

        let stale_state = stale.state();
        assert_eq!(stale_state.value, Some(StateValue::Bool(true)));
        assert_eq!(
            stale_state.attributes["error"],
            "controller unreachable: timed out"
        );
    }
}
