use serde::Serialize;

/// Hardware an integration reports, grouping the entities it publishes.
///
/// For an iLO instance this is the managed server, identified by its serial.
#[derive(Debug, Clone, Serialize)]
pub struct Device {
    /// Stable unique id; the engine refuses a second device with the same id
    pub id: String,
    /// `(namespace, value)` pairs, e.g. `("hp_ilo", "hp_ilo_CZJ1234567")`
    pub identifiers: Vec<(String, String)>,
    pub name: String,
    pub manufacturer: Option<String>,
    pub model: Option<String>,
    pub firmware_version: Option<String>,
    /// Where a user can manage the device, e.g. the controller's web UI
    pub configuration_url: Option<String>,
    pub entity_ids: Vec<String>,
}

impl Device {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            identifiers: Vec::new(),
            name: name.into(),
            manufacturer: None,
            model: None,
            firmware_version: None,
            configuration_url: None,
            entity_ids: Vec::new(),
        }
    }

    pub fn with_identifier(
        mut self,
        namespace: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.identifiers.push((namespace.into(), value.into()));
        self
    }

    /// Link an entity to this device; linking twice is a no-op.
    pub fn add_entity(&mut self, entity_id: String) {
        if !self.entity_ids.iter().any(|id| *id == entity_id) {
            self.entity_ids.push(entity_id);
        }
    }
}
