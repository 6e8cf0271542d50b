//! Topic-to-slot routing table

use std::collections::HashMap;

use crate::ocpp::types::Measurement;

/// Base of the topics the charger integration publishes
pub const DEFAULT_TOPIC_BASE: &str = "hmd/sensor/JuiceBox";

/// Where a reading on a topic ends up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Numeric reading for a measurement slot
    Slot(Measurement),
    /// Connector status name
    Status,
}

/// Sensor name under the topic base, per route
const SENSORS: [(&str, Route); 9] = [
    ("Voltage", Route::Slot(Measurement::Voltage)),
    ("Frequency", Route::Slot(Measurement::Frequency)),
    ("Temperature", Route::Slot(Measurement::Temperature)),
    ("Power-Factor", Route::Slot(Measurement::PowerFactor)),
    ("Current", Route::Slot(Measurement::CurrentImport)),
    ("Power", Route::Slot(Measurement::PowerActiveImport)),
    ("Max-Current-Online-Device-", Route::Slot(Measurement::CurrentOffered)),
    ("Energy--Session-", Route::Slot(Measurement::EnergyActiveImportRegister)),
    ("Status", Route::Status),
];

/// Static map from telemetry topic to route
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicMap {
    routes: HashMap<String, Route>,
}

impl TopicMap {
    /// Standard sensor topics below `base`, as `<base>/<sensor>/state`
    pub fn with_base(base: &str) -> Self {
        let base = base.trim_end_matches('/');
        let routes = SENSORS
            .iter()
            .map(|(sensor, route)| (format!("{}/{}/state", base, sensor), *route))
            .collect();

        Self { routes }
    }

    /// Point a route at a different topic, replacing its current one
    pub fn with_topic(mut self, topic: impl Into<String>, route: Route) -> Self {
        self.routes.retain(|_, r| *r != route);
        self.routes.insert(topic.into(), route);
        self
    }

    pub fn route(&self, topic: &str) -> Option<Route> {
        self.routes.get(topic).copied()
    }

    /// Topic currently carrying a route
    pub fn topic_for(&self, route: Route) -> Option<&str> {
        self.routes
            .iter()
            .find(|(_, r)| **r == route)
            .map(|(topic, _)| topic.as_str())
    }

    /// All topics to subscribe to, sorted
    pub fn topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.routes.keys().cloned().collect();
        topics.sort();
        topics
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

impl Default for TopicMap {
    fn default() -> Self {
        Self::with_base(DEFAULT_TOPIC_BASE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_topics() {
        let map = TopicMap::default();
        assert_eq!(map.len(), 9);

        assert_eq!(
            map.route("hmd/sensor/JuiceBox/Voltage/state"),
            Some(Route::Slot(Measurement::Voltage))
        );
        assert_eq!(
            map.route("hmd/sensor/JuiceBox/Max-Current-Online-Device-/state"),
            Some(Route::Slot(Measurement::CurrentOffered))
        );
        assert_eq!(
            map.route("hmd/sensor/JuiceBox/Energy--Session-/state"),
            Some(Route::Slot(Measurement::EnergyActiveImportRegister))
        );
        assert_eq!(map.route("hmd/sensor/JuiceBox/Status/state"), Some(Route::Status));
        assert_eq!(map.route("hmd/sensor/JuiceBox/Voltage"), None);
    }

    #[test]
    fn test_every_slot_has_a_topic() {
        let map = TopicMap::default();
        for slot in Measurement::ALL {
            assert!(map.topic_for(Route::Slot(slot)).is_some(), "{slot:?}");
        }
        assert!(map.topic_for(Route::Status).is_some());
    }

    #[test]
    fn test_custom_base() {
        let map = TopicMap::with_base("garage/evse/");
        assert_eq!(
            map.route("garage/evse/Power/state"),
            Some(Route::Slot(Measurement::PowerActiveImport))
        );
        assert_eq!(map.topics().len(), 9);
    }

    #[test]
    fn test_override_topic() {
        let map = TopicMap::default().with_topic("evse/status", Route::Status);

        assert_eq!(map.len(), 9);
        assert_eq!(map.route("evse/status"), Some(Route::Status));
        assert_eq!(map.route("hmd/sensor/JuiceBox/Status/state"), None);
        assert_eq!(map.topic_for(Route::Status), Some("evse/status"));
    }
}
