/*!
 * Battery state module.
 *
 * Battery-powered devices throttle how often their gauge may be read, so
 * this module declares a minimum update interval: between due cycles the
 * refresh loop re-serves its previous entry instead of putting the key on
 * the wire.
 */
use std::time::Duration;

use nexlink_core::types::{Id, Value};

use crate::error::Result;
use crate::feature::{Feature, FeatureCategory, FeatureKind};
use crate::module::{Module, UpdateView};

/// Query key claimed by this module
pub const BATTERY_INFO_KEY: &str = "get_battery_info";

/// Default minimum time between battery gauge reads
pub const DEFAULT_BATTERY_INTERVAL: Duration = Duration::from_secs(60);

/// Module over the device's `get_battery_info` section
#[derive(Debug)]
pub struct BatteryModule {
    id: Id,
    interval: Duration,
    data: Option<Value>,
}

impl BatteryModule {
    /// Create the module with the default gauge interval
    pub fn new() -> Self {
        Self::with_interval(DEFAULT_BATTERY_INTERVAL)
    }

    /// Create the module with a custom gauge interval
    pub fn with_interval(interval: Duration) -> Self {
        Self {
            id: Id::from("battery"),
            interval,
            data: None,
        }
    }

    /// The battery charge percentage, if known
    pub fn level(&self) -> Option<i64> {
        self.data.as_ref()?.get("battery_percentage")?.as_integer()
    }

    /// Whether the device reports a low battery, if known
    pub fn is_low(&self) -> Option<bool> {
        self.data.as_ref()?.get("at_low_battery")?.as_bool()
    }
}

impl Default for BatteryModule {
    fn default() -> Self {
        Self::new()
    }
}

impl Module for BatteryModule {
    fn id(&self) -> &Id {
        &self.id
    }

    fn required_component(&self) -> &str {
        "battery"
    }

    fn query_fragment(&self) -> Vec<(String, Value)> {
        vec![(BATTERY_INFO_KEY.to_string(), Value::Null)]
    }

    fn minimum_update_interval(&self) -> Option<Duration> {
        Some(self.interval)
    }

    fn on_update(&mut self, view: &UpdateView<'_>) -> Result<()> {
        self.data = view.data(BATTERY_INFO_KEY).cloned();
        Ok(())
    }

    fn data(&self) -> Option<&Value> {
        self.data.as_ref()
    }

    fn features(&self) -> Vec<Feature> {
        vec![
            Feature::new(
                "battery_level",
                "Battery level",
                FeatureCategory::Info,
                FeatureKind::Sensor,
                self.id.clone(),
                "battery_percentage",
            )
            .with_unit("%"),
            Feature::new(
                "battery_low",
                "Battery low",
                FeatureCategory::Primary,
                FeatureKind::BinarySensor,
                self.id.clone(),
                "at_low_battery",
            ),
        ]
    }
}
