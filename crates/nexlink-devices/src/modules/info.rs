/*!
 * Device information module.
 *
 * Always active on devices that advertise the `info` component. Caches the
 * `get_device_info` section of the last refresh and exposes the model,
 * signal strength and power-state features over it.
 */
use nexlink_core::types::{Id, Value};

use crate::error::Result;
use crate::feature::{Feature, FeatureCategory, FeatureKind};
use crate::module::{Module, UpdateView};

/// Query key claimed by this module
pub const DEVICE_INFO_KEY: &str = "get_device_info";

/// Device method that writes power state
pub const SET_DEVICE_INFO: &str = "set_device_info";

/// Module over the device's `get_device_info` section
#[derive(Debug)]
pub struct InfoModule {
    id: Id,
    data: Option<Value>,
}

impl InfoModule {
    /// Create the module
    pub fn new() -> Self {
        Self {
            id: Id::from("info"),
            data: None,
        }
    }

    /// The reported device model, if known
    pub fn model(&self) -> Option<&str> {
        self.data.as_ref()?.get("model")?.as_str()
    }

    /// The reported Wi-Fi signal strength in dBm, if known
    pub fn rssi(&self) -> Option<i64> {
        self.data.as_ref()?.get("rssi")?.as_integer()
    }

    /// Whether the device reports itself powered on, if known
    pub fn is_on(&self) -> Option<bool> {
        self.data.as_ref()?.get("device_on")?.as_bool()
    }
}

impl Default for InfoModule {
    fn default() -> Self {
        Self::new()
    }
}

impl Module for InfoModule {
    fn id(&self) -> &Id {
        &self.id
    }

    fn required_component(&self) -> &str {
        "info"
    }

    fn query_fragment(&self) -> Vec<(String, Value)> {
        vec![(DEVICE_INFO_KEY.to_string(), Value::Null)]
    }

    fn on_update(&mut self, view: &UpdateView<'_>) -> Result<()> {
        self.data = view.data(DEVICE_INFO_KEY).cloned();
        Ok(())
    }

    fn data(&self) -> Option<&Value> {
        self.data.as_ref()
    }

    fn features(&self) -> Vec<Feature> {
        vec![
            Feature::new(
                "model",
                "Model",
                FeatureCategory::Info,
                FeatureKind::Sensor,
                self.id.clone(),
                "model",
            ),
            Feature::new(
                "rssi",
                "Signal strength",
                FeatureCategory::Debug,
                FeatureKind::Sensor,
                self.id.clone(),
                "rssi",
            )
            .with_unit("dBm"),
            Feature::new(
                "device_on",
                "Power",
                FeatureCategory::Primary,
                FeatureKind::Switch,
                self.id.clone(),
                "device_on",
            )
            .with_setter(SET_DEVICE_INFO),
        ]
    }
}
