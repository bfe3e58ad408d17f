/*!
 * Feature descriptors.
 *
 * A feature is the uniform, introspectable attribute/action surface over
 * one module attribute. Callers that do not know concrete module types
 * (CLI, REST façade) only ever see features: read through
 * [`Device::feature_value`](crate::device::Device::feature_value), write
 * through [`Device::set_feature_value`](crate::device::Device::set_feature_value).
 *
 * A feature references its owning module by id; it never owns the module's
 * lifetime. The feature set is recomputed whenever the active module set
 * changes.
 */
use serde::{Deserialize, Serialize};

use nexlink_core::types::Id;

/// How prominently a feature should be surfaced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FeatureCategory {
    /// Main controls, shown by default
    Primary,
    /// Informational read-outs
    Info,
    /// Configuration knobs
    Config,
    /// Diagnostics, hidden by default
    Debug,
}

/// The shape of a feature's value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FeatureKind {
    /// Read-only numeric or string value
    Sensor,
    /// Read-only boolean value
    BinarySensor,
    /// Writable boolean value
    Switch,
    /// Writable numeric value
    Number,
    /// Writable value from a fixed set
    Choice,
    /// Fire-and-forget action
    Action,
}

/// A uniform attribute/action descriptor bound to one module
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    /// Feature id, unique per device
    pub id: Id,
    /// Human-readable name
    pub name: String,
    /// Display category
    pub category: FeatureCategory,
    /// Value shape
    pub kind: FeatureKind,
    /// Unit of measurement, if any
    pub unit: Option<String>,
    /// Id of the owning module (looked up, never owning)
    pub module_id: Id,
    /// Attribute key inside the owning module's data
    pub attribute: String,
    /// Device method that writes the attribute, for writable features
    pub setter: Option<String>,
}

impl Feature {
    /// Create a read-only feature
    pub fn new<I, N, A>(
        id: I,
        name: N,
        category: FeatureCategory,
        kind: FeatureKind,
        module_id: Id,
        attribute: A,
    ) -> Self
    where
        I: Into<Id>,
        N: Into<String>,
        A: Into<String>,
    {
        Self {
            id: id.into(),
            name: name.into(),
            category,
            kind,
            unit: None,
            module_id,
            attribute: attribute.into(),
            setter: None,
        }
    }

    /// Attach a unit of measurement
    pub fn with_unit<S: Into<String>>(mut self, unit: S) -> Self {
        self.unit = Some(unit.into());
        self
    }

    /// Make the feature writable through the given device method
    pub fn with_setter<S: Into<String>>(mut self, method: S) -> Self {
        self.setter = Some(method.into());
        self
    }

    /// Whether the feature can be written
    pub fn is_writable(&self) -> bool {
        self.setter.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_only_feature() {
        let feature = Feature::new(
            "battery_level",
            "Battery level",
            FeatureCategory::Info,
            FeatureKind::Sensor,
            Id::from("battery"),
            "level",
        )
        .with_unit("%");

        assert_eq!(feature.id.as_str(), "battery_level");
        assert_eq!(feature.unit.as_deref(), Some("%"));
        assert!(!feature.is_writable());
    }

    #[test]
    fn test_writable_feature() {
        let feature = Feature::new(
            "device_on",
            "Power",
            FeatureCategory::Primary,
            FeatureKind::Switch,
            Id::from("info"),
            "device_on",
        )
        .with_setter("set_device_info");

        assert!(feature.is_writable());
        assert_eq!(feature.setter.as_deref(), Some("set_device_info"));
    }
}
