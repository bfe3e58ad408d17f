/*!
 * Child devices behind a hub.
 *
 * A child never owns a network session: its data arrives inside the hub's
 * child list section, and a refresh requested on a child must be
 * explicitly delegated to the parent. Delegation is scoped by an RAII
 * guard so a child cannot be left permanently refreshable.
 */
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, Weak};

use tracing::warn;

use nexlink_core::types::Value;

use crate::device::Device;
use crate::error::{DeviceError, Result};
use crate::feature::Feature;
use crate::module::{ModuleCatalog, ModuleSlot, UpdateView};
use crate::protocol::QueryEntry;

/// Child entry fields that are not per-module data sections
const META_FIELDS: &[&str] = &["device_id", "components"];

#[derive(Debug, Default)]
struct ChildState {
    components: Vec<String>,
    slots: Vec<ModuleSlot>,
    features: Vec<Feature>,
    entries: HashMap<String, QueryEntry>,
}

/// One device attached behind a hub
#[derive(Debug)]
pub struct ChildDevice {
    id: String,
    parent: Weak<Device>,
    catalog: Arc<ModuleCatalog>,
    delegations: AtomicUsize,
    state: RwLock<ChildState>,
}

impl ChildDevice {
    /// Create a child bound to its parent hub
    pub(crate) fn new<S: Into<String>>(
        id: S,
        parent: Weak<Device>,
        catalog: Arc<ModuleCatalog>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: id.into(),
            parent,
            catalog,
            delegations: AtomicUsize::new(0),
            state: RwLock::new(ChildState::default()),
        })
    }

    /// The child's device id, as reported by the hub
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The components the child advertised in the last hub cycle
    pub fn components(&self) -> Vec<String> {
        self.state.read().map(|s| s.components.clone()).unwrap_or_default()
    }

    /// Ids of the child's active modules, in registration order
    pub fn module_ids(&self) -> Vec<String> {
        self.state
            .read()
            .map(|s| {
                s.slots
                    .iter()
                    .map(|slot| slot.module.id().as_str().to_string())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// The feature set exposed by the child's modules
    pub fn features(&self) -> Vec<Feature> {
        self.state.read().map(|s| s.features.clone()).unwrap_or_default()
    }

    /// The child's entry map from the last hub cycle
    pub fn last_update(&self) -> HashMap<String, QueryEntry> {
        self.state.read().map(|s| s.entries.clone()).unwrap_or_default()
    }

    /// Read a feature value from the child's cached data
    pub fn feature_value(&self, feature_id: &str) -> Result<Value> {
        let state = self
            .state
            .read()
            .map_err(|_| DeviceError::configuration("Child state lock poisoned"))?;
        let feature = state
            .features
            .iter()
            .find(|f| f.id.as_str() == feature_id)
            .ok_or_else(|| {
                DeviceError::configuration(format!("Unknown feature '{}'", feature_id))
            })?;
        let slot = state
            .slots
            .iter()
            .find(|s| s.module.id() == &feature.module_id)
            .ok_or_else(|| {
                DeviceError::configuration(format!(
                    "Feature '{}' references inactive module '{}'",
                    feature_id, feature.module_id
                ))
            })?;

        if let Some(code) = slot.error_code {
            return Err(DeviceError::Device {
                key: feature.attribute.clone(),
                code,
            });
        }

        Ok(slot
            .module
            .data()
            .and_then(|data| data.get(&feature.attribute))
            .cloned()
            .unwrap_or(Value::Null))
    }

    /// Open a delegation scope allowing [`ChildDevice::refresh`]
    ///
    /// While the guard is alive, refreshes on the child route through the
    /// parent hub's single batched request. Scopes nest; the capability is
    /// revoked when the last live guard drops.
    pub fn delegate_refresh(self: &Arc<Self>) -> DelegatedRefresh {
        self.delegations.fetch_add(1, Ordering::AcqRel);
        DelegatedRefresh {
            child: self.clone(),
        }
    }

    /// Refresh the child through its parent hub
    ///
    /// Only valid inside a [`DelegatedRefresh`] scope; the hub's cycle
    /// re-reads the whole child list, so this puts exactly one request on
    /// the wire for all children at once.
    pub async fn refresh(&self) -> Result<()> {
        if self.delegations.load(Ordering::Acquire) == 0 {
            return Err(DeviceError::NotDelegated(format!(
                "Child '{}' can only refresh inside a delegation scope",
                self.id
            )));
        }
        let parent = self.parent.upgrade().ok_or_else(|| {
            DeviceError::connection(format!("Parent hub of child '{}' was dropped", self.id))
        })?;
        parent.refresh().await
    }

    /// Apply the child's section of the hub's child list reply
    pub(crate) fn apply_update(&self, item: &Value) -> Result<()> {
        let components: Vec<String> = item
            .get("components")
            .and_then(|v| v.as_array())
            .map(|list| {
                list.iter()
                    .filter_map(|c| c.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();

        let sections = item
            .as_object()
            .ok_or_else(|| DeviceError::serialization("Child entry is not an object"))?;

        let mut state = self
            .state
            .write()
            .map_err(|_| DeviceError::configuration("Child state lock poisoned"))?;
        let state = &mut *state;

        if components != state.components {
            state.components = components;
            rebuild_slots(&self.catalog, state)?;
        }

        let mut entries = HashMap::new();
        for (key, value) in sections {
            if META_FIELDS.contains(&key.as_str()) {
                continue;
            }
            entries.insert(key.clone(), QueryEntry::Data(value.clone()));
        }
        // Keys a module claims but the hub did not report become markers
        for slot in &state.slots {
            for key in &slot.keys {
                entries
                    .entry(key.clone())
                    .or_insert(QueryEntry::Error(crate::device::CODE_MISSING_REPLY));
            }
        }

        for slot in state.slots.iter_mut() {
            slot.errored = false;
            slot.error_code = None;
            for key in &slot.keys {
                if let Some(code) = entries.get(key).and_then(|e| e.error_code()) {
                    slot.errored = true;
                    slot.error_code.get_or_insert(code);
                }
            }
        }

        {
            let view = UpdateView::new(&entries, &state.components);
            for slot in state.slots.iter_mut() {
                if let Err(e) = slot.module.on_update(&view) {
                    warn!(child = %self.id, module = %slot.module.id(), error = %e,
                        "Child module update hook failed");
                    slot.errored = true;
                }
            }
        }

        state.features = state
            .slots
            .iter()
            .flat_map(|slot| slot.module.features())
            .collect();
        state.entries = entries;
        Ok(())
    }
}

/// RAII scope during which a child may delegate refreshes to its parent
#[derive(Debug)]
pub struct DelegatedRefresh {
    child: Arc<ChildDevice>,
}

impl Drop for DelegatedRefresh {
    fn drop(&mut self) {
        self.child.delegations.fetch_sub(1, Ordering::AcqRel);
    }
}

fn rebuild_slots(catalog: &ModuleCatalog, state: &mut ChildState) -> Result<()> {
    let fresh = catalog.build_for(&state.components);
    let mut old = std::mem::take(&mut state.slots);

    let mut slots = Vec::with_capacity(fresh.len());
    let mut claimed = std::collections::HashSet::new();
    for module in fresh {
        let slot = match old
            .iter()
            .position(|s| s.module.required_component() == module.required_component())
        {
            Some(pos) => old.remove(pos),
            None => ModuleSlot::new(module),
        };
        for key in &slot.keys {
            if !claimed.insert(key.clone()) {
                return Err(DeviceError::configuration(format!(
                    "Query key '{}' is claimed by more than one active module",
                    key
                )));
            }
        }
        slots.push(slot);
    }
    state.slots = slots;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn child() -> Arc<ChildDevice> {
        ChildDevice::new("child-1", Weak::new(), Arc::new(ModuleCatalog::standard()))
    }

    fn child_item() -> Value {
        Value::from(json!({
            "device_id": "child-1",
            "components": ["info", "battery"],
            "get_device_info": { "model": "NX-S1", "rssi": -70, "device_on": false },
            "get_battery_info": { "battery_percentage": 44, "at_low_battery": false },
        }))
    }

    #[test]
    fn test_apply_update_builds_modules_and_features() {
        let child = child();
        child.apply_update(&child_item()).unwrap();

        assert_eq!(child.components(), vec!["info", "battery"]);
        assert_eq!(child.module_ids(), vec!["info", "battery"]);
        assert_eq!(
            child.feature_value("battery_level").unwrap(),
            Value::Integer(44)
        );
        assert_eq!(
            child.feature_value("device_on").unwrap(),
            Value::Bool(false)
        );
    }

    #[test]
    fn test_unreported_module_key_becomes_marker() {
        let child = child();
        let item = Value::from(json!({
            "device_id": "child-1",
            "components": ["info", "battery"],
            "get_device_info": { "model": "NX-S1" },
        }));
        child.apply_update(&item).unwrap();

        let err = child.feature_value("battery_level").unwrap_err();
        assert!(matches!(err, DeviceError::Device { .. }));
        assert_eq!(
            child.feature_value("model").unwrap(),
            Value::from("NX-S1")
        );
    }

    #[tokio::test]
    async fn test_refresh_outside_delegation_scope_rejected() {
        let child = child();
        child.apply_update(&child_item()).unwrap();

        let err = child.refresh().await.unwrap_err();
        assert!(matches!(err, DeviceError::NotDelegated(_)));
    }

    #[tokio::test]
    async fn test_guard_drop_closes_delegation_scope() {
        let child = child();
        child.apply_update(&child_item()).unwrap();

        {
            let _scope = child.delegate_refresh();
            assert_eq!(child.delegations.load(Ordering::Acquire), 1);
        }
        assert_eq!(child.delegations.load(Ordering::Acquire), 0);

        let err = child.refresh().await.unwrap_err();
        assert!(matches!(err, DeviceError::NotDelegated(_)));
    }

    #[tokio::test]
    async fn test_overlapping_scopes_stay_open_until_last_guard_drops() {
        let child = child();
        child.apply_update(&child_item()).unwrap();

        let first = child.delegate_refresh();
        let second = child.delegate_refresh();
        drop(first);

        // Still delegated: the parent is gone in this fixture, so a live
        // scope surfaces the dropped-parent error, not NotDelegated
        let err = child.refresh().await.unwrap_err();
        assert!(matches!(err, DeviceError::Connection(_)));

        drop(second);
        let err = child.refresh().await.unwrap_err();
        assert!(matches!(err, DeviceError::NotDelegated(_)));
    }
}
