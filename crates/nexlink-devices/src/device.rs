/*!
 * Device sessions.
 *
 * A [`Device`] owns one negotiated protocol session and the module set
 * composed from the components the device advertises. All state a caller
 * can observe comes from the last completed refresh cycle; a cycle batches
 * every due module's query fragments into a single wire request, then
 * demultiplexes the reply back to the modules.
 *
 * Concurrent refreshes coalesce: callers that were waiting while another
 * cycle completed return without putting a second request on the wire.
 */
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{Mutex, RwLock};
use tokio::time::timeout;
use tracing::{debug, trace, warn};

use nexlink_core::event::SharedEventBus;
use nexlink_core::types::Value;

use crate::child::ChildDevice;
use crate::config::DeviceConfig;
use crate::error::{DeviceError, Result};
use crate::feature::Feature;
use crate::module::{ModuleCatalog, ModuleSlot, UpdateView};
use crate::protocol::{Protocol, QueryEntry, QueryRequest, QueryResponse};
use crate::recipe::{ConnectionRecipe, DeviceFamily};

/// Reserved query key: component negotiation
pub const COMPONENTS_KEY: &str = "get_components";

/// Reserved query key: attached child devices
pub const CHILD_LIST_KEY: &str = "get_child_device_list";

/// Component advertised by hubs with attached children
pub const CHILD_COMPONENT: &str = "childdevice";

/// Synthetic error code for a dispatched key the device never answered
pub const CODE_MISSING_REPLY: i64 = -9997;

/// Lifecycle events published on the device's event bus
#[derive(Debug, Clone)]
pub enum DeviceEvent {
    /// A refresh cycle completed
    Updated {
        /// The device host
        host: String,
    },
    /// The advertised component list changed and modules were rebuilt
    ComponentsChanged {
        /// The device host
        host: String,
        /// The new component list
        components: Vec<String>,
    },
    /// A refresh cycle failed
    RefreshFailed {
        /// The device host
        host: String,
        /// The error rendered for observers
        reason: String,
    },
}

/// State replaced wholesale by each completed refresh cycle
#[derive(Debug)]
struct DeviceState {
    recipe: ConnectionRecipe,
    components: Vec<String>,
    slots: Vec<ModuleSlot>,
    features: Vec<Feature>,
    last_update: Arc<HashMap<String, QueryEntry>>,
    children: Vec<Arc<ChildDevice>>,
    connected: bool,
}

/// One connected device session
#[derive(Debug)]
pub struct Device {
    config: DeviceConfig,
    catalog: Arc<ModuleCatalog>,
    events: SharedEventBus,
    protocol: Mutex<Box<dyn Protocol>>,
    refresh_gate: Mutex<()>,
    refresh_seq: AtomicU64,
    state: RwLock<DeviceState>,
}

impl Device {
    /// Wrap a negotiated protocol session into a device
    ///
    /// The device starts empty; call [`Device::refresh`] to populate the
    /// component list, module set and features.
    pub fn new(
        config: DeviceConfig,
        recipe: ConnectionRecipe,
        protocol: Box<dyn Protocol>,
        catalog: Arc<ModuleCatalog>,
        events: SharedEventBus,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            catalog,
            events,
            protocol: Mutex::new(protocol),
            refresh_gate: Mutex::new(()),
            refresh_seq: AtomicU64::new(0),
            state: RwLock::new(DeviceState {
                recipe,
                components: Vec::new(),
                slots: Vec::new(),
                features: Vec::new(),
                last_update: Arc::new(HashMap::new()),
                children: Vec::new(),
                connected: true,
            }),
        })
    }

    /// The configured host
    pub fn host(&self) -> &str {
        &self.config.host
    }

    /// The device's configuration
    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    /// The event bus this device publishes [`DeviceEvent`]s on
    pub fn events(&self) -> &SharedEventBus {
        &self.events
    }

    /// The recipe the session settled on, family included
    pub async fn recipe(&self) -> ConnectionRecipe {
        self.state.read().await.recipe
    }

    /// The components the device advertised in the last cycle
    pub async fn components(&self) -> Vec<String> {
        self.state.read().await.components.clone()
    }

    /// Ids of the active modules, in registration order
    pub async fn module_ids(&self) -> Vec<String> {
        let state = self.state.read().await;
        state
            .slots
            .iter()
            .map(|s| s.module.id().as_str().to_string())
            .collect()
    }

    /// A module's cached data slice, if the module is active and has data
    pub async fn module_data(&self, module_id: &str) -> Option<Value> {
        let state = self.state.read().await;
        state
            .slots
            .iter()
            .find(|s| s.module.id().as_str() == module_id)
            .and_then(|s| s.module.data().cloned())
    }

    /// The full feature set exposed by the active modules
    pub async fn features(&self) -> Vec<Feature> {
        self.state.read().await.features.clone()
    }

    /// The raw entry map from the last completed cycle
    pub async fn last_update(&self) -> Arc<HashMap<String, QueryEntry>> {
        self.state.read().await.last_update.clone()
    }

    /// Child devices attached to this device, if it is a hub
    pub async fn children(&self) -> Vec<Arc<ChildDevice>> {
        self.state.read().await.children.clone()
    }

    /// Look up a child device by id
    pub async fn child(&self, child_id: &str) -> Option<Arc<ChildDevice>> {
        let state = self.state.read().await;
        state.children.iter().find(|c| c.id() == child_id).cloned()
    }

    /// Run one refresh cycle
    ///
    /// The first cycle bootstraps the component list and builds the module
    /// set; every cycle dispatches exactly one batched request. Callers
    /// that were waiting while another cycle completed return `Ok` without
    /// touching the wire.
    pub async fn refresh(self: &Arc<Self>) -> Result<()> {
        let seq_before = self.refresh_seq.load(Ordering::Acquire);
        let _gate = self.refresh_gate.lock().await;
        if self.refresh_seq.load(Ordering::Acquire) != seq_before {
            trace!(host = %self.config.host, "Refresh coalesced with a completed cycle");
            return Ok(());
        }

        let result = self.run_cycle().await;
        match &result {
            Ok(()) => {
                self.refresh_seq.fetch_add(1, Ordering::AcqRel);
                let _ = self.events.publish(DeviceEvent::Updated {
                    host: self.config.host.clone(),
                });
            }
            Err(e) => {
                warn!(host = %self.config.host, error = %e, "Refresh cycle failed");
                let _ = self.events.publish(DeviceEvent::RefreshFailed {
                    host: self.config.host.clone(),
                    reason: e.to_string(),
                });
            }
        }
        result
    }

    /// Read a feature's current value from the owning module's cached data
    ///
    /// Reads never touch the wire. A module whose data errored in the last
    /// cycle reports the device-side code instead of stale data.
    pub async fn feature_value(&self, feature_id: &str) -> Result<Value> {
        let state = self.state.read().await;
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

    /// Write a writable feature, then refresh to observe the new state
    pub async fn set_feature_value(self: &Arc<Self>, feature_id: &str, value: Value) -> Result<()> {
        let (setter, attribute) = {
            let state = self.state.read().await;
            let feature = state
                .features
                .iter()
                .find(|f| f.id.as_str() == feature_id)
                .ok_or_else(|| {
                    DeviceError::configuration(format!("Unknown feature '{}'", feature_id))
                })?;
            let setter = feature.setter.clone().ok_or_else(|| {
                DeviceError::configuration(format!("Feature '{}' is not writable", feature_id))
            })?;
            (setter, feature.attribute.clone())
        };

        let mut params = HashMap::new();
        params.insert(attribute, value);
        let request = QueryRequest::single(setter.clone(), Value::Object(params));

        let response = self.dispatch(&request).await?;
        if let Some(code) = response.get(&setter).and_then(|e| e.error_code()) {
            return Err(DeviceError::Device { key: setter, code });
        }

        self.refresh().await
    }

    /// Close the session; safe to call more than once
    pub async fn disconnect(&self) -> Result<()> {
        {
            let mut state = self.state.write().await;
            if !state.connected {
                return Ok(());
            }
            state.connected = false;
        }
        debug!(host = %self.config.host, "Disconnecting device");
        let mut protocol = self.protocol.lock().await;
        protocol.close().await
    }

    async fn dispatch(&self, request: &QueryRequest) -> Result<QueryResponse> {
        let mut protocol = self.protocol.lock().await;
        match timeout(self.config.timeout, protocol.query(request)).await {
            Ok(result) => result,
            Err(_) => Err(DeviceError::timeout(format!(
                "Query to {} exceeded {:?}",
                self.config.host, self.config.timeout
            ))),
        }
    }

    async fn run_cycle(self: &Arc<Self>) -> Result<()> {
        if self.state.read().await.components.is_empty() {
            self.bootstrap().await?;
        }

        let now = Instant::now();
        let mut request = QueryRequest::new();
        request.push(COMPONENTS_KEY, Value::Null)?;
        {
            let state = self.state.read().await;
            if state.components.iter().any(|c| c == CHILD_COMPONENT) {
                request.push(CHILD_LIST_KEY, Value::Null)?;
            }
            for slot in &state.slots {
                if slot.is_due(now) {
                    for (key, params) in slot.module.query_fragment() {
                        request.push(key, params)?;
                    }
                }
            }
        }

        let response = self.dispatch(&request).await?;
        self.apply_response(&request, response, now).await
    }

    /// First-cycle component negotiation, before any module exists
    async fn bootstrap(self: &Arc<Self>) -> Result<()> {
        let request = QueryRequest::single(COMPONENTS_KEY, Value::Null);
        let response = self.dispatch(&request).await?;

        let entry = response.get(COMPONENTS_KEY).ok_or_else(|| {
            DeviceError::unsupported("Device did not answer component negotiation")
        })?;
        let data = entry.data().ok_or_else(|| DeviceError::Device {
            key: COMPONENTS_KEY.to_string(),
            code: entry.error_code().unwrap_or(0),
        })?;
        let advertised = parse_components(data)?;
        debug!(host = %self.config.host, components = advertised.len(), "Negotiated components");

        let mut state = self.state.write().await;
        state.components = advertised;
        state.recipe = refine_family(state.recipe, &state.components);
        rebuild_slots(&self.catalog, &mut state)?;

        let _ = self.events.publish(DeviceEvent::ComponentsChanged {
            host: self.config.host.clone(),
            components: state.components.clone(),
        });
        Ok(())
    }

    async fn apply_response(
        self: &Arc<Self>,
        request: &QueryRequest,
        response: QueryResponse,
        now: Instant,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        let state = &mut *state;

        // Carry forward the previous entries of modules skipped this cycle
        let mut entries: HashMap<String, QueryEntry> = HashMap::new();
        for slot in &state.slots {
            let skipped = !slot.keys.iter().any(|k| request.contains(k));
            if skipped {
                for key in &slot.keys {
                    if let Some(entry) = state.last_update.get(key) {
                        entries.insert(key.clone(), entry.clone());
                    }
                }
            }
        }
        for (key, entry) in response.into_entries() {
            entries.insert(key, entry);
        }
        // Every dispatched key resolves to an entry, one way or the other
        for key in request.keys() {
            entries
                .entry(key.to_string())
                .or_insert(QueryEntry::Error(CODE_MISSING_REPLY));
        }

        // Recompute the supported set when the advertised components change
        if let Some(data) = entries.get(COMPONENTS_KEY).and_then(|e| e.data()) {
            let advertised = parse_components(data)?;
            if advertised != state.components {
                debug!(host = %self.config.host, "Advertised components changed, rebuilding modules");
                state.components = advertised;
                state.recipe = refine_family(state.recipe, &state.components);
                rebuild_slots(&self.catalog, state)?;
                let _ = self.events.publish(DeviceEvent::ComponentsChanged {
                    host: self.config.host.clone(),
                    components: state.components.clone(),
                });
            }
        }

        // A module activated by a mid-session component change has had no
        // keys dispatched yet; give those keys markers so nothing an active
        // module claims is ever silently absent
        for slot in &state.slots {
            for key in &slot.keys {
                entries
                    .entry(key.clone())
                    .or_insert(QueryEntry::Error(CODE_MISSING_REPLY));
            }
        }

        // Error markers first, then hooks in registration order
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
                    warn!(module = %slot.module.id(), error = %e, "Module update hook failed");
                    slot.errored = true;
                    continue;
                }
                let was_due = slot.keys.iter().any(|k| request.contains(k));
                if was_due && !slot.errored {
                    slot.last_queried = Some(now);
                }
            }
        }

        // Recompute the feature set; ids must stay unique across modules
        let mut features = Vec::new();
        let mut seen = HashSet::new();
        for slot in state.slots.iter() {
            for feature in slot.module.features() {
                if !seen.insert(feature.id.clone()) {
                    return Err(DeviceError::configuration(format!(
                        "Duplicate feature id '{}'",
                        feature.id
                    )));
                }
                features.push(feature);
            }
        }
        state.features = features;

        if let Some(data) = entries.get(CHILD_LIST_KEY).and_then(|e| e.data()) {
            self.sync_children(state, data)?;
        }

        state.last_update = Arc::new(entries);
        Ok(())
    }

    /// Create or update child devices from the hub's child list section
    fn sync_children(self: &Arc<Self>, state: &mut DeviceState, data: &Value) -> Result<()> {
        let list = data
            .get("child_device_list")
            .and_then(|v| v.as_array())
            .ok_or_else(|| DeviceError::serialization("Child list reply missing child_device_list"))?;

        for item in list {
            let child_id = item
                .get("device_id")
                .and_then(|v| v.as_str())
                .ok_or_else(|| DeviceError::serialization("Child entry missing device_id"))?;

            let child = match state.children.iter().position(|c| c.id() == child_id) {
                Some(pos) => state.children[pos].clone(),
                None => {
                    debug!(host = %self.config.host, child = child_id, "Attaching child device");
                    let child = ChildDevice::new(
                        child_id,
                        Arc::downgrade(self),
                        self.catalog.clone(),
                    );
                    state.children.push(child.clone());
                    child
                }
            };
            child.apply_update(item)?;
        }
        Ok(())
    }
}

/// Parse the advertised component list out of a negotiation reply
fn parse_components(data: &Value) -> Result<Vec<String>> {
    let list = data
        .get("component_list")
        .and_then(|v| v.as_array())
        .ok_or_else(|| DeviceError::serialization("Component reply missing component_list"))?;

    let mut components = Vec::with_capacity(list.len());
    for item in list {
        let id = item
            .as_str()
            .or_else(|| item.get("id").and_then(|v| v.as_str()))
            .ok_or_else(|| DeviceError::serialization("Component entry without id"))?;
        components.push(id.to_string());
    }
    Ok(components)
}

/// Settle the device family once components are known
fn refine_family(recipe: ConnectionRecipe, components: &[String]) -> ConnectionRecipe {
    if recipe.family != DeviceFamily::Unknown {
        return recipe;
    }
    if components.iter().any(|c| c == CHILD_COMPONENT) {
        recipe.with_family(DeviceFamily::Hub)
    } else {
        recipe.with_family(DeviceFamily::Plug)
    }
}

/// Rebuild the slot list for the advertised components
///
/// Slots whose component is still advertised keep their module instance
/// and cached data; newly advertised components get fresh modules.
fn rebuild_slots(catalog: &ModuleCatalog, state: &mut DeviceState) -> Result<()> {
    let fresh = catalog.build_for(&state.components);
    let mut old = std::mem::take(&mut state.slots);

    let mut slots = Vec::with_capacity(fresh.len());
    let mut claimed = HashSet::new();
    for module in fresh {
        let slot = match old
            .iter()
            .position(|s| s.module.required_component() == module.required_component())
        {
            Some(pos) => old.remove(pos),
            None => ModuleSlot::new(module),
        };
        for key in &slot.keys {
            if key == COMPONENTS_KEY || key == CHILD_LIST_KEY {
                return Err(DeviceError::configuration(format!(
                    "Module '{}' claims reserved query key '{}'",
                    slot.module.id(),
                    key
                )));
            }
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
