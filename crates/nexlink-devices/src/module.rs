/*!
 * Module contracts and the module catalog.
 *
 * A module is one capability unit of a device: it declares the component
 * it depends on, contributes query fragments to the batched refresh
 * request, caches its slice of the reply, and exposes features over it.
 *
 * Modules are instantiated from an explicit, passed-in [`ModuleCatalog`]
 * during a device's first successful update; there is no process-wide
 * registration state. A module is deactivated when its required component
 * disappears from the device's advertised component list.
 */
use std::collections::HashMap;
use std::fmt::Debug;
use std::time::{Duration, Instant};

use tracing::debug;

use nexlink_core::types::{Id, Value};

use crate::error::{DeviceError, Result};
use crate::feature::Feature;
use crate::protocol::QueryEntry;

/// Read access to one demultiplexed refresh reply
///
/// Handed to every module's post-update hook. A hook may read any other
/// module's entries, which is how cross-module derived state is built.
#[derive(Debug)]
pub struct UpdateView<'a> {
    entries: &'a HashMap<String, QueryEntry>,
    components: &'a [String],
}

impl<'a> UpdateView<'a> {
    /// Create a view over a reply and the advertised component list
    pub fn new(entries: &'a HashMap<String, QueryEntry>, components: &'a [String]) -> Self {
        Self {
            entries,
            components,
        }
    }

    /// The entry for a query key, data or error marker
    pub fn entry(&self, key: &str) -> Option<&QueryEntry> {
        self.entries.get(key)
    }

    /// The data for a query key, `None` if absent or errored
    pub fn data(&self, key: &str) -> Option<&Value> {
        self.entries.get(key).and_then(|e| e.data())
    }

    /// The device's advertised component list
    pub fn components(&self) -> &[String] {
        self.components
    }
}

/// A capability unit sharing the device connection
pub trait Module: Send + Sync + Debug {
    /// Module id, unique per device
    fn id(&self) -> &Id;

    /// The device component this module requires
    fn required_component(&self) -> &str;

    /// The query fragments this module contributes to a refresh
    fn query_fragment(&self) -> Vec<(String, Value)>;

    /// Minimum time between queries for this module
    ///
    /// `None` means the module is queried on every refresh. A module with
    /// an interval keeps serving its previous data between queries.
    fn minimum_update_interval(&self) -> Option<Duration> {
        None
    }

    /// Post-update hook, run in registration order after demultiplexing
    fn on_update(&mut self, view: &UpdateView<'_>) -> Result<()>;

    /// The module's view of its slice of the last reply
    fn data(&self) -> Option<&Value>;

    /// The features this module exposes
    fn features(&self) -> Vec<Feature>;
}

/// Constructor for one catalog entry
pub type ModuleConstructor = Box<dyn Fn() -> Box<dyn Module> + Send + Sync>;

/// Explicit component-name → module-constructor catalog
///
/// Supplied at device construction; consulted each cycle to compute the
/// active module set from the advertised component list.
pub struct ModuleCatalog {
    entries: Vec<(String, ModuleConstructor)>,
}

impl Debug for ModuleCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let components: Vec<&str> = self.entries.iter().map(|(c, _)| c.as_str()).collect();
        f.debug_struct("ModuleCatalog")
            .field("components", &components)
            .finish()
    }
}

impl ModuleCatalog {
    /// Create an empty catalog
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// The catalog with all modules shipped by this crate
    pub fn standard() -> Self {
        let mut catalog = Self::new();
        catalog.entries.push((
            "info".to_string(),
            Box::new(|| Box::new(crate::modules::InfoModule::new()) as Box<dyn Module>),
        ));
        catalog.entries.push((
            "battery".to_string(),
            Box::new(|| Box::new(crate::modules::BatteryModule::new()) as Box<dyn Module>),
        ));
        catalog
    }

    /// Register a constructor for a component
    pub fn register<F>(&mut self, component: &str, constructor: F) -> Result<()>
    where
        F: Fn() -> Box<dyn Module> + Send + Sync + 'static,
    {
        if self.entries.iter().any(|(c, _)| c == component) {
            return Err(DeviceError::configuration(format!(
                "Component '{}' already registered in catalog",
                component
            )));
        }
        self.entries.push((component.to_string(), Box::new(constructor)));
        Ok(())
    }

    /// Registered component names, in registration order
    pub fn components(&self) -> Vec<&str> {
        self.entries.iter().map(|(c, _)| c.as_str()).collect()
    }

    /// Instantiate modules for the components a device advertises
    ///
    /// Catalog order determines module registration order; components the
    /// device does not advertise are skipped.
    pub fn build_for(&self, advertised: &[String]) -> Vec<Box<dyn Module>> {
        self.entries
            .iter()
            .filter(|(component, _)| advertised.iter().any(|a| a == component))
            .map(|(component, constructor)| {
                debug!("Activating module for component '{}'", component);
                constructor()
            })
            .collect()
    }
}

impl Default for ModuleCatalog {
    fn default() -> Self {
        Self::standard()
    }
}

/// One active module and its per-cycle bookkeeping
#[derive(Debug)]
pub struct ModuleSlot {
    /// The module instance
    pub(crate) module: Box<dyn Module>,
    /// The query keys the module claims
    pub(crate) keys: Vec<String>,
    /// Whether the module's data errored in the last completed cycle
    pub(crate) errored: bool,
    /// The first device-reported error code from the last cycle, if any
    pub(crate) error_code: Option<i64>,
    /// When the module's keys were last successfully queried
    pub(crate) last_queried: Option<Instant>,
}

impl ModuleSlot {
    /// Wrap a module into a slot
    pub fn new(module: Box<dyn Module>) -> Self {
        let keys = module
            .query_fragment()
            .into_iter()
            .map(|(key, _)| key)
            .collect();
        Self {
            module,
            keys,
            errored: false,
            error_code: None,
            last_queried: None,
        }
    }

    /// Whether the module is due for querying this cycle
    pub fn is_due(&self, now: Instant) -> bool {
        match (self.module.minimum_update_interval(), self.last_queried) {
            (Some(interval), Some(last)) => now.duration_since(last) >= interval,
            _ => true,
        }
    }

    /// The module instance
    pub fn module(&self) -> &dyn Module {
        self.module.as_ref()
    }

    /// Whether the module's data errored in the last completed cycle
    pub fn is_errored(&self) -> bool {
        self.errored
    }
}
