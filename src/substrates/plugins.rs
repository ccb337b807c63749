//! Substrate plugins.
//!
//! A plugin is a substrate that is not built into the measurement. Plugins are looked up by
//! name in a [`PluginRegistry`], in the order given by `SCOREP_SUBSTRATE_PLUGINS`.

use std::collections::HashMap;

use crate::substrates::events::{MgmtCallback, RecordingMode, SubstrateCallback};
use crate::util::options::PluginList;

/// The plugin interface version this measurement understands.
pub const SUBSTRATE_PLUGIN_VERSION: u32 = 1;

/// A substrate plugin.
///
/// All plugins together form one substrate with one substrate id. Each plugin learns its
/// index among the loaded plugins through [`SubstratePlugin::assign_id`].
pub trait SubstratePlugin: Send + Sync {
    fn name(&self) -> &str;

    /// The interface version the plugin was written against.
    fn plugin_version(&self) -> u32 {
        SUBSTRATE_PLUGIN_VERSION
    }

    /// Called once when the plugin is loaded. An error keeps the plugin from being used.
    fn early_init(&mut self) -> Result<(), i32> {
        Ok(())
    }

    fn assign_id(&mut self, _id: usize) {}

    fn finalize(&mut self) {}

    /// Event callbacks for `mode`, indexed by event. May be shorter than the number of events.
    fn event_callbacks(&self, _mode: RecordingMode) -> &[Option<SubstrateCallback>] {
        &[]
    }

    /// Management callbacks, indexed by management event. The plugin group handles
    /// initialisation and finalisation itself, so those two entries are not used.
    fn mgmt_callbacks(&self) -> &[Option<MgmtCallback>] {
        &[]
    }
}

type Constructor = Box<dyn Fn() -> Box<dyn SubstratePlugin> + Send + Sync>;

/// Plugins known to this process, by name.
#[derive(Default)]
pub struct PluginRegistry {
    constructors: HashMap<String, Constructor>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make a plugin available under `name`. A plugin registered earlier under the same name
    /// is replaced.
    pub fn register<F>(&mut self, name: &str, constructor: F) -> &mut Self
    where
        F: Fn() -> Box<dyn SubstratePlugin> + Send + Sync + 'static,
    {
        self.constructors
            .insert(name.to_string(), Box::new(constructor));
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.constructors.contains_key(name)
    }

    /// Instantiate and initialise the plugins of `list`, in order. Plugins that are unknown
    /// or fail to initialise are skipped with a warning.
    pub fn load(&self, list: &PluginList) -> Vec<Box<dyn SubstratePlugin>> {
        let mut plugins = vec![];
        for name in list.iter() {
            let Some(constructor) = self.constructors.get(name) else {
                warn!("Could not open substrate plugin {}", name);
                continue;
            };
            let mut plugin = constructor();
            if plugin.plugin_version() > SUBSTRATE_PLUGIN_VERSION {
                warn!(
                    "Substrate plugin '{}' has been written for a more recent version of the \
                     plugin interface ({} > {})",
                    name,
                    plugin.plugin_version(),
                    SUBSTRATE_PLUGIN_VERSION
                );
            }
            if let Err(error) = plugin.early_init() {
                warn!("Error {} when initializing substrate plugin {}", error, name);
                continue;
            }
            debug!("loaded substrate plugin {}", name);
            plugins.push(plugin);
        }
        plugins
    }
}
