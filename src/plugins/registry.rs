//! Compile-time plugin table.

use std::fmt;
use std::sync::Arc;

use crate::config::PluginSelection;
use crate::plugins::example::ExamplePlugin;
use crate::plugins::groupware::GroupwarePlugin;
use crate::plugins::Plugin;

type Constructor = Box<dyn Fn() -> Arc<dyn Plugin> + Send + Sync>;

/// Ordered table of plugin constructors, built by the entry point.
#[derive(Default)]
pub struct PluginRegistry {
    entries: Vec<(String, Constructor)>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The plugins shipped with the gateway, in default order.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register(GroupwarePlugin::ID, || Arc::new(GroupwarePlugin::new()) as Arc<dyn Plugin>);
        registry.register(ExamplePlugin::ID, || Arc::new(ExamplePlugin::new()) as Arc<dyn Plugin>);
        registry
    }

    /// Add a constructor. A second registration under the same ID replaces
    /// the first but keeps its position.
    pub fn register<F>(&mut self, id: impl Into<String>, constructor: F) -> &mut Self
    where
        F: Fn() -> Arc<dyn Plugin> + Send + Sync + 'static,
    {
        let id = id.into();
        let constructor: Constructor = Box::new(constructor);
        match self.entries.iter_mut().find(|(existing, _)| *existing == id) {
            Some(entry) => {
                tracing::warn!(plugin = %id, "Plugin registered twice, replacing");
                entry.1 = constructor;
            }
            None => self.entries.push((id, constructor)),
        }
        self
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(id, _)| id.as_str())
    }

    /// Instantiate the selected plugins in selection order.
    ///
    /// Unknown IDs are logged and skipped.
    pub fn instantiate(&self, selection: &PluginSelection) -> Vec<Arc<dyn Plugin>> {
        match selection {
            PluginSelection::None => Vec::new(),
            PluginSelection::All => self.entries.iter().map(|(_, build)| build()).collect(),
            PluginSelection::Only(ids) => ids
                .iter()
                .filter_map(|id| match self.entries.iter().find(|(known, _)| known == id) {
                    Some((_, build)) => Some(build()),
                    None => {
                        tracing::warn!(plugin = %id, "Unknown plugin, skipping");
                        None
                    }
                })
                .collect(),
        }
    }
}

impl fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.ids()).finish()
    }
}
