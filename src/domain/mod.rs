//! Capability registry exposed over the Model Context Protocol
//!
//! Holds the process-wide catalogs of tools, resources and prompts. The registry is
//! built once at startup and shared read-only by every processing unit.

pub mod prompts;
pub mod resources;
pub mod tools;

use std::{collections::HashMap, sync::Arc};

use tracing::warn;

use self::{
    prompts::{DebugHelpPrompt, ExplainCodePrompt, PromptHandler},
    resources::{ResourceHandler, SampleDataResource, WorkerInfoResource},
    tools::{EchoTool, GetTimeTool, RandomNumberTool, ToolHandler, Typed},
};

/// Ordered lookup table keyed by capability name (or URI for resources).
pub struct Catalog<H: ?Sized> {
    entries: Vec<Arc<H>>,
    index: HashMap<String, usize>,
}

impl<H: ?Sized> Catalog<H> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Adds a handler under `key`. The first registration of a key wins.
    pub fn insert(&mut self, key: impl Into<String>, handler: Arc<H>) {
        let key = key.into();
        if self.index.contains_key(&key) {
            warn!(key = %key, "ignoring duplicate capability registration");
            return;
        }

        self.index.insert(key, self.entries.len());
        self.entries.push(handler);
    }

    pub fn get(&self, key: &str) -> Option<&Arc<H>> {
        self.index.get(key).map(|position| &self.entries[*position])
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<H>> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<H: ?Sized> Default for Catalog<H> {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Default)]
pub struct CapabilityRegistry {
    pub tools: Catalog<dyn ToolHandler>,
    pub resources: Catalog<dyn ResourceHandler>,
    pub prompts: Catalog<dyn PromptHandler>,
}

impl CapabilityRegistry {
    /// Registry with the built-in tools, resources and prompts.
    pub fn builtin() -> Self {
        let mut registry = Self::default();

        registry.register_tool(Arc::new(Typed::<EchoTool>::new()));
        registry.register_tool(Arc::new(Typed::<GetTimeTool>::new()));
        registry.register_tool(Arc::new(Typed::<RandomNumberTool>::new()));

        registry.register_resource(Arc::new(WorkerInfoResource));
        registry.register_resource(Arc::new(SampleDataResource));

        registry.register_prompt(Arc::new(ExplainCodePrompt));
        registry.register_prompt(Arc::new(DebugHelpPrompt));

        registry
    }

    pub fn register_tool(&mut self, handler: Arc<dyn ToolHandler>) {
        let name = handler.describe().name;
        self.tools.insert(name, handler);
    }

    pub fn register_resource(&mut self, handler: Arc<dyn ResourceHandler>) {
        let uri = handler.describe().uri;
        self.resources.insert(uri, handler);
    }

    pub fn register_prompt(&mut self, handler: Arc<dyn PromptHandler>) {
        let name = handler.describe().name;
        self.prompts.insert(name, handler);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_catalogs_keep_registration_order() {
        let registry = CapabilityRegistry::builtin();

        let tools: Vec<String> = registry.tools.iter().map(|t| t.describe().name).collect();
        assert_eq!(tools, vec!["echo", "get_time", "random_number"]);

        let resources: Vec<String> = registry
            .resources
            .iter()
            .map(|r| r.describe().uri)
            .collect();
        assert_eq!(
            resources,
            vec!["cloudflare://worker-info", "cloudflare://sample-data"]
        );

        let prompts: Vec<String> = registry.prompts.iter().map(|p| p.describe().name).collect();
        assert_eq!(prompts, vec!["explain_code", "debug_help"]);
    }

    #[test]
    fn lookup_by_key() {
        let registry = CapabilityRegistry::builtin();
        assert!(registry.tools.get("echo").is_some());
        assert!(registry.tools.get("nope").is_none());
        assert!(registry.resources.get("cloudflare://sample-data").is_some());
        assert!(registry.prompts.get("debug_help").is_some());
    }

    #[test]
    fn duplicate_registration_keeps_first_entry() {
        let mut registry = CapabilityRegistry::builtin();
        registry.register_tool(Arc::new(Typed::<EchoTool>::new()));
        assert_eq!(registry.tools.len(), 3);
    }
}
