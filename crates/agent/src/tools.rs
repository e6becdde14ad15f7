use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use helmsman_core::CapabilityDefinition;
use serde_json::Value;

/// A callable capability offered to the model. Implementations live outside
/// the orchestration core.
#[async_trait]
pub trait Capability: Send + Sync {
    fn definition(&self) -> CapabilityDefinition;
    async fn invoke(&self, arguments: Value) -> Result<Value>;
}

#[derive(Clone, Default)]
pub struct CapabilityRegistry {
    capabilities: BTreeMap<String, Arc<dyn Capability>>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<T>(&mut self, capability: T)
    where
        T: Capability + 'static,
    {
        let name = capability.definition().name;
        self.capabilities.insert(name, Arc::new(capability));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Capability>> {
        self.capabilities.get(name).cloned()
    }

    /// Definitions in name order.
    pub fn definitions(&self) -> Vec<CapabilityDefinition> {
        self.capabilities.values().map(|capability| capability.definition()).collect()
    }

    pub fn len(&self) -> usize {
        self.capabilities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.capabilities.is_empty()
    }
}

impl std::fmt::Debug for CapabilityRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilityRegistry")
            .field("capabilities", &self.capabilities.keys().collect::<Vec<_>>())
            .finish()
    }
}
