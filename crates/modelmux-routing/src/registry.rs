//! Provider registry with priority, latency, and cost profiles
//!
//! Entries are immutable after registration; replacing a provider means
//! clearing and re-registering. Lookups return snapshot copies so the
//! policy can rank without holding the registry lock.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use modelmux_billing::CostProfile;

/// Interned capability tag
///
/// Opaque to the core; it is only ever used as a key. Interning keeps
/// clones cheap across registry snapshots and telemetry keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Capability(Arc<str>);

impl Capability {
    /// Intern a capability tag
    pub fn new(tag: &str) -> Self {
        Self(Arc::from(tag))
    }

    /// The raw tag
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Capability {
    fn from(tag: &str) -> Self {
        Self::new(tag)
    }
}

/// Static capability record supplied at registration
#[derive(Debug, Clone, Default)]
pub struct ProviderCapabilities {
    /// Advertised typical latency, consulted for the short-prompt bonus
    pub typical_latency_ms: Option<u64>,
    /// Structured-output reliability in [0, 1], consulted when the
    /// request demands a schema
    pub json_reliability_score: Option<f64>,
    /// Cost parameters; absent means the provider is never cost-scored
    pub cost: Option<CostProfile>,
}

/// One registered provider for one capability
///
/// The invocable handler itself is bound separately by the dispatcher,
/// keyed by (provider, capability); the registry only carries the
/// profile the policy scores against.
#[derive(Debug, Clone)]
pub struct ProviderEntry {
    /// Provider identifier, unique within the process
    pub provider_id: String,
    /// Static priority, higher ranks first
    pub priority: i32,
    /// Capability record
    pub capabilities: ProviderCapabilities,
}

/// Mapping from capability to priority-ordered provider entries
///
/// Registering the same (provider, capability) pair twice is permitted
/// and yields two independent entries; the stable sort keeps ties in
/// insertion order.
#[derive(Debug, Default)]
pub struct ProviderRegistry {
    entries: RwLock<HashMap<Capability, Vec<Arc<ProviderEntry>>>>,
}

impl ProviderRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider for a capability
    ///
    /// The capability's list is re-sorted by priority descending after
    /// each append; equal priorities keep insertion order.
    pub fn register(&self, capability: Capability, entry: ProviderEntry) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let list = entries.entry(capability.clone()).or_default();

        tracing::debug!(
            provider_id = %entry.provider_id,
            capability = %capability,
            priority = entry.priority,
            "provider registered"
        );

        list.push(Arc::new(entry));
        list.sort_by_key(|e| std::cmp::Reverse(e.priority));
    }

    /// Snapshot of the providers registered for a capability
    ///
    /// Returns a copy; concurrent registration cannot mutate a snapshot
    /// a ranking pass is iterating.
    pub fn get(&self, capability: &Capability) -> Vec<Arc<ProviderEntry>> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.get(capability).cloned().unwrap_or_default()
    }

    /// Number of providers registered for a capability
    pub fn len(&self, capability: &Capability) -> usize {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.get(capability).map_or(0, Vec::len)
    }

    /// Whether no provider is registered for a capability
    pub fn is_empty(&self, capability: &Capability) -> bool {
        self.len(capability) == 0
    }

    /// Drop every registration (test isolation)
    pub fn clear(&self) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.clear();
    }
}
