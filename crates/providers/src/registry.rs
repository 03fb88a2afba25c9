//! Adapter registry.
//!
//! Builds one [`Invoker`] per configured `[[providers]]` entry. The
//! supervisor looks adapters up by the id carried in
//! `ResolvedSpec.model.provider`.

use std::collections::HashMap;
use std::sync::Arc;

use af_domain::config::{ProviderConfig, ProviderKind};
use af_domain::error::Result;

use crate::anthropic::AnthropicAdapter;
use crate::bedrock::BedrockAdapter;
use crate::openai_compat::OpenAiCompatAdapter;
use crate::scripted::ScriptedAdapter;
use crate::tool_loop::ToolLoopAdapter;
use crate::tool_process::ToolProcessAdapter;
use crate::traits::Invoker;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// AdapterRegistry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Default)]
pub struct AdapterRegistry {
    adapters: HashMap<String, Arc<dyn Invoker>>,
}

/// Model adapters are wrapped in a [`ToolLoopAdapter`] so runs with
/// attached tool servers get their tool calls executed.
fn build(pc: &ProviderConfig) -> Result<Arc<dyn Invoker>> {
    let model: Arc<dyn Invoker> = match pc.kind {
        ProviderKind::OpenaiCompat => Arc::new(OpenAiCompatAdapter::from_config(pc)?),
        ProviderKind::Anthropic => Arc::new(AnthropicAdapter::from_config(pc)?),
        ProviderKind::Bedrock => Arc::new(BedrockAdapter::from_config(pc)?),
        ProviderKind::Scripted => Arc::new(ScriptedAdapter::from_config(pc)),
        ProviderKind::ToolProcess => return Ok(Arc::new(ToolProcessAdapter::from_config(pc)?)),
    };
    Ok(Arc::new(ToolLoopAdapter::new(model)))
}

impl AdapterRegistry {
    /// Instantiate every configured provider.
    ///
    /// Providers that fail to initialize (missing key, missing base_url,
    /// ...) are logged and skipped; runs that target them fail with
    /// `adapter_not_found`.
    pub fn from_config(providers: &[ProviderConfig]) -> Self {
        let mut registry = Self::default();
        for pc in providers {
            match build(pc) {
                Ok(adapter) => {
                    tracing::info!(provider_id = %pc.id, kind = %pc.kind.as_str(), "registered adapter");
                    registry.adapters.insert(pc.id.clone(), adapter);
                }
                Err(e) => {
                    tracing::warn!(
                        provider_id = %pc.id,
                        kind = %pc.kind.as_str(),
                        error = %e,
                        "failed to initialize adapter, skipping"
                    );
                }
            }
        }
        if registry.is_empty() {
            tracing::warn!("no invocation adapters initialized; every run will fail");
        }
        registry
    }

    /// Add or replace an adapter under its own id.
    pub fn register(&mut self, adapter: Arc<dyn Invoker>) {
        self.adapters.insert(adapter.adapter_id().to_string(), adapter);
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn Invoker>> {
        self.adapters.get(id).cloned()
    }

    /// `(id, kind)` pairs, sorted by id.
    pub fn list(&self) -> Vec<(String, ProviderKind)> {
        let mut out: Vec<_> = self
            .adapters
            .iter()
            .map(|(id, a)| (id.clone(), a.kind()))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}
