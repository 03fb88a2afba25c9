use std::collections::BTreeMap;

use af_domain::error::{Error, Result};
use af_domain::instance::Instance;
use af_domain::spec::{ResolvedMcpServer, ResolvedModel, ResolvedSpec, ResolvedTool};
use af_domain::template::{
    AgentTemplate, McpServerEntry, ModelConfig, PromptTemplate, TemplateEntry, TemplateKind,
    TemplateRecord, ToolEntry,
};
use serde_json::Value;

use crate::render::Renderer;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Template lookup seam
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Read access to the master registries. The store's template snapshot
/// implements this; tests use a plain map.
pub trait TemplateSource {
    fn entry(&self, kind: TemplateKind, id: &str) -> Option<&TemplateEntry>;
}

impl TemplateSource for BTreeMap<(TemplateKind, String), TemplateEntry> {
    fn entry(&self, kind: TemplateKind, id: &str) -> Option<&TemplateEntry> {
        self.get(&(kind, id.to_owned()))
    }
}

/// Typed, active-only lookup.
fn active<'a, T: TemplateRecord, S: TemplateSource + ?Sized>(
    source: &'a S,
    id: &str,
) -> Option<&'a T> {
    source
        .entry(T::KIND, id)
        .and_then(T::from_entry)
        .filter(|t| t.is_active())
}

fn require<'a, T: TemplateRecord, S: TemplateSource + ?Sized>(
    source: &'a S,
    id: &str,
) -> Result<&'a T> {
    active::<T, S>(source, id).ok_or_else(|| Error::TemplateNotFound {
        kind: T::KIND.to_string(),
        id: id.to_owned(),
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Resolution
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct ResolveRequest<'a> {
    pub tenant_id: &'a str,
    pub instance: &'a Instance,
    pub call_variables: &'a BTreeMap<String, Value>,
    /// System-wide deadline used when the instance sets none.
    pub default_timeout_secs: u64,
}

/// Merge variable layers; later layers win. Order of arguments is lowest
/// precedence first.
pub fn merge_variables<'a, I>(layers: I) -> BTreeMap<String, Value>
where
    I: IntoIterator<Item = &'a BTreeMap<String, Value>>,
{
    let mut merged = BTreeMap::new();
    for layer in layers {
        for (k, v) in layer {
            merged.insert(k.clone(), v.clone());
        }
    }
    merged
}

#[derive(Debug, Clone)]
pub struct Resolver {
    renderer: Renderer,
}

impl Resolver {
    pub fn new() -> Result<Self> {
        Ok(Self {
            renderer: Renderer::new()?,
        })
    }

    /// Build the immutable run specification. Deterministic for identical
    /// inputs: every map involved is ordered and nothing reads the clock.
    pub fn resolve<S: TemplateSource + ?Sized>(
        &self,
        source: &S,
        req: &ResolveRequest<'_>,
    ) -> Result<ResolvedSpec> {
        let instance = req.instance;
        if instance.tenant_id != req.tenant_id {
            return Err(Error::InstanceNotFound(instance.instance_id.clone()));
        }
        if !instance.active {
            return Err(Error::Validation(format!(
                "instance '{}' is inactive",
                instance.instance_id
            )));
        }

        let agent: &AgentTemplate = require(source, &instance.agent_id)?;
        let prompt: Option<&PromptTemplate> = match &agent.system_prompt_template {
            Some(id) => Some(require(source, id)?),
            None => None,
        };

        let prompt_defaults: BTreeMap<String, Value> = prompt
            .map(|p| {
                p.variables
                    .iter()
                    .filter_map(|(k, v)| v.default.clone().map(|d| (k.clone(), d)))
                    .collect()
            })
            .unwrap_or_default();
        let variables = merge_variables([
            &prompt_defaults,
            &agent.template_variables,
            &instance.variables,
            req.call_variables,
        ]);

        let prompt_text = instance
            .system_prompt
            .as_deref()
            .or(prompt.map(|p| p.template_content.as_str()))
            .or(agent.system_prompt.as_deref())
            .unwrap_or_default();
        let system_prompt = self.renderer.render(prompt_text, &variables);

        let model = resolve_model(source, agent, instance)?;

        let tool_ids = if instance.tools.is_empty() {
            &agent.default_tools
        } else {
            &instance.tools
        };
        let tools = tool_ids
            .iter()
            .filter_map(|id| lookup_or_skip::<ToolEntry, S>(source, id))
            .map(|t| ResolvedTool {
                tool_id: t.tool_id.clone(),
                name: t.name.clone(),
                description: t.description.clone(),
                tool_type: t.tool_type.clone(),
                parameters_schema: t.parameters_schema.clone(),
            })
            .collect();

        let mcp_ids = if instance.mcp_servers.is_empty() {
            &agent.default_mcp_servers
        } else {
            &instance.mcp_servers
        };
        let mcp_servers = mcp_ids
            .iter()
            .filter_map(|id| lookup_or_skip::<McpServerEntry, S>(source, id))
            .map(|m| ResolvedMcpServer {
                mcp_id: m.mcp_id.clone(),
                name: m.name.clone(),
                server_type: m.server_type,
                command: m.command.clone(),
                args: m.args.clone(),
                env: m.env.clone(),
                timeout_secs: m.timeout_secs,
            })
            .collect();

        let builtin_tools = instance
            .builtin_tools
            .clone()
            .unwrap_or_else(|| agent.default_builtin_tools.clone());

        Ok(ResolvedSpec {
            tenant_id: req.tenant_id.to_owned(),
            instance_id: instance.instance_id.clone(),
            agent_id: agent.agent_id.clone(),
            name: instance.name.clone(),
            system_prompt,
            variables,
            model,
            tools,
            mcp_servers,
            builtin_tools,
            timeout_secs: instance
                .timeout_override_secs()
                .unwrap_or(req.default_timeout_secs),
            custom_settings: instance.custom_settings.clone(),
        })
    }
}

fn resolve_model<S: TemplateSource + ?Sized>(
    source: &S,
    agent: &AgentTemplate,
    instance: &Instance,
) -> Result<ResolvedModel> {
    let overrides = &instance.model;
    let config_id = overrides
        .config_id
        .as_deref()
        .unwrap_or(agent.default_model.as_str());
    let base: &ModelConfig = require(source, config_id)?;
    Ok(ResolvedModel {
        provider: base.provider.clone(),
        model_id: overrides
            .model_id
            .clone()
            .unwrap_or_else(|| base.model_id.clone()),
        temperature: overrides.temperature.unwrap_or(base.temperature),
        max_tokens: overrides.max_tokens.unwrap_or(base.max_tokens),
        top_p: overrides.top_p.or(base.top_p),
        cost_per_token: base.cost_per_token,
    })
}

/// Tools and MCP servers that were removed or deactivated after an instance
/// referenced them are dropped rather than failing the run.
fn lookup_or_skip<'a, T: TemplateRecord, S: TemplateSource + ?Sized>(
    source: &'a S,
    id: &str,
) -> Option<&'a T> {
    let found = active::<T, S>(source, id);
    if found.is_none() {
        tracing::warn!(kind = %T::KIND, id, "referenced registry entry missing or inactive, skipping");
    }
    found
}
