use std::collections::BTreeMap;

use af_domain::error::Error;
use af_domain::instance::{Instance, ModelOverrides, NewInstance};
use af_domain::template::{
    AgentTemplate, ModelConfig, PromptTemplate, PromptVariable, TemplateEntry, TemplateKind,
    ToolEntry,
};
use af_resolver::{ResolveRequest, Resolver};
use chrono::Utc;
use serde_json::{json, Value};

type Source = BTreeMap<(TemplateKind, String), TemplateEntry>;

fn insert(source: &mut Source, entry: TemplateEntry) {
    source.insert((entry.kind(), entry.key().to_owned()), entry);
}

/// Prompt `t1` defaults `region` to `us-east`; agent `analyst` uses it.
fn registry() -> Source {
    let mut source = Source::new();
    insert(
        &mut source,
        TemplateEntry::Prompt(PromptTemplate {
            prompt_id: "t1".into(),
            name: "Regional analyst".into(),
            template_content: "You analyse {{region}} for {{customer}}.{{unset}}".into(),
            variables: BTreeMap::from([(
                "region".to_string(),
                PromptVariable {
                    default: Some(json!("us-east")),
                    description: None,
                },
            )]),
            category: "analysis".into(),
            active: true,
            updated_at: Utc::now(),
        }),
    );
    insert(
        &mut source,
        TemplateEntry::Model(ModelConfig {
            config_id: "fast".into(),
            provider: "scripted".into(),
            model_id: "echo-1".into(),
            temperature: 0.7,
            max_tokens: 2000,
            top_p: None,
            cost_per_token: Some(0.000_001),
            category: String::new(),
            active: true,
            updated_at: Utc::now(),
        }),
    );
    insert(
        &mut source,
        TemplateEntry::Tool(ToolEntry {
            tool_id: "search".into(),
            name: "web_search".into(),
            description: None,
            tool_type: "builtin".into(),
            category: String::new(),
            parameters_schema: Value::Null,
            active: true,
            updated_at: Utc::now(),
        }),
    );
    insert(
        &mut source,
        TemplateEntry::Agent(AgentTemplate {
            agent_id: "analyst".into(),
            name: "Analyst".into(),
            description: None,
            category: "analysis".into(),
            system_prompt_template: Some("t1".into()),
            system_prompt: None,
            default_model: "fast".into(),
            default_tools: vec!["search".into(), "retired".into()],
            default_mcp_servers: Vec::new(),
            default_builtin_tools: vec!["calculator".into()],
            template_variables: BTreeMap::from([("customer".to_string(), json!("ACME"))]),
            capabilities: Vec::new(),
            tags: Vec::new(),
            active: true,
            updated_at: Utc::now(),
        }),
    );
    source
}

fn instance(tenant: &str, overrides: &[(&str, Value)]) -> Instance {
    Instance::create(
        tenant,
        NewInstance {
            instance_id: Some("inst-1".into()),
            agent_id: "analyst".into(),
            variables: overrides
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
            ..Default::default()
        },
        "Analyst",
    )
    .unwrap()
}

fn resolve(
    inst: &Instance,
    call: &BTreeMap<String, Value>,
) -> af_domain::Result<af_domain::spec::ResolvedSpec> {
    let resolver = Resolver::new().unwrap();
    resolver.resolve(
        &registry(),
        &ResolveRequest {
            tenant_id: "acme",
            instance: inst,
            call_variables: call,
            default_timeout_secs: 600,
        },
    )
}

#[test]
fn instance_override_beats_template_default() {
    let inst = instance("acme", &[("region", json!("eu-west"))]);
    let spec = resolve(&inst, &BTreeMap::new()).unwrap();
    assert_eq!(spec.variables["region"], "eu-west");
    assert!(spec.system_prompt.starts_with("You analyse eu-west for ACME."));
}

#[test]
fn call_time_variable_beats_instance_override() {
    let inst = instance("acme", &[("region", json!("eu-west"))]);
    let call = BTreeMap::from([("region".to_string(), json!("ap-south"))]);
    let spec = resolve(&inst, &call).unwrap();
    assert_eq!(spec.variables["region"], "ap-south");
    assert!(spec.system_prompt.contains("ap-south"));
}

#[test]
fn template_default_applies_when_nothing_overrides() {
    let inst = instance("acme", &[]);
    let spec = resolve(&inst, &BTreeMap::new()).unwrap();
    assert_eq!(spec.variables["region"], "us-east");
}

#[test]
fn unresolved_placeholders_render_empty() {
    let inst = instance("acme", &[]);
    let spec = resolve(&inst, &BTreeMap::new()).unwrap();
    assert!(!spec.system_prompt.contains("{{"));
    assert!(spec.system_prompt.ends_with("ACME."));
}

#[test]
fn resolution_is_byte_identical_for_identical_inputs() {
    let inst = instance("acme", &[("region", json!("eu-west"))]);
    let call = BTreeMap::from([("limit".to_string(), json!(10))]);
    let a = resolve(&inst, &call).unwrap();
    let b = resolve(&inst, &call).unwrap();
    assert_eq!(a.canonical_bytes().unwrap(), b.canonical_bytes().unwrap());
    assert_eq!(a.fingerprint().unwrap(), b.fingerprint().unwrap());
}

#[test]
fn flattens_model_tools_and_builtins() {
    let mut inst = instance("acme", &[]);
    inst.model = ModelOverrides {
        temperature: Some(0.1),
        ..Default::default()
    };
    let spec = resolve(&inst, &BTreeMap::new()).unwrap();
    assert_eq!(spec.model.provider, "scripted");
    assert_eq!(spec.model.model_id, "echo-1");
    assert!((spec.model.temperature - 0.1).abs() < f32::EPSILON);
    assert_eq!(spec.model.max_tokens, 2000);
    // "retired" is not in the registry and is dropped.
    assert_eq!(spec.tool_names(), vec!["web_search".to_string()]);
    assert_eq!(spec.builtin_tools, vec!["calculator".to_string()]);
    assert_eq!(spec.timeout_secs, 600);
}

#[test]
fn literal_instance_prompt_wins_over_template() {
    let mut inst = instance("acme", &[("region", json!("eu-west"))]);
    inst.system_prompt = Some("Custom for {{region}}".into());
    let spec = resolve(&inst, &BTreeMap::new()).unwrap();
    assert_eq!(spec.system_prompt, "Custom for eu-west");
}

#[test]
fn custom_timeout_setting_overrides_default() {
    let mut inst = instance("acme", &[]);
    inst.custom_settings.insert("timeout".into(), json!(45));
    let spec = resolve(&inst, &BTreeMap::new()).unwrap();
    assert_eq!(spec.timeout_secs, 45);
}

#[test]
fn inactive_instance_is_rejected() {
    let mut inst = instance("acme", &[]);
    inst.active = false;
    assert!(matches!(
        resolve(&inst, &BTreeMap::new()),
        Err(Error::Validation(_))
    ));
}

#[test]
fn foreign_instance_is_not_found() {
    let inst = instance("globex", &[]);
    assert!(matches!(
        resolve(&inst, &BTreeMap::new()),
        Err(Error::InstanceNotFound(_))
    ));
}

#[test]
fn missing_model_config_is_template_not_found() {
    let mut inst = instance("acme", &[]);
    inst.model.config_id = Some("nope".into());
    match resolve(&inst, &BTreeMap::new()) {
        Err(Error::TemplateNotFound { kind, id }) => {
            assert_eq!(kind, "model");
            assert_eq!(id, "nope");
        }
        other => panic!("unexpected {other:?}"),
    }
}
