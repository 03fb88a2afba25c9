use std::collections::BTreeMap;

use af_domain::error::{Error, Result};
use regex::Regex;
use serde_json::Value;

const PLACEHOLDER: &str = r"(?s)\{\{(.*?)\}\}";

/// Lenient `{{variable}}` substitution.
///
/// Every `{{ ... }}` is replaced. The expression is a variable name,
/// optionally a dotted path into an object, followed by `|` filters
/// (`upper`, `lower`, `trim`, `default("text")`). Anything that does not
/// resolve, including expressions that are not names at all, renders as the
/// empty string, so the output never carries a literal placeholder.
#[derive(Debug, Clone)]
pub struct Renderer {
    pattern: Regex,
}

impl Renderer {
    pub fn new() -> Result<Self> {
        let pattern = Regex::new(PLACEHOLDER)
            .map_err(|e| Error::Config(format!("placeholder pattern: {e}")))?;
        Ok(Self { pattern })
    }

    pub fn render(&self, template: &str, vars: &BTreeMap<String, Value>) -> String {
        self.pattern
            .replace_all(template, |caps: &regex::Captures<'_>| {
                evaluate(&caps[1], vars)
            })
            .into_owned()
    }
}

fn evaluate(expr: &str, vars: &BTreeMap<String, Value>) -> String {
    let mut parts = expr.split('|');
    let name = parts.next().unwrap_or_default().trim();
    let mut text = lookup(name, vars).map(value_text).unwrap_or_default();
    for filter in parts {
        text = apply_filter(filter.trim(), text);
    }
    text
}

fn lookup<'a>(name: &str, vars: &'a BTreeMap<String, Value>) -> Option<&'a Value> {
    if name.is_empty() || name.chars().any(char::is_whitespace) {
        return None;
    }
    if let Some(v) = vars.get(name) {
        return Some(v);
    }
    let mut segments = name.split('.');
    let mut current = vars.get(segments.next()?)?;
    for segment in segments {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

fn apply_filter(filter: &str, text: String) -> String {
    match filter {
        "upper" => text.to_uppercase(),
        "lower" => text.to_lowercase(),
        "trim" => text.trim().to_owned(),
        f => match f.strip_prefix("default(").and_then(|r| r.strip_suffix(')')) {
            Some(arg) if text.is_empty() => arg.trim().trim_matches(['"', '\'']).to_owned(),
            _ => text,
        },
    }
}

fn value_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
