//! `{{state.x}}`-style placeholder interpolation.
//!
//! Placeholders name a reference path rooted at `state`, `event`, `context`
//! or `vars`. Strings render bare, missing values and `null` render empty,
//! anything else renders as JSON. Placeholders with an unknown root are left
//! untouched.

use std::sync::OnceLock;

use regex::{Captures, Regex};
use serde_json::Value;
use tessera_core::path::lookup;
use tessera_core::{ReferencePath, ReferenceRoot};

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{\s*([^{}]+?)\s*\}\}").expect("static placeholder pattern is valid"))
}

/// Values visible to templates.
#[derive(Debug, Clone, Copy)]
pub struct TemplateScope<'a> {
    pub state: &'a Value,
    pub event: &'a Value,
    pub context: &'a Value,
    pub vars: &'a Value,
}

impl<'a> TemplateScope<'a> {
    fn root(&self, root: ReferenceRoot) -> &'a Value {
        match root {
            ReferenceRoot::State => self.state,
            ReferenceRoot::Event => self.event,
            ReferenceRoot::Context => self.context,
            ReferenceRoot::Vars => self.vars,
        }
    }

    fn render(&self, expression: &str) -> Option<String> {
        let path = ReferencePath::parse(expression).ok()?;
        let value = lookup(self.root(path.root()), path.segments());
        Some(match value {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
        })
    }
}

/// Replace every placeholder in `template`.
pub fn interpolate(template: &str, scope: &TemplateScope<'_>) -> String {
    if !template.contains("{{") {
        return template.to_string();
    }
    placeholder_re()
        .replace_all(template, |caps: &Captures<'_>| {
            scope.render(&caps[1]).unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

/// Interpolate every string inside `value`, recursing into arrays and objects.
pub fn interpolate_value(value: &Value, scope: &TemplateScope<'_>) -> Value {
    map_strings(value, &|s| interpolate(s, scope))
}

fn map_strings(value: &Value, f: &dyn Fn(&str) -> String) -> Value {
    match value {
        Value::String(s) => Value::String(f(s)),
        Value::Array(items) => Value::Array(items.iter().map(|v| map_strings(v, f)).collect()),
        Value::Object(map) => Value::Object(map.iter().map(|(k, v)| (k.clone(), map_strings(v, f))).collect()),
        other => other.clone(),
    }
}

fn collect_templates(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::String(s) if s.contains("{{") => out.push(s.clone()),
        Value::Array(items) => items.iter().for_each(|v| collect_templates(v, out)),
        Value::Object(map) => map.values().for_each(|v| collect_templates(v, out)),
        _ => {}
    }
}

impl TemplateScope<'_> {
    /// Scope strings that look like templates themselves. Once substituted
    /// into a node they must not be expanded again.
    pub fn embedded_templates(&self) -> Vec<String> {
        let mut out = Vec::new();
        for root in [self.state, self.event, self.context, self.vars] {
            collect_templates(root, &mut out);
        }
        out.sort();
        out.dedup();
        out
    }
}

/// Interpolate text produced by a component. Placeholders lying inside a
/// copy of one of `substituted` came from an earlier substitution and are
/// kept as they are.
pub fn interpolate_output(template: &str, scope: &TemplateScope<'_>, substituted: &[String]) -> String {
    if !template.contains("{{") {
        return template.to_string();
    }
    let inert: Vec<(usize, usize)> = substituted
        .iter()
        .flat_map(|s| template.match_indices(s.as_str()).map(|(at, m)| (at, at + m.len())))
        .collect();
    if inert.is_empty() {
        return interpolate(template, scope);
    }
    placeholder_re()
        .replace_all(template, |caps: &Captures<'_>| {
            let whole = &caps[0];
            let inside_substitution = caps
                .get(0)
                .is_some_and(|m| inert.iter().any(|&(start, end)| start <= m.start() && m.end() <= end));
            if inside_substitution {
                whole.to_string()
            } else {
                scope.render(&caps[1]).unwrap_or_else(|| whole.to_string())
            }
        })
        .into_owned()
}

/// [`interpolate_value`] for component output.
pub fn interpolate_output_value(value: &Value, scope: &TemplateScope<'_>, substituted: &[String]) -> Value {
    map_strings(value, &|s| interpolate_output(s, scope, substituted))
}
