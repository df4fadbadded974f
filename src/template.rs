//! `{{identifier}}` substitution over strings and nested parameter
//! structures.
//!
//! Two modes exist on purpose and must not be unified: the engine leaves
//! unresolved placeholders verbatim (a later step may fill the variable in),
//! while outbound notifications blank them.

use std::sync::OnceLock;

use regex::{Captures, Regex};

use crate::dsl::{ParamValue, Params};
use crate::types::VarMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderMode {
    /// Unresolved placeholders are left verbatim in the output.
    KeepMissing,
    /// Unresolved placeholders are replaced with the empty string.
    EmptyMissing,
}

fn var_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\{\{(\w+)\}\}").expect("placeholder pattern is valid"))
}

/// Replaces `{{name}}` placeholders with values from `vars`.
pub fn render(template: &str, vars: &VarMap, mode: RenderMode) -> String {
    var_pattern()
        .replace_all(template, |caps: &Captures| match vars.get(&caps[1]) {
            Some(value) => value.clone(),
            None => match mode {
                RenderMode::KeepMissing => caps[0].to_string(),
                RenderMode::EmptyMissing => String::new(),
            },
        })
        .into_owned()
}

/// Renders every string-valued entry of a parameter bag, recursing into
/// nested maps and arrays. Non-string values pass through untouched.
/// Placeholders that cannot be resolved are kept, matching the engine's
/// step-resolution behavior.
pub fn render_params(params: &Params, vars: &VarMap) -> Params {
    params
        .iter()
        .map(|(k, v)| (k.clone(), render_value(v, vars)))
        .collect()
}

fn render_value(value: &ParamValue, vars: &VarMap) -> ParamValue {
    match value {
        ParamValue::String(s) => ParamValue::String(render(s, vars, RenderMode::KeepMissing)),
        ParamValue::Object(map) => ParamValue::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), render_value(v, vars)))
                .collect(),
        ),
        ParamValue::Array(items) => {
            ParamValue::Array(items.iter().map(|v| render_value(v, vars)).collect())
        }
        other => other.clone(),
    }
}

/// Returns the distinct placeholder names referenced by a template, in order
/// of first appearance.
pub fn extract_variables(template: &str) -> Vec<String> {
    let mut seen = Vec::new();
    for caps in var_pattern().captures_iter(template) {
        let name = &caps[1];
        if !seen.iter().any(|s| s == name) {
            seen.push(name.to_string());
        }
    }
    seen
}

#[cfg(test)]
mod tests {
    use super::*;
    use maplit::btreemap;

    #[test]
    fn engine_mode_keeps_unresolved_placeholders() {
        let vars = btreemap! { "name".to_string() => "Bob".to_string() };
        let out = render("Hello {{name}}, balance {{bal}}", &vars, RenderMode::KeepMissing);
        assert_eq!(out, "Hello Bob, balance {{bal}}");
    }

    #[test]
    fn notification_mode_blanks_unresolved_placeholders() {
        let vars = btreemap! { "name".to_string() => "Bob".to_string() };
        let out = render("Hello {{name}}, balance {{bal}}", &vars, RenderMode::EmptyMissing);
        assert_eq!(out, "Hello Bob, balance ");
    }

    #[test]
    fn renders_nested_params_leaving_non_strings_alone() {
        let vars = btreemap! { "user".to_string() => "alice".to_string() };
        let params: Params = serde_json::from_str(
            r#"{"url": "https://api/{{user}}", "retries": 3,
                "headers": {"x-user": "{{user}}"},
                "tags": ["{{user}}", 1, {"deep": "{{user}}"}]}"#,
        )
        .unwrap();

        let rendered = render_params(&params, &vars);
        assert_eq!(rendered.str_of("url"), Some("https://api/alice"));
        assert_eq!(rendered.i64_of("retries"), Some(3));
        assert_eq!(rendered.object_of("headers").unwrap()["x-user"].as_str(), Some("alice"));
        let tags = rendered.array_of("tags").unwrap();
        assert_eq!(tags[0].as_str(), Some("alice"));
        assert_eq!(tags[1].as_i64(), Some(1));
        assert_eq!(tags[2].as_object().unwrap()["deep"].as_str(), Some("alice"));
    }

    #[test]
    fn extracts_variables_deduplicated_in_order() {
        let names = extract_variables("{{b}} and {{a}} then {{b}} again");
        assert_eq!(names, vec!["b".to_string(), "a".to_string()]);
        assert!(extract_variables("no placeholders").is_empty());
    }
}
