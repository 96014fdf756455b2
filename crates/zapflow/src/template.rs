//! `{{placeholder}}` interpolation against a run's trigger payload.
//!
//! Resolution is pure: the caller supplies the whole variable bag and
//! nothing here touches the network or a store. A placeholder that cannot
//! be resolved is left in place verbatim, so a bad template never loses data
//! or aborts a step.
//!
//! # Placeholder names
//!
//! | Form          | Resolves to                                      |
//! |---------------|--------------------------------------------------|
//! | `name`        | `variables["name"]`                              |
//! | `items[1]`    | element 1 of the sequence `variables["items"]`   |
//! | `user.email`  | `variables["user"]["email"]`, descending objects |
//!
//! The rules are tried in that order and the first match wins, so a key
//! literally named `user.email` shadows the nested path.
//!
//! # Example
//!
//! ```
//! use serde_json::json;
//! use zapflow::template::resolve;
//!
//! let vars = json!({ "name": "Ann", "items": ["a", "b"] });
//! let params = json!({ "body": "Hi {{name}}, you picked {{items[1]}}", "n": 3 });
//!
//! assert_eq!(resolve(&params, &vars), json!({ "body": "Hi Ann, you picked b", "n": 3 }));
//! ```

use std::borrow::Cow;
use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde_json::{Map, Value};
use tracing::warn;

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{([^}]+)\}\}").expect("placeholder pattern is valid"));

static INDEXED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([^\[\]]+)\[(\d+)\]$").expect("index pattern is valid"));

/// Resolve every placeholder in `value`.
///
/// Objects and arrays are rebuilt with each string leaf interpolated; all
/// other values are returned unchanged.
pub fn resolve(value: &Value, variables: &Value) -> Value {
    match value {
        Value::String(s) => Value::String(resolve_str(s, variables).into_owned()),
        Value::Array(items) => Value::Array(items.iter().map(|v| resolve(v, variables)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), resolve(v, variables)))
                .collect::<Map<_, _>>(),
        ),
        Value::Null | Value::Bool(_) | Value::Number(_) => value.clone(),
    }
}

/// Resolve the placeholders inside a single string.
///
/// Borrows the input when it contains nothing to substitute.
pub fn resolve_str<'a>(template: &'a str, variables: &Value) -> Cow<'a, str> {
    if !template.contains("{{") {
        return Cow::Borrowed(template);
    }

    PLACEHOLDER.replace_all(template, |caps: &Captures<'_>| {
        let name = caps[1].trim();
        match lookup(name, variables) {
            Some(text) => text,
            None => {
                warn!(placeholder = name, "Template variable not found, leaving as-is");
                caps[0].to_owned()
            }
        }
    })
}

/// Look up one placeholder name and render it as text.
pub fn lookup(name: &str, variables: &Value) -> Option<String> {
    if name.is_empty() {
        return None;
    }

    if let Some(value) = variables.get(name) {
        return Some(render(value));
    }

    if let Some(caps) = INDEXED.captures(name) {
        let element = caps[2].parse::<usize>().ok().and_then(|index| {
            variables
                .get(&caps[1])
                .and_then(Value::as_array)
                .and_then(|items| items.get(index))
        });
        if let Some(element) = element {
            return Some(render(element));
        }
    }

    if name.contains('.') {
        let mut current = variables;
        for segment in name.split('.') {
            current = current.as_object()?.get(segment)?;
        }
        if !current.is_null() {
            return Some(render(current));
        }
    }

    None
}

/// Canonical text form used when splicing a value into a string.
fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
