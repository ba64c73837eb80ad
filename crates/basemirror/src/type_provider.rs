//! Field-type knowledge the engine consumes but does not own.

use std::cmp::Ordering;
use std::collections::HashSet;

use basemirror_util::compare_optional_values;
use serde_json::Value;

pub trait TypeProvider {
    /// Ordering used by sorted queries. Must be a total order.
    fn compare_cell_values(&self, field_type: &str, a: Option<&Value>, b: Option<&Value>)
        -> Ordering;

    /// Check a value before it is written. The error is a user-facing reason.
    fn validate_cell_value_for_update(
        &self,
        field_type: &str,
        options: Option<&Value>,
        value: &Value,
    ) -> Result<(), String>;

    fn is_computed(&self, field_type: &str) -> bool;

    fn cell_value_as_string(&self, field_type: &str, value: Option<&Value>) -> String;

    fn select_option_color(&self, field_type: &str, value: Option<&Value>) -> Option<String>;
}

const DEFAULT_COMPUTED_TYPES: &[&str] = &[
    "formula",
    "rollup",
    "count",
    "lookup",
    "autoNumber",
    "createdTime",
    "lastModifiedTime",
    "createdBy",
    "lastModifiedBy",
    "button",
];

/// Type provider that orders values structurally.
///
/// Empty cells sort first. Select cells (`{"name", "color"}` objects) order
/// by name and report their `color`.
#[derive(Debug, Clone)]
pub struct StructuralTypeProvider {
    computed_types: HashSet<String>,
}

impl Default for StructuralTypeProvider {
    fn default() -> Self {
        Self::with_computed_types(DEFAULT_COMPUTED_TYPES.iter().copied())
    }
}

impl StructuralTypeProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_computed_types<I, S>(types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            computed_types: types.into_iter().map(Into::into).collect(),
        }
    }
}

impl TypeProvider for StructuralTypeProvider {
    fn compare_cell_values(
        &self,
        _field_type: &str,
        a: Option<&Value>,
        b: Option<&Value>,
    ) -> Ordering {
        compare_optional_values(a, b)
    }

    fn validate_cell_value_for_update(
        &self,
        field_type: &str,
        options: Option<&Value>,
        value: &Value,
    ) -> Result<(), String> {
        if value.is_null() {
            return Ok(());
        }
        let ok = match field_type {
            "number" | "currency" | "percent" | "rating" | "duration" => value.is_number(),
            "checkbox" => value.is_boolean(),
            "singleLineText" | "multilineText" | "richText" | "email" | "url" | "phoneNumber"
            | "date" | "dateTime" => value.is_string(),
            "singleSelect" => select_choice_allowed(options, value),
            "multipleSelects" => value
                .as_array()
                .is_some_and(|items| items.iter().all(|item| select_choice_allowed(options, item))),
            _ => true,
        };
        if ok {
            Ok(())
        } else {
            Err(format!("Invalid cell value for a {field_type} field"))
        }
    }

    fn is_computed(&self, field_type: &str) -> bool {
        self.computed_types.contains(field_type)
    }

    fn cell_value_as_string(&self, _field_type: &str, value: Option<&Value>) -> String {
        value_as_string(value.unwrap_or(&Value::Null))
    }

    fn select_option_color(&self, field_type: &str, value: Option<&Value>) -> Option<String> {
        let choice = match (field_type, value?) {
            ("multipleSelects", Value::Array(items)) => items.first()?,
            (_, other) => other,
        };
        choice.get("color")?.as_str().map(str::to_string)
    }
}

fn select_choice_allowed(options: Option<&Value>, value: &Value) -> bool {
    let name = match value {
        Value::String(name) => name.as_str(),
        Value::Object(obj) => match obj.get("name").and_then(Value::as_str) {
            Some(name) => name,
            None => return false,
        },
        _ => return false,
    };
    let Some(choices) = options
        .and_then(|opts| opts.get("choices"))
        .and_then(Value::as_array)
    else {
        return true;
    };
    choices
        .iter()
        .any(|choice| choice.get("name").and_then(Value::as_str) == Some(name))
}

fn value_as_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(true) => "checked".to_string(),
        Value::Bool(false) => String::new(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .map(value_as_string)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(", "),
        Value::Object(obj) => match obj.get("name").and_then(Value::as_str) {
            Some(name) => name.to_string(),
            None => value.to_string(),
        },
    }
}
