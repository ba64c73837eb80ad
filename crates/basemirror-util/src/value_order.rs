use std::cmp::Ordering;

use serde_json::Value;

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// Total structural order over JSON values.
///
/// Values of different kinds order as
/// `null < bool < number < string < array < object`. Numbers compare
/// numerically, strings by code point, arrays lexicographically. Objects that
/// carry a string `name` (select options, collaborators) compare by that
/// name first; remaining ties fall back to comparing entries in key order.
///
/// # Examples
///
/// ```
/// use std::cmp::Ordering;
/// use basemirror_util::value_order::compare_values;
/// use serde_json::json;
///
/// assert_eq!(compare_values(&json!(2), &json!(10)), Ordering::Less);
/// assert_eq!(compare_values(&json!("b"), &json!("a")), Ordering::Greater);
/// assert_eq!(compare_values(&json!(null), &json!(false)), Ordering::Less);
/// assert_eq!(
///     compare_values(&json!({"name": "High"}), &json!({"name": "Low"})),
///     Ordering::Less
/// );
/// ```
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
        (Value::Number(a), Value::Number(b)) => {
            match (a.as_i64(), b.as_i64()) {
                (Some(a), Some(b)) => a.cmp(&b),
                _ => {
                    let a = a.as_f64().unwrap_or(f64::NAN);
                    let b = b.as_f64().unwrap_or(f64::NAN);
                    a.total_cmp(&b)
                }
            }
        }
        (Value::String(a), Value::String(b)) => a.cmp(b),
        (Value::Array(a), Value::Array(b)) => {
            for (x, y) in a.iter().zip(b.iter()) {
                let ord = compare_values(x, y);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            a.len().cmp(&b.len())
        }
        (Value::Object(a), Value::Object(b)) => {
            if let (Some(Value::String(x)), Some(Value::String(y))) = (a.get("name"), b.get("name")) {
                let ord = x.cmp(y);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            let mut left: Vec<(&String, &Value)> = a.iter().collect();
            let mut right: Vec<(&String, &Value)> = b.iter().collect();
            left.sort_by(|x, y| x.0.cmp(y.0));
            right.sort_by(|x, y| x.0.cmp(y.0));
            for ((ka, va), (kb, vb)) in left.iter().zip(right.iter()) {
                let ord = ka.cmp(kb).then_with(|| compare_values(va, vb));
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            left.len().cmp(&right.len())
        }
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

/// Like [`compare_values`], treating a missing value as `null`.
pub fn compare_optional_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    static NULL: Value = Value::Null;
    compare_values(a.unwrap_or(&NULL), b.unwrap_or(&NULL))
}
