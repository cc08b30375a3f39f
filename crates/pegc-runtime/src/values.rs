use std::collections::BTreeMap;
use std::rc::Rc;

/// A capture value. Input ranges stay as byte offsets and are resolved
/// against the input when the tree is serialized.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Range(usize, usize),
    Bool(bool),
    Str(Rc<str>),
    Map(BTreeMap<Rc<str>, Value>),
    Array(Vec<Value>),
    Null,
    /// Produced by the factory hook; serialized as its inner value.
    Object { class: Rc<str>, value: Box<Value> },
}

impl Value {
    pub fn empty_map() -> Value {
        Value::Map(BTreeMap::new())
    }
}

pub fn to_json(value: &Value, input: &[u8]) -> serde_json::Value {
    match value {
        &Value::Range(start, end) => {
            serde_json::Value::String(String::from_utf8_lossy(&input[start..end]).into_owned())
        }
        &Value::Bool(b) => serde_json::Value::Bool(b),
        Value::Str(s) => serde_json::Value::String(s.to_string()),
        Value::Map(map) => serde_json::Value::Object(
            map.iter()
                .map(|(k, v)| (k.to_string(), to_json(v, input)))
                .collect(),
        ),
        Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(|v| to_json(v, input)).collect())
        }
        Value::Null => serde_json::Value::Null,
        Value::Object { value, .. } => to_json(value, input),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn ranges_resolve_against_input() {
        let mut map = BTreeMap::new();
        map.insert(Rc::from("word"), Value::Range(1, 4));
        map.insert(Rc::from("flag"), Value::Bool(true));
        let value = Value::Map(map);
        assert_eq!(
            to_json(&value, b"xabcx"),
            json!({ "word": "abc", "flag": true })
        );
    }

    #[test]
    fn arrays_and_null() {
        let value = Value::Array(vec![Value::Null, Value::Str(Rc::from("s"))]);
        assert_eq!(to_json(&value, b""), json!([null, "s"]));
    }
}
