//! Parameter binding: trigger-configured values against a function's declared
//! schema.
//!
//! Binding happens per invocation, after compile and before execute. The
//! event payload is never merged into the bound map — it travels as the
//! second call argument.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

use crate::error::EngineError;

/// Declared parameter types. Closed set: adding a type means adding a variant
/// and its coercion arm, nothing else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
}

impl ParamType {
    /// Coerce one configured value to the declared type. `None` means the
    /// trigger configured no value for this key.
    fn coerce(self, key: &str, raw: Option<&str>) -> Result<Value, EngineError> {
        match self {
            ParamType::String => raw
                .map(|s| Value::String(s.to_owned()))
                .ok_or_else(|| EngineError::Bind(format!("missing required parameter `{key}`"))),
        }
    }
}

/// One entry of a function's `params` export: display name plus type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: ParamType,
}

/// Key → spec, as declared by the function source. BTreeMap keeps listing
/// output stable.
pub type ParamSchema = BTreeMap<String, ParamSpec>;

/// Resolve the trigger's configured values against the schema.
///
/// Every declared key must be present; extra configured values the schema
/// does not declare are ignored.
pub fn bind(
    schema: &ParamSchema,
    values: &HashMap<String, String>,
) -> Result<serde_json::Map<String, Value>, EngineError> {
    let mut bound = serde_json::Map::new();
    for (key, spec) in schema {
        bound.insert(key.clone(), spec.ty.coerce(key, values.get(key).map(String::as_str))?);
    }
    Ok(bound)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema(keys: &[&str]) -> ParamSchema {
        keys.iter()
            .map(|k| {
                (
                    k.to_string(),
                    ParamSpec {
                        name: k.to_uppercase(),
                        ty: ParamType::String,
                    },
                )
            })
            .collect()
    }

    #[test]
    fn binds_declared_keys() {
        let mut values = HashMap::new();
        values.insert("apiKey".to_string(), "secret".to_string());
        let bound = bind(&schema(&["apiKey"]), &values).unwrap();
        assert_eq!(bound["apiKey"], Value::String("secret".into()));
    }

    #[test]
    fn missing_key_is_a_bind_error_naming_the_key() {
        let err = bind(&schema(&["apiKey"]), &HashMap::new()).unwrap_err();
        match err {
            EngineError::Bind(msg) => assert!(msg.contains("apiKey")),
            other => panic!("expected bind error, got {other:?}"),
        }
    }

    #[test]
    fn extra_values_are_ignored() {
        let mut values = HashMap::new();
        values.insert("apiKey".to_string(), "secret".to_string());
        values.insert("stray".to_string(), "x".to_string());
        let bound = bind(&schema(&["apiKey"]), &values).unwrap();
        assert_eq!(bound.len(), 1);
        assert!(!bound.contains_key("stray"));
    }

    #[test]
    fn param_type_round_trips_through_serde() {
        let spec: ParamSpec = serde_json::from_str(r#"{"name":"API Key","type":"string"}"#).unwrap();
        assert_eq!(spec.ty, ParamType::String);
        assert!(serde_json::from_str::<ParamSpec>(r#"{"name":"N","type":"number"}"#).is_err());
    }
}
