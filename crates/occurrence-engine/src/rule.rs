//! Stored rule representation and its string encoding.
//!
//! A rule is a kind name plus a parameter tuple. Items keep their rules as an
//! ordered JSON array of `{"rule": <kind>, "#": [<params>...]}` objects; the
//! order matters because exception rules only act on occurrences produced by
//! the rules preceding them.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::EngineError;

/// Whether a rule's wall-clock components are read on the local clock or on
/// the UTC clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimeStandard {
    #[serde(rename = "local")]
    Local,
    #[serde(rename = "UTC")]
    Utc,
}

impl TimeStandard {
    pub const ALL: [TimeStandard; 2] = [TimeStandard::Local, TimeStandard::Utc];

    /// The suffix appended to family names to form kind names.
    pub fn suffix(&self) -> &'static str {
        match self {
            TimeStandard::Local => "local",
            TimeStandard::Utc => "UTC",
        }
    }
}

/// An encoded rule, as stored with its item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    #[serde(rename = "rule")]
    pub kind: String,
    #[serde(rename = "#")]
    pub params: Value,
}

impl Rule {
    pub fn new(kind: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            kind: kind.into(),
            params: Value::Array(params),
        }
    }

    /// Decode the parameter tuple into `T` (typically a tuple type).
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, EngineError> {
        T::deserialize(&self.params).map_err(|e| {
            EngineError::BadRule(format!("cannot decode '{}' parameters: {}", self.kind, e))
        })
    }
}

/// Serialize an item's rule list.
pub fn rules_to_string(rules: &[Rule]) -> Result<String, EngineError> {
    Ok(serde_json::to_string(rules)?)
}

/// Parse an item's rule list. An empty string is an empty list.
pub fn string_to_rules(s: &str) -> Result<Vec<Rule>, EngineError> {
    if s.trim().is_empty() {
        return Ok(Vec::new());
    }
    Ok(serde_json::from_str(s)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_rules_string_format() {
        let rules = vec![Rule::new(
            "occur_every_day_local",
            vec![json!(9), json!(0), json!(3600), Value::Null, json!(3600), json!({})],
        )];
        let s = rules_to_string(&rules).unwrap();
        assert_eq!(
            s,
            r##"[{"rule":"occur_every_day_local","#":[9,0,3600,null,3600,{}]}]"##
        );
        assert_eq!(string_to_rules(&s).unwrap(), rules);
    }

    #[test]
    fn test_empty_string_is_no_rules() {
        assert!(string_to_rules("").unwrap().is_empty());
        assert!(string_to_rules("[]").unwrap().is_empty());
    }

    #[test]
    fn test_malformed_string_is_serialization_error() {
        let err = string_to_rules("[{").unwrap_err();
        assert!(matches!(err, EngineError::Serialization(_)));
    }

    #[test]
    fn test_decode_reports_kind() {
        let rule = Rule::new("occur_once_UTC", vec![json!("x")]);
        let err = rule.decode::<(i64,)>().unwrap_err().to_string();
        assert!(err.contains("occur_once_UTC"), "got: {err}");
    }
}
