// -------------------------------------------------------------------------------------------------
//  Copyright (C) 2025 Crossbar contributors. All rights reserved.
//
//  Licensed under the MIT License (the "License");
//  You may not use this file except in compliance with the License.
//  You may obtain a copy of the License at https://opensource.org/licenses/MIT
//
//  Unless required by applicable law or agreed to in writing, software
//  distributed under the License is distributed on an "AS IS" BASIS,
//  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
//  See the License for the specific language governing permissions and
//  limitations under the License.
// -------------------------------------------------------------------------------------------------

//! Per-call header normalization and validation.
//!
//! Headers are assembled from three merged sources with right-biased
//! overwrite: the route's registration defaults, the caller's meta-flags,
//! and dispatch-time additions. The result is a canonical typed record; any
//! schema violation surfaces as `INVALID_HEADERS`.

use crossbar_core::CallId;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{errors::CrossbarError, pattern::Pattern};

/// The reserved notify target selecting the in-process emitter.
pub const LOCAL_EMITTER: &str = "local";

/// The canonical per-call header record.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Headers {
    /// The correlation id, generated when the caller supplies none.
    pub id: String,
    /// The per-call deadline in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    /// The slow-call warning threshold in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slow: Option<u64>,
    /// Restricts lookup to locally registered routes.
    pub local: bool,
    /// Fire-and-forget for local handlers.
    pub nowait: bool,
    /// Subscriber transports to fan the completed event out to.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub notify: Vec<String>,
    /// Attaches trace annotations to the result.
    pub debug: bool,
    /// Handler-settable flag short-circuiting the remaining chain steps.
    #[serde(rename = "break")]
    pub break_: bool,
    /// The matched registration pattern.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pattern: Option<Pattern>,
    /// The original request message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<Map<String, Value>>,
    /// Unrecognized meta keys, preserved verbatim.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Headers {
    /// Builds a validated header record from the three merged sources.
    ///
    /// `add_headers` are the route's registration defaults, `act_headers`
    /// the caller's meta-flags; the matched pattern and source message are
    /// injected as dispatch-time additions.
    ///
    /// # Errors
    ///
    /// Returns [`CrossbarError::InvalidHeaders`] when a field violates the
    /// meta-flag schema.
    pub fn normalize(
        add_headers: &Map<String, Value>,
        act_headers: &Map<String, Value>,
        source: &Map<String, Value>,
        matched: &Pattern,
    ) -> Result<Self, CrossbarError> {
        let mut merged = add_headers.clone();
        deep_merge_map(&mut merged, act_headers);

        let mut headers = Self {
            pattern: Some(matched.clone()),
            source: Some(source.clone()),
            ..Default::default()
        };

        for (key, value) in &merged {
            match key.as_str() {
                "id" => headers.id = coerce_id(value)?,
                "timeout" => headers.timeout = Some(coerce_millis(value, "timeout")?),
                "slow" => headers.slow = Some(coerce_millis(value, "slow")?),
                "local" => headers.local = coerce_bool(value, "local")?,
                "nowait" => headers.nowait = coerce_bool(value, "nowait")?,
                "debug" => headers.debug = coerce_bool(value, "debug")?,
                "break" => headers.break_ = coerce_bool(value, "break")?,
                "notify" => headers.notify = coerce_notify(value)?,
                "pattern" | "source" => {
                    // Dispatch-time injections always win over caller input
                }
                _ => {
                    headers.extra.insert(key.clone(), value.clone());
                }
            }
        }

        if headers.id.is_empty() {
            headers.id = CallId::new().to_string();
        }

        Ok(headers)
    }
}

fn invalid(reason: impl Into<String>) -> CrossbarError {
    CrossbarError::InvalidHeaders {
        reason: reason.into(),
    }
}

fn coerce_id(value: &Value) -> Result<String, CrossbarError> {
    match value {
        Value::String(s) if !s.is_empty() => Ok(s.clone()),
        other => Err(invalid(format!(
            "'id' must be a non-empty string, was {other}"
        ))),
    }
}

fn coerce_millis(value: &Value, field: &str) -> Result<u64, CrossbarError> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .ok_or_else(|| invalid(format!("'{field}' must be non-negative milliseconds"))),
        Value::String(s) => s
            .trim()
            .parse::<u64>()
            .map_err(|_| invalid(format!("'{field}' must be milliseconds, was '{s}'"))),
        other => Err(invalid(format!("'{field}' must be a number, was {other}"))),
    }
}

fn coerce_bool(value: &Value, field: &str) -> Result<bool, CrossbarError> {
    match value {
        Value::Bool(b) => Ok(*b),
        Value::String(s) if s == "true" => Ok(true),
        Value::String(s) if s == "false" => Ok(false),
        other => Err(invalid(format!("'{field}' must be a boolean, was {other}"))),
    }
}

fn is_regex_literal(s: &str) -> bool {
    s.len() >= 2 && s.starts_with('/') && s.ends_with('/')
}

fn coerce_notify(value: &Value) -> Result<Vec<String>, CrossbarError> {
    let list = match value {
        Value::Bool(false) => return Ok(Vec::new()),
        Value::Bool(true) => vec![LOCAL_EMITTER.to_string()],
        Value::String(s) if s == "true" || is_regex_literal(s) => {
            vec![LOCAL_EMITTER.to_string()]
        }
        Value::String(s) => s
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(ToString::to_string)
            .collect(),
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::String(s) => Ok(s.clone()),
                other => Err(invalid(format!(
                    "'notify' entries must be strings, was {other}"
                ))),
            })
            .collect::<Result<Vec<_>, _>>()?,
        other => {
            return Err(invalid(format!(
                "'notify' must be a boolean, string, or list, was {other}"
            )));
        }
    };

    if list.is_empty() {
        return Err(invalid("'notify' must name at least one transport"));
    }
    let mut seen = ahash::AHashSet::new();
    for name in &list {
        if !seen.insert(name.as_str()) {
            return Err(invalid(format!("'notify' contained duplicate '{name}'")));
        }
    }
    Ok(list)
}

/// Returns whether a raw meta value is truthy (`true` or `"true"`).
#[must_use]
pub(crate) fn is_truthy(value: &Value) -> bool {
    matches!(value, Value::Bool(true)) || matches!(value, Value::String(s) if s == "true")
}

/// Deep-merges `overlay` into `base` with right-biased overwrite.
///
/// Nested objects merge recursively; any other collision replaces the base
/// value.
pub(crate) fn deep_merge_map(base: &mut Map<String, Value>, overlay: &Map<String, Value>) {
    for (key, value) in overlay {
        match (base.get_mut(key), value) {
            (Some(Value::Object(base_inner)), Value::Object(overlay_inner)) => {
                deep_merge_map(base_inner, overlay_inner);
            }
            _ => {
                base.insert(key.clone(), value.clone());
            }
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Tests
////////////////////////////////////////////////////////////////////////////////
#[cfg(test)]
mod tests {
    use rstest::rstest;
    use serde_json::json;

    use super::*;

    fn obj(value: Value) -> Map<String, Value> {
        value.as_object().unwrap().clone()
    }

    fn normalize(add: Value, act: Value) -> Result<Headers, CrossbarError> {
        let pattern = Pattern::parse("role:math").unwrap();
        let source = obj(json!({"role": "math", "a": 2}));
        Headers::normalize(&obj(add), &obj(act), &source, &pattern)
    }

    #[rstest]
    fn test_generates_id_when_absent() {
        let headers = normalize(json!({}), json!({})).unwrap();
        assert_eq!(headers.id.len(), 10);
        assert!(
            headers
                .id
                .bytes()
                .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit())
        );
    }

    #[rstest]
    fn test_caller_id_is_kept() {
        let headers = normalize(json!({}), json!({"id": "my-id"})).unwrap();
        assert_eq!(headers.id, "my-id");
    }

    #[rstest]
    fn test_act_overrides_add() {
        let headers = normalize(json!({"timeout": 100}), json!({"timeout": 250})).unwrap();
        assert_eq!(headers.timeout, Some(250));
    }

    #[rstest]
    fn test_add_defaults_apply() {
        let headers = normalize(json!({"timeout": 100, "slow": 50}), json!({})).unwrap();
        assert_eq!(headers.timeout, Some(100));
        assert_eq!(headers.slow, Some(50));
    }

    #[rstest]
    fn test_numeric_strings_accepted() {
        // Registration meta arrives as pattern-string values
        let headers = normalize(json!({"timeout": "200"}), json!({})).unwrap();
        assert_eq!(headers.timeout, Some(200));
    }

    #[rstest]
    fn test_pattern_and_source_injected() {
        let headers = normalize(json!({}), json!({})).unwrap();
        assert_eq!(headers.pattern.unwrap().to_string(), "role:math");
        assert_eq!(headers.source.unwrap().get("a"), Some(&json!(2)));
    }

    #[rstest]
    #[case(json!(true))]
    #[case(json!("true"))]
    #[case(json!("/.*/"))]
    fn test_notify_coerces_to_local(#[case] input: Value) {
        let headers = normalize(json!({}), json!({"notify": input})).unwrap();
        assert_eq!(headers.notify, vec![LOCAL_EMITTER.to_string()]);
    }

    #[rstest]
    fn test_notify_comma_string() {
        let headers = normalize(json!({}), json!({"notify": "a, b"})).unwrap();
        assert_eq!(headers.notify, vec!["a".to_string(), "b".to_string()]);
    }

    #[rstest]
    fn test_notify_list_unchanged() {
        let headers = normalize(json!({}), json!({"notify": ["amqp", "local"]})).unwrap();
        assert_eq!(
            headers.notify,
            vec!["amqp".to_string(), "local".to_string()]
        );
    }

    #[rstest]
    #[case(json!([]))]
    #[case(json!(" , "))]
    #[case(json!(["a", "a"]))]
    #[case(json!([1, 2]))]
    #[case(json!(42))]
    fn test_notify_invalid(#[case] input: Value) {
        let result = normalize(json!({}), json!({"notify": input}));
        assert!(matches!(
            result,
            Err(CrossbarError::InvalidHeaders { .. })
        ));
    }

    #[rstest]
    #[case(json!({"timeout": "abc"}))]
    #[case(json!({"timeout": -5}))]
    #[case(json!({"slow": 1.5}))]
    #[case(json!({"nowait": "yes"}))]
    #[case(json!({"local": 1}))]
    #[case(json!({"id": ""}))]
    #[case(json!({"id": 42}))]
    fn test_schema_violations(#[case] act: Value) {
        let result = normalize(json!({}), act);
        assert!(matches!(
            result,
            Err(CrossbarError::InvalidHeaders { .. })
        ));
    }

    #[rstest]
    fn test_bool_flags() {
        let headers = normalize(
            json!({}),
            json!({"local": true, "nowait": "true", "debug": true, "break": false}),
        )
        .unwrap();
        assert!(headers.local);
        assert!(headers.nowait);
        assert!(headers.debug);
        assert!(!headers.break_);
    }

    #[rstest]
    fn test_extra_keys_preserved() {
        let headers = normalize(json!({}), json!({"trace-state": "abc"})).unwrap();
        assert_eq!(headers.extra.get("trace-state"), Some(&json!("abc")));
    }

    #[rstest]
    fn test_deep_merge_nested_objects() {
        let mut base = obj(json!({"ctx": {"a": 1, "b": 2}, "x": 1}));
        let overlay = obj(json!({"ctx": {"b": 3, "c": 4}}));
        deep_merge_map(&mut base, &overlay);
        assert_eq!(
            Value::Object(base),
            json!({"ctx": {"a": 1, "b": 3, "c": 4}, "x": 1})
        );
    }
}
