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

//! The pattern value model, string grammar parser, and request splitter.
//!
//! A pattern is an unordered mapping of string keys to values used both as a
//! registration key and as a routing query. Ordinary keys match literally;
//! keys whose value is a wildcard only constrain presence; keys beginning
//! with the `$` sigil are meta-flags consumed as headers and never
//! participate in matching.
//!
//! The string grammar is `key[:value]` segments joined by commas. A missing
//! value is the wildcard `/.*/`; a value delimited by `/` on both ends is a
//! regex literal with the slashes stripped; everything else is a literal.

use std::fmt::{self, Display};

use indexmap::IndexMap;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer, de::Error as _};
use serde_json::{Map, Value};
use ustr::Ustr;

/// The sigil prefix marking a meta key.
pub const META_SIGIL: char = '$';

/// Returns whether `key` is a meta key (sigil-prefixed).
#[must_use]
pub fn is_meta_key(key: &str) -> bool {
    key.starts_with(META_SIGIL)
}

/// A single pattern value: a literal string or a presence wildcard.
///
/// Wildcards are never regex-matched against payload values; they only
/// require the key to be present in a query, and render as their regex
/// source during string serialization.
#[derive(Clone, Debug)]
pub enum PatternValue {
    /// Matches a query value by string equality.
    Text(Ustr),
    /// Matches any query value, requiring only key presence.
    Wildcard(Regex),
}

impl PatternValue {
    /// Parses a pattern value from its string form.
    ///
    /// # Errors
    ///
    /// Returns an error if a `/…/` regex literal fails to compile.
    pub fn parse(value: &str) -> anyhow::Result<Self> {
        if value.len() >= 2 && value.starts_with('/') && value.ends_with('/') {
            let source = &value[1..value.len() - 1];
            let regex = Regex::new(source)
                .map_err(|e| anyhow::anyhow!("invalid regex literal '{value}': {e}"))?;
            return Ok(Self::Wildcard(regex));
        }
        Ok(Self::Text(Ustr::from(value)))
    }

    /// Returns the wildcard covering any value (`/.*/`).
    #[must_use]
    pub fn any() -> Self {
        Self::Wildcard(Regex::new(".*").expect("the universal wildcard regex is valid"))
    }

    /// Returns whether this value is a wildcard.
    #[must_use]
    pub const fn is_wildcard(&self) -> bool {
        matches!(self, Self::Wildcard(_))
    }
}

impl Display for PatternValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(s) => write!(f, "{s}"),
            Self::Wildcard(r) => write!(f, "/{}/", r.as_str()),
        }
    }
}

impl PartialEq for PatternValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Text(a), Self::Text(b)) => a == b,
            (Self::Wildcard(a), Self::Wildcard(b)) => a.as_str() == b.as_str(),
            _ => false,
        }
    }
}

impl Eq for PatternValue {}

/// An insertion-ordered mapping from keys to [`PatternValue`]s.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Pattern {
    inner: IndexMap<Ustr, PatternValue>,
}

impl Pattern {
    /// Creates an empty [`Pattern`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a pattern from the `key[:value]` comma grammar.
    ///
    /// # Errors
    ///
    /// Returns an error if a segment has an empty key or an invalid regex
    /// literal value.
    pub fn parse(input: &str) -> anyhow::Result<Self> {
        let mut inner = IndexMap::new();
        for segment in input.split(',') {
            let segment = segment.trim();
            if segment.is_empty() {
                continue;
            }
            let (key, value) = match segment.split_once(':') {
                Some((key, value)) => (key.trim(), Some(value.trim())),
                None => (segment, None),
            };
            if key.is_empty() {
                anyhow::bail!("invalid pattern segment '{segment}', key was empty");
            }
            let value = match value {
                Some(v) => PatternValue::parse(v)?,
                None => PatternValue::any(),
            };
            inner.insert(Ustr::from(key), value);
        }
        Ok(Self { inner })
    }

    /// Builds a pattern from a JSON object.
    ///
    /// String values follow the regex-literal rule of the string grammar;
    /// non-string scalars are stringified; nested structures are kept as
    /// their canonical JSON text.
    ///
    /// # Errors
    ///
    /// Returns an error if a key is empty or a regex literal is invalid.
    pub fn from_json_map(map: &Map<String, Value>) -> anyhow::Result<Self> {
        let mut inner = IndexMap::new();
        for (key, value) in map {
            if key.is_empty() {
                anyhow::bail!("invalid pattern, contained an empty key");
            }
            let value = match value {
                Value::String(s) => PatternValue::parse(s)?,
                other => PatternValue::Text(Ustr::from(value_to_match_string(other).as_str())),
            };
            inner.insert(Ustr::from(key), value);
        }
        Ok(Self { inner })
    }

    /// Returns the value for `key`, if present.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&PatternValue> {
        self.inner.get(&Ustr::from(key))
    }

    /// Inserts a key/value pair, replacing any previous value.
    pub fn insert(&mut self, key: &str, value: PatternValue) {
        self.inner.insert(Ustr::from(key), value);
    }

    /// Iterates over all key/value pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&Ustr, &PatternValue)> {
        self.inner.iter()
    }

    /// Returns the number of keys, including meta keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Returns whether the pattern has no keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Returns the number of non-meta keys, the pattern's match depth.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.inner.keys().filter(|k| !is_meta_key(k)).count()
    }

    /// Returns whether this pattern matches the `query`.
    ///
    /// The pattern matches iff every non-meta key is present in the query
    /// and, for literal values, the query value equals the pattern value as
    /// strings. Wildcard values constrain key presence only. Keys absent
    /// from the pattern impose no constraint.
    #[must_use]
    pub fn matches(&self, query: &Map<String, Value>) -> bool {
        for (key, value) in &self.inner {
            if is_meta_key(key) {
                continue;
            }
            let Some(actual) = query.get(key.as_str()) else {
                return false;
            };
            if let PatternValue::Text(expected) = value
                && value_to_match_string(actual) != expected.as_str()
            {
                return false;
            }
        }
        true
    }

    /// Returns the meta keys as a JSON map with the sigil stripped.
    ///
    /// These are the per-route default headers contributed at registration
    /// time.
    #[must_use]
    pub fn meta_headers(&self) -> Map<String, Value> {
        let mut map = Map::new();
        for (key, value) in &self.inner {
            if let Some(stripped) = key.as_str().strip_prefix(META_SIGIL) {
                let value = match value {
                    PatternValue::Text(s) => Value::String(s.to_string()),
                    PatternValue::Wildcard(_) => Value::String(value.to_string()),
                };
                map.insert(stripped.to_string(), value);
            }
        }
        map
    }
}

impl Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (key, value) in &self.inner {
            if !first {
                write!(f, ", ")?;
            }
            write!(f, "{key}:{value}")?;
            first = false;
        }
        Ok(())
    }
}

impl Serialize for Pattern {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;
        let mut map = serializer.serialize_map(Some(self.inner.len()))?;
        for (key, value) in &self.inner {
            map.serialize_entry(key.as_str(), &value.to_string())?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Pattern {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let map = Map::<String, Value>::deserialize(deserializer)?;
        Self::from_json_map(&map).map_err(D::Error::custom)
    }
}

impl TryFrom<&str> for Pattern {
    type Error = anyhow::Error;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl TryFrom<&Value> for Pattern {
    type Error = anyhow::Error;

    fn try_from(value: &Value) -> Result<Self, Self::Error> {
        match value {
            Value::String(s) => Self::parse(s),
            Value::Object(map) => Self::from_json_map(map),
            other => anyhow::bail!("invalid pattern, expected a string or object, was {other}"),
        }
    }
}

impl TryFrom<Value> for Pattern {
    type Error = anyhow::Error;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        Self::try_from(&value)
    }
}

/// Returns the canonical string used for match comparison of a query value.
#[must_use]
pub fn value_to_match_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// One partial pattern supplied to `act` or the splitter.
#[derive(Clone, Debug)]
pub enum PatternArg {
    /// A pattern in the string grammar.
    Text(String),
    /// A JSON object carrying routing keys and meta-flags.
    Object(Map<String, Value>),
}

impl From<&str> for PatternArg {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for PatternArg {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<Value> for PatternArg {
    fn from(value: Value) -> Self {
        match value {
            Value::String(s) => Self::Text(s),
            Value::Object(map) => Self::Object(map),
            other => Self::Object(Map::from_iter([("value".to_string(), other)])),
        }
    }
}

/// The composite pattern arguments for one `act` invocation.
///
/// Multiple partial patterns merge left-to-right, later parts overwriting
/// earlier ones on key collision.
#[derive(Clone, Debug, Default)]
pub struct ActArgs(pub Vec<PatternArg>);

impl From<PatternArg> for ActArgs {
    fn from(value: PatternArg) -> Self {
        Self(vec![value])
    }
}

impl From<&str> for ActArgs {
    fn from(value: &str) -> Self {
        Self(vec![value.into()])
    }
}

impl From<String> for ActArgs {
    fn from(value: String) -> Self {
        Self(vec![value.into()])
    }
}

impl From<Value> for ActArgs {
    fn from(value: Value) -> Self {
        Self(vec![value.into()])
    }
}

impl From<Vec<PatternArg>> for ActArgs {
    fn from(value: Vec<PatternArg>) -> Self {
        Self(value)
    }
}

impl<A: Into<PatternArg>, B: Into<PatternArg>> From<(A, B)> for ActArgs {
    fn from((a, b): (A, B)) -> Self {
        Self(vec![a.into(), b.into()])
    }
}

impl<A: Into<PatternArg>, B: Into<PatternArg>, C: Into<PatternArg>> From<(A, B, C)> for ActArgs {
    fn from((a, b, c): (A, B, C)) -> Self {
        Self(vec![a.into(), b.into(), c.into()])
    }
}

/// A request split into its message, meta, and raw projections.
#[derive(Clone, Debug, Default)]
pub struct SplitRequest {
    /// The non-meta routing keys and payload fields.
    pub message: Map<String, Value>,
    /// The meta keys with the sigil stripped.
    pub meta: Map<String, Value>,
    /// Every key as supplied, meta keys included.
    pub raw: Map<String, Value>,
}

/// Merges partial patterns left-to-right and splits the result into
/// `(message, meta, raw)` projections.
///
/// # Errors
///
/// Returns an error if a string part fails the pattern grammar.
pub fn split(args: &ActArgs) -> anyhow::Result<SplitRequest> {
    let mut request = SplitRequest::default();
    for arg in &args.0 {
        match arg {
            PatternArg::Text(text) => {
                let pattern = Pattern::parse(text)?;
                for (key, value) in pattern.iter() {
                    split_insert(&mut request, key.as_str(), Value::String(value.to_string()));
                }
            }
            PatternArg::Object(map) => {
                for (key, value) in map {
                    split_insert(&mut request, key, value.clone());
                }
            }
        }
    }
    Ok(request)
}

fn split_insert(request: &mut SplitRequest, key: &str, value: Value) {
    match key.strip_prefix(META_SIGIL) {
        Some(stripped) => {
            request.meta.insert(stripped.to_string(), value.clone());
        }
        None => {
            request.message.insert(key.to_string(), value.clone());
        }
    }
    request.raw.insert(key.to_string(), value);
}

/// Renders a JSON map to the `k1:v1, k2:v2` diagnostic form.
///
/// Nested mappings render as `k:{inner1,inner2}`.
#[must_use]
pub fn beautify(map: &Map<String, Value>) -> String {
    let mut out = String::new();
    for (key, value) in map {
        if !out.is_empty() {
            out.push_str(", ");
        }
        out.push_str(key);
        out.push(':');
        match value {
            Value::String(s) => out.push_str(s),
            Value::Object(inner) => {
                out.push('{');
                out.push_str(&inner.keys().cloned().collect::<Vec<_>>().join(","));
                out.push('}');
            }
            other => out.push_str(&other.to_string()),
        }
    }
    out
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

    #[rstest]
    fn test_parse_literals() {
        let pattern = Pattern::parse("role:math, cmd:sum").unwrap();
        assert_eq!(pattern.len(), 2);
        assert_eq!(
            pattern.get("role"),
            Some(&PatternValue::Text(Ustr::from("math")))
        );
        assert_eq!(
            pattern.get("cmd"),
            Some(&PatternValue::Text(Ustr::from("sum")))
        );
    }

    #[rstest]
    fn test_parse_missing_value_is_wildcard() {
        let pattern = Pattern::parse("role:math, cmd").unwrap();
        let value = pattern.get("cmd").unwrap();
        assert!(value.is_wildcard());
        assert_eq!(value.to_string(), "/.*/");
    }

    #[rstest]
    fn test_parse_regex_literal() {
        let pattern = Pattern::parse("role:/ma.+/").unwrap();
        let value = pattern.get("role").unwrap();
        assert!(value.is_wildcard());
        assert_eq!(value.to_string(), "/ma.+/");
    }

    #[rstest]
    fn test_parse_trims_whitespace() {
        let pattern = Pattern::parse("  role : math ,cmd: sum ").unwrap();
        assert_eq!(
            pattern.get("role"),
            Some(&PatternValue::Text(Ustr::from("math")))
        );
        assert_eq!(
            pattern.get("cmd"),
            Some(&PatternValue::Text(Ustr::from("sum")))
        );
    }

    #[rstest]
    fn test_parse_rejects_empty_key() {
        assert!(Pattern::parse(":value").is_err());
    }

    #[rstest]
    fn test_parse_rejects_invalid_regex() {
        assert!(Pattern::parse("role:/[/").is_err());
    }

    #[rstest]
    fn test_matches_subset() {
        let pattern = Pattern::parse("role:math").unwrap();
        let query = obj(json!({"role": "math", "cmd": "sum", "a": 2}));
        assert!(pattern.matches(&query));
    }

    #[rstest]
    fn test_matches_stringifies_scalars() {
        let pattern = Pattern::parse("version:2").unwrap();
        let query = obj(json!({"version": 2}));
        assert!(pattern.matches(&query));
    }

    #[rstest]
    fn test_matches_requires_key_presence() {
        let pattern = Pattern::parse("role:math, cmd").unwrap();
        assert!(pattern.matches(&obj(json!({"role": "math", "cmd": "anything"}))));
        assert!(!pattern.matches(&obj(json!({"role": "math"}))));
    }

    #[rstest]
    fn test_matches_ignores_meta_keys() {
        let pattern = Pattern::parse("role:math, $timeout:200").unwrap();
        assert!(pattern.matches(&obj(json!({"role": "math"}))));
    }

    #[rstest]
    fn test_meta_headers_strips_sigil() {
        let pattern = Pattern::parse("role:math, $timeout:200, $slow:50").unwrap();
        let headers = pattern.meta_headers();
        assert_eq!(headers.get("timeout"), Some(&json!("200")));
        assert_eq!(headers.get("slow"), Some(&json!("50")));
        assert!(!headers.contains_key("role"));
    }

    #[rstest]
    fn test_depth_excludes_meta() {
        let pattern = Pattern::parse("role:math, cmd:sum, $local:true").unwrap();
        assert_eq!(pattern.depth(), 2);
        assert_eq!(pattern.len(), 3);
    }

    #[rstest]
    fn test_split_merges_later_wins() {
        let args = ActArgs::from((json!({"role": "a", "x": 1}), json!({"x": 2, "y": 3})));
        let request = split(&args).unwrap();
        assert_eq!(request.message.get("x"), Some(&json!(2)));
        assert_eq!(request.message.get("y"), Some(&json!(3)));
        assert_eq!(request.message.get("role"), Some(&json!("a")));
    }

    #[rstest]
    fn test_split_separates_meta() {
        let args = ActArgs::from(json!({"role": "a", "$timeout": 100, "$nowait": true}));
        let request = split(&args).unwrap();
        assert_eq!(request.message.len(), 1);
        assert_eq!(request.meta.get("timeout"), Some(&json!(100)));
        assert_eq!(request.meta.get("nowait"), Some(&json!(true)));
        assert!(request.raw.contains_key("$timeout"));
        assert!(request.raw.contains_key("role"));
    }

    #[rstest]
    fn test_split_accepts_string_parts() {
        let args = ActArgs::from(("role:math, cmd:sum", json!({"a": 2, "b": 3})));
        let request = split(&args).unwrap();
        assert_eq!(request.message.get("role"), Some(&json!("math")));
        assert_eq!(request.message.get("a"), Some(&json!(2)));
    }

    #[rstest]
    fn test_beautify_plain() {
        let map = obj(json!({"role": "math", "version": 2}));
        assert_eq!(beautify(&map), "role:math, version:2");
    }

    #[rstest]
    fn test_beautify_nested() {
        let map = obj(json!({"role": "math", "payload": {"a": 1, "b": 2}}));
        assert_eq!(beautify(&map), "payload:{a,b}, role:math");
    }

    #[rstest]
    fn test_parse_recovers_beautified_fields() {
        let map = obj(json!({"cmd": "sum", "role": "math"}));
        let rendered = beautify(&map);
        let parsed = Pattern::parse(&rendered).unwrap();
        assert_eq!(
            parsed.get("cmd"),
            Some(&PatternValue::Text(Ustr::from("sum")))
        );
        assert_eq!(
            parsed.get("role"),
            Some(&PatternValue::Text(Ustr::from("math")))
        );
    }

    #[rstest]
    fn test_pattern_display_round_trip() {
        let pattern = Pattern::parse("role:math, cmd").unwrap();
        assert_eq!(pattern.to_string(), "role:math, cmd:/.*/");
        let reparsed = Pattern::parse(&pattern.to_string()).unwrap();
        assert_eq!(pattern, reparsed);
    }

    #[rstest]
    fn test_pattern_serde() {
        let pattern = Pattern::parse("role:math, cmd:/.*/").unwrap();
        let json = serde_json::to_value(&pattern).unwrap();
        assert_eq!(json, json!({"role": "math", "cmd": "/.*/"}));
        let back: Pattern = serde_json::from_value(json).unwrap();
        assert_eq!(pattern, back);
    }
}
