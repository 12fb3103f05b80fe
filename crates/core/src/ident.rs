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

//! A `CallId` correlation identifier for request/response tracking.

use std::{
    fmt::{Debug, Display, Formatter},
    hash::Hash,
    str::FromStr,
};

use rand::RngExt;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// The exact length of a `CallId` string value.
pub(crate) const CALL_ID_LEN: usize = 10;

const CALL_ID_CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Represents a per-call correlation identifier.
///
/// A `CallId` is a 10-character random string over the lowercase-alphanumeric
/// alphabet, stored as a fixed-length byte array.
#[repr(C)]
#[derive(Copy, Clone, Hash, PartialEq, Eq)]
pub struct CallId {
    pub(crate) value: [u8; CALL_ID_LEN],
}

impl CallId {
    /// Creates a new random [`CallId`] instance.
    #[must_use]
    pub fn new() -> Self {
        let mut rng = rand::rng();
        let mut value = [0u8; CALL_ID_LEN];
        for b in &mut value {
            *b = CALL_ID_CHARSET[rng.random_range(0..CALL_ID_CHARSET.len())];
        }
        Self { value }
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        // Construction only ever writes ASCII from the charset
        std::str::from_utf8(&self.value).expect("CallId bytes should be valid ASCII")
    }
}

impl FromStr for CallId {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != CALL_ID_LEN {
            anyhow::bail!("invalid CallId length {}, expected {CALL_ID_LEN}", s.len());
        }
        if !s.bytes().all(|b| CALL_ID_CHARSET.contains(&b)) {
            anyhow::bail!("invalid CallId '{s}', expected lowercase-alphanumeric characters");
        }
        let mut value = [0u8; CALL_ID_LEN];
        value.copy_from_slice(s.as_bytes());
        Ok(Self { value })
    }
}

impl Default for CallId {
    fn default() -> Self {
        Self::new()
    }
}

impl Debug for CallId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}('{}')", stringify!(CallId), self.as_str())
    }
}

impl Display for CallId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Serialize for CallId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for CallId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_str(&s).map_err(serde::de::Error::custom)
    }
}

////////////////////////////////////////////////////////////////////////////////
// Tests
////////////////////////////////////////////////////////////////////////////////
#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use rstest::rstest;

    use super::*;

    #[rstest]
    fn test_new_produces_valid_ids() {
        for _ in 0..100 {
            let id = CallId::new();
            assert_eq!(id.as_str().len(), CALL_ID_LEN);
            assert!(
                id.as_str()
                    .bytes()
                    .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit())
            );
        }
    }

    #[rstest]
    fn test_new_ids_are_distinct() {
        let a = CallId::new();
        let b = CallId::new();
        assert_ne!(a, b);
    }

    #[rstest]
    fn test_from_str_round_trip() {
        let id = CallId::new();
        let parsed = CallId::from_str(id.as_str()).unwrap();
        assert_eq!(id, parsed);
    }

    #[rstest]
    #[case("short")]
    #[case("UPPERCASE1")]
    #[case("with space")]
    #[case("elevenchars")]
    fn test_from_str_rejects_invalid(#[case] s: &str) {
        assert!(CallId::from_str(s).is_err());
    }

    #[rstest]
    fn test_serde_round_trip() {
        let id = CallId::new();
        let json = serde_json::to_string(&id).unwrap();
        let back: CallId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, back);
    }

    #[rstest]
    fn test_debug_and_display() {
        let id = CallId::from_str("abc123xyz0").unwrap();
        assert_eq!(format!("{id}"), "abc123xyz0");
        assert_eq!(format!("{id:?}"), "CallId('abc123xyz0')");
    }
}
