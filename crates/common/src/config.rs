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

//! Construction-time configuration for a dispatcher instance.

use std::{fmt, sync::Arc};

use ahash::AHashSet;

use crate::{errors::error_name, index::MatchOrder, plugin::PluginResolver};

/// The default per-call timeout in milliseconds.
pub const DEFAULT_TIMEOUT_MS: u64 = 500;

/// The verdict of the error classifier for one envelope error.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ErrorVerdict {
    /// Abort the process after logging.
    Fatal,
    /// Swallow the error; the call resolves with a null result.
    Mute,
    /// Re-raise to the caller preserving the cause.
    Propagate,
}

/// Classifies errors raised inside the execution envelope.
///
/// The list form names error kinds that must abort the process; the
/// predicate form decides per error.
#[derive(Clone)]
pub enum Classifier {
    /// Error names that are fatal; anything else propagates.
    Names(AHashSet<String>),
    /// An arbitrary classification function.
    Predicate(Arc<dyn Fn(&anyhow::Error) -> ErrorVerdict + Send + Sync>),
}

impl Classifier {
    /// Creates a list-form classifier from error names.
    pub fn names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Names(names.into_iter().map(Into::into).collect())
    }

    /// Creates a predicate-form classifier.
    pub fn predicate<F>(f: F) -> Self
    where
        F: Fn(&anyhow::Error) -> ErrorVerdict + Send + Sync + 'static,
    {
        Self::Predicate(Arc::new(f))
    }

    /// Returns the verdict for `error`.
    #[must_use]
    pub fn classify(&self, error: &anyhow::Error) -> ErrorVerdict {
        match self {
            Self::Names(names) => {
                if names.contains(error_name(error)) {
                    ErrorVerdict::Fatal
                } else {
                    ErrorVerdict::Propagate
                }
            }
            Self::Predicate(f) => f(error),
        }
    }
}

impl Default for Classifier {
    /// A panicking handler is a programmer error and aborts the process.
    fn default() -> Self {
        Self::names(["HandlerPanic"])
    }
}

impl fmt::Debug for Classifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Names(names) => f.debug_tuple("Names").field(names).finish(),
            Self::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}

/// Construction-time options for a [`Crossbar`](crate::dispatcher::Crossbar)
/// instance.
#[derive(Clone)]
pub struct CrossbarConfig {
    /// The policy choosing among multiple matching routes.
    pub match_order: MatchOrder,
    /// The default per-call timeout in milliseconds; zero disables it.
    pub timeout: u64,
    /// Attaches trace annotations to all results.
    pub debug: bool,
    /// The instance-wide slow-call warning threshold in milliseconds.
    pub slow_pattern_timeout: Option<u64>,
    /// The envelope error classifier.
    pub terminate_on: Classifier,
    /// Rejects registration of exactly-equal duplicate patterns.
    pub forbid_same_route_names: bool,
    /// Resolves string plugin locators.
    pub plugin_resolver: Option<Arc<dyn PluginResolver>>,
}

impl CrossbarConfig {
    /// Creates a configuration with the standard defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Default for CrossbarConfig {
    fn default() -> Self {
        Self {
            match_order: MatchOrder::default(),
            timeout: DEFAULT_TIMEOUT_MS,
            debug: false,
            slow_pattern_timeout: None,
            terminate_on: Classifier::default(),
            forbid_same_route_names: false,
            plugin_resolver: None,
        }
    }
}

impl fmt::Debug for CrossbarConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(stringify!(CrossbarConfig))
            .field("match_order", &self.match_order)
            .field("timeout", &self.timeout)
            .field("debug", &self.debug)
            .field("slow_pattern_timeout", &self.slow_pattern_timeout)
            .field("terminate_on", &self.terminate_on)
            .field("forbid_same_route_names", &self.forbid_same_route_names)
            .field(
                "plugin_resolver",
                &self.plugin_resolver.as_ref().map(|_| ".."),
            )
            .finish()
    }
}

////////////////////////////////////////////////////////////////////////////////
// Tests
////////////////////////////////////////////////////////////////////////////////
#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::errors::HandlerPanic;

    #[rstest]
    fn test_default_config() {
        let config = CrossbarConfig::default();
        assert_eq!(config.match_order, MatchOrder::Depth);
        assert_eq!(config.timeout, DEFAULT_TIMEOUT_MS);
        assert!(!config.debug);
        assert!(config.slow_pattern_timeout.is_none());
        assert!(!config.forbid_same_route_names);
    }

    #[rstest]
    fn test_default_classifier_aborts_on_panic() {
        let classifier = Classifier::default();
        let panic = anyhow::Error::new(HandlerPanic("boom".to_string()));
        assert_eq!(classifier.classify(&panic), ErrorVerdict::Fatal);

        let plain = anyhow::anyhow!("plain failure");
        assert_eq!(classifier.classify(&plain), ErrorVerdict::Propagate);
    }

    #[rstest]
    fn test_names_classifier_matches_codes() {
        let classifier = Classifier::names(["NO_SUCH_TRANSPORT"]);
        let err = anyhow::Error::new(crate::errors::CrossbarError::NoSuchTransport {
            name: "amqp".to_string(),
        });
        assert_eq!(classifier.classify(&err), ErrorVerdict::Fatal);
    }

    #[rstest]
    fn test_predicate_classifier() {
        let classifier = Classifier::predicate(|error| {
            if error.to_string().contains("ignore me") {
                ErrorVerdict::Mute
            } else {
                ErrorVerdict::Propagate
            }
        });

        assert_eq!(
            classifier.classify(&anyhow::anyhow!("please ignore me")),
            ErrorVerdict::Mute
        );
        assert_eq!(
            classifier.classify(&anyhow::anyhow!("surface this")),
            ErrorVerdict::Propagate
        );
    }
}
