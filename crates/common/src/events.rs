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

//! The process-wide event bus and notification fan-out.
//!
//! Completed calls fan out to their subscriber transports and, under the
//! reserved name `local`, to an in-process publish/subscribe hub keyed by
//! dotted routing keys derived from the matched pattern. Fan-out runs
//! detached from the caller's future; delivery failures are logged, never
//! propagated.
//!
//! Subscription topics may contain wildcards:
//!  - `*` and `#` match any number of characters including zero.
//!  - `?` matches a single character once.

use std::sync::{Arc, OnceLock, RwLock};

use serde_json::Value;
use ustr::Ustr;
use uuid::Uuid;

use crate::{
    headers::{Headers, LOCAL_EMITTER},
    pattern::{Pattern, PatternValue, is_meta_key},
    transport::TransportRegistry,
};

/// The wildcard token substituted for wildcard values in routing keys.
pub const DEFAULT_WILDCARD: &str = "*";

/// The wildcard token used for local emitter topics.
pub const LOCAL_WILDCARD: &str = "#";

/// A handle identifying one event subscription.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Uuid);

type EventCallback = Arc<dyn Fn(&str, &Value, &Headers) + Send + Sync>;

struct EventSubscription {
    id: SubscriptionId,
    pattern: Ustr,
    callback: EventCallback,
}

/// A process-wide publish/subscribe hub keyed by dotted routing keys.
#[derive(Default)]
pub struct EventBus {
    subscriptions: RwLock<Vec<EventSubscription>>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct(stringify!(EventBus))
            .field("subscriptions", &self.topics())
            .finish()
    }
}

impl EventBus {
    /// Creates a new empty [`EventBus`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes `callback` to every topic matching `pattern`.
    pub fn subscribe<F>(&self, pattern: &str, callback: F) -> SubscriptionId
    where
        F: Fn(&str, &Value, &Headers) + Send + Sync + 'static,
    {
        let id = SubscriptionId(Uuid::new_v4());
        log::debug!("Subscribing to events '{pattern}'");
        self.subscriptions
            .write()
            .expect("event bus lock poisoned")
            .push(EventSubscription {
                id,
                pattern: Ustr::from(pattern),
                callback: Arc::new(callback),
            });
        id
    }

    /// Removes the subscription with `id`, returning whether it existed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscriptions = self.subscriptions.write().expect("event bus lock poisoned");
        let before = subscriptions.len();
        subscriptions.retain(|s| s.id != id);
        before != subscriptions.len()
    }

    /// Emits an event on `topic` to every matching subscriber.
    pub fn emit(&self, topic: &str, message: &Value, headers: &Headers) {
        let matching: Vec<EventCallback> = {
            let subscriptions = self.subscriptions.read().expect("event bus lock poisoned");
            subscriptions
                .iter()
                .filter(|s| is_matching(topic.as_bytes(), s.pattern.as_bytes()))
                .map(|s| Arc::clone(&s.callback))
                .collect()
        };

        log::trace!("Emitting '{topic}' to {} subscribers", matching.len());
        for callback in matching {
            callback(topic, message, headers);
        }
    }

    /// Returns the subscribed topic patterns.
    #[must_use]
    pub fn topics(&self) -> Vec<String> {
        self.subscriptions
            .read()
            .expect("event bus lock poisoned")
            .iter()
            .map(|s| s.pattern.to_string())
            .collect()
    }
}

static EVENT_BUS: OnceLock<EventBus> = OnceLock::new();

/// Returns the process-wide [`EventBus`].
pub fn bus() -> &'static EventBus {
    EVENT_BUS.get_or_init(EventBus::default)
}

/// Subscribes `callback` on the process-wide bus.
pub fn subscribe<F>(pattern: &str, callback: F) -> SubscriptionId
where
    F: Fn(&str, &Value, &Headers) + Send + Sync + 'static,
{
    bus().subscribe(pattern, callback)
}

/// Removes a subscription from the process-wide bus.
pub fn unsubscribe(id: SubscriptionId) -> bool {
    bus().unsubscribe(id)
}

/// Emits an event on the process-wide bus.
pub fn emit(topic: &str, message: &Value, headers: &Headers) {
    bus().emit(topic, message, headers);
}

/// Derives the dotted routing key for `pattern`.
///
/// Non-meta keys sort lexicographically; each contributes a `key.value`
/// segment, with wildcard values rendered as the `wildcard` token.
#[must_use]
pub fn routing_key(pattern: &Pattern, wildcard: &str) -> String {
    let mut keys: Vec<(&str, &PatternValue)> = pattern
        .iter()
        .filter(|(k, _)| !is_meta_key(k))
        .map(|(k, v)| (k.as_str(), v))
        .collect();
    keys.sort_by_key(|(k, _)| *k);

    let mut segments = Vec::with_capacity(keys.len());
    for (key, value) in keys {
        let value = match value {
            PatternValue::Text(s) => s.as_str().to_string(),
            PatternValue::Wildcard(_) => wildcard.to_string(),
        };
        segments.push(format!("{key}.{value}"));
    }
    segments.join(".")
}

/// Match a topic against a subscription pattern using iterative backtracking.
///
/// The pattern can contain:
/// - `*` or `#` - match zero or more characters
/// - `?` - match any single character once
/// - any other byte - match that byte exactly
#[must_use]
pub fn is_matching(topic: &[u8], pattern: &[u8]) -> bool {
    // Stack of (topic_idx, pattern_idx) states for backtracking
    let mut stack = vec![(0, 0)];

    while let Some((mut i, mut j)) = stack.pop() {
        loop {
            if i == topic.len() && j == pattern.len() {
                return true;
            }

            if j == pattern.len() {
                break;
            }

            if pattern[j] == b'*' || pattern[j] == b'#' {
                // Try skipping the wildcard entirely first
                stack.push((i, j + 1));

                if i < topic.len() {
                    i += 1;
                    continue;
                }
                break;
            } else if i < topic.len() && (pattern[j] == b'?' || topic[i] == pattern[j]) {
                i += 1;
                j += 1;
                continue;
            }

            break;
        }
    }

    false
}

/// Delivers a completed call's event to its subscriber transports and, for
/// the reserved name `local`, the process-wide bus.
///
/// Delivery failures are logged and never propagated.
pub(crate) async fn fan_out(transports: Arc<TransportRegistry>, message: Value, headers: Headers) {
    for name in &headers.notify {
        if name == LOCAL_EMITTER {
            if let Some(pattern) = &headers.pattern {
                let topic = routing_key(pattern, LOCAL_WILDCARD);
                emit(&topic, &message, &headers);
            }
            continue;
        }

        match transports.get(name) {
            Some(transport) => {
                if let Err(e) = transport.notify(message.clone(), headers.clone()).await {
                    log::error!("Notification to transport '{name}' failed: {e:?}");
                }
            }
            None => log::warn!("Notification skipped, no transport '{name}' registered"),
        }
    }
}

/// Spawns the fan-out detached from the caller's future.
pub(crate) fn spawn_fan_out(
    transports: Arc<TransportRegistry>,
    message: Value,
    headers: Headers,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(fan_out(transports, message, headers))
}
