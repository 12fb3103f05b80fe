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

//! The transport contract and named transport registry.
//!
//! A transport is a named external collaborator that can `send` a
//! request/response call and `notify` subscribers without awaiting a reply.
//! Lifecycle hooks are optional; the registry drives them across all
//! transports in parallel.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use crossbar_core::correctness::check_valid_name;
use futures::future::join_all;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use ustr::Ustr;

use crate::{errors::CrossbarError, headers::Headers};

/// Construction-time options a transport declares to the dispatcher.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportOptions {
    /// A per-call deadline in milliseconds, adopted when the caller sets none.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
}

/// A named external collaborator performing remote calls and notifications.
#[async_trait]
pub trait Transport: Send + Sync {
    /// The unique registry name for this transport.
    fn name(&self) -> &str;

    /// The options this transport declares to the dispatcher.
    fn options(&self) -> TransportOptions {
        TransportOptions::default()
    }

    /// Performs a request/response call.
    ///
    /// # Errors
    ///
    /// Returns an error when the call cannot be delivered or the peer fails.
    async fn send(&self, message: Value, headers: Headers) -> anyhow::Result<Value>;

    /// Delivers an event without awaiting a reply.
    ///
    /// # Errors
    ///
    /// Returns an error when delivery fails; fan-out logs and swallows it.
    async fn notify(&self, message: Value, headers: Headers) -> anyhow::Result<()>;

    /// Establishes outbound connectivity.
    ///
    /// # Errors
    ///
    /// Returns an error when connectivity cannot be established.
    async fn connect(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Starts accepting inbound traffic.
    ///
    /// # Errors
    ///
    /// Returns an error when the transport cannot start listening.
    async fn listen(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Tears down outbound connectivity.
    ///
    /// # Errors
    ///
    /// Returns an error when teardown fails.
    async fn disconnect(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Stops accepting inbound traffic and releases resources.
    ///
    /// # Errors
    ///
    /// Returns an error when shutdown fails.
    async fn close(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// The four lifecycle entry points driven across all transports.
#[derive(Copy, Clone, Debug, PartialEq, Eq, strum::Display, strum::EnumString, strum::AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum LifecycleHook {
    Connect,
    Listen,
    Disconnect,
    Close,
}

/// A named store of transports with parallel lifecycle driving.
#[derive(Default)]
pub struct TransportRegistry {
    inner: RwLock<IndexMap<Ustr, Arc<dyn Transport>>>,
}

impl std::fmt::Debug for TransportRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct(stringify!(TransportRegistry))
            .field("names", &self.names())
            .finish()
    }
}

impl TransportRegistry {
    /// Creates a new empty [`TransportRegistry`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `transport` under its declared name.
    ///
    /// # Errors
    ///
    /// Returns [`CrossbarError::DuplicateTransport`] when the name is
    /// already registered, or [`CrossbarError::InvalidPlugin`] when the
    /// transport declares an empty name.
    pub fn register(&self, transport: Arc<dyn Transport>) -> Result<(), CrossbarError> {
        let name = transport.name();
        if let Err(e) = check_valid_name(name, "transport.name") {
            return Err(CrossbarError::InvalidPlugin {
                reason: e.to_string(),
            });
        }
        let name = Ustr::from(name);

        let mut inner = self.inner.write().expect("transport registry lock poisoned");
        if inner.contains_key(&name) {
            return Err(CrossbarError::DuplicateTransport {
                name: name.to_string(),
            });
        }
        log::debug!("Registering transport '{name}'");
        inner.insert(name, transport);
        Ok(())
    }

    /// Returns the transport registered under `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn Transport>> {
        self.inner
            .read()
            .expect("transport registry lock poisoned")
            .get(&Ustr::from(name))
            .cloned()
    }

    /// Returns the registered transport names in registration order.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.inner
            .read()
            .expect("transport registry lock poisoned")
            .keys()
            .map(ToString::to_string)
            .collect()
    }

    /// Invokes `hook` on every registered transport in parallel.
    ///
    /// All hooks run to completion; the first failure is then re-raised,
    /// with the remaining failures logged.
    ///
    /// # Errors
    ///
    /// Returns the first hook failure after all hooks have completed.
    pub async fn run_lifecycle(&self, hook: LifecycleHook) -> anyhow::Result<()> {
        let snapshot: Vec<(Ustr, Arc<dyn Transport>)> = {
            let inner = self.inner.read().expect("transport registry lock poisoned");
            inner.iter().map(|(k, v)| (*k, Arc::clone(v))).collect()
        };

        let futures = snapshot.into_iter().map(|(name, transport)| async move {
            let result = match hook {
                LifecycleHook::Connect => transport.connect().await,
                LifecycleHook::Listen => transport.listen().await,
                LifecycleHook::Disconnect => transport.disconnect().await,
                LifecycleHook::Close => transport.close().await,
            };
            (name, result)
        });

        let mut first_failure = None;
        for (name, result) in join_all(futures).await {
            if let Err(e) = result {
                log::error!("Transport '{name}' {hook} failed: {e:?}");
                if first_failure.is_none() {
                    first_failure = Some(e.context(format!("transport '{name}' {hook} failed")));
                }
            }
        }

        match first_failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Tests
////////////////////////////////////////////////////////////////////////////////
#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::stubs::MemoryTransport;

    #[rstest]
    fn test_register_and_get() {
        let registry = TransportRegistry::new();
        registry
            .register(Arc::new(MemoryTransport::new("amqp")))
            .unwrap();

        assert!(registry.get("amqp").is_some());
        assert!(registry.get("http").is_none());
        assert_eq!(registry.names(), vec!["amqp".to_string()]);
    }

    #[rstest]
    fn test_register_duplicate_name() {
        let registry = TransportRegistry::new();
        registry
            .register(Arc::new(MemoryTransport::new("amqp")))
            .unwrap();

        let result = registry.register(Arc::new(MemoryTransport::new("amqp")));
        assert!(matches!(
            result,
            Err(CrossbarError::DuplicateTransport { .. })
        ));
    }

    #[rstest]
    fn test_register_empty_name() {
        let registry = TransportRegistry::new();
        let result = registry.register(Arc::new(MemoryTransport::new("")));
        assert!(matches!(result, Err(CrossbarError::InvalidPlugin { .. })));
    }

    #[rstest]
    #[tokio::test]
    async fn test_lifecycle_runs_every_transport() {
        let registry = TransportRegistry::new();
        let a = Arc::new(MemoryTransport::new("a"));
        let b = Arc::new(MemoryTransport::new("b"));
        registry.register(a.clone()).unwrap();
        registry.register(b.clone()).unwrap();

        registry.run_lifecycle(LifecycleHook::Connect).await.unwrap();
        registry.run_lifecycle(LifecycleHook::Listen).await.unwrap();

        assert_eq!(a.lifecycle_calls(), vec!["connect", "listen"]);
        assert_eq!(b.lifecycle_calls(), vec!["connect", "listen"]);
    }

    #[rstest]
    #[tokio::test]
    async fn test_disconnect_invokes_disconnect_hook() {
        let registry = TransportRegistry::new();
        let transport = Arc::new(MemoryTransport::new("a"));
        registry.register(transport.clone()).unwrap();

        registry
            .run_lifecycle(LifecycleHook::Disconnect)
            .await
            .unwrap();

        assert_eq!(transport.lifecycle_calls(), vec!["disconnect"]);
    }

    #[rstest]
    #[tokio::test]
    async fn test_lifecycle_surfaces_first_failure_after_awaiting_rest() {
        let registry = TransportRegistry::new();
        let failing = Arc::new(MemoryTransport::new("bad").failing_on(LifecycleHook::Connect));
        let healthy = Arc::new(MemoryTransport::new("good"));
        registry.register(failing).unwrap();
        registry.register(healthy.clone()).unwrap();

        let result = registry.run_lifecycle(LifecycleHook::Connect).await;
        assert!(result.is_err());
        // The healthy transport still ran its hook
        assert_eq!(healthy.lifecycle_calls(), vec!["connect"]);
    }
}
