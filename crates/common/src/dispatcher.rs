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

//! The dispatcher instance: registration, lookup, and the execution envelope.
//!
//! `act` performs one end-to-end call: compose the request, look up the best
//! matching route, normalize headers, then run the handler chain (or the
//! transport send) inside an envelope applying timeout, slow-call warning,
//! error classification, and fire-and-forget semantics. An expired timeout
//! releases the caller only; the in-flight handler runs to completion and
//! its result is discarded.

use std::{
    fmt,
    sync::{Arc, RwLock},
    time::{Duration, Instant},
};

use crossbar_core::correctness::check_nonempty_string;
use futures::future::BoxFuture;
use indexmap::IndexMap;
use serde::Serialize;
use serde_json::{Map, Value, json};
use ustr::Ustr;

use crate::{
    config::{CrossbarConfig, ErrorVerdict},
    errors::{CrossbarError, HandlerPanic},
    events,
    handler::DynHandler,
    headers::{Headers, deep_merge_map, is_truthy},
    index::PatternIndex,
    pattern::{ActArgs, Pattern, beautify, split},
    plugin::{PluginOutput, PluginSource},
    transport::{LifecycleHook, Transport, TransportRegistry},
};

/// The dispatch target of a registered route.
#[derive(Clone)]
pub enum RouteTarget {
    /// An in-process chain of handlers executed sequentially.
    Local(Vec<DynHandler>),
    /// The name of a registered transport whose `send` performs the call.
    Remote(Ustr),
}

impl fmt::Debug for RouteTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local(chain) => write!(f, "Local({} steps)", chain.len()),
            Self::Remote(name) => f.debug_tuple("Remote").field(&name.as_str()).finish(),
        }
    }
}

/// A registered route: its target plus the registration-time default headers.
#[derive(Clone, Debug)]
pub struct Route {
    pub(crate) target: RouteTarget,
    pub(crate) add_headers: Map<String, Value>,
}

#[derive(Debug)]
struct Indices {
    all: PatternIndex<Route>,
    local_only: PatternIndex<Route>,
}

/// Trace annotations attached to results of debug-flagged calls.
#[derive(Clone, Debug, Serialize)]
pub struct CallTrace {
    /// The correlation id of the call.
    pub id: String,
    /// The matched registration pattern.
    pub pattern: String,
    /// The transport the call was routed over, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transport: Option<String>,
    /// Monotonic time spent inside `act`, in nanoseconds.
    pub elapsed_ns: u64,
}

/// A pattern-matched RPC dispatcher instance.
///
/// The instance exclusively owns its two pattern indices, its transport
/// registry, and its named-routes map; handlers own no framework state.
pub struct Crossbar {
    config: CrossbarConfig,
    indices: RwLock<Indices>,
    transports: Arc<TransportRegistry>,
    routes: RwLock<IndexMap<String, Value>>,
}

impl fmt::Debug for Crossbar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let indices = self.indices.read().expect("pattern indices lock poisoned");
        f.debug_struct(stringify!(Crossbar))
            .field("config", &self.config)
            .field("routes", &indices.all.len())
            .field("local_routes", &indices.local_only.len())
            .field("transports", &self.transports.names())
            .finish()
    }
}

impl Default for Crossbar {
    fn default() -> Self {
        Self::new(CrossbarConfig::default())
    }
}

impl Crossbar {
    /// Creates a new [`Crossbar`] instance from `config`.
    #[must_use]
    pub fn new(config: CrossbarConfig) -> Self {
        Self {
            indices: RwLock::new(Indices {
                all: PatternIndex::new(config.match_order),
                local_only: PatternIndex::new(config.match_order),
            }),
            transports: Arc::new(TransportRegistry::new()),
            routes: RwLock::new(IndexMap::new()),
            config,
        }
    }

    /// Returns the instance configuration.
    #[must_use]
    pub const fn config(&self) -> &CrossbarConfig {
        &self.config
    }

    /// Registers a local route with a single handler.
    ///
    /// # Errors
    ///
    /// Returns [`CrossbarError::InvalidPattern`] when the pattern fails to
    /// parse, or [`CrossbarError::DuplicatePattern`] when duplicate route
    /// names are forbidden and an exactly-equal pattern exists.
    pub fn add<P>(&self, pattern: P, handler: DynHandler) -> Result<(), CrossbarError>
    where
        P: TryInto<Pattern>,
        P::Error: fmt::Display,
    {
        self.add_chain(pattern, vec![handler])
    }

    /// Registers a local route executing `handlers` as a sequential chain.
    ///
    /// Each step receives the request message and exclusive access to the
    /// call headers; a step setting `break` stops the chain, and the result
    /// of the last executed step is the call result.
    ///
    /// # Errors
    ///
    /// As for [`Crossbar::add`].
    pub fn add_chain<P>(&self, pattern: P, handlers: Vec<DynHandler>) -> Result<(), CrossbarError>
    where
        P: TryInto<Pattern>,
        P::Error: fmt::Display,
    {
        if handlers.is_empty() {
            return Err(CrossbarError::InvalidPattern {
                reason: "a route chain requires at least one handler".to_string(),
            });
        }
        let pattern = parse_pattern(pattern)?;
        self.insert_route(pattern, RouteTarget::Local(handlers))
    }

    /// Registers a remote route dispatching over the named transport.
    ///
    /// The transport is resolved at dispatch time, so routes may be added
    /// before their transport is installed.
    ///
    /// # Errors
    ///
    /// As for [`Crossbar::add`].
    pub fn add_remote<P>(&self, pattern: P, transport: &str) -> Result<(), CrossbarError>
    where
        P: TryInto<Pattern>,
        P::Error: fmt::Display,
    {
        let pattern = parse_pattern(pattern)?;
        self.insert_route(pattern, RouteTarget::Remote(Ustr::from(transport)))
    }

    /// Removes the first route whose pattern equals `pattern` from both
    /// indices. Missing entries are not an error.
    ///
    /// # Errors
    ///
    /// Returns [`CrossbarError::InvalidPattern`] when the pattern fails to
    /// parse.
    pub fn remove<P>(&self, pattern: P) -> Result<(), CrossbarError>
    where
        P: TryInto<Pattern>,
        P::Error: fmt::Display,
    {
        let pattern = parse_pattern(pattern)?;
        let mut indices = self.indices.write().expect("pattern indices lock poisoned");
        indices.all.remove(&pattern);
        indices.local_only.remove(&pattern);
        Ok(())
    }

    fn insert_route(&self, pattern: Pattern, target: RouteTarget) -> Result<(), CrossbarError> {
        let route = Route {
            add_headers: pattern.meta_headers(),
            target,
        };
        let is_local = matches!(route.target, RouteTarget::Local(_));

        let mut indices = self.indices.write().expect("pattern indices lock poisoned");
        if self.config.forbid_same_route_names && indices.all.lookup_exact(&pattern).is_some() {
            return Err(CrossbarError::DuplicatePattern {
                pattern: pattern.to_string(),
            });
        }
        log::debug!("Adding route '{pattern}'");
        indices.all.add(pattern.clone(), route.clone());
        if is_local {
            indices.local_only.add(pattern, route);
        }
        Ok(())
    }

    /// Executes one call end-to-end.
    ///
    /// `parts` may be a pattern string, a JSON object, or a tuple of partial
    /// patterns merged left-to-right. Non-meta keys route and form the
    /// message; `$`-prefixed keys are meta-flags.
    ///
    /// # Errors
    ///
    /// - [`CrossbarError::PatternNotFound`] when no route matches.
    /// - [`CrossbarError::PatternTimeout`] when the deadline expires.
    /// - [`CrossbarError::InvalidHeaders`] on a meta schema violation.
    /// - [`CrossbarError::NoSuchTransport`] when the route's transport is
    ///   not registered.
    /// - [`CrossbarError::HandlerFailure`] when the handler fails and the
    ///   classifier declines to mute the error.
    pub async fn act<A: Into<ActArgs>>(&self, parts: A) -> Result<Value, CrossbarError> {
        let started = Instant::now();
        let request = split(&parts.into()).map_err(|e| CrossbarError::InvalidPattern {
            reason: e.to_string(),
        })?;

        let local_only = request.meta.get("local").is_some_and(is_truthy);

        let matched = {
            let indices = self.indices.read().expect("pattern indices lock poisoned");
            let index = if local_only {
                &indices.local_only
            } else {
                &indices.all
            };
            index
                .lookup(&request.message)
                .map(|entry| (entry.pattern.clone(), entry.payload.clone()))
        };

        let Some((pattern, route)) = matched else {
            return Err(CrossbarError::PatternNotFound {
                pattern: beautify(&request.raw),
            });
        };

        let mut headers =
            Headers::normalize(&route.add_headers, &request.meta, &request.message, &pattern)?;

        let message = Value::Object(request.message.clone());
        let source_label = beautify(&request.message);

        let mut transport_name = None;
        let envelope: BoxFuture<'static, (anyhow::Result<Value>, Headers)> = match &route.target {
            RouteTarget::Local(chain) => {
                Box::pin(run_chain(chain.clone(), message.clone(), headers.clone()))
            }
            RouteTarget::Remote(name) => {
                let Some(transport) = self.transports.get(name.as_str()) else {
                    return Err(CrossbarError::NoSuchTransport {
                        name: name.to_string(),
                    });
                };
                if headers.timeout.is_none() {
                    headers.timeout = transport.options().timeout;
                }
                transport_name = Some(name.to_string());
                let send_message = message.clone();
                let send_headers = headers.clone();
                Box::pin(async move {
                    let result = transport.send(send_message, send_headers.clone()).await;
                    (result, send_headers)
                })
            }
        };

        let timeout_ms = headers.timeout.unwrap_or(self.config.timeout);
        let slow_ms = headers.slow.or(self.config.slow_pattern_timeout);
        let debug = headers.debug || self.config.debug;
        let is_local = matches!(route.target, RouteTarget::Local(_));

        if is_local && headers.nowait {
            let classifier = self.config.terminate_on.clone();
            let transports = Arc::clone(&self.transports);
            let label = source_label.clone();
            tokio::spawn(async move {
                let (result, headers) = envelope.await;
                match result {
                    Ok(_) => {
                        warn_if_slow(started, slow_ms, &label);
                        if !headers.notify.is_empty() {
                            events::fan_out(transports, message, headers).await;
                        }
                    }
                    Err(error) => match classifier.classify(&error) {
                        ErrorVerdict::Fatal => {
                            log::error!("Fatal handler error for '{label}': {error:?}");
                            std::process::abort();
                        }
                        ErrorVerdict::Mute => {
                            log::debug!("Muted handler error for '{label}': {error:?}");
                        }
                        ErrorVerdict::Propagate => {
                            log::error!("Handler error for '{label}' (fire-and-forget): {error:?}");
                        }
                    },
                }
            });

            if debug {
                let trace = CallTrace {
                    id: headers.id.clone(),
                    pattern: pattern.to_string(),
                    transport: None,
                    elapsed_ns: elapsed_ns(started),
                };
                return Ok(json!(trace));
            }
            return Ok(Value::Null);
        }

        let handle = tokio::spawn(envelope);
        let joined = if timeout_ms > 0 {
            match tokio::time::timeout(Duration::from_millis(timeout_ms), handle).await {
                Ok(joined) => joined,
                Err(_) => {
                    // Releases the caller only; the spawned handler task
                    // keeps running and its result is discarded
                    return Err(CrossbarError::PatternTimeout {
                        pattern: source_label,
                        timeout_ms,
                    });
                }
            }
        } else {
            handle.await
        };

        let (result, headers) = match joined {
            Ok(outcome) => outcome,
            Err(join_error) => {
                let error = if join_error.is_panic() {
                    anyhow::Error::new(HandlerPanic(panic_message(join_error)))
                } else {
                    anyhow::anyhow!("handler task aborted before completion")
                };
                return self.classify_envelope_error(error, &source_label);
            }
        };

        warn_if_slow(started, slow_ms, &source_label);

        let value = match result {
            Ok(value) => value,
            Err(error) => return self.classify_envelope_error(error, &source_label),
        };

        if !headers.notify.is_empty() {
            events::spawn_fan_out(Arc::clone(&self.transports), message, headers.clone());
        }

        if debug {
            let trace = CallTrace {
                id: headers.id.clone(),
                pattern: pattern.to_string(),
                transport: transport_name,
                elapsed_ns: elapsed_ns(started),
            };
            return Ok(attach_trace(value, &trace));
        }
        Ok(value)
    }

    fn classify_envelope_error(
        &self,
        error: anyhow::Error,
        label: &str,
    ) -> Result<Value, CrossbarError> {
        match self.config.terminate_on.classify(&error) {
            ErrorVerdict::Fatal => {
                log::error!("Fatal handler error for '{label}': {error:?}");
                std::process::abort();
            }
            ErrorVerdict::Mute => {
                log::debug!("Muted handler error for '{label}': {error:?}");
                Ok(Value::Null)
            }
            ErrorVerdict::Propagate => Err(CrossbarError::HandlerFailure { source: error }),
        }
    }

    /// Registers `transport` under its declared name.
    ///
    /// # Errors
    ///
    /// As for [`TransportRegistry::register`].
    pub fn register_transport(&self, transport: Arc<dyn Transport>) -> Result<(), CrossbarError> {
        self.transports.register(transport)
    }

    /// Returns the transport registered under `name`.
    #[must_use]
    pub fn transport(&self, name: &str) -> Option<Arc<dyn Transport>> {
        self.transports.get(name)
    }

    /// Returns the registered transport names.
    #[must_use]
    pub fn transport_names(&self) -> Vec<String> {
        self.transports.names()
    }

    /// Invokes the `connect` hook on every transport in parallel.
    ///
    /// # Errors
    ///
    /// Returns the first hook failure after all hooks have completed.
    pub async fn connect(&self) -> anyhow::Result<()> {
        self.transports.run_lifecycle(LifecycleHook::Connect).await
    }

    /// Invokes the `listen` hook on every transport in parallel.
    ///
    /// # Errors
    ///
    /// Returns the first hook failure after all hooks have completed.
    pub async fn listen(&self) -> anyhow::Result<()> {
        self.transports.run_lifecycle(LifecycleHook::Listen).await
    }

    /// Invokes the `disconnect` hook on every transport in parallel.
    ///
    /// # Errors
    ///
    /// Returns the first hook failure after all hooks have completed.
    pub async fn disconnect(&self) -> anyhow::Result<()> {
        self.transports
            .run_lifecycle(LifecycleHook::Disconnect)
            .await
    }

    /// Invokes the `close` hook on every transport in parallel.
    ///
    /// # Errors
    ///
    /// Returns the first hook failure after all hooks have completed.
    pub async fn close(&self) -> anyhow::Result<()> {
        self.transports.run_lifecycle(LifecycleHook::Close).await
    }

    /// Resolves and applies a plugin, installing its output.
    ///
    /// # Errors
    ///
    /// Returns [`CrossbarError::InvalidPlugin`] when resolution or
    /// application fails, and the installation errors of the produced
    /// artifact otherwise.
    pub async fn install<S: Into<PluginSource>>(
        &self,
        source: S,
        args: Value,
    ) -> Result<(), CrossbarError> {
        let plugin = match source.into() {
            PluginSource::Instance(plugin) => plugin,
            PluginSource::Locator(locator) => {
                let Some(resolver) = &self.config.plugin_resolver else {
                    return Err(CrossbarError::InvalidPlugin {
                        reason: format!("no resolver configured for locator '{locator}'"),
                    });
                };
                resolver
                    .resolve(&locator)
                    .map_err(|e| CrossbarError::InvalidPlugin {
                        reason: format!("failed to resolve '{locator}': {e}"),
                    })?
            }
        };

        let output =
            plugin
                .apply(self, &args)
                .await
                .map_err(|e| CrossbarError::InvalidPlugin {
                    reason: e.to_string(),
                })?;

        match output {
            None => Ok(()),
            Some(PluginOutput::Transport(transport)) => self.register_transport(transport),
            Some(PluginOutput::Routes { name, routes }) => {
                if let Err(e) = check_nonempty_string(&name, "routes.name") {
                    return Err(CrossbarError::InvalidPlugin {
                        reason: e.to_string(),
                    });
                }
                let mut map = self.routes.write().expect("named routes lock poisoned");
                match (map.get_mut(&name), &routes) {
                    (Some(Value::Object(existing)), Value::Object(incoming)) => {
                        deep_merge_map(existing, incoming);
                    }
                    _ => {
                        map.insert(name, routes);
                    }
                }
                Ok(())
            }
        }
    }

    /// Returns a snapshot of the named route bundles installed by plugins.
    #[must_use]
    pub fn routes(&self) -> IndexMap<String, Value> {
        self.routes
            .read()
            .expect("named routes lock poisoned")
            .clone()
    }
}

async fn run_chain(
    chain: Vec<DynHandler>,
    message: Value,
    mut headers: Headers,
) -> (anyhow::Result<Value>, Headers) {
    let mut result = Value::Null;
    for step in &chain {
        match step.call(message.clone(), &mut headers).await {
            Ok(value) => result = value,
            Err(error) => return (Err(error), headers),
        }
        if headers.break_ {
            break;
        }
    }
    (Ok(result), headers)
}

fn parse_pattern<P>(pattern: P) -> Result<Pattern, CrossbarError>
where
    P: TryInto<Pattern>,
    P::Error: fmt::Display,
{
    pattern
        .try_into()
        .map_err(|e| CrossbarError::InvalidPattern {
            reason: e.to_string(),
        })
}

fn warn_if_slow(started: Instant, slow_ms: Option<u64>, label: &str) {
    if let Some(threshold) = slow_ms {
        let elapsed = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        if elapsed > threshold {
            log::warn!("Slow call '{label}': {elapsed} ms exceeded the {threshold} ms threshold");
        }
    }
}

fn elapsed_ns(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_nanos()).unwrap_or(u64::MAX)
}

fn panic_message(join_error: tokio::task::JoinError) -> String {
    let payload = join_error.into_panic();
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_string()
    }
}

fn attach_trace(value: Value, trace: &CallTrace) -> Value {
    match value {
        Value::Object(mut map) => {
            map.insert("$debug".to_string(), json!(trace));
            Value::Object(map)
        }
        other => other,
    }
}
