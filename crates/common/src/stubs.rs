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

//! Stub handlers and transports for testing scenarios.

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use serde_json::Value;

use crate::{
    handler::ActHandler,
    headers::Headers,
    transport::{LifecycleHook, Transport, TransportOptions},
};

/// A handler which saves the messages it receives and returns a fixed reply.
#[derive(Debug)]
pub struct RecordingHandler {
    reply: Value,
    calls: Mutex<Vec<Value>>,
}

impl RecordingHandler {
    /// Creates a recording handler replying with `reply`.
    #[must_use]
    pub fn new(reply: Value) -> Arc<Self> {
        Arc::new(Self {
            reply,
            calls: Mutex::new(Vec::new()),
        })
    }

    /// Returns the messages received so far.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    #[must_use]
    pub fn calls(&self) -> Vec<Value> {
        self.calls.lock().unwrap().clone()
    }

    /// Returns how many times the handler was invoked.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl ActHandler for RecordingHandler {
    async fn call(&self, message: Value, _headers: &mut Headers) -> anyhow::Result<Value> {
        self.calls.lock().unwrap().push(message);
        Ok(self.reply.clone())
    }
}

/// An in-memory transport recording sends, notifications, and lifecycle
/// invocations.
#[derive(Debug)]
pub struct MemoryTransport {
    name: String,
    options: TransportOptions,
    reply: Value,
    send_delay: Option<Duration>,
    notify_delay: Option<Duration>,
    fail_on: Option<LifecycleHook>,
    sent: Mutex<Vec<(Value, Headers)>>,
    notified: Mutex<Vec<(Value, Headers)>>,
    lifecycle: Mutex<Vec<String>>,
}

impl MemoryTransport {
    /// Creates a new transport named `name` replying with `null`.
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            options: TransportOptions::default(),
            reply: Value::Null,
            send_delay: None,
            notify_delay: None,
            fail_on: None,
            sent: Mutex::new(Vec::new()),
            notified: Mutex::new(Vec::new()),
            lifecycle: Mutex::new(Vec::new()),
        }
    }

    /// Sets the value returned from `send`.
    #[must_use]
    pub fn with_reply(mut self, reply: Value) -> Self {
        self.reply = reply;
        self
    }

    /// Sets the declared transport options.
    #[must_use]
    pub fn with_options(mut self, options: TransportOptions) -> Self {
        self.options = options;
        self
    }

    /// Delays every `send` by `millis`.
    #[must_use]
    pub fn with_send_delay(mut self, millis: u64) -> Self {
        self.send_delay = Some(Duration::from_millis(millis));
        self
    }

    /// Delays every `notify` by `millis`.
    #[must_use]
    pub fn with_notify_delay(mut self, millis: u64) -> Self {
        self.notify_delay = Some(Duration::from_millis(millis));
        self
    }

    /// Makes the given lifecycle hook fail.
    #[must_use]
    pub fn failing_on(mut self, hook: LifecycleHook) -> Self {
        self.fail_on = Some(hook);
        self
    }

    /// Returns the recorded `send` invocations.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    #[must_use]
    pub fn sent(&self) -> Vec<(Value, Headers)> {
        self.sent.lock().unwrap().clone()
    }

    /// Returns the recorded `notify` invocations.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    #[must_use]
    pub fn notified(&self) -> Vec<(Value, Headers)> {
        self.notified.lock().unwrap().clone()
    }

    /// Returns the lifecycle hooks invoked so far, in order.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    #[must_use]
    pub fn lifecycle_calls(&self) -> Vec<String> {
        self.lifecycle.lock().unwrap().clone()
    }

    fn run_hook(&self, hook: LifecycleHook) -> anyhow::Result<()> {
        self.lifecycle.lock().unwrap().push(hook.to_string());
        if self.fail_on == Some(hook) {
            anyhow::bail!("transport '{}' {hook} failed", self.name);
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    fn name(&self) -> &str {
        &self.name
    }

    fn options(&self) -> TransportOptions {
        self.options.clone()
    }

    async fn send(&self, message: Value, headers: Headers) -> anyhow::Result<Value> {
        if let Some(delay) = self.send_delay {
            tokio::time::sleep(delay).await;
        }
        self.sent.lock().unwrap().push((message, headers));
        Ok(self.reply.clone())
    }

    async fn notify(&self, message: Value, headers: Headers) -> anyhow::Result<()> {
        if let Some(delay) = self.notify_delay {
            tokio::time::sleep(delay).await;
        }
        self.notified.lock().unwrap().push((message, headers));
        Ok(())
    }

    async fn connect(&self) -> anyhow::Result<()> {
        self.run_hook(LifecycleHook::Connect)
    }

    async fn listen(&self) -> anyhow::Result<()> {
        self.run_hook(LifecycleHook::Listen)
    }

    async fn disconnect(&self) -> anyhow::Result<()> {
        self.run_hook(LifecycleHook::Disconnect)
    }

    async fn close(&self) -> anyhow::Result<()> {
        self.run_hook(LifecycleHook::Close)
    }
}
