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

//! The plugin host contract.
//!
//! A plugin runs once against a dispatcher instance and returns an optional
//! artifact: a transport to install, or a named bundle of routes to merge
//! into the instance's route map. String locators are resolved through an
//! externally supplied [`PluginResolver`].

use std::{fmt, sync::Arc};

use async_trait::async_trait;
use serde_json::Value;

use crate::{dispatcher::Crossbar, transport::Transport};

/// The classified output of a plugin application.
pub enum PluginOutput {
    /// Install the transport under its declared name.
    Transport(Arc<dyn Transport>),
    /// Merge `routes` under the instance's route map entry `name`.
    Routes {
        name: String,
        routes: Value,
    },
}

impl fmt::Debug for PluginOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(t) => f.debug_tuple("Transport").field(&t.name()).finish(),
            Self::Routes { name, routes } => f
                .debug_struct("Routes")
                .field("name", name)
                .field("routes", routes)
                .finish(),
        }
    }
}

/// An installable extension of a dispatcher instance.
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Applies the plugin to `instance` with the caller-supplied `args`.
    ///
    /// A `None` return is a no-op; otherwise the output is classified and
    /// installed by the host.
    ///
    /// # Errors
    ///
    /// Returns an error when the plugin cannot be applied; the host surfaces
    /// it as `INVALID_PLUGIN`.
    async fn apply(
        &self,
        instance: &Crossbar,
        args: &Value,
    ) -> anyhow::Result<Option<PluginOutput>>;
}

/// Resolves string plugin locators to plugin instances.
///
/// The resolution strategy (filesystem, registry, linker) is external to the
/// core; the host only consumes this contract.
pub trait PluginResolver: Send + Sync {
    /// Resolves `locator` to a plugin.
    ///
    /// # Errors
    ///
    /// Returns an error when the locator does not resolve to a plugin.
    fn resolve(&self, locator: &str) -> anyhow::Result<Arc<dyn Plugin>>;
}

/// A plugin reference passed to the host: an instance or a string locator.
pub enum PluginSource {
    Instance(Arc<dyn Plugin>),
    Locator(String),
}

impl fmt::Debug for PluginSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Instance(_) => f.write_str("Instance(..)"),
            Self::Locator(locator) => f.debug_tuple("Locator").field(locator).finish(),
        }
    }
}

impl From<Arc<dyn Plugin>> for PluginSource {
    fn from(value: Arc<dyn Plugin>) -> Self {
        Self::Instance(value)
    }
}

impl From<&str> for PluginSource {
    fn from(value: &str) -> Self {
        Self::Locator(value.to_string())
    }
}

impl From<String> for PluginSource {
    fn from(value: String) -> Self {
        Self::Locator(value)
    }
}
