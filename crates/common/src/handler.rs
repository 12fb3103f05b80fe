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

//! Handler functionality for the dispatch engine.
//!
//! A handler receives the request message together with exclusive access to
//! the call headers, so chain steps can observe and set flags such as
//! `break`. Most handlers never touch headers; [`handler_fn`] wraps a plain
//! async closure over the message for that case.

use std::{future::Future, sync::Arc};

use async_trait::async_trait;
use serde_json::Value;

use crate::headers::Headers;

/// An in-process route handler.
#[async_trait]
pub trait ActHandler: Send + Sync {
    /// Handles one call with the request message and the call headers.
    ///
    /// # Errors
    ///
    /// Returns an error when the call fails; the dispatcher's classifier
    /// decides whether it is muted, propagated, or fatal.
    async fn call(&self, message: Value, headers: &mut Headers) -> anyhow::Result<Value>;
}

/// A shareable, dynamically dispatched handler.
pub type DynHandler = Arc<dyn ActHandler>;

/// Wraps a plain async closure over the message as an [`ActHandler`].
struct FnHandler<F> {
    callback: F,
}

#[async_trait]
impl<F, Fut> ActHandler for FnHandler<F>
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Value>> + Send,
{
    async fn call(&self, message: Value, _headers: &mut Headers) -> anyhow::Result<Value> {
        (self.callback)(message).await
    }
}

/// Creates a [`DynHandler`] from an async closure over the message.
pub fn handler_fn<F, Fut>(f: F) -> DynHandler
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    Arc::new(FnHandler { callback: f })
}
