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

//! The pattern-matched RPC dispatch core for [Crossbar](https://github.com/crossbar-rs/crossbar).
//!
//! The `crossbar-common` crate implements the dispatch engine used to build
//! microservice meshes: callers invoke a handler by supplying a *pattern* (an
//! unordered mapping of keys to values), and the dispatcher selects the most
//! specific registered pattern that is a subset of the request, runs the
//! associated handler chain (or forwards the call over a named transport)
//! under a timeout envelope, and fans the completed event out to subscriber
//! transports and a process-wide event bus without blocking the caller.
//!
//! # Components
//!
//! - [`pattern`]: the pattern value model, string grammar parser, and the
//!   message/meta splitter.
//! - [`index`]: the subset-matching pattern index with configurable match
//!   ordering.
//! - [`headers`]: per-call header normalization and validation.
//! - [`dispatcher`]: the [`Crossbar`](dispatcher::Crossbar) instance tying
//!   registration, dispatch, transports, and plugins together.
//! - [`transport`]: the transport contract and named registry with lifecycle
//!   driving.
//! - [`events`]: the global event bus and notification fan-out.
//! - [`plugin`]: the plugin host contract.

#![warn(rustc::all)]
#![deny(unsafe_code)]
#![deny(nonstandard_style)]
#![deny(clippy::missing_errors_doc)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod config;
pub mod dispatcher;
pub mod errors;
pub mod events;
pub mod handler;
pub mod headers;
pub mod index;
pub mod pattern;
pub mod plugin;
pub mod transport;

#[cfg(any(test, feature = "stubs"))]
pub mod stubs;

pub use config::{Classifier, CrossbarConfig, ErrorVerdict};
pub use dispatcher::Crossbar;
pub use errors::CrossbarError;
pub use handler::{ActHandler, DynHandler, handler_fn};
pub use headers::Headers;
pub use index::MatchOrder;
pub use pattern::{Pattern, PatternValue};
pub use transport::{Transport, TransportOptions};
