//! # Engine Module
//!
//! The stateful half of the factory: caches, builder dispatch, and the context object
//! that ties them to a plugin registry.
//!
//! ## Overview
//!
//! A request enters through [`FactoryContext`](context::FactoryContext) as a configuration
//! string. It is parsed and projected onto the parameters relevant for the requested
//! object kind, and the resulting key is looked up in that kind's cache. On a miss the
//! [`Dispatcher`](factory::Dispatcher) picks a builder from the registry and runs it
//! exactly once; every concurrent requester of the key receives the same object or the
//! same error.
//!
//! ## Architecture
//!
//! - **Object Cache** ([`cache`]) - Single-flight keyed store with memoized failures
//! - **Derived Cache** ([`derived`]) - Second cache level keyed by a coarser identity
//! - **Dispatcher** ([`factory`]) - Builder selection and panic-safe invocation
//! - **Context** ([`context`]) - Registry plus one cache per object kind
//! - **Configuration** ([`config`]) - TOML/environment settings and the selection policy
//! - **Error Handling** ([`error`]) - The error type every request reports

pub mod cache;
pub mod config;
pub mod context;
pub mod derived;
pub mod error;
pub mod factory;

pub use context::{FactoryContext, FactoryStats, LoadedMaterial};
pub use error::FactoryError;
