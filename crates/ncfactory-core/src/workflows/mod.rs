//! # Workflows Module
//!
//! Consumer-facing procedures built on top of the [`engine`](crate::engine).
//!
//! ## Overview
//!
//! The engine resolves configurations into shared info and calculator objects. The
//! workflows here show how a consumer composes its own caching on top of that: a
//! simulation toolkit wants one native material per configuration, but the costly part
//! of creating one (assembling elements) depends only on chemical composition.
//!
//! ## Architecture
//!
//! - **Simulation Materials** ([`simmaterial`]) - Two cache levels, keyed by full
//!   configuration and by reduced chemical formula
//! - **Info Dump** ([`dump`]) - Human-readable rendering of an info object

pub mod dump;
pub mod simmaterial;
