//! # Core Module
//!
//! Stateless building blocks of the factory: configuration parsing, element data,
//! material definitions, calculator contracts and the builder registry.
//!
//! - **Configuration** ([`cfg`]) - Parsing, validation and canonical cache keys
//! - **Element Data** ([`elements`]) - Compile-time table of nuclear properties
//! - **Materials** ([`material`]) - Material definitions and the structural `Info` object
//! - **Calculators** ([`models`]) - `Scatter`/`Absorption` contracts and built-in calculators
//! - **Builders** ([`registry`]) - Built-in, native and dynamically loaded model builders

pub mod cfg;
pub mod elements;
pub mod material;
pub mod models;
pub mod registry;
