//! # ncfactory
//!
//! A configuration-keyed object cache and plugin-extensible factory for neutron
//! scattering material models.
//!
//! A configuration string such as `"Al_sg225.ncmat;temp=300K;dcutoff=0.5"` is resolved
//! into immutable, shared model objects: a structural [`Info`](core::material::Info)
//! object and scattering/absorption calculators. Each distinct configuration is built
//! at most once per process, even under heavy concurrent use, and failures are
//! remembered so a known-bad configuration never pays its construction cost twice.
//!
//! ## Architectural Philosophy
//!
//! - **[`core`]: The Foundation.** Stateless data and contracts: configuration parsing
//!   and canonical keys, element data, material definitions, the calculator traits and
//!   built-in calculators, and the builder registry with its C plugin ABI.
//!
//! - **[`engine`]: The Logic Core.** The stateful layer: the single-flight object cache,
//!   the layered derived cache, builder dispatch, and the
//!   [`FactoryContext`](engine::FactoryContext) that owns them.
//!
//! - **[`workflows`]: The Consumer Layer.** Procedures built on the engine, such as
//!   simulation materials cached by chemical composition and the info dump.
//!
//! ## Example
//!
//! ```no_run
//! use ncfactory::core::models::Scatter;
//! use ncfactory::engine::FactoryContext;
//!
//! let ctx = FactoryContext::global();
//! let material = ctx.load("Al_sg225.ncmat;temp=250K")?;
//! println!("{} barn", material.scatter.cross_section(0.025));
//! # Ok::<(), ncfactory::engine::FactoryError>(())
//! ```

pub mod core;
pub mod engine;
pub mod workflows;
