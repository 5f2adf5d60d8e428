//! # Material Module
//!
//! Material definitions and the structural result object derived from them.
//!
//! - [`db`] - Resolution of material references to definitions (embedded data and
//!   search directories), using a TOML stand-in for the material file format.
//! - [`info`] - The immutable [`Info`] object: composition, unit cell, HKL planes and
//!   per-atom cross sections for one configuration.

pub mod db;
pub mod info;

pub use db::{MaterialDb, MaterialDef, MaterialLoadError};
pub use info::{AtomInfo, CompositionEntry, HklPlane, Info, StructureInfo};
