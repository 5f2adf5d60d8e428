//! # Models Module
//!
//! Contracts for the calculators a factory produces, the built-in calculators, and the
//! error type every builder reports.
//!
//! Calculators are immutable once built and are shared across threads behind `Arc`,
//! hence the `Send + Sync` bounds on [`Scatter`] and [`Absorption`].

pub mod absorption;
pub mod scatter;

use crate::core::cfg::MatCfg;
use crate::core::material::{Info, MaterialDb, MaterialLoadError};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Neutron kinetic energy (eV) to wavelength (Aa): lambda^2 = C / E.
pub const EKIN_TO_WL2: f64 = 0.081_804_209_605_330_9;

pub trait Scatter: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    /// Scattering cross section per atom in barn for a neutron of `ekin_ev`.
    fn cross_section(&self, ekin_ev: f64) -> f64;

    fn is_oriented(&self) -> bool {
        false
    }
}

pub trait Absorption: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    /// Absorption cross section per atom in barn for a neutron of `ekin_ev`.
    fn cross_section(&self, ekin_ev: f64) -> f64;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelKind {
    Info,
    Scatter,
    Absorption,
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ModelKind::Info => "info",
            ModelKind::Scatter => "scatter",
            ModelKind::Absorption => "absorption",
        })
    }
}

/// The product of a builder.
#[derive(Debug, Clone)]
pub enum Model {
    Info(Arc<Info>),
    Scatter(Arc<dyn Scatter>),
    Absorption(Arc<dyn Absorption>),
}

impl Model {
    pub fn kind(&self) -> ModelKind {
        match self {
            Model::Info(_) => ModelKind::Info,
            Model::Scatter(_) => ModelKind::Scatter,
            Model::Absorption(_) => ModelKind::Absorption,
        }
    }
}

/// Everything a builder may look at.
///
/// `info` is present for scatter and absorption requests; info builders receive `None`
/// and load their material through `materials`.
#[derive(Debug, Clone, Copy)]
pub struct BuildRequest<'a> {
    pub cfg: &'a MatCfg,
    pub info: Option<&'a Arc<Info>>,
    pub materials: &'a MaterialDb,
}

impl<'a> BuildRequest<'a> {
    pub fn require_info(&self, builder: &str) -> Result<&'a Arc<Info>, BuildError> {
        self.info.ok_or_else(|| BuildError::Unsupported {
            builder: builder.to_string(),
            material: self.cfg.material().to_string(),
            reason: "no info object was supplied".to_string(),
        })
    }
}

#[derive(Debug, Error)]
pub enum BuildError {
    #[error(transparent)]
    Material(#[from] MaterialLoadError),

    #[error("Material '{material}' lacks {what}")]
    MissingInfo {
        material: String,
        what: &'static str,
    },

    #[error("No Bragg planes in '{material}' with {dcutoff} <= d <= {dcutoffup} Aa")]
    NoBraggPlanes {
        material: String,
        dcutoff: f64,
        dcutoffup: f64,
    },

    #[error("d-spacing cutoff {dcutoff} Aa is too small for '{material}'")]
    DCutoffTooSmall { material: String, dcutoff: f64 },

    #[error("Builder '{builder}' does not support material '{material}': {reason}")]
    Unsupported {
        builder: String,
        material: String,
        reason: String,
    },

    #[error("Plugin builder '{builder}' failed with status {status}")]
    Plugin { builder: String, status: i32 },

    #[error("Builder '{builder}' panicked: {message}")]
    Panicked { builder: String, message: String },

    #[error(transparent)]
    Custom(Box<dyn std::error::Error + Send + Sync>),
}

/// Converts a neutron kinetic energy in eV to its wavelength in Aa.
pub fn ekin_to_wavelength(ekin_ev: f64) -> f64 {
    if ekin_ev > 0.0 {
        (EKIN_TO_WL2 / ekin_ev).sqrt()
    } else {
        f64::INFINITY
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thermal_neutron_wavelength() {
        assert!((ekin_to_wavelength(0.0253) - 1.798).abs() < 1e-3);
        assert_eq!(ekin_to_wavelength(0.0), f64::INFINITY);
    }

    #[test]
    fn model_kind_follows_variant() {
        let abs: Arc<dyn Absorption> = Arc::new(absorption::OneOverVAbsorption::new(1.0));
        assert_eq!(Model::Absorption(abs).kind(), ModelKind::Absorption);
        assert_eq!(ModelKind::Scatter.to_string(), "scatter");
    }
}
