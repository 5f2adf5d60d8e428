use super::Absorption;
use crate::core::material::Info;

/// Kinetic energy in eV of a neutron travelling at 2200 m/s.
pub const EKIN_2200_MS: f64 = 0.0253;

/// Absorption following the 1/v law from the tabulated 2200 m/s value.
#[derive(Debug, Clone, PartialEq)]
pub struct OneOverVAbsorption {
    xsect_2200: f64,
}

impl OneOverVAbsorption {
    pub fn new(xsect_2200: f64) -> Self {
        Self { xsect_2200 }
    }

    pub fn from_info(info: &Info) -> Self {
        Self::new(info.xsect_absorption)
    }
}

impl Absorption for OneOverVAbsorption {
    fn name(&self) -> &str {
        "stdabs"
    }

    fn cross_section(&self, ekin_ev: f64) -> f64 {
        if ekin_ev > 0.0 {
            self.xsect_2200 * (EKIN_2200_MS / ekin_ev).sqrt()
        } else {
            f64::INFINITY
        }
    }
}
