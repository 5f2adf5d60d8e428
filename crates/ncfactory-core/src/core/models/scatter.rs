use super::{Scatter, ekin_to_wavelength};
use crate::core::material::Info;
use std::sync::Arc;

/// Constant free-atom scattering, the high-energy limit of a free gas.
#[derive(Debug, Clone, PartialEq)]
pub struct FreeGasScatter {
    xsect: f64,
}

impl FreeGasScatter {
    pub fn new(xsect_free: f64) -> Self {
        Self { xsect: xsect_free }
    }

    pub fn from_info(info: &Info) -> Self {
        Self::new(info.xsect_free)
    }
}

impl Scatter for FreeGasScatter {
    fn name(&self) -> &str {
        "freegas"
    }

    fn cross_section(&self, _ekin_ev: f64) -> f64 {
        self.xsect
    }
}

/// Coherent elastic scattering on a powder of randomly oriented crystallites.
///
/// `sigma(lambda) = lambda^2 / (2 V n) * sum_{2d >= lambda} d m |F|^2`, per atom.
#[derive(Debug, Clone, PartialEq)]
pub struct PowderBraggScatter {
    /// d-spacings in decreasing order.
    dspacings: Vec<f64>,
    /// Running sum of `d * multiplicity * fsquared` matching `dspacings`.
    cumulative: Vec<f64>,
    prefactor: f64,
}

impl PowderBraggScatter {
    /// Returns `None` when the info object carries no structure or HKL planes.
    pub fn from_info(info: &Info) -> Option<Self> {
        let structure = info.structure.as_ref()?;
        if info.hkl.is_empty() || structure.n_atoms == 0 {
            return None;
        }
        let dspacings = info.hkl.iter().map(|p| p.dspacing).collect();
        let cumulative = info
            .hkl
            .iter()
            .scan(0.0, |acc, p| {
                *acc += p.dspacing * p.multiplicity as f64 * p.fsquared;
                Some(*acc)
            })
            .collect();
        Some(Self {
            dspacings,
            cumulative,
            prefactor: 1.0 / (2.0 * structure.volume * structure.n_atoms as f64),
        })
    }

    /// Wavelength above which no plane can reflect.
    pub fn bragg_threshold(&self) -> f64 {
        self.dspacings.first().map_or(0.0, |d| 2.0 * d)
    }
}

impl Scatter for PowderBraggScatter {
    fn name(&self) -> &str {
        "bragg"
    }

    fn cross_section(&self, ekin_ev: f64) -> f64 {
        let wl = ekin_to_wavelength(ekin_ev);
        let contributing = self.dspacings.partition_point(|d| 2.0 * d >= wl);
        match contributing {
            0 => 0.0,
            n => wl * wl * self.prefactor * self.cumulative[n - 1],
        }
    }
}

/// Sum of several independent scattering processes.
#[derive(Debug, Clone)]
pub struct CompositeScatter {
    name: String,
    components: Vec<Arc<dyn Scatter>>,
}

impl CompositeScatter {
    pub fn new(name: impl Into<String>, components: Vec<Arc<dyn Scatter>>) -> Self {
        Self {
            name: name.into(),
            components,
        }
    }

    pub fn components(&self) -> &[Arc<dyn Scatter>] {
        &self.components
    }
}

impl Scatter for CompositeScatter {
    fn name(&self) -> &str {
        &self.name
    }

    fn cross_section(&self, ekin_ev: f64) -> f64 {
        self.components
            .iter()
            .map(|c| c.cross_section(ekin_ev))
            .sum()
    }

    fn is_oriented(&self) -> bool {
        self.components.iter().any(|c| c.is_oriented())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::cfg::MatCfg;
    use crate::core::material::MaterialDb;
    use crate::core::models::EKIN_TO_WL2;

    fn info(raw: &str) -> Info {
        let cfg = MatCfg::parse(raw).unwrap();
        let def = MaterialDb::default().load(cfg.material()).unwrap();
        Info::build(&def, &cfg).unwrap()
    }

    fn ekin_for_wavelength(wl: f64) -> f64 {
        EKIN_TO_WL2 / (wl * wl)
    }

    #[test]
    fn bragg_vanishes_beyond_cutoff_wavelength() {
        let al = info("Al_sg225.ncmat;dcutoff=0.8");
        let bragg = PowderBraggScatter::from_info(&al).unwrap();
        let threshold = bragg.bragg_threshold();
        assert!((threshold - 2.0 * 4.04958 / 3f64.sqrt()).abs() < 1e-9);
        assert_eq!(bragg.cross_section(ekin_for_wavelength(threshold * 1.01)), 0.0);
        assert!(bragg.cross_section(ekin_for_wavelength(threshold * 0.99)) > 0.0);
    }

    #[test]
    fn bragg_edge_matches_single_family_formula() {
        let al = info("Al_sg225.ncmat;dcutoff=0.8");
        let bragg = PowderBraggScatter::from_info(&al).unwrap();
        let p = &al.hkl[0];
        let s = al.structure.as_ref().unwrap();
        let wl = 2.0 * p.dspacing * 0.999;
        let expected = wl * wl / (2.0 * s.volume * s.n_atoms as f64)
            * p.dspacing
            * p.multiplicity as f64
            * p.fsquared;
        let got = bragg.cross_section(ekin_for_wavelength(wl));
        assert!((got - expected).abs() < 1e-9 * expected);
    }

    #[test]
    fn bragg_requires_hkl_planes() {
        assert!(PowderBraggScatter::from_info(&info("Polyethylene_CH2.ncmat")).is_none());
        assert!(PowderBraggScatter::from_info(&info("Al_sg225.ncmat;dcutoff=-1")).is_none());
    }

    #[test]
    fn composite_sums_components() {
        let free: Arc<dyn Scatter> = Arc::new(FreeGasScatter::new(1.5));
        let more: Arc<dyn Scatter> = Arc::new(FreeGasScatter::new(0.25));
        let sum = CompositeScatter::new("stdscat", vec![free, more]);
        assert_eq!(sum.cross_section(0.1), 1.75);
        assert_eq!(sum.name(), "stdscat");
        assert!(!sum.is_oriented());
    }
}
