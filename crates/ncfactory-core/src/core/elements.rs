use phf::{Map, phf_map};
use std::f64::consts::PI;

/// Atomic number used for deuterium, which must be kept apart from hydrogen.
pub const DEUTERIUM_Z: u32 = 1001;

const NEUTRON_MASS_AMU: f64 = 1.008_664_915_88;

/// Tabulated nuclear and scattering properties of one element (or isotope).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Element {
    pub symbol: &'static str,
    pub z: u32,
    pub mass_amu: f64,
    /// Bound coherent scattering length in fm.
    pub coh_scat_len_fm: f64,
    /// Bound incoherent scattering cross section in barn.
    pub incoh_xs_barn: f64,
    /// Absorption cross section at 2200 m/s in barn.
    pub abs_xs_barn: f64,
}

impl Element {
    pub fn is_deuterium(&self) -> bool {
        self.z == DEUTERIUM_Z
    }

    pub fn coh_xs_barn(&self) -> f64 {
        // 1 barn = 100 fm^2
        4.0 * PI * self.coh_scat_len_fm * self.coh_scat_len_fm / 100.0
    }

    pub fn bound_xs_barn(&self) -> f64 {
        self.coh_xs_barn() + self.incoh_xs_barn
    }

    /// Scattering cross section of the free (unbound) nucleus.
    pub fn free_xs_barn(&self) -> f64 {
        let a = self.mass_amu / NEUTRON_MASS_AMU;
        self.bound_xs_barn() * (a / (a + 1.0)).powi(2)
    }
}

macro_rules! element {
    ($sym:literal, $z:expr, $mass:expr, $b:expr, $inc:expr, $abs:expr) => {
        Element {
            symbol: $sym,
            z: $z,
            mass_amu: $mass,
            coh_scat_len_fm: $b,
            incoh_xs_barn: $inc,
            abs_xs_barn: $abs,
        }
    };
}

#[rustfmt::skip]
static ELEMENTS: Map<&'static str, Element> = phf_map! {
    "H"  => element!("H",  1,           1.00794,   -3.7390, 80.26,   0.3326),
    "D"  => element!("D",  DEUTERIUM_Z, 2.01410,    6.671,   2.05,   0.000519),
    "Be" => element!("Be", 4,           9.012182,   7.79,    0.0018, 0.0076),
    "C"  => element!("C",  6,          12.0107,     6.6460,  0.001,  0.0035),
    "N"  => element!("N",  7,          14.0067,     9.36,    0.5,    1.9),
    "O"  => element!("O",  8,          15.9994,     5.803,   0.0008, 0.00019),
    "Na" => element!("Na", 11,         22.98977,    3.63,    1.62,   0.53),
    "Mg" => element!("Mg", 12,         24.3050,     5.375,   0.08,   0.063),
    "Al" => element!("Al", 13,         26.981538,   3.449,   0.0082, 0.231),
    "Si" => element!("Si", 14,         28.0855,     4.1491,  0.004,  0.171),
    "Cl" => element!("Cl", 17,         35.453,      9.577,   5.3,   33.5),
    "Ti" => element!("Ti", 22,         47.867,     -3.438,   2.87,   6.09),
    "V"  => element!("V",  23,         50.9415,    -0.3824,  5.08,   5.08),
    "Fe" => element!("Fe", 26,         55.845,      9.45,    0.4,    2.56),
    "Ni" => element!("Ni", 28,         58.6934,    10.3,     5.2,    4.49),
    "Cu" => element!("Cu", 29,         63.546,      7.718,   0.55,   3.78),
    "Zr" => element!("Zr", 40,         91.224,      7.16,    0.02,   0.185),
    "Pb" => element!("Pb", 82,        207.2,        9.405,   0.003,  0.171),
};

pub fn lookup(symbol: &str) -> Option<&'static Element> {
    ELEMENTS.get(symbol)
}

pub fn by_z(z: u32) -> Option<&'static Element> {
    ELEMENTS.values().find(|e| e.z == z)
}
