use super::db::MaterialDef;
use crate::core::cfg::{CacheKey, MatCfg, Param};
use crate::core::elements::Element;
use crate::core::models::BuildError;
use nalgebra::Vector3;
use std::collections::BTreeMap;
use std::f64::consts::PI;
use tracing::debug;

/// d-spacing cutoff used when the configuration leaves it at "auto" (0).
pub const AUTO_DCUTOFF_AA: f64 = 0.5;

const AMU_G_PER_AA3_TO_G_PER_CM3: f64 = 1.660_539_066_60;
const MIN_FSQUARED_BARN: f64 = 1e-5;
const MAX_HKL_CANDIDATES: f64 = 2.0e7;

#[derive(Debug, Clone, PartialEq)]
pub struct StructureInfo {
    pub spacegroup: u32,
    pub lattice: [f64; 3],
    pub angles: [f64; 3],
    /// Unit cell volume in Aa^3.
    pub volume: f64,
    pub n_atoms: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AtomInfo {
    pub element: &'static Element,
    pub positions: Vec<Vector3<f64>>,
}

impl AtomInfo {
    pub fn count(&self) -> usize {
        self.positions.len()
    }
}

/// A family of reflection planes sharing one d-spacing and structure factor.
#[derive(Debug, Clone, PartialEq)]
pub struct HklPlane {
    pub hkl: [i32; 3],
    pub dspacing: f64,
    pub multiplicity: u32,
    /// Squared structure factor in barn.
    pub fsquared: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompositionEntry {
    pub element: &'static Element,
    pub fraction: f64,
}

/// Immutable structural and compositional description of a configured material.
#[derive(Debug, Clone, PartialEq)]
pub struct Info {
    pub material: String,
    pub key: CacheKey,
    pub temperature: f64,
    pub debye_temperature: Option<f64>,
    /// Density in g/cm^3.
    pub density: f64,
    /// Number density in atoms/Aa^3.
    pub number_density: f64,
    pub composition: Vec<CompositionEntry>,
    pub structure: Option<StructureInfo>,
    pub atoms: Vec<AtomInfo>,
    pub hkl: Vec<HklPlane>,
    /// Effective lower and upper d-spacing limits of `hkl`, when Bragg planes were requested.
    pub dspacing_range: Option<(f64, f64)>,
    /// Free scattering cross section per atom in barn.
    pub xsect_free: f64,
    /// Absorption cross section per atom at 2200 m/s in barn.
    pub xsect_absorption: f64,
}

impl Info {
    pub fn has_atom_info(&self) -> bool {
        !self.atoms.is_empty()
    }

    pub fn has_hkl_info(&self) -> bool {
        !self.hkl.is_empty()
    }

    pub fn largest_dspacing(&self) -> Option<f64> {
        self.hkl.first().map(|p| p.dspacing)
    }

    /// Builds the info object for `cfg` from an already loaded material definition.
    pub fn build(def: &MaterialDef, cfg: &MatCfg) -> Result<Self, BuildError> {
        let structure = def.structure.as_ref().map(|s| {
            let lattice = [s.a, s.b, s.c];
            let angles = [s.alpha, s.beta, s.gamma];
            StructureInfo {
                spacegroup: s.spacegroup,
                lattice,
                angles,
                volume: cell_volume(lattice, angles),
                n_atoms: def.atoms.iter().map(|(_, p)| p.len()).sum(),
            }
        });
        let atoms: Vec<AtomInfo> = def
            .atoms
            .iter()
            .map(|(element, positions)| AtomInfo {
                element: *element,
                positions: positions.iter().map(|p| Vector3::from(*p)).collect(),
            })
            .collect();

        let composition = match &structure {
            Some(s) => atoms
                .iter()
                .map(|a| CompositionEntry {
                    element: a.element,
                    fraction: a.count() as f64 / s.n_atoms as f64,
                })
                .collect::<Vec<_>>(),
            None => {
                let total: f64 = def.composition.iter().map(|(_, f)| f).sum();
                def.composition
                    .iter()
                    .map(|(element, f)| CompositionEntry {
                        element: *element,
                        fraction: f / total,
                    })
                    .collect()
            }
        };

        let mean_mass: f64 = composition
            .iter()
            .map(|c| c.fraction * c.element.mass_amu)
            .sum();
        let (density, number_density) = match (&structure, def.density) {
            (_, Some(density)) => (
                density,
                density / (mean_mass * AMU_G_PER_AA3_TO_G_PER_CM3),
            ),
            (Some(s), None) => {
                let number_density = s.n_atoms as f64 / s.volume;
                (
                    number_density * mean_mass * AMU_G_PER_AA3_TO_G_PER_CM3,
                    number_density,
                )
            }
            (None, None) => {
                return Err(BuildError::MissingInfo {
                    material: def.source.clone(),
                    what: "density",
                });
            }
        };

        let (hkl, dspacing_range) = match &structure {
            Some(s) if cfg.dcutoff() != -1.0 => {
                let lower = if cfg.dcutoff() == 0.0 {
                    AUTO_DCUTOFF_AA
                } else {
                    cfg.dcutoff()
                };
                let upper = cfg.dcutoffup();
                let planes = enumerate_hkl(s, &atoms, lower, upper, &def.source)?;
                if planes.is_empty() {
                    return Err(BuildError::NoBraggPlanes {
                        material: def.source.clone(),
                        dcutoff: lower,
                        dcutoffup: upper,
                    });
                }
                (planes, Some((lower, upper)))
            }
            _ => (Vec::new(), None),
        };

        let xsect_free = composition
            .iter()
            .map(|c| c.fraction * c.element.free_xs_barn())
            .sum();
        let xsect_absorption = composition
            .iter()
            .map(|c| c.fraction * c.element.abs_xs_barn)
            .sum();

        debug!(
            "Built info for '{}' ({} HKL families, density {:.4} g/cm3).",
            cfg.material(),
            hkl.len(),
            density
        );

        Ok(Self {
            material: cfg.material().to_string(),
            key: cfg.narrow_key(&Param::INFO),
            temperature: cfg.temperature(),
            debye_temperature: def.debye_temperature,
            density,
            number_density,
            composition,
            structure,
            atoms,
            hkl,
            dspacing_range,
            xsect_free,
            xsect_absorption,
        })
    }
}

fn cell_volume(lattice: [f64; 3], angles: [f64; 3]) -> f64 {
    let [a, b, c] = lattice;
    let [ca, cb, cg] = angles.map(|deg| deg.to_radians().cos());
    a * b * c * (1.0 - ca * ca - cb * cb - cg * cg + 2.0 * ca * cb * cg).sqrt()
}

fn is_orthogonal(s: &StructureInfo) -> bool {
    s.angles.iter().all(|a| (a - 90.0).abs() < 1e-9)
}

/// Enumerates reflection families with `lower <= d <= upper`, sorted by decreasing d.
///
/// Only orthogonal cells are handled; other lattices yield no planes.
fn enumerate_hkl(
    s: &StructureInfo,
    atoms: &[AtomInfo],
    lower: f64,
    upper: f64,
    source: &str,
) -> Result<Vec<HklPlane>, BuildError> {
    if !is_orthogonal(s) {
        debug!("Skipping HKL enumeration for non-orthogonal cell of '{}'.", source);
        return Ok(Vec::new());
    }
    let span = s.lattice.map(|len| (len / lower).floor());
    // Counted in f64 so huge cells cannot overflow the bound check.
    let candidates: f64 = span.iter().map(|m| 2.0 * m + 1.0).product();
    if !(candidates <= MAX_HKL_CANDIDATES) {
        return Err(BuildError::DCutoffTooSmall {
            material: source.to_string(),
            dcutoff: lower,
        });
    }
    let max_index = span.map(|m| m as i32);

    let inv_sq = s.lattice.map(|len| 1.0 / (len * len));
    // Families are keyed by (d, |F|^2) rounded to a fixed grid.
    let mut families: BTreeMap<(i64, i64), HklPlane> = BTreeMap::new();

    for h in -max_index[0]..=max_index[0] {
        for k in -max_index[1]..=max_index[1] {
            for l in -max_index[2]..=max_index[2] {
                if h == 0 && k == 0 && l == 0 {
                    continue;
                }
                let (hf, kf, lf) = (h as f64, k as f64, l as f64);
                let d = 1.0
                    / (hf * hf * inv_sq[0] + kf * kf * inv_sq[1] + lf * lf * inv_sq[2]).sqrt();
                if d < lower || d > upper {
                    continue;
                }
                let fsquared = structure_factor_squared(atoms, Vector3::new(hf, kf, lf));
                if fsquared < MIN_FSQUARED_BARN {
                    continue;
                }
                let family_key = (-(d * 1e8).round() as i64, (fsquared * 1e6).round() as i64);
                families
                    .entry(family_key)
                    .and_modify(|p| {
                        p.multiplicity += 1;
                        p.hkl = p.hkl.max([h, k, l]);
                    })
                    .or_insert(HklPlane {
                        hkl: [h, k, l],
                        dspacing: d,
                        multiplicity: 1,
                        fsquared,
                    });
            }
        }
    }
    Ok(families.into_values().collect())
}

fn structure_factor_squared(atoms: &[AtomInfo], hkl: Vector3<f64>) -> f64 {
    let (re, im) = atoms
        .iter()
        .flat_map(|a| a.positions.iter().map(move |p| (a.element, p)))
        .fold((0.0, 0.0), |(re, im), (element, pos)| {
            let phase = 2.0 * PI * hkl.dot(pos);
            (
                re + element.coh_scat_len_fm * phase.cos(),
                im + element.coh_scat_len_fm * phase.sin(),
            )
        });
    // fm^2 -> barn
    (re * re + im * im) / 100.0
}
