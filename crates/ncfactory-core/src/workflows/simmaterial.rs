use crate::core::cfg::{CacheKey, MatCfg};
use crate::core::elements::{self, Element};
use crate::core::material::Info;
use crate::core::models::Scatter;
use crate::engine::cache::{CacheStats, ObjectCache};
use crate::engine::derived::DerivedCache;
use crate::engine::{FactoryContext, FactoryError};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, instrument};

pub const BASE_DENSITY_G_CM3: f64 = 1.0;
pub const BASE_TEMPERATURE_K: f64 = 293.15;
const MATERIAL_PREFIX: &str = "ncfactory::";
const BASE_MATERIAL_PREFIX: &str = "ncfactory-base::";

#[derive(Debug, Error, Clone)]
pub enum SimMaterialError {
    #[error(transparent)]
    Factory(#[from] FactoryError),

    #[error("Material '{0}' has atom info describing an empty unit cell")]
    EmptyUnitCell(String),

    #[error("Material '{material}' lists element {element} more than once")]
    DuplicateElement {
        material: String,
        element: &'static str,
    },

    #[error("Material '{0}' lacks composition info")]
    MissingComposition(String),
}

/// How much of one element a base material contains.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ElementShare {
    /// Atoms per formula unit.
    Count(u32),
    MassFraction(f64),
}

/// A material shared by every configuration with the same chemical composition, at
/// reference density and temperature.
#[derive(Debug, Clone, PartialEq)]
pub struct BaseMaterial {
    pub name: String,
    /// Reduced formula in the Hill system, when integral atom counts are known.
    pub chemical_formula: Option<String>,
    pub density: f64,
    pub temperature: f64,
    pub elements: Vec<(&'static Element, ElementShare)>,
}

/// A simulation material: a base material specialized to one configuration.
#[derive(Debug, Clone)]
pub struct SimMaterial {
    pub name: String,
    /// Density in g/cm^3 after applying the packing factor.
    pub density: f64,
    pub temperature: f64,
    pub base: Arc<BaseMaterial>,
    pub info: Arc<Info>,
    pub scatter: Arc<dyn Scatter>,
}

/// Element counts of one formula unit, sorted by atomic number.
pub type ChemicalFormula = Vec<(&'static Element, u32)>;

/// The reduced chemical formula of `info`, or `None` when only fractional composition
/// is available.
pub fn chemical_formula(info: &Info) -> Result<Option<ChemicalFormula>, SimMaterialError> {
    if let [single] = info.composition.as_slice() {
        return Ok(Some(vec![(single.element, 1)]));
    }
    if !info.has_atom_info() {
        return Ok(None);
    }

    let mut formula: ChemicalFormula = info
        .atoms
        .iter()
        .filter(|atom| atom.count() > 0)
        .map(|atom| (atom.element, atom.count() as u32))
        .collect();
    let divisor = formula
        .iter()
        .map(|(_, count)| *count)
        .reduce(gcd)
        .ok_or_else(|| SimMaterialError::EmptyUnitCell(info.material.clone()))?;
    for (_, count) in &mut formula {
        *count /= divisor;
    }
    formula.sort_by_key(|(element, _)| element.z);
    if let Some(pair) = formula.windows(2).find(|w| w[0].0.z == w[1].0.z) {
        return Err(SimMaterialError::DuplicateElement {
            material: info.material.clone(),
            element: pair[0].0.symbol,
        });
    }
    Ok(Some(formula))
}

fn gcd(mut a: u32, mut b: u32) -> u32 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

/// Renders a formula in the Hill system: with carbon present C, H and D lead in that
/// order, and all other elements follow alphabetically.
pub fn hill_formula(formula: &[(&'static Element, u32)]) -> String {
    let any_carbon = formula.iter().any(|(element, _)| element.z == 6);
    let mut parts: Vec<(String, String)> = formula
        .iter()
        .map(|(element, count)| {
            let sort_key = match element.z {
                6 if any_carbon => "1".to_string(),
                1 if any_carbon => "2".to_string(),
                elements::DEUTERIUM_Z if any_carbon => "3".to_string(),
                _ => element.symbol.to_string(),
            };
            let text = if *count == 1 {
                element.symbol.to_string()
            } else {
                format!("{}{}", element.symbol, count)
            };
            (sort_key, text)
        })
        .collect();
    parts.sort();
    parts.into_iter().map(|(_, text)| text).collect()
}

/// Identity of the base material of `info`: the Hill formula when known, otherwise the
/// composition fractions.
fn base_identity(info: &Info) -> Result<(String, Option<ChemicalFormula>), SimMaterialError> {
    if let Some(formula) = chemical_formula(info)? {
        return Ok((hill_formula(&formula), Some(formula)));
    }
    if info.composition.is_empty() {
        return Err(SimMaterialError::MissingComposition(info.material.clone()));
    }
    let key: String = info
        .composition
        .iter()
        .map(|entry| format!("_{}_{}", entry.element.symbol, entry.fraction))
        .collect();
    Ok((key, None))
}

impl BaseMaterial {
    fn build(identity: &str, formula: Option<&ChemicalFormula>, info: &Info) -> Self {
        let elements = match formula {
            Some(formula) => formula
                .iter()
                .map(|(element, count)| (*element, ElementShare::Count(*count)))
                .collect(),
            None => {
                let masses: Vec<_> = info
                    .composition
                    .iter()
                    .map(|entry| (entry.element, entry.fraction * entry.element.mass_amu))
                    .collect();
                let total: f64 = masses.iter().map(|(_, m)| m).sum();
                masses
                    .into_iter()
                    .map(|(element, m)| (element, ElementShare::MassFraction(m / total)))
                    .collect()
            }
        };
        Self {
            name: format!("{}{}", BASE_MATERIAL_PREFIX, identity),
            chemical_formula: formula.map(|_| identity.to_string()),
            density: BASE_DENSITY_G_CM3,
            temperature: BASE_TEMPERATURE_K,
            elements,
        }
    }
}

/// Builds simulation materials with two cache levels: one entry per full configuration,
/// and one shared base material per chemical composition.
pub struct SimMaterialFactory<'ctx> {
    context: &'ctx FactoryContext,
    materials: ObjectCache<SimMaterial, SimMaterialError>,
    bases: DerivedCache<BaseMaterial, SimMaterialError>,
}

impl<'ctx> SimMaterialFactory<'ctx> {
    pub fn new(context: &'ctx FactoryContext) -> Self {
        Self {
            context,
            materials: ObjectCache::new("simmaterial"),
            bases: DerivedCache::new("simmaterial-base"),
        }
    }

    pub fn create(&self, cfg: &str) -> Result<Arc<SimMaterial>, SimMaterialError> {
        let cfg = MatCfg::parse(cfg).map_err(FactoryError::from)?;
        self.create_from(&cfg)
    }

    pub fn create_from(&self, cfg: &MatCfg) -> Result<Arc<SimMaterial>, SimMaterialError> {
        let key = cfg.canonical();
        self.materials.get_or_build(&key, || self.build(&key, cfg))
    }

    #[instrument(skip_all, name = "sim_material", fields(key = %key))]
    fn build(&self, key: &CacheKey, cfg: &MatCfg) -> Result<Arc<SimMaterial>, SimMaterialError> {
        let scatter = self.context.create_scatter_from(cfg)?;
        let info = self.context.create_info_from(cfg)?;
        let (identity, formula) = base_identity(&info)?;

        let material = self.bases.get_or_build_derived(
            &CacheKey::new(identity.clone()),
            info.as_ref(),
            |source| {
                info!("Creating base material for composition {}.", identity);
                Ok(Arc::new(BaseMaterial::build(&identity, formula.as_ref(), source)))
            },
            |base, source| {
                Ok(SimMaterial {
                    name: format!("{}{}", MATERIAL_PREFIX, key),
                    density: cfg.packfact() * source.density,
                    temperature: source.temperature,
                    base,
                    info: Arc::clone(&info),
                    scatter,
                })
            },
        )?;
        Ok(Arc::new(material))
    }

    pub fn material_stats(&self) -> CacheStats {
        self.materials.stats()
    }

    pub fn base_stats(&self) -> CacheStats {
        self.bases.stats()
    }
}
