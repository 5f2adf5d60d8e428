use crate::core::elements::{self, Element};
use phf::{Map, phf_map};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

static EMBEDDED: Map<&'static str, &'static str> = phf_map! {
    "Al_sg225.ncmat" => include_str!("../../../data/Al_sg225.ncmat"),
    "Cu_sg225.ncmat" => include_str!("../../../data/Cu_sg225.ncmat"),
    "NaCl_sg225.ncmat" => include_str!("../../../data/NaCl_sg225.ncmat"),
    "Polyethylene_CH2.ncmat" => include_str!("../../../data/Polyethylene_CH2.ncmat"),
    "HeavyWater_D2O.ncmat" => include_str!("../../../data/HeavyWater_D2O.ncmat"),
};

#[derive(Debug, Error)]
pub enum MaterialLoadError {
    #[error("Material '{0}' was not found in the embedded data or any search directory")]
    NotFound(String),
    #[error("File I/O error for '{path}': {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("TOML parsing error for '{path}': {source}")]
    Toml {
        path: String,
        source: toml::de::Error,
    },
    #[error("Unknown element '{element}' in material '{path}'")]
    UnknownElement { path: String, element: String },
    #[error("Invalid material definition '{path}': {reason}")]
    Invalid { path: String, reason: String },
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct StructureDef {
    pub spacegroup: u32,
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub alpha: f64,
    pub beta: f64,
    pub gamma: f64,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct AtomDef {
    pub element: String,
    pub positions: Vec<[f64; 3]>,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct CompositionDef {
    pub element: String,
    pub fraction: f64,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
struct RawMaterialDef {
    density: Option<f64>,
    debye_temperature: Option<f64>,
    structure: Option<StructureDef>,
    #[serde(default)]
    atoms: Vec<AtomDef>,
    #[serde(default)]
    composition: Vec<CompositionDef>,
}

/// A validated material definition with elements resolved against the element table.
#[derive(Debug, Clone, PartialEq)]
pub struct MaterialDef {
    pub source: String,
    pub density: Option<f64>,
    pub debye_temperature: Option<f64>,
    pub structure: Option<StructureDef>,
    pub atoms: Vec<(&'static Element, Vec<[f64; 3]>)>,
    pub composition: Vec<(&'static Element, f64)>,
}

impl MaterialDef {
    pub fn parse(source: &str, text: &str) -> Result<Self, MaterialLoadError> {
        let raw: RawMaterialDef = toml::from_str(text).map_err(|e| MaterialLoadError::Toml {
            path: source.to_string(),
            source: e,
        })?;
        let invalid = |reason: &str| MaterialLoadError::Invalid {
            path: source.to_string(),
            reason: reason.to_string(),
        };
        let element = |symbol: &str| {
            elements::lookup(symbol).ok_or_else(|| MaterialLoadError::UnknownElement {
                path: source.to_string(),
                element: symbol.to_string(),
            })
        };

        let atoms = raw
            .atoms
            .into_iter()
            .map(|a| Ok((element(&a.element)?, a.positions)))
            .collect::<Result<Vec<_>, MaterialLoadError>>()?;
        let composition = raw
            .composition
            .into_iter()
            .map(|c| Ok((element(&c.element)?, c.fraction)))
            .collect::<Result<Vec<_>, MaterialLoadError>>()?;

        match (&raw.structure, atoms.is_empty(), composition.is_empty()) {
            (Some(_), false, true) => {}
            (None, true, false) => {
                if raw.density.is_none() {
                    return Err(invalid("composition-only materials must specify a density"));
                }
            }
            (Some(_), true, _) => return Err(invalid("structure given without atoms")),
            (None, false, _) => return Err(invalid("atoms given without structure")),
            (Some(_), false, false) => {
                return Err(invalid("atoms and composition are mutually exclusive"));
            }
            (None, true, true) => return Err(invalid("no atoms or composition")),
        }
        if atoms.iter().any(|(_, p)| p.is_empty()) {
            return Err(invalid("atom entry without positions"));
        }
        if composition.iter().any(|(_, f)| !(*f > 0.0 && *f <= 1.0)) {
            return Err(invalid("composition fractions must be in (0, 1]"));
        }
        if let Some(s) = &raw.structure {
            if [s.a, s.b, s.c, s.alpha, s.beta, s.gamma]
                .iter()
                .any(|v| !(*v > 0.0))
            {
                return Err(invalid("lattice parameters must be positive"));
            }
        }
        if raw.density.is_some_and(|d| !(d > 0.0)) {
            return Err(invalid("density must be positive"));
        }

        Ok(Self {
            source: source.to_string(),
            density: raw.density,
            debye_temperature: raw.debye_temperature,
            structure: raw.structure,
            atoms,
            composition,
        })
    }
}

/// Resolves material references to definitions.
///
/// Embedded materials take precedence, then the reference as a path, then the
/// reference joined onto each configured search directory in order.
#[derive(Debug, Clone, Default)]
pub struct MaterialDb {
    search_paths: Vec<PathBuf>,
}

impl MaterialDb {
    pub fn new(search_paths: Vec<PathBuf>) -> Self {
        Self { search_paths }
    }

    pub fn embedded_names() -> impl Iterator<Item = &'static str> {
        EMBEDDED.keys().copied()
    }

    pub fn load(&self, reference: &str) -> Result<MaterialDef, MaterialLoadError> {
        if let Some(text) = EMBEDDED.get(reference) {
            debug!("Using embedded material data for '{}'.", reference);
            return MaterialDef::parse(reference, text);
        }

        let path = self
            .candidates(reference)
            .find(|p| p.is_file())
            .ok_or_else(|| MaterialLoadError::NotFound(reference.to_string()))?;
        debug!("Loading material '{}' from {}.", reference, path.display());
        let text = std::fs::read_to_string(&path).map_err(|e| MaterialLoadError::Io {
            path: path.to_string_lossy().to_string(),
            source: e,
        })?;
        MaterialDef::parse(&path.to_string_lossy(), &text)
    }

    fn candidates<'a>(&'a self, reference: &'a str) -> impl Iterator<Item = PathBuf> + 'a {
        let direct = Path::new(reference);
        std::iter::once(direct.to_path_buf()).chain(
            self.search_paths
                .iter()
                .filter(move |_| direct.is_relative())
                .map(move |dir| dir.join(reference)),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn embedded_materials_all_parse() {
        let db = MaterialDb::default();
        for name in MaterialDb::embedded_names() {
            db.load(name)
                .unwrap_or_else(|e| panic!("embedded material {name} failed: {e}"));
        }
    }

    #[test]
    fn search_paths_are_consulted_in_order() {
        let first = tempdir().unwrap();
        let second = tempdir().unwrap();
        fs::write(
            second.path().join("Gas.ncmat"),
            "density = 0.001\n[[composition]]\nelement = \"N\"\nfraction = 1.0\n",
        )
        .unwrap();

        let db = MaterialDb::new(vec![first.path().to_path_buf(), second.path().to_path_buf()]);
        let def = db.load("Gas.ncmat").unwrap();
        assert_eq!(def.density, Some(0.001));
        assert_eq!(def.composition[0].0.symbol, "N");
        assert!(def.source.ends_with("Gas.ncmat"));
    }

    #[test]
    fn missing_material_is_reported() {
        let db = MaterialDb::default();
        assert!(matches!(
            db.load("Nope.ncmat"),
            Err(MaterialLoadError::NotFound(name)) if name == "Nope.ncmat"
        ));
    }

    #[test]
    fn unknown_elements_and_bad_layouts_are_rejected() {
        let err = MaterialDef::parse(
            "x",
            "density = 1.0\n[[composition]]\nelement = \"Xx\"\nfraction = 1.0\n",
        )
        .unwrap_err();
        assert!(matches!(err, MaterialLoadError::UnknownElement { element, .. } if element == "Xx"));

        let err = MaterialDef::parse("x", "[[composition]]\nelement = \"C\"\nfraction = 1.0\n")
            .unwrap_err();
        assert!(matches!(err, MaterialLoadError::Invalid { .. }));

        let err = MaterialDef::parse("x", "density = [1").unwrap_err();
        assert!(matches!(err, MaterialLoadError::Toml { .. }));
    }
}
