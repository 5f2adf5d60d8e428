use crate::core::material::Info;
use crate::core::models::absorption::OneOverVAbsorption;
use crate::core::models::scatter::{CompositeScatter, FreeGasScatter, PowderBraggScatter};
use crate::core::models::{BuildError, BuildRequest, Model, ModelKind, Scatter};
use std::sync::Arc;

/// The closed set of builders compiled into the library.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuiltinBuilder {
    /// Structural info from the bundled material format.
    StdNcmat,
    /// Powder Bragg diffraction plus free incoherent scattering; crystalline materials only.
    StdScat,
    FreeGas,
    Bragg,
    StdAbs,
}

impl BuiltinBuilder {
    pub const ALL: [BuiltinBuilder; 5] = [
        BuiltinBuilder::StdNcmat,
        BuiltinBuilder::StdScat,
        BuiltinBuilder::FreeGas,
        BuiltinBuilder::Bragg,
        BuiltinBuilder::StdAbs,
    ];

    pub fn name(self) -> &'static str {
        match self {
            BuiltinBuilder::StdNcmat => "stdncmat",
            BuiltinBuilder::StdScat => "stdscat",
            BuiltinBuilder::FreeGas => "freegas",
            BuiltinBuilder::Bragg => "bragg",
            BuiltinBuilder::StdAbs => "stdabs",
        }
    }

    pub fn kind(self) -> ModelKind {
        match self {
            BuiltinBuilder::StdNcmat => ModelKind::Info,
            BuiltinBuilder::StdScat | BuiltinBuilder::FreeGas | BuiltinBuilder::Bragg => {
                ModelKind::Scatter
            }
            BuiltinBuilder::StdAbs => ModelKind::Absorption,
        }
    }

    /// Whether this builder can serve the request when chosen by precedence rather than
    /// by explicit selection.
    pub fn accepts(self, request: &BuildRequest<'_>) -> bool {
        match self {
            BuiltinBuilder::StdScat => request.info.is_some_and(|i| i.structure.is_some()),
            BuiltinBuilder::Bragg => request.info.is_some_and(|i| i.has_hkl_info()),
            BuiltinBuilder::StdNcmat | BuiltinBuilder::FreeGas | BuiltinBuilder::StdAbs => true,
        }
    }

    pub fn build(self, request: &BuildRequest<'_>) -> Result<Model, BuildError> {
        match self {
            BuiltinBuilder::StdNcmat => {
                let def = request.materials.load(request.cfg.material())?;
                Ok(Model::Info(Arc::new(Info::build(&def, request.cfg)?)))
            }
            BuiltinBuilder::StdScat => {
                let info = request.require_info(self.name())?;
                if info.structure.is_none() {
                    return Err(self.unsupported(request, "material has no crystal structure"));
                }
                let mut components: Vec<Arc<dyn Scatter>> = Vec::with_capacity(2);
                if let Some(bragg) = PowderBraggScatter::from_info(info) {
                    components.push(Arc::new(bragg));
                }
                components.push(Arc::new(FreeGasScatter::from_info(info)));
                Ok(Model::Scatter(Arc::new(CompositeScatter::new(
                    self.name(),
                    components,
                ))))
            }
            BuiltinBuilder::FreeGas => {
                let info = request.require_info(self.name())?;
                Ok(Model::Scatter(Arc::new(FreeGasScatter::from_info(info))))
            }
            BuiltinBuilder::Bragg => {
                let info = request.require_info(self.name())?;
                let bragg = PowderBraggScatter::from_info(info)
                    .ok_or_else(|| self.unsupported(request, "material has no HKL planes"))?;
                Ok(Model::Scatter(Arc::new(bragg)))
            }
            BuiltinBuilder::StdAbs => {
                let info = request.require_info(self.name())?;
                Ok(Model::Absorption(Arc::new(OneOverVAbsorption::from_info(
                    info,
                ))))
            }
        }
    }

    fn unsupported(self, request: &BuildRequest<'_>, reason: &str) -> BuildError {
        BuildError::Unsupported {
            builder: self.name().to_string(),
            material: request.cfg.material().to_string(),
            reason: reason.to_string(),
        }
    }
}
