use super::abi::{
    NCF_KIND_ABSORPTION, NCF_KIND_SCATTER, NCF_OK, NcfBuildRequest, NcfCalculator,
    NcfCrossSectionFn, NcfDestroyFn, NcfFactoryFn, NcfStr,
};
use crate::core::models::{Absorption, BuildError, BuildRequest, Model, ModelKind, Scatter};
use libloading::Library;
use std::ffi::c_void;
use std::fmt;
use std::sync::Arc;

/// A builder provided through the C ABI, keeping its library loaded while referenced.
#[derive(Clone)]
pub struct DynamicBuilder {
    name: String,
    kind: ModelKind,
    factory: NcfFactoryFn,
    library: Option<Arc<Library>>,
}

impl fmt::Debug for DynamicBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DynamicBuilder")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("loaded_library", &self.library.is_some())
            .finish()
    }
}

pub(crate) fn kind_from_abi(kind: u32) -> Option<ModelKind> {
    match kind {
        NCF_KIND_SCATTER => Some(ModelKind::Scatter),
        NCF_KIND_ABSORPTION => Some(ModelKind::Absorption),
        _ => None,
    }
}

impl DynamicBuilder {
    pub(crate) fn new(
        name: String,
        kind: ModelKind,
        factory: NcfFactoryFn,
        library: Option<Arc<Library>>,
    ) -> Self {
        Self {
            name,
            kind,
            factory,
            library,
        }
    }

    pub fn build(&self, request: &BuildRequest<'_>) -> Result<Model, BuildError> {
        let info = request.require_info(&self.name)?;
        let cfg = request.cfg.canonical();
        let abi_request = NcfBuildRequest {
            cfg: NcfStr::new(cfg.as_str()),
            material: NcfStr::new(&info.material),
            temperature: info.temperature,
            packfact: request.cfg.packfact(),
            density: info.density,
            number_density: info.number_density,
            xsect_free: info.xsect_free,
            xsect_absorption: info.xsect_absorption,
        };
        let mut out = NcfCalculator::empty();

        let status = unsafe { (self.factory)(&abi_request, &mut out) };
        let calculator = PluginCalculator {
            name: self.name.clone(),
            state: out.state,
            cross_section: out.cross_section,
            destroy: out.destroy,
            _library: self.library.clone(),
        };
        if status != NCF_OK {
            return Err(BuildError::Plugin {
                builder: self.name.clone(),
                status,
            });
        }
        if calculator.cross_section.is_none() {
            return Err(BuildError::Unsupported {
                builder: self.name.clone(),
                material: request.cfg.material().to_string(),
                reason: "plugin factory returned no cross-section function".to_string(),
            });
        }

        let calculator = Arc::new(calculator);
        Ok(match self.kind {
            ModelKind::Absorption => Model::Absorption(calculator),
            ModelKind::Scatter | ModelKind::Info => Model::Scatter(calculator),
        })
    }
}

/// A calculator whose state lives inside a plugin library.
struct PluginCalculator {
    name: String,
    state: *mut c_void,
    cross_section: Option<NcfCrossSectionFn>,
    destroy: Option<NcfDestroyFn>,
    // Dropped after `destroy` has run in `Drop::drop`.
    _library: Option<Arc<Library>>,
}

// The ABI requires calculator state to be immutable or internally synchronized.
unsafe impl Send for PluginCalculator {}
unsafe impl Sync for PluginCalculator {}

impl PluginCalculator {
    fn evaluate(&self, ekin_ev: f64) -> f64 {
        match self.cross_section {
            Some(f) => unsafe { f(self.state, ekin_ev) },
            None => 0.0,
        }
    }
}

impl fmt::Debug for PluginCalculator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginCalculator")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl Drop for PluginCalculator {
    fn drop(&mut self) {
        if let Some(destroy) = self.destroy {
            unsafe { destroy(self.state) };
        }
    }
}

impl Scatter for PluginCalculator {
    fn name(&self) -> &str {
        &self.name
    }

    fn cross_section(&self, ekin_ev: f64) -> f64 {
        self.evaluate(ekin_ev)
    }
}

impl Absorption for PluginCalculator {
    fn name(&self) -> &str {
        &self.name
    }

    fn cross_section(&self, ekin_ev: f64) -> f64 {
        self.evaluate(ekin_ev)
    }
}
