use super::config::{Selection, SelectionPolicy};
use super::error::FactoryError;
use crate::core::cfg::{CacheKey, MatCfg};
use crate::core::material::{Info, MaterialDb};
use crate::core::models::{Absorption, BuildError, BuildRequest, Model, ModelKind, Scatter};
use crate::core::registry::{PluginRegistry, Registration, RegistryError};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{info, instrument};

/// Chooses a builder for a configuration and runs it.
///
/// The dispatcher holds no cache of its own; callers invoke it only on a cache miss.
#[derive(Debug)]
pub struct Dispatcher {
    registry: Arc<PluginRegistry>,
    materials: MaterialDb,
    policy: SelectionPolicy,
}

impl Dispatcher {
    pub fn new(registry: Arc<PluginRegistry>, materials: MaterialDb, policy: SelectionPolicy) -> Self {
        Self {
            registry,
            materials,
            policy,
        }
    }

    pub fn registry(&self) -> &Arc<PluginRegistry> {
        &self.registry
    }

    pub fn policy(&self) -> &SelectionPolicy {
        &self.policy
    }

    #[instrument(skip_all, name = "build_info", fields(key = %key))]
    pub fn build_info(&self, key: &CacheKey, cfg: &MatCfg) -> Result<Arc<Info>, FactoryError> {
        match self.dispatch(ModelKind::Info, key, cfg, None)? {
            Model::Info(info) => Ok(info),
            other => Err(self.wrong_kind(ModelKind::Info, key, &other)),
        }
    }

    #[instrument(skip_all, name = "build_scatter", fields(key = %key))]
    pub fn build_scatter(
        &self,
        key: &CacheKey,
        cfg: &MatCfg,
        info: &Arc<Info>,
    ) -> Result<Arc<dyn Scatter>, FactoryError> {
        match self.dispatch(ModelKind::Scatter, key, cfg, Some(info))? {
            Model::Scatter(scatter) => Ok(scatter),
            other => Err(self.wrong_kind(ModelKind::Scatter, key, &other)),
        }
    }

    #[instrument(skip_all, name = "build_absorption", fields(key = %key))]
    pub fn build_absorption(
        &self,
        key: &CacheKey,
        cfg: &MatCfg,
        info: &Arc<Info>,
    ) -> Result<Arc<dyn Absorption>, FactoryError> {
        match self.dispatch(ModelKind::Absorption, key, cfg, Some(info))? {
            Model::Absorption(absorption) => Ok(absorption),
            other => Err(self.wrong_kind(ModelKind::Absorption, key, &other)),
        }
    }

    fn dispatch(
        &self,
        kind: ModelKind,
        key: &CacheKey,
        cfg: &MatCfg,
        info: Option<&Arc<Info>>,
    ) -> Result<Model, FactoryError> {
        let request = BuildRequest {
            cfg,
            info,
            materials: &self.materials,
        };
        let registration = self.select(kind, key, &request)?;
        info!("Constructing {} object with builder '{}'.", kind, registration.name);

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| registration.build(&request)))
            .unwrap_or_else(|payload| {
                Err(BuildError::Panicked {
                    builder: registration.name.clone(),
                    message: panic_message(payload.as_ref()),
                })
            });
        outcome.map_err(|e| FactoryError::construction(kind, key, e))
    }

    /// Picks the registration serving `request`: the explicitly named family if there
    /// is one, otherwise the first family in policy order that accepts the request.
    pub fn select(
        &self,
        kind: ModelKind,
        key: &CacheKey,
        request: &BuildRequest<'_>,
    ) -> Result<Arc<Registration>, FactoryError> {
        let families = match self.policy.select(kind, request.cfg) {
            Selection::Explicit(name) => return Ok(self.registry.resolve_kind(name, kind)?),
            Selection::Ordered(families) => families,
        };
        if families.is_empty() {
            let ext = request.cfg.extension().unwrap_or_default();
            return Err(RegistryError::UnknownBuilder(format!("{kind} builder for '.{ext}' files")).into());
        }
        for family in &families {
            let registration = self.registry.resolve_kind(family, kind)?;
            if registration.accepts(request) {
                return Ok(registration);
            }
        }
        Err(FactoryError::construction(
            kind,
            key,
            BuildError::Unsupported {
                builder: families.join(","),
                material: request.cfg.material().to_string(),
                reason: format!("no {} family in [{}] accepts it", kind, families.join(", ")),
            },
        ))
    }

    fn wrong_kind(&self, expected: ModelKind, key: &CacheKey, model: &Model) -> FactoryError {
        FactoryError::construction(
            expected,
            key,
            BuildError::Unsupported {
                builder: "dispatcher".to_string(),
                material: key.as_str().to_string(),
                reason: format!("received a {} object", model.kind()),
            },
        )
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::scatter::FreeGasScatter;

    fn dispatcher(policy: SelectionPolicy) -> Dispatcher {
        Dispatcher::new(
            Arc::new(PluginRegistry::with_builtins(None)),
            MaterialDb::default(),
            policy,
        )
    }

    fn parsed(raw: &str) -> (CacheKey, MatCfg) {
        let cfg = MatCfg::parse(raw).unwrap();
        (cfg.canonical(), cfg)
    }

    #[test]
    fn default_policy_builds_bragg_for_crystals_and_free_gas_otherwise() {
        let d = dispatcher(SelectionPolicy::default());

        let (key, cfg) = parsed("Al_sg225.ncmat");
        let info = d.build_info(&key, &cfg).unwrap();
        assert_eq!(d.build_scatter(&key, &cfg, &info).unwrap().name(), "stdscat");

        let (key, cfg) = parsed("Polyethylene_CH2.ncmat");
        let info = d.build_info(&key, &cfg).unwrap();
        assert_eq!(d.build_scatter(&key, &cfg, &info).unwrap().name(), "freegas");
        assert_eq!(d.build_absorption(&key, &cfg, &info).unwrap().name(), "stdabs");
    }

    #[test]
    fn explicit_family_bypasses_acceptance() {
        let d = dispatcher(SelectionPolicy::default());
        let (key, cfg) = parsed("Polyethylene_CH2.ncmat;scatfactory=bragg");
        let info = d.build_info(&key, &cfg).unwrap();
        let err = d.build_scatter(&key, &cfg, &info).unwrap_err();
        assert!(matches!(err.build_error(), Some(BuildError::Unsupported { .. })));
    }

    #[test]
    fn nothing_accepting_is_a_construction_error() {
        let policy = SelectionPolicy {
            scatter: vec!["bragg".to_string()],
            ..SelectionPolicy::default()
        };
        let d = dispatcher(policy);
        let (key, cfg) = parsed("Polyethylene_CH2.ncmat");
        let info = d.build_info(&key, &cfg).unwrap();
        let err = d.build_scatter(&key, &cfg, &info).unwrap_err();
        assert!(matches!(err, FactoryError::ModelConstruction { kind: ModelKind::Scatter, .. }));
    }

    #[test]
    fn unmapped_extension_and_unknown_family_are_unknown_builders() {
        let d = dispatcher(SelectionPolicy::default());
        let (key, cfg) = parsed("Al.xyz");
        assert!(d.build_info(&key, &cfg).unwrap_err().is_unknown_builder());

        let (key, cfg) = parsed("Al_sg225.ncmat;scatfactory=nosuchthing");
        let info = d.build_info(&key, &cfg).unwrap();
        assert!(d.build_scatter(&key, &cfg, &info).unwrap_err().is_unknown_builder());
    }

    #[test]
    fn explicit_family_of_the_wrong_kind_is_rejected() {
        let d = dispatcher(SelectionPolicy::default());
        let (key, cfg) = parsed("Al_sg225.ncmat;scatfactory=stdabs");
        let info = d.build_info(&key, &cfg).unwrap();
        let err = d.build_scatter(&key, &cfg, &info).unwrap_err();
        assert!(matches!(
            err,
            FactoryError::Registry(RegistryError::KindMismatch { .. })
        ));
    }

    #[test]
    fn panicking_builder_becomes_a_construction_error() {
        let d = dispatcher(SelectionPolicy::default());
        d.registry()
            .register_native("explosive", ModelKind::Scatter, |_| panic!("kaboom"))
            .unwrap();
        let (key, cfg) = parsed("Al_sg225.ncmat;scatfactory=explosive");
        let info = d.build_info(&key, &cfg).unwrap();
        let err = d.build_scatter(&key, &cfg, &info).unwrap_err();
        match err.build_error() {
            Some(BuildError::Panicked { builder, message }) => {
                assert_eq!(builder, "explosive");
                assert_eq!(message, "kaboom");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn native_builders_take_part_in_precedence() {
        let policy = SelectionPolicy {
            scatter: vec!["constant".to_string(), "stdscat".to_string()],
            ..SelectionPolicy::default()
        };
        let d = dispatcher(policy);
        d.registry()
            .register_native("constant", ModelKind::Scatter, |request| {
                let info = request.require_info("constant")?;
                Ok(Model::Scatter(Arc::new(FreeGasScatter::from_info(info))))
            })
            .unwrap();
        let (key, cfg) = parsed("Al_sg225.ncmat");
        let info = d.build_info(&key, &cfg).unwrap();
        assert_eq!(d.build_scatter(&key, &cfg, &info).unwrap().name(), "freegas");
    }
}
