use super::cache::{CacheStats, ObjectCache};
use super::config::FactoryConfig;
use super::error::FactoryError;
use super::factory::Dispatcher;
use crate::core::cfg::{MatCfg, Param};
use crate::core::material::{Info, MaterialDb};
use crate::core::models::{Absorption, Scatter};
use crate::core::registry::{PluginLoader, PluginRegistry};
use std::sync::{Arc, OnceLock};
use tracing::{debug, warn};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// The three objects a configuration resolves to.
#[derive(Debug, Clone)]
pub struct LoadedMaterial {
    pub info: Arc<Info>,
    pub scatter: Arc<dyn Scatter>,
    pub absorption: Arc<dyn Absorption>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FactoryStats {
    pub info: CacheStats,
    pub scatter: CacheStats,
    pub absorption: CacheStats,
}

/// Process state of the factory: the builder registry and one cache per object kind.
///
/// Built-in builders are registered by [`FactoryContext::new`], so a context is usable
/// as soon as it exists. Contexts are independent; [`FactoryContext::global`] provides a
/// shared one for callers that do not manage their own.
pub struct FactoryContext {
    config: FactoryConfig,
    dispatcher: Dispatcher,
    infos: ObjectCache<Info, FactoryError>,
    scatters: ObjectCache<dyn Scatter, FactoryError>,
    absorptions: ObjectCache<dyn Absorption, FactoryError>,
}

static GLOBAL: OnceLock<FactoryContext> = OnceLock::new();

impl FactoryContext {
    pub fn new(config: FactoryConfig) -> Self {
        let loader = config
            .plugins
            .enabled
            .then(|| PluginLoader::new(config.plugins.search_paths.clone()));
        let registry = Arc::new(PluginRegistry::with_builtins(loader));
        let materials = MaterialDb::new(config.materials.search_paths.clone());
        let dispatcher = Dispatcher::new(registry, materials, config.policy.clone());
        debug!(
            "Factory context ready with {} registered builders.",
            dispatcher.registry().list().len()
        );
        Self {
            config,
            dispatcher,
            infos: ObjectCache::new("info"),
            scatters: ObjectCache::new("scatter"),
            absorptions: ObjectCache::new("absorption"),
        }
    }

    /// The process-wide context, configured from the environment on first use.
    ///
    /// An unreadable `NCFACTORY_CONFIG` is logged and the defaults are used instead.
    pub fn global() -> &'static FactoryContext {
        GLOBAL.get_or_init(|| {
            let config = FactoryConfig::from_env().unwrap_or_else(|e| {
                warn!("Ignoring factory configuration from the environment: {}", e);
                FactoryConfig::default()
            });
            FactoryContext::new(config)
        })
    }

    pub fn config(&self) -> &FactoryConfig {
        &self.config
    }

    pub fn registry(&self) -> &PluginRegistry {
        self.dispatcher.registry()
    }

    pub fn create_info(&self, cfg: &str) -> Result<Arc<Info>, FactoryError> {
        self.create_info_from(&MatCfg::parse(cfg)?)
    }

    pub fn create_info_from(&self, cfg: &MatCfg) -> Result<Arc<Info>, FactoryError> {
        let key = cfg.narrow_key(&Param::INFO);
        self.infos
            .get_or_build(&key, || self.dispatcher.build_info(&key, cfg))
    }

    pub fn create_scatter(&self, cfg: &str) -> Result<Arc<dyn Scatter>, FactoryError> {
        self.create_scatter_from(&MatCfg::parse(cfg)?)
    }

    pub fn create_scatter_from(&self, cfg: &MatCfg) -> Result<Arc<dyn Scatter>, FactoryError> {
        let key = cfg.narrow_key(&Param::SCATTER);
        self.scatters.get_or_build(&key, || {
            let info = self.create_info_from(cfg)?;
            self.dispatcher.build_scatter(&key, cfg, &info)
        })
    }

    pub fn create_absorption(&self, cfg: &str) -> Result<Arc<dyn Absorption>, FactoryError> {
        self.create_absorption_from(&MatCfg::parse(cfg)?)
    }

    pub fn create_absorption_from(
        &self,
        cfg: &MatCfg,
    ) -> Result<Arc<dyn Absorption>, FactoryError> {
        // The builder only sees what the key holds, so no other parameter can leak
        // into a shared entry.
        let cfg = cfg.project(&Param::ABSORPTION);
        let key = cfg.canonical();
        self.absorptions.get_or_build(&key, || {
            let info = self.create_info_from(&cfg)?;
            self.dispatcher.build_absorption(&key, &cfg, &info)
        })
    }

    /// Resolves the info, scatter and absorption objects of one configuration.
    pub fn load(&self, cfg: &str) -> Result<LoadedMaterial, FactoryError> {
        self.load_from(&MatCfg::parse(cfg)?)
    }

    pub fn load_from(&self, cfg: &MatCfg) -> Result<LoadedMaterial, FactoryError> {
        Ok(LoadedMaterial {
            info: self.create_info_from(cfg)?,
            scatter: self.create_scatter_from(cfg)?,
            absorption: self.create_absorption_from(cfg)?,
        })
    }

    pub fn stats(&self) -> FactoryStats {
        FactoryStats {
            info: self.infos.stats(),
            scatter: self.scatters.stats(),
            absorption: self.absorptions.stats(),
        }
    }

    /// Drops cached objects no caller holds any more; memoized failures are kept.
    pub fn sweep_unreferenced(&self) -> usize {
        // A calculator may keep its info object alive, so calculators go first.
        self.scatters.sweep_unreferenced()
            + self.absorptions.sweep_unreferenced()
            + self.infos.sweep_unreferenced()
    }

    /// Resolves many configurations on the rayon pool, in input order.
    #[cfg(feature = "parallel")]
    pub fn preload(&self, cfgs: &[&str]) -> Vec<Result<LoadedMaterial, FactoryError>> {
        cfgs.par_iter().map(|cfg| self.load(cfg)).collect()
    }
}
