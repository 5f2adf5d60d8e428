//! # Registry Module
//!
//! The table of model builders, keyed by a case-insensitive family name.
//!
//! Builders come in three forms that are kept apart rather than folded into one trait
//! hierarchy:
//!
//! - [`BuiltinBuilder`] - the closed set compiled into the library, registered first.
//! - Native builders - Rust closures registered in-process at runtime.
//! - [`DynamicBuilder`] - C function pointers registered by a plugin library through the
//!   [`abi`] contract, either loaded on demand by the [`PluginLoader`] or installed
//!   directly from a statically linked entry point.
//!
//! Lookups take a shared lock; registration and plugin loading are rare and take the
//! exclusive lock only for the insert. A failed plugin load is remembered per name and
//! never retried.

pub mod abi;
pub mod builtin;
pub mod dynamic;
pub mod loader;

use crate::core::models::{BuildError, BuildRequest, Model, ModelKind};
use abi::{NCF_ERR_ABI, NCF_ERR_DUPLICATE, NCF_ERR_INVALID, NCF_OK, NCF_PLUGIN_ABI_VERSION};
use abi::{NcfFactoryFn, NcfHost, NcfPluginEntryFn, NcfStr};
pub use builtin::BuiltinBuilder;
pub use dynamic::DynamicBuilder;
use libloading::Library;
pub use loader::PluginLoader;
use std::collections::HashMap;
use std::ffi::c_void;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum RegistryError {
    #[error("A builder named '{0}' is already registered")]
    DuplicateName(String),

    #[error("No builder named '{0}' is registered")]
    UnknownBuilder(String),

    #[error("Failed to load plugin '{name}': {reason}")]
    PluginLoad {
        name: String,
        path: Option<PathBuf>,
        reason: String,
    },

    #[error("Builder '{name}' produces {actual} models, but a {expected} model was requested")]
    KindMismatch {
        name: String,
        expected: ModelKind,
        actual: ModelKind,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Origin {
    Builtin,
    Native,
    Dynamic { path: PathBuf },
}

/// Signature of an in-process Rust builder.
pub type NativeBuildFn = dyn Fn(&BuildRequest<'_>) -> Result<Model, BuildError> + Send + Sync;

#[derive(Clone)]
pub enum BuilderImpl {
    Builtin(BuiltinBuilder),
    Native(Arc<NativeBuildFn>),
    Dynamic(DynamicBuilder),
}

impl fmt::Debug for BuilderImpl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuilderImpl::Builtin(b) => f.debug_tuple("Builtin").field(b).finish(),
            BuilderImpl::Native(_) => f.write_str("Native(..)"),
            BuilderImpl::Dynamic(d) => f.debug_tuple("Dynamic").field(d).finish(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Registration {
    pub name: String,
    pub kind: ModelKind,
    pub origin: Origin,
    builder: BuilderImpl,
}

impl Registration {
    pub fn accepts(&self, request: &BuildRequest<'_>) -> bool {
        match &self.builder {
            BuilderImpl::Builtin(b) => b.accepts(request),
            BuilderImpl::Native(_) | BuilderImpl::Dynamic(_) => true,
        }
    }

    /// Runs the builder and checks that it produced the kind it was registered for.
    pub fn build(&self, request: &BuildRequest<'_>) -> Result<Model, BuildError> {
        let model = match &self.builder {
            BuilderImpl::Builtin(b) => b.build(request)?,
            BuilderImpl::Native(f) => f(request)?,
            BuilderImpl::Dynamic(d) => d.build(request)?,
        };
        if model.kind() != self.kind {
            return Err(BuildError::Unsupported {
                builder: self.name.clone(),
                material: request.cfg.material().to_string(),
                reason: format!(
                    "builder returned a {} model instead of {}",
                    model.kind(),
                    self.kind
                ),
            });
        }
        Ok(model)
    }
}

#[derive(Debug)]
pub struct PluginRegistry {
    entries: RwLock<HashMap<String, Arc<Registration>>>,
    loader: Option<PluginLoader>,
    failed_loads: Mutex<HashMap<String, RegistryError>>,
    // Serializes dynamic loads so one library is never opened twice for the same miss.
    load_lock: Mutex<()>,
}

impl PluginRegistry {
    /// An empty registry. Dynamic loading is enabled iff `loader` is given.
    pub fn new(loader: Option<PluginLoader>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            loader,
            failed_loads: Mutex::new(HashMap::new()),
            load_lock: Mutex::new(()),
        }
    }

    /// A registry holding every [`BuiltinBuilder`].
    pub fn with_builtins(loader: Option<PluginLoader>) -> Self {
        let registry = Self::new(loader);
        for builtin in BuiltinBuilder::ALL {
            // Built-in names are distinct, so the registry cannot reject them.
            if let Err(e) = registry.register(
                builtin.name(),
                builtin.kind(),
                BuilderImpl::Builtin(builtin),
                Origin::Builtin,
            ) {
                warn!("Skipping built-in builder: {}", e);
            }
        }
        registry
    }

    pub fn dynamic_loading_enabled(&self) -> bool {
        self.loader.is_some()
    }

    pub fn register(
        &self,
        name: &str,
        kind: ModelKind,
        builder: BuilderImpl,
        origin: Origin,
    ) -> Result<(), RegistryError> {
        let key = name.trim().to_ascii_lowercase();
        if key.is_empty() {
            return Err(RegistryError::UnknownBuilder(name.to_string()));
        }
        self.insert_all(vec![Registration {
            name: key,
            kind,
            origin,
            builder,
        }])
        .map(|_| ())
    }

    /// Inserts every registration or none of them.
    fn insert_all(&self, batch: Vec<Registration>) -> Result<Vec<String>, RegistryError> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(taken) = batch.iter().find(|r| entries.contains_key(&r.name)) {
            return Err(RegistryError::DuplicateName(taken.name.clone()));
        }
        let mut names = Vec::with_capacity(batch.len());
        for registration in batch {
            debug!(
                "Registering {} builder '{}' ({:?}).",
                registration.kind, registration.name, registration.origin
            );
            names.push(registration.name.clone());
            entries.insert(registration.name.clone(), Arc::new(registration));
        }
        Ok(names)
    }

    /// Registers an in-process Rust builder.
    pub fn register_native<F>(&self, name: &str, kind: ModelKind, f: F) -> Result<(), RegistryError>
    where
        F: Fn(&BuildRequest<'_>) -> Result<Model, BuildError> + Send + Sync + 'static,
    {
        self.register(name, kind, BuilderImpl::Native(Arc::new(f)), Origin::Native)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.lookup(&name.to_ascii_lowercase()).is_some()
    }

    fn lookup(&self, key: &str) -> Option<Arc<Registration>> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    /// Finds the builder registered under `name`, loading a plugin library on a miss
    /// when dynamic loading is enabled.
    pub fn resolve(&self, name: &str) -> Result<Arc<Registration>, RegistryError> {
        let key = name.trim().to_ascii_lowercase();
        if let Some(registration) = self.lookup(&key) {
            return Ok(registration);
        }
        let Some(loader) = &self.loader else {
            return Err(RegistryError::UnknownBuilder(key));
        };
        if let Some(err) = self.failed_load(&key) {
            return Err(err);
        }

        let _guard = self.load_lock.lock().unwrap_or_else(PoisonError::into_inner);
        // Another thread may have loaded or failed while we waited.
        if let Some(registration) = self.lookup(&key) {
            return Ok(registration);
        }
        if let Some(err) = self.failed_load(&key) {
            return Err(err);
        }

        info!("No builder named '{}' is registered, attempting to load a plugin.", key);
        let outcome = loader.load(&key, self).and_then(|_| {
            self.lookup(&key).ok_or_else(|| RegistryError::PluginLoad {
                name: key.clone(),
                path: loader.locate(&key),
                reason: format!("library loaded but did not register '{}'", key),
            })
        });
        if let Err(err) = &outcome {
            warn!("{} (not retried)", err);
            self.failed_loads
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(key, err.clone());
        }
        outcome
    }

    /// Like [`resolve`](Self::resolve), additionally checking the model kind.
    pub fn resolve_kind(
        &self,
        name: &str,
        kind: ModelKind,
    ) -> Result<Arc<Registration>, RegistryError> {
        let registration = self.resolve(name)?;
        if registration.kind != kind {
            return Err(RegistryError::KindMismatch {
                name: registration.name.clone(),
                expected: kind,
                actual: registration.kind,
            });
        }
        Ok(registration)
    }

    fn failed_load(&self, key: &str) -> Option<RegistryError> {
        self.failed_loads
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    /// All registrations, sorted by name.
    pub fn list(&self) -> Vec<Arc<Registration>> {
        let mut all: Vec<_> = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    /// Runs a plugin entry point against this registry and returns the names it registered.
    ///
    /// Registrations are collected while the entry point runs and committed together once
    /// it reports success, so a failing plugin leaves the registry untouched. Used by the
    /// loader after symbol lookup, and usable directly for plugins linked into the
    /// executable.
    pub fn install_entry(
        &self,
        entry: NcfPluginEntryFn,
        origin: Origin,
    ) -> Result<Vec<String>, RegistryError> {
        self.install(entry, origin, None)
    }

    pub(crate) fn install(
        &self,
        entry: NcfPluginEntryFn,
        origin: Origin,
        library: Option<Arc<Library>>,
    ) -> Result<Vec<String>, RegistryError> {
        let path = match &origin {
            Origin::Dynamic { path } => Some(path.clone()),
            Origin::Builtin | Origin::Native => None,
        };
        let mut ctx = HostContext {
            registry: self,
            origin,
            library,
            pending: Vec::new(),
            duplicates: Vec::new(),
        };
        let host = NcfHost {
            abi_version: NCF_PLUGIN_ABI_VERSION,
            ctx: (&mut ctx as *mut HostContext<'_>).cast::<c_void>(),
            register: host_register,
        };

        let status = unsafe { entry(&host) };
        if let Some(duplicate) = ctx.duplicates.first() {
            return Err(RegistryError::DuplicateName(duplicate.clone()));
        }
        if status != NCF_OK {
            return Err(RegistryError::PluginLoad {
                name: ctx.pending.first().map(|r| r.name.clone()).unwrap_or_default(),
                path,
                reason: format!("plugin entry point returned status {}", status),
            });
        }
        self.insert_all(ctx.pending)
    }
}

struct HostContext<'a> {
    registry: &'a PluginRegistry,
    origin: Origin,
    library: Option<Arc<Library>>,
    pending: Vec<Registration>,
    duplicates: Vec<String>,
}

unsafe extern "C" fn host_register(
    ctx: *mut c_void,
    kind: u32,
    name: NcfStr,
    factory: Option<NcfFactoryFn>,
) -> i32 {
    let Some(host) = (unsafe { ctx.cast::<HostContext<'_>>().as_mut() }) else {
        return NCF_ERR_ABI;
    };
    let (Some(name), Some(kind), Some(factory)) = (
        unsafe { name.as_str() },
        dynamic::kind_from_abi(kind),
        factory,
    ) else {
        return NCF_ERR_INVALID;
    };
    let key = name.trim().to_ascii_lowercase();
    if key.is_empty() {
        return NCF_ERR_INVALID;
    }
    if host.registry.contains(&key) || host.pending.iter().any(|r| r.name == key) {
        host.duplicates.push(key);
        return NCF_ERR_DUPLICATE;
    }
    let builder = BuilderImpl::Dynamic(DynamicBuilder::new(
        key.clone(),
        kind,
        factory,
        host.library.clone(),
    ));
    host.pending.push(Registration {
        name: key,
        kind,
        origin: host.origin.clone(),
        builder,
    });
    NCF_OK
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::scatter::FreeGasScatter;
    use crate::core::registry::abi::{NCF_KIND_SCATTER, NcfBuildRequest, NcfCalculator};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    fn constant_native(
        registry: &PluginRegistry,
        name: &str,
    ) -> Result<(), RegistryError> {
        registry.register_native(name, ModelKind::Scatter, |_req| {
            Ok(Model::Scatter(Arc::new(FreeGasScatter::new(1.0))))
        })
    }

    #[test]
    fn builtins_are_registered_with_builtin_origin() {
        let registry = PluginRegistry::with_builtins(None);
        let names: Vec<_> = registry.list().iter().map(|r| r.name.clone()).collect();
        assert_eq!(names, ["bragg", "freegas", "stdabs", "stdncmat", "stdscat"]);
        assert!(registry.list().iter().all(|r| r.origin == Origin::Builtin));
    }

    #[test]
    fn duplicate_of_builtin_name_is_rejected_case_insensitively() {
        let registry = PluginRegistry::with_builtins(None);
        assert_eq!(
            constant_native(&registry, "StdScat"),
            Err(RegistryError::DuplicateName("stdscat".into()))
        );
        assert!(constant_native(&registry, "custom").is_ok());
        assert_eq!(
            constant_native(&registry, "CUSTOM"),
            Err(RegistryError::DuplicateName("custom".into()))
        );
    }

    #[test]
    fn unknown_name_without_loader_fails_without_loading() {
        let registry = PluginRegistry::with_builtins(None);
        assert!(!registry.dynamic_loading_enabled());
        assert_eq!(
            registry.resolve("nosuchthing").unwrap_err(),
            RegistryError::UnknownBuilder("nosuchthing".into())
        );
    }

    #[test]
    fn resolve_is_case_insensitive_and_checks_kind() {
        let registry = PluginRegistry::with_builtins(None);
        assert_eq!(registry.resolve("FreeGas").unwrap().name, "freegas");
        assert!(matches!(
            registry.resolve_kind("freegas", ModelKind::Absorption),
            Err(RegistryError::KindMismatch {
                expected: ModelKind::Absorption,
                actual: ModelKind::Scatter,
                ..
            })
        ));
    }

    #[test]
    fn failed_plugin_load_is_memoized() {
        let dir = tempdir().unwrap();
        let registry =
            PluginRegistry::with_builtins(Some(PluginLoader::new(vec![dir.path().to_path_buf()])));
        let first = registry.resolve("latecomer").unwrap_err();
        assert!(matches!(first, RegistryError::PluginLoad { .. }));

        // A library appearing later is not picked up: the failure is permanent.
        std::fs::write(
            dir.path().join(PluginLoader::library_file_name("latecomer")),
            b"garbage",
        )
        .unwrap();
        assert_eq!(registry.resolve("latecomer").unwrap_err(), first);
    }

    static FACTORY_CALLS: AtomicUsize = AtomicUsize::new(0);

    unsafe extern "C" fn test_factory(
        request: *const NcfBuildRequest,
        out: *mut NcfCalculator,
    ) -> i32 {
        unsafe extern "C" fn xs(_state: *mut c_void, ekin: f64) -> f64 {
            2.0 * ekin
        }
        FACTORY_CALLS.fetch_add(1, Ordering::SeqCst);
        let (Some(_request), Some(out)) = (unsafe { request.as_ref() }, unsafe { out.as_mut() })
        else {
            return NCF_ERR_INVALID;
        };
        out.cross_section = Some(xs);
        NCF_OK
    }

    unsafe extern "C" fn test_entry(host: *const NcfHost) -> i32 {
        let Some(host) = (unsafe { host.as_ref() }) else {
            return NCF_ERR_INVALID;
        };
        unsafe {
            (host.register)(
                host.ctx,
                NCF_KIND_SCATTER,
                NcfStr::new("Doubler"),
                Some(test_factory),
            )
        }
    }

    #[test]
    fn installed_entry_registers_dynamic_builders() {
        let registry = PluginRegistry::with_builtins(None);
        let names = registry.install_entry(test_entry, Origin::Native).unwrap();
        assert_eq!(names, ["doubler"]);

        let registration = registry.resolve_kind("doubler", ModelKind::Scatter).unwrap();
        assert!(matches!(registration.builder, BuilderImpl::Dynamic(_)));

        // Installing the same plugin twice collides with its own names.
        assert_eq!(
            registry.install_entry(test_entry, Origin::Native),
            Err(RegistryError::DuplicateName("doubler".into()))
        );
    }

    unsafe extern "C" fn colliding_entry(host: *const NcfHost) -> i32 {
        let Some(host) = (unsafe { host.as_ref() }) else {
            return NCF_ERR_INVALID;
        };
        for name in ["Tripler", "FreeGas"] {
            unsafe {
                (host.register)(host.ctx, NCF_KIND_SCATTER, NcfStr::new(name), Some(test_factory))
            };
        }
        NCF_OK
    }

    unsafe extern "C" fn failing_entry(host: *const NcfHost) -> i32 {
        let Some(host) = (unsafe { host.as_ref() }) else {
            return NCF_ERR_INVALID;
        };
        unsafe {
            (host.register)(host.ctx, NCF_KIND_SCATTER, NcfStr::new("Halfway"), Some(test_factory))
        };
        NCF_ERR_INVALID
    }

    #[test]
    fn plugin_colliding_with_an_existing_name_registers_nothing() {
        let registry = PluginRegistry::with_builtins(None);
        assert_eq!(
            registry.install_entry(colliding_entry, Origin::Native),
            Err(RegistryError::DuplicateName("freegas".into()))
        );
        assert!(!registry.contains("tripler"));
        assert!(matches!(
            registry.resolve("freegas").unwrap().origin,
            Origin::Builtin
        ));
    }

    #[test]
    fn plugin_reporting_failure_registers_nothing() {
        let registry = PluginRegistry::with_builtins(None);
        let err = registry
            .install_entry(failing_entry, Origin::Native)
            .unwrap_err();
        assert!(matches!(
            err,
            RegistryError::PluginLoad { ref name, .. } if name == "halfway"
        ));
        assert!(!registry.contains("halfway"));
        assert_eq!(registry.list().len(), BuiltinBuilder::ALL.len());
    }

    #[test]
    fn dynamic_builder_produces_working_calculator() {
        use crate::core::cfg::MatCfg;
        use crate::core::material::{Info, MaterialDb};

        let registry = PluginRegistry::with_builtins(None);
        registry.install_entry(test_entry, Origin::Native).unwrap();
        let db = MaterialDb::default();
        let cfg = MatCfg::parse("Al_sg225.ncmat;scatfactory=doubler").unwrap();
        let info = Arc::new(Info::build(&db.load(cfg.material()).unwrap(), &cfg).unwrap());
        let request = BuildRequest {
            cfg: &cfg,
            info: Some(&info),
            materials: &db,
        };

        let before = FACTORY_CALLS.load(Ordering::SeqCst);
        let Model::Scatter(scatter) = registry.resolve("doubler").unwrap().build(&request).unwrap()
        else {
            panic!("expected a scatter model");
        };
        assert_eq!(FACTORY_CALLS.load(Ordering::SeqCst), before + 1);
        assert_eq!(scatter.name(), "doubler");
        assert_eq!(scatter.cross_section(1.5), 3.0);
    }
}
