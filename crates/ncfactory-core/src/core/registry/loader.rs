use super::abi::{NCF_PLUGIN_ENTRY, NcfPluginEntryFn};
use super::{Origin, PluginRegistry, RegistryError};
use libloading::{Library, Symbol};
use std::ffi::OsString;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

/// Locates and opens plugin libraries named `ncplugin_<name>` on a search path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PluginLoader {
    search_paths: Vec<PathBuf>,
}

impl PluginLoader {
    pub fn new(search_paths: Vec<PathBuf>) -> Self {
        Self { search_paths }
    }

    pub fn search_paths(&self) -> &[PathBuf] {
        &self.search_paths
    }

    /// Platform file name of the plugin library providing `name`, e.g. `libncplugin_foo.so`.
    pub fn library_file_name(name: &str) -> OsString {
        libloading::library_filename(format!("ncplugin_{}", name))
    }

    pub fn locate(&self, name: &str) -> Option<PathBuf> {
        let file_name = Self::library_file_name(name);
        self.search_paths
            .iter()
            .map(|dir| dir.join(&file_name))
            .find(|candidate| candidate.is_file())
    }

    /// Opens the plugin library for `name` and runs its registration entry point.
    pub(crate) fn load(
        &self,
        name: &str,
        registry: &PluginRegistry,
    ) -> Result<Vec<String>, RegistryError> {
        let failure = |path: Option<PathBuf>, reason: String| RegistryError::PluginLoad {
            name: name.to_string(),
            path,
            reason,
        };

        let path = self.locate(name).ok_or_else(|| {
            failure(
                None,
                format!(
                    "{} not found in {} search director{}",
                    Self::library_file_name(name).to_string_lossy(),
                    self.search_paths.len(),
                    if self.search_paths.len() == 1 { "y" } else { "ies" }
                ),
            )
        })?;
        debug!("Opening plugin library {}.", path.display());

        let library = unsafe { Library::new(&path) }
            .map_err(|e| failure(Some(path.clone()), format!("failed to load library: {}", e)))?;
        let entry: NcfPluginEntryFn = {
            let symbol: Symbol<NcfPluginEntryFn> = unsafe { library.get(NCF_PLUGIN_ENTRY) }
                .map_err(|e| {
                    failure(
                        Some(path.clone()),
                        format!("missing entry symbol 'ncf_plugin_register': {}", e),
                    )
                })?;
            *symbol
        };

        // Every failure after the library opened is a load failure of `name`.
        let registered = registry
            .install(
                entry,
                Origin::Dynamic { path: path.clone() },
                Some(Arc::new(library)),
            )
            .map_err(|e| match e {
                RegistryError::PluginLoad { reason, .. } => failure(Some(path.clone()), reason),
                other => failure(Some(path.clone()), other.to_string()),
            })?;
        info!(
            "Loaded plugin library {} providing [{}].",
            path.display(),
            registered.join(", ")
        );
        Ok(registered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn library_names_follow_platform_convention() {
        let file_name = PluginLoader::library_file_name("demo");
        let file_name = file_name.to_string_lossy();
        assert!(file_name.contains("ncplugin_demo"));
        if cfg!(target_os = "linux") {
            assert_eq!(file_name, "libncplugin_demo.so");
        }
    }

    #[test]
    fn missing_library_is_a_load_failure() {
        let dir = tempdir().unwrap();
        let loader = PluginLoader::new(vec![dir.path().to_path_buf()]);
        let registry = PluginRegistry::new(None);
        let err = loader.load("absent", &registry).unwrap_err();
        assert!(matches!(err, RegistryError::PluginLoad { path: None, .. }));
    }

    #[test]
    fn corrupt_library_is_a_load_failure() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join(PluginLoader::library_file_name("broken")),
            b"not a shared object",
        )
        .unwrap();
        let loader = PluginLoader::new(vec![dir.path().to_path_buf()]);
        let registry = PluginRegistry::new(None);
        let err = loader.load("broken", &registry).unwrap_err();
        assert!(matches!(err, RegistryError::PluginLoad { path: Some(_), .. }));
    }
}
