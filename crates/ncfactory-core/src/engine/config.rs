use crate::core::cfg::MatCfg;
use crate::core::models::ModelKind;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::env;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Path of a TOML file holding a [`FactoryConfig`].
pub const ENV_CONFIG: &str = "NCFACTORY_CONFIG";
/// Extra plugin search directories; setting it also enables dynamic loading.
pub const ENV_PLUGIN_PATH: &str = "NCFACTORY_PLUGIN_PATH";
/// Extra material search directories.
pub const ENV_DATA_PATH: &str = "NCFACTORY_DATA_PATH";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read factory configuration {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("Failed to parse factory configuration {path}: {source}")]
    Toml {
        path: String,
        source: toml::de::Error,
    },
    #[error("Invalid selection policy: {0}")]
    InvalidPolicy(String),
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PluginSettings {
    pub enabled: bool,
    pub search_paths: Vec<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MaterialSettings {
    pub search_paths: Vec<PathBuf>,
}

/// Which builder family serves a request that does not name one.
///
/// Info builders are chosen by the material's file extension. Scatter and absorption
/// families are tried in order and the first whose builder accepts the request wins.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SelectionPolicy {
    pub info: BTreeMap<String, String>,
    pub scatter: Vec<String>,
    pub absorption: Vec<String>,
}

impl Default for SelectionPolicy {
    fn default() -> Self {
        Self {
            info: BTreeMap::from([("ncmat".to_string(), "stdncmat".to_string())]),
            scatter: vec!["stdscat".to_string(), "freegas".to_string()],
            absorption: vec!["stdabs".to_string()],
        }
    }
}

/// Outcome of applying a [`SelectionPolicy`] to one configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection<'a> {
    /// The configuration named the family itself.
    Explicit(&'a str),
    /// Families to try in order.
    Ordered(Vec<&'a str>),
}

impl SelectionPolicy {
    pub fn select<'a>(&'a self, kind: ModelKind, cfg: &'a MatCfg) -> Selection<'a> {
        let explicit = match kind {
            ModelKind::Info => cfg.info_factory(),
            ModelKind::Scatter => cfg.scat_factory(),
            ModelKind::Absorption => cfg.absn_factory(),
        };
        if let Some(name) = explicit {
            return Selection::Explicit(name);
        }
        let ordered = match kind {
            ModelKind::Info => cfg
                .extension()
                .and_then(|ext| self.info.get(&ext))
                .map(|family| vec![family.as_str()])
                .unwrap_or_default(),
            ModelKind::Scatter => self.scatter.iter().map(String::as_str).collect(),
            ModelKind::Absorption => self.absorption.iter().map(String::as_str).collect(),
        };
        Selection::Ordered(ordered)
    }

    /// Lowercases every name, matching the case-insensitive configuration strings.
    fn normalize(&mut self) {
        let lower = |name: &String| name.trim().to_lowercase();
        self.info = self.info.iter().map(|(ext, family)| (lower(ext), lower(family))).collect();
        self.scatter = self.scatter.iter().map(lower).collect();
        self.absorption = self.absorption.iter().map(lower).collect();
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let named = self
            .info
            .iter()
            .flat_map(|(ext, family)| [ext, family])
            .chain(&self.scatter)
            .chain(&self.absorption);
        for name in named {
            if name.trim().is_empty() || name.contains([';', '=']) {
                return Err(ConfigError::InvalidPolicy(format!(
                    "'{}' is not a valid family or extension name",
                    name
                )));
            }
        }
        if self.scatter.is_empty() {
            return Err(ConfigError::InvalidPolicy(
                "scatter precedence list is empty".to_string(),
            ));
        }
        if self.absorption.is_empty() {
            return Err(ConfigError::InvalidPolicy(
                "absorption precedence list is empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Settings of a [`FactoryContext`](super::context::FactoryContext).
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FactoryConfig {
    pub plugins: PluginSettings,
    pub materials: MaterialSettings,
    pub policy: SelectionPolicy,
}

impl FactoryConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let path_str = path.to_string_lossy().to_string();
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path_str.clone(),
            source: e,
        })?;
        let mut config: FactoryConfig = toml::from_str(&content).map_err(|e| ConfigError::Toml {
            path: path_str,
            source: e,
        })?;
        config.policy.normalize();
        config.policy.validate()?;
        Ok(config)
    }

    /// Reads `NCFACTORY_CONFIG` if set (defaults otherwise) and appends the directories
    /// listed in `NCFACTORY_PLUGIN_PATH` and `NCFACTORY_DATA_PATH`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = match env::var_os(ENV_CONFIG) {
            Some(path) if !path.is_empty() => {
                debug!("Loading factory configuration from {:?}.", path);
                Self::load(Path::new(&path))?
            }
            _ => Self::default(),
        };
        if let Some(paths) = env::var_os(ENV_PLUGIN_PATH).filter(|p| !p.is_empty()) {
            config.plugins.enabled = true;
            config.plugins.search_paths.extend(env::split_paths(&paths));
        }
        if let Some(paths) = env::var_os(ENV_DATA_PATH).filter(|p| !p.is_empty()) {
            config.materials.search_paths.extend(env::split_paths(&paths));
        }
        Ok(config)
    }

    pub fn builder() -> FactoryConfigBuilder {
        FactoryConfigBuilder::new()
    }
}

#[derive(Default)]
pub struct FactoryConfigBuilder {
    plugins_enabled: Option<bool>,
    plugin_search_paths: Vec<PathBuf>,
    material_search_paths: Vec<PathBuf>,
    info_families: BTreeMap<String, String>,
    scatter_precedence: Option<Vec<String>>,
    absorption_precedence: Option<Vec<String>>,
}

impl FactoryConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enable_plugins(mut self, enabled: bool) -> Self {
        self.plugins_enabled = Some(enabled);
        self
    }
    pub fn plugin_search_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.plugin_search_paths.push(path.into());
        self
    }
    pub fn material_search_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.material_search_paths.push(path.into());
        self
    }
    pub fn info_family(mut self, extension: &str, family: &str) -> Self {
        self.info_families
            .insert(extension.to_lowercase(), family.to_lowercase());
        self
    }
    pub fn scatter_precedence<I, S>(mut self, families: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scatter_precedence = Some(families.into_iter().map(Into::into).collect());
        self
    }
    pub fn absorption_precedence<I, S>(mut self, families: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.absorption_precedence = Some(families.into_iter().map(Into::into).collect());
        self
    }

    pub fn build(self) -> Result<FactoryConfig, ConfigError> {
        let mut policy = SelectionPolicy::default();
        policy.info.extend(self.info_families);
        if let Some(scatter) = self.scatter_precedence {
            policy.scatter = scatter;
        }
        if let Some(absorption) = self.absorption_precedence {
            policy.absorption = absorption;
        }
        policy.normalize();
        policy.validate()?;

        Ok(FactoryConfig {
            plugins: PluginSettings {
                enabled: self
                    .plugins_enabled
                    .unwrap_or(!self.plugin_search_paths.is_empty()),
                search_paths: self.plugin_search_paths,
            },
            materials: MaterialSettings {
                search_paths: self.material_search_paths,
            },
            policy,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs;
    use tempfile::tempdir;

    fn cfg(raw: &str) -> MatCfg {
        MatCfg::parse(raw).unwrap()
    }

    #[test]
    fn default_policy_prefers_explicit_then_ordered_families() {
        let policy = SelectionPolicy::default();
        assert_eq!(
            policy.select(ModelKind::Info, &cfg("Al_sg225.ncmat")),
            Selection::Ordered(vec!["stdncmat"])
        );
        assert_eq!(
            policy.select(ModelKind::Scatter, &cfg("Al_sg225.ncmat")),
            Selection::Ordered(vec!["stdscat", "freegas"])
        );
        assert_eq!(
            policy.select(ModelKind::Scatter, &cfg("Al_sg225.ncmat;scatfactory=freegas")),
            Selection::Explicit("freegas")
        );
        assert_eq!(
            policy.select(ModelKind::Absorption, &cfg("Al_sg225.ncmat")),
            Selection::Ordered(vec!["stdabs"])
        );
    }

    #[test]
    fn unknown_extension_has_no_info_family() {
        let policy = SelectionPolicy::default();
        assert_eq!(
            policy.select(ModelKind::Info, &cfg("mystery.xyz")),
            Selection::Ordered(vec![])
        );
    }

    #[test]
    fn builder_overrides_policy_and_enables_plugins_with_paths() {
        let config = FactoryConfig::builder()
            .plugin_search_path("/opt/plugins")
            .material_search_path("/opt/data")
            .scatter_precedence(["freegas"])
            .info_family("LAZ", "stdncmat")
            .build()
            .unwrap();
        assert!(config.plugins.enabled);
        assert_eq!(config.policy.scatter, vec!["freegas".to_string()]);
        assert_eq!(config.policy.info.get("laz").map(String::as_str), Some("stdncmat"));
        assert_eq!(config.policy.info.get("ncmat").map(String::as_str), Some("stdncmat"));
        assert_eq!(config.materials.search_paths, vec![PathBuf::from("/opt/data")]);
    }

    #[test]
    fn builder_rejects_empty_precedence() {
        let err = FactoryConfig::builder()
            .absorption_precedence(Vec::<String>::new())
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidPolicy(_)));
    }

    #[test]
    fn loads_partial_toml_over_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("factory.toml");
        fs::write(
            &path,
            r#"
[plugins]
enabled = true
search_paths = ["/usr/lib/ncfactory"]

[policy]
scatter = ["freegas"]
"#,
        )
        .unwrap();

        let config = FactoryConfig::load(&path).unwrap();
        assert!(config.plugins.enabled);
        assert_eq!(config.policy.scatter, vec!["freegas".to_string()]);
        assert_eq!(config.policy.absorption, vec!["stdabs".to_string()]);
        assert!(config.materials.search_paths.is_empty());
    }

    #[test]
    fn toml_policy_names_are_case_insensitive() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("factory.toml");
        fs::write(
            &path,
            r#"
[policy]
scatter = ["FreeGas"]

[policy.info]
LAZ = "StdNCMAT"
"#,
        )
        .unwrap();

        let config = FactoryConfig::load(&path).unwrap();
        assert_eq!(
            config.policy.select(ModelKind::Info, &cfg("Graphite.LAZ")),
            Selection::Ordered(vec!["stdncmat"])
        );
        assert_eq!(
            config.policy.select(ModelKind::Scatter, &cfg("Graphite.laz")),
            Selection::Ordered(vec!["freegas"])
        );
    }

    #[test]
    fn rejects_unknown_toml_keys() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("factory.toml");
        fs::write(&path, "[plugins]\nenable = true\n").unwrap();
        assert!(matches!(
            FactoryConfig::load(&path),
            Err(ConfigError::Toml { .. })
        ));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            FactoryConfig::load(&dir.path().join("absent.toml")),
            Err(ConfigError::Io { .. })
        ));
    }

    #[test]
    #[serial]
    fn from_env_reads_file_and_path_lists() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("factory.toml");
        fs::write(&path, "[materials]\nsearch_paths = [\"/first\"]\n").unwrap();
        let plugin_dirs = env::join_paths(["/plugins/a", "/plugins/b"]).unwrap();

        // SAFETY: `#[serial]` keeps other environment-touching tests from running concurrently.
        unsafe {
            env::set_var(ENV_CONFIG, &path);
            env::set_var(ENV_PLUGIN_PATH, &plugin_dirs);
            env::set_var(ENV_DATA_PATH, "/second");
        }
        let config = FactoryConfig::from_env();
        unsafe {
            env::remove_var(ENV_CONFIG);
            env::remove_var(ENV_PLUGIN_PATH);
            env::remove_var(ENV_DATA_PATH);
        }

        let config = config.unwrap();
        assert!(config.plugins.enabled);
        assert_eq!(
            config.plugins.search_paths,
            vec![PathBuf::from("/plugins/a"), PathBuf::from("/plugins/b")]
        );
        assert_eq!(
            config.materials.search_paths,
            vec![PathBuf::from("/first"), PathBuf::from("/second")]
        );
    }

    #[test]
    #[serial]
    fn from_env_without_variables_is_default() {
        unsafe {
            env::remove_var(ENV_CONFIG);
            env::remove_var(ENV_PLUGIN_PATH);
            env::remove_var(ENV_DATA_PATH);
        }
        assert_eq!(FactoryConfig::from_env().unwrap(), FactoryConfig::default());
    }
}
