use crate::core::cfg::{CacheKey, ConfigSyntaxError};
use crate::core::models::{BuildError, ModelKind};
use crate::core::registry::RegistryError;
use std::sync::Arc;
use thiserror::Error;

/// Everything a factory request can fail with.
///
/// The type is `Clone` so a memoized failure can be handed to every requester of the
/// same key; the underlying build error is shared, not copied.
#[derive(Debug, Error, Clone)]
pub enum FactoryError {
    #[error(transparent)]
    ConfigSyntax(#[from] ConfigSyntaxError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("Failed to build {kind} object for '{config}': {source}")]
    ModelConstruction {
        kind: ModelKind,
        config: CacheKey,
        source: Arc<BuildError>,
    },
}

impl FactoryError {
    pub(crate) fn construction(kind: ModelKind, config: &CacheKey, source: BuildError) -> Self {
        FactoryError::ModelConstruction {
            kind,
            config: config.clone(),
            source: Arc::new(source),
        }
    }

    pub fn is_unknown_builder(&self) -> bool {
        matches!(
            self,
            FactoryError::Registry(RegistryError::UnknownBuilder(_))
        )
    }

    pub fn is_plugin_load(&self) -> bool {
        matches!(self, FactoryError::Registry(RegistryError::PluginLoad { .. }))
    }

    /// The builder failure behind a `ModelConstruction` error.
    pub fn build_error(&self) -> Option<&BuildError> {
        match self {
            FactoryError::ModelConstruction { source, .. } => Some(source.as_ref()),
            FactoryError::ConfigSyntax(_) | FactoryError::Registry(_) => None,
        }
    }

    /// Whether two errors are the same memoized failure rather than equal-looking ones.
    pub fn is_same_failure(&self, other: &FactoryError) -> bool {
        match (self, other) {
            (
                FactoryError::ModelConstruction { source: a, .. },
                FactoryError::ModelConstruction { source: b, .. },
            ) => Arc::ptr_eq(a, b),
            (FactoryError::ConfigSyntax(a), FactoryError::ConfigSyntax(b)) => a == b,
            (FactoryError::Registry(a), FactoryError::Registry(b)) => a == b,
            _ => false,
        }
    }
}
