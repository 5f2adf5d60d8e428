//! Loads the built plugin library through the search path, the way a deployed host does.

use ncfactory::core::models::Scatter;
use ncfactory::core::models::EKIN_TO_WL2;
use ncfactory::core::registry::{Origin, PluginLoader, RegistryError};
use ncfactory::engine::FactoryContext;
use ncfactory::engine::config::FactoryConfig;
use ncplugin_hardspheresans::FAMILY;
use std::env::consts::{DLL_PREFIX, DLL_SUFFIX};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::{TempDir, tempdir};

/// The cdylib cargo built next to this test binary, in `target/<profile>` or its `deps`.
fn built_library() -> PathBuf {
    let exe = std::env::current_exe().unwrap();
    let deps = exe.parent().unwrap();
    let prefix = format!("{}ncplugin_{}", DLL_PREFIX, FAMILY);
    let matches = |path: &Path| {
        path.file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with(&prefix) && n.ends_with(DLL_SUFFIX))
    };
    [deps.parent(), Some(deps)]
        .into_iter()
        .flatten()
        .flat_map(|dir| fs::read_dir(dir).into_iter().flatten())
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .find(|path| path.is_file() && matches(path))
        .unwrap_or_else(|| panic!("no {}*{} next to {}", prefix, DLL_SUFFIX, exe.display()))
}

/// A plugin directory holding the built library under the file name for `name`.
fn plugin_dir(name: &str) -> (TempDir, PathBuf) {
    let dir = tempdir().unwrap();
    let path = dir.path().join(PluginLoader::library_file_name(name));
    fs::copy(built_library(), &path).unwrap();
    (dir, path)
}

fn context(dir: &TempDir) -> FactoryContext {
    let config = FactoryConfig::builder()
        .plugin_search_path(dir.path())
        .build()
        .unwrap();
    FactoryContext::new(config)
}

#[test]
fn unregistered_family_is_loaded_on_demand() {
    let (dir, path) = plugin_dir(FAMILY);
    let ctx = context(&dir);
    assert!(ctx.registry().dynamic_loading_enabled());
    assert!(!ctx.registry().contains(FAMILY));

    let scatter = ctx
        .create_scatter("Al_sg225.ncmat;packfact=0.5;scatfactory=hardspheresans")
        .unwrap();
    assert_eq!(scatter.name(), FAMILY);
    let info = ctx.create_info("Al_sg225.ncmat").unwrap();
    assert!(scatter.cross_section(EKIN_TO_WL2 / 100.0) > info.xsect_free);

    let registration = ctx
        .registry()
        .list()
        .into_iter()
        .find(|r| r.name == FAMILY)
        .unwrap();
    assert_eq!(registration.origin, Origin::Dynamic { path });

    let again = ctx
        .create_scatter("Al_sg225.ncmat;scatfactory=HardSphereSANS;packfact=0.5")
        .unwrap();
    assert!(std::sync::Arc::ptr_eq(&scatter, &again));
}

#[test]
fn library_not_registering_the_requested_name_fails_permanently() {
    let (dir, path) = plugin_dir("mislabelled");
    let ctx = context(&dir);

    let err = ctx
        .create_scatter("Al_sg225.ncmat;scatfactory=mislabelled")
        .unwrap_err();
    assert!(err.is_plugin_load());

    let first = ctx.registry().resolve("mislabelled").unwrap_err();
    match &first {
        RegistryError::PluginLoad {
            name,
            path: failed_path,
            reason,
        } => {
            assert_eq!(name, "mislabelled");
            assert_eq!(failed_path.as_deref(), Some(path.as_path()));
            assert!(reason.contains("did not register"));
        }
        other => panic!("expected a plugin load failure, got {other:?}"),
    }
    assert_eq!(ctx.registry().resolve("MISLABELLED").unwrap_err(), first);

    // What the library did register stays usable.
    assert_eq!(
        ctx.registry().resolve(FAMILY).unwrap().origin,
        Origin::Dynamic { path }
    );
}
