//! # Hard-sphere SANS plugin
//!
//! A builder plugin for `ncfactory`, loadable at run time as
//! `libncplugin_hardspheresans.so` (or the platform equivalent).
//!
//! It registers the scatter family `hardspheresans`: free scattering plus a toy
//! small-angle term for a powder of hard spheres. The small-angle term grows with
//! lambda^2 and vanishes both for a fully packed material and for wavelengths much
//! shorter than the sphere radius allows.
//!
//! Select it with `scatfactory=hardspheresans` once the library is on the plugin
//! search path, or link it statically and pass [`ncf_plugin_register`] to
//! `PluginRegistry::install_entry`.

use ncfactory::core::models::EKIN_TO_WL2;
use ncfactory::core::registry::abi::{
    NCF_ERR_ABI, NCF_ERR_INVALID, NCF_ERR_UNSUPPORTED, NCF_KIND_SCATTER, NCF_OK,
    NCF_PLUGIN_ABI_VERSION, NcfBuildRequest, NcfCalculator, NcfHost, NcfStr,
};
use std::f64::consts::PI;
use std::ffi::c_void;

pub const FAMILY: &str = "hardspheresans";
pub const SPHERE_RADIUS_AA: f64 = 50.0;

#[derive(Debug, Clone, PartialEq)]
pub struct HardSphereModel {
    xsect_free: f64,
    strength: f64,
}

impl HardSphereModel {
    /// `None` when the request carries values the model cannot use.
    pub fn from_request(request: &NcfBuildRequest) -> Option<Self> {
        let packfact = request.packfact;
        if !(packfact > 0.0 && packfact <= 1.0) || !(request.xsect_free >= 0.0) {
            return None;
        }
        Some(Self {
            xsect_free: request.xsect_free,
            strength: request.xsect_free * packfact * (1.0 - packfact),
        })
    }

    pub fn cross_section(&self, ekin_ev: f64) -> f64 {
        if ekin_ev <= 0.0 {
            return self.xsect_free;
        }
        let wl2 = EKIN_TO_WL2 / ekin_ev;
        let kr = 2.0 * PI / wl2.sqrt() * SPHERE_RADIUS_AA;
        let kr2 = kr * kr;
        self.xsect_free + self.strength * wl2 * kr2 / (1.0 + kr2)
    }
}

unsafe extern "C" fn cross_section(state: *mut c_void, ekin_ev: f64) -> f64 {
    match unsafe { state.cast::<HardSphereModel>().as_ref() } {
        Some(model) => model.cross_section(ekin_ev),
        None => 0.0,
    }
}

unsafe extern "C" fn destroy(state: *mut c_void) {
    if !state.is_null() {
        drop(unsafe { Box::from_raw(state.cast::<HardSphereModel>()) });
    }
}

unsafe extern "C" fn build(request: *const NcfBuildRequest, out: *mut NcfCalculator) -> i32 {
    let (Some(request), Some(out)) = (unsafe { request.as_ref() }, unsafe { out.as_mut() }) else {
        return NCF_ERR_INVALID;
    };
    let Some(model) = HardSphereModel::from_request(request) else {
        return NCF_ERR_UNSUPPORTED;
    };
    *out = NcfCalculator {
        state: Box::into_raw(Box::new(model)).cast(),
        cross_section: Some(cross_section),
        destroy: Some(destroy),
    };
    NCF_OK
}

/// Plugin entry point, called once by the host when the library is loaded.
///
/// # Safety
///
/// `host` must be null or point to a valid [`NcfHost`] for the duration of the call.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn ncf_plugin_register(host: *const NcfHost) -> i32 {
    let Some(host) = (unsafe { host.as_ref() }) else {
        return NCF_ERR_INVALID;
    };
    if host.abi_version != NCF_PLUGIN_ABI_VERSION {
        return NCF_ERR_ABI;
    }
    unsafe { (host.register)(host.ctx, NCF_KIND_SCATTER, NcfStr::new(FAMILY), Some(build)) }
}
