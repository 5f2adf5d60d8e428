//! C ABI shared between the host and dynamically loaded builder plugins.
//!
//! A plugin library exports [`NCF_PLUGIN_ENTRY`] with the signature of
//! [`NcfPluginEntryFn`]. When loaded, the host calls it once with an [`NcfHost`], and the
//! plugin calls `host.register` for every builder it provides. Registered factories
//! fill an [`NcfCalculator`] whose `state` must be safe to use from several threads at
//! once; `destroy` is called exactly once when the last handle is dropped.

use std::ffi::c_void;

pub const NCF_PLUGIN_ABI_VERSION: u32 = 1;

/// Exported entry symbol, NUL-terminated for symbol lookup.
pub const NCF_PLUGIN_ENTRY: &[u8] = b"ncf_plugin_register\0";

pub const NCF_OK: i32 = 0;
pub const NCF_ERR_DUPLICATE: i32 = 1;
pub const NCF_ERR_INVALID: i32 = 2;
pub const NCF_ERR_ABI: i32 = 3;
pub const NCF_ERR_UNSUPPORTED: i32 = 4;

pub const NCF_KIND_SCATTER: u32 = 1;
pub const NCF_KIND_ABSORPTION: u32 = 2;

/// Borrowed UTF-8 string.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct NcfStr {
    pub ptr: *const u8,
    pub len: usize,
}

impl NcfStr {
    pub fn new(s: &str) -> Self {
        Self {
            ptr: s.as_ptr(),
            len: s.len(),
        }
    }

    /// # Safety
    ///
    /// `ptr` must be null or point to `len` initialized bytes that outlive `'a`.
    pub unsafe fn as_str<'a>(&self) -> Option<&'a str> {
        if self.ptr.is_null() {
            return None;
        }
        let bytes = unsafe { std::slice::from_raw_parts(self.ptr, self.len) };
        std::str::from_utf8(bytes).ok()
    }
}

/// Configuration and material summary handed to a plugin factory.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct NcfBuildRequest {
    /// Canonical configuration string.
    pub cfg: NcfStr,
    pub material: NcfStr,
    pub temperature: f64,
    pub packfact: f64,
    /// g/cm^3
    pub density: f64,
    /// atoms/Aa^3
    pub number_density: f64,
    /// barn per atom
    pub xsect_free: f64,
    /// barn per atom at 2200 m/s
    pub xsect_absorption: f64,
}

pub type NcfCrossSectionFn = unsafe extern "C" fn(state: *mut c_void, ekin_ev: f64) -> f64;
pub type NcfDestroyFn = unsafe extern "C" fn(state: *mut c_void);

#[repr(C)]
#[derive(Debug)]
pub struct NcfCalculator {
    pub state: *mut c_void,
    pub cross_section: Option<NcfCrossSectionFn>,
    pub destroy: Option<NcfDestroyFn>,
}

impl NcfCalculator {
    pub fn empty() -> Self {
        Self {
            state: std::ptr::null_mut(),
            cross_section: None,
            destroy: None,
        }
    }
}

pub type NcfFactoryFn =
    unsafe extern "C" fn(request: *const NcfBuildRequest, out: *mut NcfCalculator) -> i32;

pub type NcfRegisterFn = unsafe extern "C" fn(
    ctx: *mut c_void,
    kind: u32,
    name: NcfStr,
    factory: Option<NcfFactoryFn>,
) -> i32;

#[repr(C)]
pub struct NcfHost {
    pub abi_version: u32,
    pub ctx: *mut c_void,
    pub register: NcfRegisterFn,
}

pub type NcfPluginEntryFn = unsafe extern "C" fn(host: *const NcfHost) -> i32;
