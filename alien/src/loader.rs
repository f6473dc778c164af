use core::ffi::{CStr, c_char, c_void};
use std::ffi::CString;
use std::path::Path;

use alien::Error;
use alien::host::Symbol;

#[cfg(target_family = "unix")]
#[link(name = "dl")]
unsafe extern "C" {
    fn dlopen(filename: *const c_char, flag: i32) -> *mut c_void;
    fn dlsym(handle: *mut c_void, symbol: *const c_char) -> *mut c_void;
    fn dlclose(handle: *mut c_void) -> i32;
    fn dlerror() -> *const c_char;
}

#[cfg(target_family = "unix")]
const RTLD_NOW: i32 = 2;

/// A `dlopen` handle, closed on drop.
pub struct Library {
    handle: *mut c_void,
    name: String,
}

#[cfg(target_family = "unix")]
fn last_error() -> String {
    let msg = unsafe { dlerror() };
    if msg.is_null() {
        "unknown dynamic linker error".to_string()
    } else {
        unsafe { CStr::from_ptr(msg) }.to_string_lossy().into_owned()
    }
}

fn c_string(name: &str, text: &str) -> Result<CString, Error> {
    CString::new(text).map_err(|_| Error::Symbol {
        name: name.to_string(),
        reason: "contains a NUL byte".to_string(),
    })
}

#[cfg(target_family = "unix")]
impl Library {
    /// Open `path`, or the running program itself when `path` is `None`.
    pub fn open(path: Option<&Path>) -> Result<Self, Error> {
        let name = path.map_or_else(
            || "<self>".to_string(),
            |p| p.display().to_string(),
        );
        let c_path = path
            .map(|p| c_string(&name, &p.to_string_lossy()))
            .transpose()?;
        let raw_path = c_path.as_ref().map_or(std::ptr::null(), |p| p.as_ptr());

        let handle = unsafe { dlopen(raw_path, RTLD_NOW) };
        if handle.is_null() {
            return Err(Error::Symbol {
                name,
                reason: last_error(),
            });
        }
        log::debug!("opened {name}");
        Ok(Self { handle, name })
    }

    pub fn symbol(&self, symbol: &str) -> Result<Symbol, Error> {
        let c_symbol = c_string(symbol, symbol)?;
        let ptr = unsafe { dlsym(self.handle, c_symbol.as_ptr()) };
        if ptr.is_null() {
            return Err(Error::Symbol {
                name: symbol.to_string(),
                reason: format!("not found in {}", self.name),
            });
        }
        Ok(Symbol::from_ptr(ptr))
    }
}

#[cfg(target_family = "unix")]
impl Drop for Library {
    fn drop(&mut self) {
        unsafe { dlclose(self.handle) };
    }
}

#[cfg(not(target_family = "unix"))]
impl Library {
    pub fn open(path: Option<&Path>) -> Result<Self, Error> {
        Err(Error::Symbol {
            name: path.map_or_else(
                || "<self>".to_string(),
                |p| p.display().to_string(),
            ),
            reason: "library loading not supported on this platform"
                .to_string(),
        })
    }

    pub fn symbol(&self, symbol: &str) -> Result<Symbol, Error> {
        Err(Error::Symbol {
            name: symbol.to_string(),
            reason: format!("{} was never opened", self.name),
        })
    }
}
