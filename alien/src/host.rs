//! The surface a scripting host binds to: the module's functions, its
//! constant table and a lockable descriptor handle for hosts that run more
//! than one interpreter thread.

use core::ffi::c_void;
use std::sync::Arc;

use libffi::middle::CodePtr;
use libffi::raw;
use parking_lot::Mutex;

use crate::descriptor::{CallDescriptor, Status};
use crate::error::Result;
use crate::value::Value;

pub const VERSION: &str = "alien 1.0.2";
pub const DESCRIPTION: &str = "Dynamic foreign function calls";

/// A function address resolved by the host's dynamic linker bindings.
#[derive(Debug, Clone, Copy)]
pub struct Symbol(CodePtr);

impl Symbol {
    pub fn from_ptr(ptr: *const c_void) -> Self {
        Self(CodePtr::from_ptr(ptr))
    }

    pub fn is_null(&self) -> bool {
        self.0.as_ptr().is_null()
    }

    #[inline(always)]
    pub fn code_ptr(&self) -> CodePtr {
        self.0
    }
}

/// Named integer constants exported next to the module functions.
pub fn constants() -> [(&'static str, i64); 4] {
    [
        ("DEFAULT_ABI", raw::ffi_abi_FFI_DEFAULT_ABI as i64),
        ("OK", Status::Ok.code() as i64),
        ("BAD_TYPEDEF", Status::BadTypedef.code() as i64),
        ("BAD_ABI", Status::BadAbi.code() as i64),
    ]
}

/// Prepare a fixed-arity call; the second result is the raw status code.
pub fn prep_cif(
    symbol: Symbol,
    return_type: &str,
    arg_types: &[&str],
) -> Result<(CallDescriptor, i32)> {
    let descriptor =
        CallDescriptor::build_fixed(symbol.code_ptr(), return_type, arg_types)?;
    let status = descriptor.status().code();
    Ok((descriptor, status))
}

/// Prepare a variadic call with `fixed_args` leading prototype arguments.
pub fn prep_cif_var(
    symbol: Symbol,
    fixed_args: usize,
    return_type: &str,
    arg_types: &[&str],
) -> Result<(CallDescriptor, i32)> {
    let descriptor = CallDescriptor::build_variadic(
        symbol.code_ptr(),
        fixed_args,
        return_type,
        arg_types,
    )?;
    let status = descriptor.status().code();
    Ok((descriptor, status))
}

/// # Safety
///
/// See [`CallDescriptor::invoke`].
pub unsafe fn call(
    descriptor: &CallDescriptor,
    args: &[Value],
) -> Result<Option<Value>> {
    unsafe { descriptor.invoke(args) }
}

/// Explicit close; the same release also runs when the descriptor drops.
pub fn close(descriptor: &mut CallDescriptor) {
    descriptor.release();
}

/// A descriptor shared between host threads. Every operation takes the
/// lock, so construction, calls and release never overlap.
#[derive(Debug, Clone)]
pub struct SharedDescriptor(Arc<Mutex<CallDescriptor>>);

impl SharedDescriptor {
    pub fn new(descriptor: CallDescriptor) -> Self {
        Self(Arc::new(Mutex::new(descriptor)))
    }

    pub fn status(&self) -> Status {
        self.0.lock().status()
    }

    pub fn arity(&self) -> usize {
        self.0.lock().arity()
    }

    /// # Safety
    ///
    /// See [`CallDescriptor::invoke`]. The lock is held for the whole native
    /// call, so a callee that re-enters this handle deadlocks.
    pub unsafe fn call(&self, args: &[Value]) -> Result<Option<Value>> {
        let descriptor = self.0.lock();
        unsafe { descriptor.invoke(args) }
    }

    pub fn close(&self) {
        self.0.lock().release();
    }

    pub fn is_released(&self) -> bool {
        self.0.lock().is_released()
    }
}

impl From<CallDescriptor> for SharedDescriptor {
    fn from(descriptor: CallDescriptor) -> Self {
        Self::new(descriptor)
    }
}
