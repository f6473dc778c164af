//! Call descriptors: a target address bound to a prepared libffi call
//! interface.
//!
//! A descriptor owns every array the `ffi_cif` points into. Those arrays are
//! freed exactly once, by [`CallDescriptor::release`] or on drop, and a
//! released descriptor refuses further calls.

use core::ffi::c_uint;

use libffi::middle::CodePtr;
use libffi::raw;
use log::{debug, warn};

use crate::error::{Error, Result};
use crate::types::TypeTag;

/// Prefix on an argument type name asking for the argument to be treated as
/// a pointer to that type.
pub const REF_MARKER: char = '*';

/// Outcome of preparing the libffi call interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum Status {
    Ok = 0,
    BadTypedef = 1,
    BadAbi = 2,
}

impl Status {
    fn from_raw(status: raw::ffi_status) -> Self {
        match status {
            raw::ffi_status_FFI_OK => Status::Ok,
            raw::ffi_status_FFI_BAD_ABI => Status::BadAbi,
            // FFI_BAD_TYPEDEF, and FFI_BAD_ARGTYPE from newer libffi.
            _ => Status::BadTypedef,
        }
    }

    #[inline(always)]
    pub const fn code(self) -> i32 {
        self as i32
    }

    pub const fn name(self) -> &'static str {
        match self {
            Status::Ok => "OK",
            Status::BadTypedef => "BAD_TYPEDEF",
            Status::BadAbi => "BAD_ABI",
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// One declared argument: its type and whether the name carried
/// [`REF_MARKER`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ArgSpec {
    tag: TypeTag,
    by_ref: bool,
}

impl ArgSpec {
    pub fn new(tag: TypeTag, by_ref: bool) -> Self {
        Self { tag, by_ref }
    }

    /// Parse an argument type name such as `int32` or `*pointer`.
    pub fn parse(name: &str) -> Result<Self> {
        let (by_ref, bare) = match name.strip_prefix(REF_MARKER) {
            Some(bare) => (true, bare),
            None => (false, name),
        };
        let tag = TypeTag::resolve(bare)?;
        Ok(Self { tag, by_ref })
    }

    #[inline(always)]
    pub fn tag(&self) -> TypeTag {
        self.tag
    }

    #[inline(always)]
    pub fn by_ref(&self) -> bool {
        self.by_ref
    }
}

impl std::fmt::Display for ArgSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.by_ref {
            write!(f, "{REF_MARKER}")?;
        }
        write!(f, "{}", self.tag)
    }
}

/// The arrays a prepared `ffi_cif` refers to.
struct ArgTable {
    specs: Box<[ArgSpec]>,
    /// libffi wants a contiguous array of type pointers; `cif.arg_types`
    /// points here.
    abi: Box<[*mut raw::ffi_type]>,
}

/// A prepared, reusable call to one native function.
pub struct CallDescriptor {
    target: CodePtr,
    /// `None` for zero-arity descriptors and after release.
    args: Option<ArgTable>,
    arity: usize,
    ret: TypeTag,
    fixed_args: usize,
    variadic: bool,
    cif: Box<raw::ffi_cif>,
    status: Status,
    released: bool,
}

// SAFETY: the raw pointers inside refer either to libffi's static builtin
// types or to arrays owned by the descriptor itself. Calling the target from
// another thread is covered by the caller contract of `invoke`.
unsafe impl Send for CallDescriptor {}

impl CallDescriptor {
    /// Build a descriptor for a function with a fixed argument list.
    ///
    /// Fails with [`Error::UnknownType`] if any name is outside the type
    /// vocabulary. A libffi rejection is not an error: the descriptor is
    /// returned and [`CallDescriptor::status`] reports it.
    pub fn build_fixed<I, S>(
        target: CodePtr,
        return_type: &str,
        arg_types: I,
    ) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::build(target, None, return_type, arg_types)
    }

    /// Build a descriptor for a variadic function whose first `fixed_args`
    /// arguments are declared by its prototype.
    pub fn build_variadic<I, S>(
        target: CodePtr,
        fixed_args: usize,
        return_type: &str,
        arg_types: I,
    ) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::build(target, Some(fixed_args), return_type, arg_types)
    }

    fn build<I, S>(
        target: CodePtr,
        fixed_args: Option<usize>,
        return_type: &str,
        arg_types: I,
    ) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let ret = TypeTag::resolve(return_type)?;
        let specs = arg_types
            .into_iter()
            .map(|name| ArgSpec::parse(name.as_ref()))
            .collect::<Result<Vec<_>>>()?;

        let arity = specs.len();
        let args = (arity > 0).then(|| ArgTable {
            abi: specs.iter().map(|spec| spec.tag.abi_type()).collect(),
            specs: specs.into_boxed_slice(),
        });

        let mut descriptor = Self {
            target,
            args,
            arity,
            ret,
            fixed_args: fixed_args.unwrap_or(arity),
            variadic: fixed_args.is_some(),
            cif: Box::default(),
            status: Status::Ok,
            released: false,
        };
        descriptor.status = descriptor.prepare();

        if descriptor.status == Status::Ok {
            debug!(
                "prepared {} call {:p}: {} -> {}",
                if descriptor.variadic { "variadic" } else { "fixed" },
                descriptor.target.as_ptr(),
                descriptor.signature(),
                descriptor.ret,
            );
        } else {
            warn!(
                "preparing call {:p} ({} -> {}) failed: {}",
                descriptor.target.as_ptr(),
                descriptor.signature(),
                descriptor.ret,
                descriptor.status,
            );
        }
        Ok(descriptor)
    }

    /// Run `ffi_prep_cif` or `ffi_prep_cif_var` over the owned arrays.
    fn prepare(&mut self) -> Status {
        if self.fixed_args > self.arity {
            return Status::BadTypedef;
        }
        let (Ok(nargs), Ok(nfixed)) = (
            c_uint::try_from(self.arity),
            c_uint::try_from(self.fixed_args),
        ) else {
            return Status::BadTypedef;
        };
        let atypes = match &mut self.args {
            Some(table) => table.abi.as_mut_ptr(),
            None => std::ptr::null_mut(),
        };
        let rtype = self.ret.abi_type();
        let cif: *mut raw::ffi_cif = &mut *self.cif;

        // SAFETY: `atypes` holds `nargs` builtin type pointers and lives in
        // `self.args` for as long as the cif is usable.
        let raw_status = unsafe {
            if self.variadic {
                raw::ffi_prep_cif_var(
                    cif,
                    raw::ffi_abi_FFI_DEFAULT_ABI,
                    nfixed,
                    nargs,
                    rtype,
                    atypes,
                )
            } else {
                raw::ffi_prep_cif(
                    cif,
                    raw::ffi_abi_FFI_DEFAULT_ABI,
                    nargs,
                    rtype,
                    atypes,
                )
            }
        };
        Status::from_raw(raw_status)
    }

    /// Free the argument arrays. Calling this again, or on a descriptor
    /// without arguments, does nothing.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if self.args.take().is_some() {
            debug!("released call descriptor {:p}", self.target.as_ptr());
        }
        self.cif.arg_types = std::ptr::null_mut();
    }

    #[inline(always)]
    pub fn target(&self) -> CodePtr {
        self.target
    }

    /// Number of declared arguments, including variadic ones.
    #[inline(always)]
    pub fn arity(&self) -> usize {
        self.arity
    }

    /// The declared arguments. Empty once released.
    pub fn args(&self) -> &[ArgSpec] {
        match &self.args {
            Some(table) => &table.specs,
            None => &[],
        }
    }

    #[inline(always)]
    pub fn return_tag(&self) -> TypeTag {
        self.ret
    }

    /// Count of leading non-variadic arguments; equals the arity for fixed
    /// descriptors.
    #[inline(always)]
    pub fn fixed_args(&self) -> usize {
        self.fixed_args
    }

    #[inline(always)]
    pub fn is_variadic(&self) -> bool {
        self.variadic
    }

    #[inline(always)]
    pub fn status(&self) -> Status {
        self.status
    }

    #[inline(always)]
    pub fn is_released(&self) -> bool {
        self.released
    }

    /// The prepared interface, for the invoker only.
    pub(crate) fn cif(&self) -> Result<&raw::ffi_cif> {
        if self.released {
            return Err(Error::Released);
        }
        if self.status != Status::Ok {
            return Err(Error::NotPrepared {
                status: self.status,
            });
        }
        Ok(&self.cif)
    }

    /// Argument types as libffi sees them.
    pub(crate) fn abi_types(&self) -> &[*mut raw::ffi_type] {
        match &self.args {
            Some(table) => &table.abi,
            None => &[],
        }
    }

    fn signature(&self) -> String {
        fn render(specs: &[ArgSpec]) -> String {
            specs
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        }
        let args = self.args();
        if self.variadic && self.fixed_args <= args.len() {
            let (fixed, rest) = args.split_at(self.fixed_args);
            format!("({}; {})", render(fixed), render(rest))
        } else {
            format!("({})", render(args))
        }
    }
}

impl Drop for CallDescriptor {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for CallDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallDescriptor")
            .field("target", &self.target.as_ptr())
            .field("args", &self.args())
            .field("ret", &self.ret)
            .field("fixed_args", &self.fixed_args)
            .field("variadic", &self.variadic)
            .field("status", &self.status)
            .field("released", &self.released)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::ffi::c_void;

    extern "C" fn nothing() {}

    fn target() -> CodePtr {
        CodePtr::from_ptr(nothing as *const c_void)
    }

    #[test]
    fn parse_strips_ref_marker() {
        assert_eq!(
            ArgSpec::parse("*int32"),
            Ok(ArgSpec::new(TypeTag::Int32, true))
        );
        assert_eq!(
            ArgSpec::parse("double"),
            Ok(ArgSpec::new(TypeTag::Double, false))
        );
        assert!(ArgSpec::parse("**int32").is_err());
        assert!(ArgSpec::parse("*").is_err());
    }

    #[test]
    fn fixed_descriptor_has_declared_arity() {
        let d = CallDescriptor::build_fixed(
            target(),
            "int32",
            ["int32", "*pointer", "double"],
        )
        .expect("known types");
        assert_eq!(d.status(), Status::Ok);
        assert_eq!(d.arity(), 3);
        assert_eq!(d.fixed_args(), 3);
        assert!(!d.is_variadic());
        assert_eq!(d.return_tag(), TypeTag::Int32);
        assert_eq!(
            d.args(),
            &[
                ArgSpec::new(TypeTag::Int32, false),
                ArgSpec::new(TypeTag::Pointer, true),
                ArgSpec::new(TypeTag::Double, false),
            ]
        );
        assert_eq!(d.abi_types().len(), 3);
        assert_eq!(d.cif().expect("prepared").nargs, 3);
    }

    #[test]
    fn zero_arity_has_no_arrays() {
        let d = CallDescriptor::build_fixed(target(), "void", [""; 0])
            .expect("known types");
        assert_eq!(d.status(), Status::Ok);
        assert_eq!(d.arity(), 0);
        assert!(d.args.is_none());
        assert!(d.args().is_empty());
    }

    #[test]
    fn unknown_argument_type_builds_nothing() {
        let err = CallDescriptor::build_fixed(
            target(),
            "int32",
            ["int32", "int33", "double"],
        )
        .unwrap_err();
        assert_eq!(
            err,
            Error::UnknownType {
                name: "int33".to_string()
            }
        );
    }

    #[test]
    fn unknown_return_type_builds_nothing() {
        let err =
            CallDescriptor::build_fixed(target(), "string", ["int32"])
                .unwrap_err();
        assert!(matches!(err, Error::UnknownType { .. }));
        assert_eq!(err.to_string(), "unknown type 'string'");
    }

    #[test]
    fn variadic_descriptor_records_fixed_count() {
        let d = CallDescriptor::build_variadic(
            target(),
            1,
            "int32",
            ["pointer", "int32", "int64"],
        )
        .expect("known types");
        assert_eq!(d.status(), Status::Ok);
        assert!(d.is_variadic());
        assert_eq!(d.arity(), 3);
        assert_eq!(d.fixed_args(), 1);
        assert_eq!(d.signature(), "(pointer; int32, int64)");
    }

    #[test]
    fn variadic_fixed_count_beyond_arity_is_rejected() {
        let d = CallDescriptor::build_variadic(target(), 3, "void", ["int32"])
            .expect("known types");
        assert_eq!(d.status(), Status::BadTypedef);
        assert_eq!(
            d.cif().unwrap_err(),
            Error::NotPrepared {
                status: Status::BadTypedef
            }
        );
    }

    #[test]
    fn release_is_idempotent() {
        let mut d =
            CallDescriptor::build_fixed(target(), "int32", ["int32", "int32"])
                .expect("known types");
        d.release();
        assert!(d.is_released());
        assert!(d.args().is_empty());
        assert!(d.cif.arg_types.is_null());

        d.release();
        assert!(d.is_released());
        assert!(d.args().is_empty());
        assert_eq!(d.cif().unwrap_err(), Error::Released);
        // Shape survives release.
        assert_eq!(d.arity(), 2);
    }

    #[test]
    fn release_without_arguments_is_harmless() {
        let mut d = CallDescriptor::build_fixed(target(), "void", [""; 0])
            .expect("known types");
        d.release();
        d.release();
        assert!(d.is_released());
    }

    #[test]
    fn status_codes_match_libffi() {
        assert_eq!(Status::Ok.code(), raw::ffi_status_FFI_OK as i32);
        assert_eq!(
            Status::BadTypedef.code(),
            raw::ffi_status_FFI_BAD_TYPEDEF as i32
        );
        assert_eq!(Status::BadAbi.code(), raw::ffi_status_FFI_BAD_ABI as i32);
        assert_eq!(
            Status::from_raw(raw::ffi_status_FFI_BAD_ABI),
            Status::BadAbi
        );
    }
}
