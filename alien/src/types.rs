use libffi::raw;

use crate::error::{Error, Result};

/// A native scalar or pointer type that can cross the call boundary.
///
/// The set is closed: every name in [`TypeTag::ALL`] maps to exactly one
/// tag, and every tag to exactly one libffi builtin type descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TypeTag {
    Void,
    UInt8,
    Int8,
    UInt16,
    Int16,
    UInt32,
    Int32,
    UInt64,
    Int64,
    Float,
    Double,
    LongDouble,
    Pointer,
}

impl TypeTag {
    pub const COUNT: usize = 13;

    /// Every tag, ordered by discriminant.
    pub const ALL: [TypeTag; Self::COUNT] = [
        TypeTag::Void,
        TypeTag::UInt8,
        TypeTag::Int8,
        TypeTag::UInt16,
        TypeTag::Int16,
        TypeTag::UInt32,
        TypeTag::Int32,
        TypeTag::UInt64,
        TypeTag::Int64,
        TypeTag::Float,
        TypeTag::Double,
        TypeTag::LongDouble,
        TypeTag::Pointer,
    ];

    #[inline(always)]
    pub const fn index(self) -> usize {
        self as usize
    }

    pub const fn name(self) -> &'static str {
        match self {
            TypeTag::Void => "void",
            TypeTag::UInt8 => "uint8",
            TypeTag::Int8 => "int8",
            TypeTag::UInt16 => "uint16",
            TypeTag::Int16 => "int16",
            TypeTag::UInt32 => "uint32",
            TypeTag::Int32 => "int32",
            TypeTag::UInt64 => "uint64",
            TypeTag::Int64 => "int64",
            TypeTag::Float => "float",
            TypeTag::Double => "double",
            TypeTag::LongDouble => "longdouble",
            TypeTag::Pointer => "pointer",
        }
    }

    /// Exact, case-sensitive lookup of a type name.
    pub fn resolve(name: &str) -> Result<TypeTag> {
        TypeTag::ALL
            .into_iter()
            .find(|tag| tag.name() == name)
            .ok_or_else(|| Error::UnknownType {
                name: name.to_string(),
            })
    }

    pub const fn is_integer(self) -> bool {
        matches!(
            self,
            TypeTag::UInt8
                | TypeTag::Int8
                | TypeTag::UInt16
                | TypeTag::Int16
                | TypeTag::UInt32
                | TypeTag::Int32
                | TypeTag::UInt64
                | TypeTag::Int64
        )
    }

    pub const fn is_floating(self) -> bool {
        matches!(
            self,
            TypeTag::Float | TypeTag::Double | TypeTag::LongDouble
        )
    }

    /// The libffi builtin descriptor for this tag.
    ///
    /// The returned pointer refers to a static inside libffi and is valid
    /// for the life of the process.
    pub fn abi_type(self) -> *mut raw::ffi_type {
        match self {
            TypeTag::Void => &raw mut raw::ffi_type_void,
            TypeTag::UInt8 => &raw mut raw::ffi_type_uint8,
            TypeTag::Int8 => &raw mut raw::ffi_type_sint8,
            TypeTag::UInt16 => &raw mut raw::ffi_type_uint16,
            TypeTag::Int16 => &raw mut raw::ffi_type_sint16,
            TypeTag::UInt32 => &raw mut raw::ffi_type_uint32,
            TypeTag::Int32 => &raw mut raw::ffi_type_sint32,
            TypeTag::UInt64 => &raw mut raw::ffi_type_uint64,
            TypeTag::Int64 => &raw mut raw::ffi_type_sint64,
            TypeTag::Float => &raw mut raw::ffi_type_float,
            TypeTag::Double => &raw mut raw::ffi_type_double,
            TypeTag::LongDouble => &raw mut raw::ffi_type_longdouble,
            TypeTag::Pointer => &raw mut raw::ffi_type_pointer,
        }
    }

    /// Reverse lookup from a libffi type descriptor.
    ///
    /// Descriptors are compared by address, so only the builtin statics
    /// handed out by [`TypeTag::abi_type`] are recognised. Anything else
    /// means the caller fed in metadata this crate never produced.
    pub fn tag_of(abi: *const raw::ffi_type) -> Result<TypeTag> {
        TypeTag::ALL
            .into_iter()
            .find(|tag| std::ptr::eq(tag.abi_type(), abi))
            .ok_or(Error::Internal {
                message: "ABI type has no type tag",
            })
    }
}

impl std::fmt::Display for TypeTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for TypeTag {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        TypeTag::resolve(s)
    }
}
