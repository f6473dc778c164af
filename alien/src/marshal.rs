//! Conversion between host [`Value`]s and native slots.
//!
//! Both directions go through one table indexed by [`TypeTag`], so a slot is
//! only ever interpreted through the tag its libffi type maps back to.

use core::ffi::{CStr, c_char};
use std::mem::size_of;

use libffi::raw;

use crate::error::{Error, Result};
use crate::slot::ArgumentSlot;
use crate::types::TypeTag;
use crate::value::Value;

type EncodeFn = fn(&mut ArgumentSlot, Option<&Value>, usize) -> Result<()>;
type DecodeFn = fn(&ArgumentSlot) -> Option<Value>;

struct Codec {
    tag: TypeTag,
    encode: EncodeFn,
    decode: DecodeFn,
}

impl Codec {
    const fn new(tag: TypeTag, encode: EncodeFn, decode: DecodeFn) -> Self {
        Self {
            tag,
            encode,
            decode,
        }
    }
}

static CODECS: [Codec; TypeTag::COUNT] = [
    Codec::new(TypeTag::Void, encode_void, decode_void),
    Codec::new(TypeTag::UInt8, encode_int::<u8>, decode_int::<u8>),
    Codec::new(TypeTag::Int8, encode_int::<i8>, decode_int::<i8>),
    Codec::new(TypeTag::UInt16, encode_int::<u16>, decode_int::<u16>),
    Codec::new(TypeTag::Int16, encode_int::<i16>, decode_int::<i16>),
    Codec::new(TypeTag::UInt32, encode_int::<u32>, decode_int::<u32>),
    Codec::new(TypeTag::Int32, encode_int::<i32>, decode_int::<i32>),
    Codec::new(TypeTag::UInt64, encode_int::<u64>, decode_int::<u64>),
    Codec::new(TypeTag::Int64, encode_int::<i64>, decode_int::<i64>),
    Codec::new(TypeTag::Float, encode_float::<f32>, decode_float::<f32>),
    Codec::new(TypeTag::Double, encode_float::<f64>, decode_float::<f64>),
    Codec::new(TypeTag::LongDouble, encode_long_double, decode_long_double),
    Codec::new(TypeTag::Pointer, encode_pointer, decode_pointer),
];

/// Look up the codec for a slot's libffi type. This is the single place an
/// unrecognised ABI type is reported.
fn codec_for(abi: *const raw::ffi_type) -> Result<&'static Codec> {
    let tag = TypeTag::tag_of(abi)?;
    Ok(&CODECS[tag.index()])
}

/// Encode the argument at 1-based `position` into `slot`.
///
/// `value` is `None` when the caller supplied fewer values than the
/// descriptor declares.
pub fn encode(
    slot: &mut ArgumentSlot,
    value: Option<&Value>,
    position: usize,
) -> Result<()> {
    let codec = codec_for(slot.abi())?;
    (codec.encode)(slot, value, position)
}

/// Decode a slot. `void` decodes to `None`.
pub fn decode(slot: &ArgumentSlot) -> Result<Option<Value>> {
    let codec = codec_for(slot.abi())?;
    Ok((codec.decode)(slot))
}

/// Decode a slot that libffi wrote a return value into.
///
/// libffi widens integral returns smaller than `ffi_arg` to a full
/// `ffi_arg`; the slot is narrowed back to its declared width first.
pub fn decode_return(slot: &mut ArgumentSlot) -> Result<Option<Value>> {
    let codec = codec_for(slot.abi())?;
    narrow_return(slot, codec.tag);
    Ok((codec.decode)(slot))
}

fn narrow_return(slot: &mut ArgumentSlot, tag: TypeTag) {
    fn narrow<T: Integer>(slot: &mut ArgumentSlot) {
        if size_of::<T>() < size_of::<raw::ffi_arg>() {
            let wide = slot.read::<raw::ffi_arg>();
            slot.write(T::wrap(wide as i64));
        }
    }
    match tag {
        TypeTag::UInt8 => narrow::<u8>(slot),
        TypeTag::Int8 => narrow::<i8>(slot),
        TypeTag::UInt16 => narrow::<u16>(slot),
        TypeTag::Int16 => narrow::<i16>(slot),
        TypeTag::UInt32 => narrow::<u32>(slot),
        TypeTag::Int32 => narrow::<i32>(slot),
        _ => {}
    }
}

// ── Scalar conversions ───────────────────────────────────────────────

trait Integer: Copy {
    /// Two's-complement truncation to this width.
    fn wrap(n: i64) -> Self;
    fn widen(self) -> i64;
}

macro_rules! impl_integer {
    ($($t:ty),*) => {
        $(impl Integer for $t {
            #[inline(always)]
            fn wrap(n: i64) -> Self {
                n as $t
            }

            #[inline(always)]
            fn widen(self) -> i64 {
                self as i64
            }
        })*
    };
}

impl_integer!(u8, i8, u16, i16, u32, i32, u64, i64);

trait Floating: Copy {
    fn narrow(n: f64) -> Self;
    fn widen(self) -> f64;
}

impl Floating for f32 {
    fn narrow(n: f64) -> Self {
        n as f32
    }

    fn widen(self) -> f64 {
        self as f64
    }
}

impl Floating for f64 {
    fn narrow(n: f64) -> Self {
        n
    }

    fn widen(self) -> f64 {
        self
    }
}

fn bad_argument(
    value: Option<&Value>,
    position: usize,
    expected: &'static str,
) -> Error {
    Error::BadArgument {
        position,
        expected,
        got: value.map_or("no value", Value::type_name),
    }
}

fn expect_integer(value: Option<&Value>, position: usize) -> Result<i64> {
    value
        .and_then(Value::as_integer)
        .ok_or_else(|| bad_argument(value, position, "integer"))
}

fn expect_number(value: Option<&Value>, position: usize) -> Result<f64> {
    value
        .and_then(Value::as_number)
        .ok_or_else(|| bad_argument(value, position, "number"))
}

fn encode_void(
    _slot: &mut ArgumentSlot,
    _value: Option<&Value>,
    _position: usize,
) -> Result<()> {
    Ok(())
}

fn decode_void(_slot: &ArgumentSlot) -> Option<Value> {
    None
}

fn encode_int<T: Integer>(
    slot: &mut ArgumentSlot,
    value: Option<&Value>,
    position: usize,
) -> Result<()> {
    let n = expect_integer(value, position)?;
    slot.write(T::wrap(n));
    Ok(())
}

fn decode_int<T: Integer>(slot: &ArgumentSlot) -> Option<Value> {
    Some(Value::Integer(slot.read::<T>().widen()))
}

fn encode_float<T: Floating>(
    slot: &mut ArgumentSlot,
    value: Option<&Value>,
    position: usize,
) -> Result<()> {
    let n = expect_number(value, position)?;
    slot.write(T::narrow(n));
    Ok(())
}

fn decode_float<T: Floating>(slot: &ArgumentSlot) -> Option<Value> {
    Some(Value::Number(slot.read::<T>().widen()))
}

fn encode_long_double(
    slot: &mut ArgumentSlot,
    value: Option<&Value>,
    position: usize,
) -> Result<()> {
    let n = expect_number(value, position)?;
    slot.write_long_double(n);
    Ok(())
}

fn decode_long_double(slot: &ArgumentSlot) -> Option<Value> {
    Some(Value::Number(slot.read_long_double()))
}

fn encode_pointer(
    slot: &mut ArgumentSlot,
    value: Option<&Value>,
    position: usize,
) -> Result<()> {
    let ptr: *const u8 = match value {
        // The callee may read up to a NUL, so the buffer must end in one.
        Some(Value::Bytes(bytes)) if bytes.last() == Some(&0) => bytes.as_ptr(),
        Some(Value::Bytes(_)) => {
            return Err(Error::BadArgument {
                position,
                expected: "string",
                got: "unterminated string",
            });
        }
        Some(Value::Address(addr)) => *addr as *const u8,
        Some(Value::Nil) => std::ptr::null(),
        _ => return Err(bad_argument(value, position, "string")),
    };
    slot.write(ptr);
    Ok(())
}

/// The returned address is read as a C string and copied out. NULL
/// becomes nil.
fn decode_pointer(slot: &ArgumentSlot) -> Option<Value> {
    let ptr = slot.read::<*const c_char>();
    if ptr.is_null() {
        return Some(Value::Nil);
    }
    // SAFETY: the callee's contract says a non-null pointer return is a
    // NUL-terminated string.
    let s = unsafe { CStr::from_ptr(ptr) };
    Some(Value::Bytes(s.to_bytes_with_nul().to_vec()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slot(tag: TypeTag) -> ArgumentSlot {
        ArgumentSlot::new(tag.abi_type())
    }

    fn through(tag: TypeTag, value: Value) -> Option<Value> {
        let mut slot = slot(tag);
        encode(&mut slot, Some(&value), 1).expect("encode");
        decode(&slot).expect("decode")
    }

    #[test]
    fn table_is_indexed_by_tag() {
        for (idx, codec) in CODECS.iter().enumerate() {
            assert_eq!(codec.tag.index(), idx);
        }
    }

    #[test]
    fn scalars_survive_a_slot() {
        assert_eq!(
            through(TypeTag::Int32, Value::Integer(-123456)),
            Some(Value::Integer(-123456))
        );
        assert_eq!(
            through(TypeTag::UInt8, Value::Integer(255)),
            Some(Value::Integer(255))
        );
        assert_eq!(
            through(TypeTag::Double, Value::Number(3.5)),
            Some(Value::Number(3.5))
        );
        assert_eq!(
            through(TypeTag::LongDouble, Value::Number(3.5)),
            Some(Value::Number(3.5))
        );
        assert_eq!(
            through(TypeTag::Float, Value::Integer(2)),
            Some(Value::Number(2.0))
        );
    }

    #[test]
    fn integers_wrap_to_declared_width() {
        assert_eq!(
            through(TypeTag::UInt8, Value::Integer(256)),
            Some(Value::Integer(0))
        );
        assert_eq!(
            through(TypeTag::Int8, Value::Integer(200)),
            Some(Value::Integer(-56))
        );
        assert_eq!(
            through(TypeTag::UInt16, Value::Integer(-1)),
            Some(Value::Integer(0xffff))
        );
        assert_eq!(
            through(TypeTag::UInt32, Value::Integer(1 << 32 | 7)),
            Some(Value::Integer(7))
        );
        assert_eq!(
            through(TypeTag::UInt64, Value::Integer(-1)),
            Some(Value::Integer(-1))
        );
    }

    #[test]
    fn integral_numbers_encode_as_integers() {
        assert_eq!(
            through(TypeTag::Int16, Value::Number(-7.0)),
            Some(Value::Integer(-7))
        );
    }

    #[test]
    fn wrong_kinds_are_bad_arguments() {
        let mut s = slot(TypeTag::Int32);
        assert_eq!(
            encode(&mut s, Some(&Value::Number(1.5)), 2),
            Err(Error::BadArgument {
                position: 2,
                expected: "integer",
                got: "number",
            })
        );
        assert_eq!(
            encode(&mut s, None, 3),
            Err(Error::BadArgument {
                position: 3,
                expected: "integer",
                got: "no value",
            })
        );

        let mut s = slot(TypeTag::Double);
        assert!(matches!(
            encode(&mut s, Some(&Value::string("x")), 1),
            Err(Error::BadArgument { got: "string", .. })
        ));

        let mut s = slot(TypeTag::Pointer);
        assert!(matches!(
            encode(&mut s, Some(&Value::Integer(1)), 1),
            Err(Error::BadArgument {
                expected: "string",
                ..
            })
        ));
    }

    #[test]
    fn pointer_stores_address_without_copy() {
        let value = Value::string("abc");
        let Value::Bytes(bytes) = &value else {
            unreachable!()
        };
        let mut s = slot(TypeTag::Pointer);
        encode(&mut s, Some(&value), 1).expect("encode");
        assert_eq!(s.read::<*const u8>(), bytes.as_ptr());

        // Decoding reads the C string back through that address.
        assert_eq!(decode(&s).expect("decode"), Some(value.clone()));
    }

    #[test]
    fn pointer_bytes_must_be_nul_terminated() {
        let mut s = slot(TypeTag::Pointer);
        for bytes in [vec![], vec![b'a', b'b']] {
            assert_eq!(
                encode(&mut s, Some(&Value::Bytes(bytes)), 2),
                Err(Error::BadArgument {
                    position: 2,
                    expected: "string",
                    got: "unterminated string",
                })
            );
        }

        let empty = Value::string("");
        encode(&mut s, Some(&empty), 1).expect("empty string");
        assert_eq!(decode(&s).expect("decode"), Some(Value::string("")));
    }

    #[test]
    fn null_pointers() {
        let mut s = slot(TypeTag::Pointer);
        encode(&mut s, Some(&Value::Nil), 1).expect("encode");
        assert!(s.read::<*const u8>().is_null());
        assert_eq!(decode(&s).expect("decode"), Some(Value::Nil));

        encode(&mut s, Some(&Value::Address(0x1000)), 1).expect("encode");
        assert_eq!(s.read::<usize>(), 0x1000);
    }

    #[test]
    fn void_decodes_to_nothing() {
        assert_eq!(decode(&slot(TypeTag::Void)).expect("decode"), None);
    }

    #[test]
    fn unknown_abi_type_is_internal() {
        let mut s = ArgumentSlot::new(std::ptr::null_mut());
        assert!(matches!(
            encode(&mut s, Some(&Value::Integer(1)), 1),
            Err(Error::Internal { .. })
        ));
        assert!(matches!(decode(&s), Err(Error::Internal { .. })));
    }

    #[test]
    fn returns_are_narrowed_from_ffi_arg() {
        let mut s = slot(TypeTag::Int8);
        s.write::<raw::ffi_arg>(-5i64 as raw::ffi_arg);
        assert_eq!(
            decode_return(&mut s).expect("decode"),
            Some(Value::Integer(-5))
        );

        let mut s = slot(TypeTag::UInt16);
        s.write::<raw::ffi_arg>(0xbeef);
        assert_eq!(
            decode_return(&mut s).expect("decode"),
            Some(Value::Integer(0xbeef))
        );
    }
}
