use core::ffi::c_void;
use std::mem::size_of;

use libffi::raw;

/// Bytes reserved per slot. Large enough for every supported scalar,
/// including an extended-precision `long double`.
pub const SLOT_SIZE: usize = 16;

#[derive(Clone, Copy)]
#[repr(C, align(16))]
struct SlotBytes([u8; SLOT_SIZE]);

/// Native storage for one argument or return value during a single call.
///
/// Each slot remembers the libffi type it was allocated for; the marshaller
/// dispatches on that type rather than on any out-of-band bookkeeping.
pub struct ArgumentSlot {
    bytes: SlotBytes,
    abi: *mut raw::ffi_type,
}

impl ArgumentSlot {
    pub fn new(abi: *mut raw::ffi_type) -> Self {
        Self {
            bytes: SlotBytes([0; SLOT_SIZE]),
            abi,
        }
    }

    #[inline(always)]
    pub fn abi(&self) -> *mut raw::ffi_type {
        self.abi
    }

    /// Address handed to libffi as the argument or return storage.
    #[inline(always)]
    pub fn as_mut_ptr(&mut self) -> *mut c_void {
        self.bytes.0.as_mut_ptr().cast()
    }

    #[inline(always)]
    pub fn bytes(&self) -> &[u8; SLOT_SIZE] {
        &self.bytes.0
    }

    #[inline(always)]
    pub fn bytes_mut(&mut self) -> &mut [u8; SLOT_SIZE] {
        &mut self.bytes.0
    }

    /// Store `value` at the start of the slot in native byte order.
    #[inline(always)]
    pub fn write<T: Copy>(&mut self, value: T) {
        const { assert!(size_of::<T>() <= SLOT_SIZE) };
        // SAFETY: size checked above; SlotBytes is 16-aligned.
        unsafe { self.bytes.0.as_mut_ptr().cast::<T>().write(value) }
    }

    /// Read a `T` from the start of the slot.
    ///
    /// Only used with plain integer, float and pointer types, for which
    /// every bit pattern is valid.
    #[inline(always)]
    pub fn read<T: Copy>(&self) -> T {
        const { assert!(size_of::<T>() <= SLOT_SIZE) };
        // SAFETY: size checked above; SlotBytes is 16-aligned.
        unsafe { self.bytes.0.as_ptr().cast::<T>().read() }
    }
}

// ── long double ─────────────────────────────────────────────────────
//
// Rust has no native `long double`, so values travel as f64 on the host side
// and are converted to the platform's layout in the slot.

/// Layout of C `long double` on the compilation target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LongDoubleFormat {
    /// 80-bit x87 extended precision, padded to 12 or 16 bytes.
    X87,
    /// IEEE 754 binary128.
    Quad,
    /// Same representation as `double`.
    Double,
}

#[cfg(all(
    any(target_arch = "x86", target_arch = "x86_64"),
    not(target_env = "msvc")
))]
pub const LONG_DOUBLE: LongDoubleFormat = LongDoubleFormat::X87;

#[cfg(all(
    any(
        target_arch = "aarch64",
        target_arch = "riscv64",
        target_arch = "s390x"
    ),
    target_os = "linux"
))]
pub const LONG_DOUBLE: LongDoubleFormat = LongDoubleFormat::Quad;

#[cfg(not(any(
    all(
        any(target_arch = "x86", target_arch = "x86_64"),
        not(target_env = "msvc")
    ),
    all(
        any(
            target_arch = "aarch64",
            target_arch = "riscv64",
            target_arch = "s390x"
        ),
        target_os = "linux"
    )
)))]
pub const LONG_DOUBLE: LongDoubleFormat = LongDoubleFormat::Double;

const F64_FRAC_BITS: u32 = 52;
const F64_FRAC_MASK: u64 = (1 << F64_FRAC_BITS) - 1;
const F64_EXP_MASK: u64 = 0x7ff;
const F64_BIAS: i32 = 1023;
const EXT_EXP_MASK: u16 = 0x7fff;
const EXT_BIAS: i32 = 16383;

/// Split an f64 into sign, a normalised 64-bit mantissa whose top bit is
/// the integer bit, and the unbiased exponent of that top bit.
///
/// Zero yields a zero mantissa; infinities and NaNs yield `None` for the
/// exponent with the fraction bits left-aligned below the integer bit.
fn split_f64(value: f64) -> (bool, u64, Option<i32>) {
    let bits = value.to_bits();
    let sign = bits >> 63 != 0;
    let exp = ((bits >> F64_FRAC_BITS) & F64_EXP_MASK) as i32;
    let frac = bits & F64_FRAC_MASK;

    if exp == F64_EXP_MASK as i32 {
        return (sign, (1 << 63) | (frac << 11), None);
    }
    if exp == 0 {
        if frac == 0 {
            return (sign, 0, Some(0));
        }
        let shift = frac.leading_zeros();
        let mantissa = frac << shift;
        // frac * 2^-1074 == mantissa * 2^(-1074 - shift)
        return (sign, mantissa, Some(-1074 - shift as i32 + 63));
    }
    (sign, (1 << 63) | (frac << 11), Some(exp - F64_BIAS))
}

/// Multiply by a power of two without overflowing the scale factor itself.
fn scale(mut value: f64, mut exp: i32) -> f64 {
    const UP: f64 = f64::from_bits(((F64_BIAS + 1000) as u64) << 52);
    const DOWN: f64 = f64::from_bits(((F64_BIAS - 1000) as u64) << 52);
    while exp > 1000 {
        value *= UP;
        exp -= 1000;
        if value.is_infinite() {
            return value;
        }
    }
    while exp < -1000 {
        value *= DOWN;
        exp += 1000;
        if value == 0.0 {
            return value;
        }
    }
    value * f64::from_bits(((F64_BIAS + exp) as u64) << 52)
}

/// Rebuild an f64 from sign, integer-bit-first mantissa and the unbiased
/// exponent of the mantissa's top bit.
fn join_f64(sign: bool, mantissa: u64, exp: i32) -> f64 {
    let magnitude = scale(mantissa as f64, exp - 63);
    if sign { -magnitude } else { magnitude }
}

fn to_x87(value: f64) -> [u8; 10] {
    let (sign, mantissa, exp) = split_f64(value);
    let biased = match exp {
        None => EXT_EXP_MASK,
        Some(_) if mantissa == 0 => 0,
        Some(e) => (e + EXT_BIAS) as u16,
    };
    let sign_exp = ((sign as u16) << 15) | biased;
    let mut out = [0u8; 10];
    out[..8].copy_from_slice(&mantissa.to_le_bytes());
    out[8..].copy_from_slice(&sign_exp.to_le_bytes());
    out
}

fn from_x87(bytes: &[u8]) -> f64 {
    let mut mantissa_bytes = [0u8; 8];
    mantissa_bytes.copy_from_slice(&bytes[..8]);
    let mantissa = u64::from_le_bytes(mantissa_bytes);
    let sign_exp = u16::from_le_bytes([bytes[8], bytes[9]]);
    let sign = sign_exp >> 15 != 0;
    let biased = (sign_exp & EXT_EXP_MASK) as i32;

    if biased == EXT_EXP_MASK as i32 {
        let special = if mantissa << 1 == 0 {
            f64::INFINITY
        } else {
            f64::NAN
        };
        return if sign { -special } else { special };
    }
    // Denormals use the exponent of biased value 1.
    let exp = biased.max(1) - EXT_BIAS;
    join_f64(sign, mantissa, exp)
}

fn to_quad(value: f64) -> u128 {
    let (sign, mantissa, exp) = split_f64(value);
    let (biased, frac) = match exp {
        None => (EXT_EXP_MASK as u128, (mantissa << 1) as u128),
        Some(_) if mantissa == 0 => (0, 0),
        Some(e) => ((e + EXT_BIAS) as u128, (mantissa << 1) as u128),
    };
    // 63 explicit fraction bits, left-aligned in the 112-bit field.
    ((sign as u128) << 127) | (biased << 112) | (frac << 48)
}

fn from_quad(bits: u128) -> f64 {
    let sign = bits >> 127 != 0;
    let biased = ((bits >> 112) as u16 & EXT_EXP_MASK) as i32;
    let frac = bits & ((1u128 << 112) - 1);

    if biased == EXT_EXP_MASK as i32 {
        let special = if frac == 0 { f64::INFINITY } else { f64::NAN };
        return if sign { -special } else { special };
    }
    if biased == 0 && frac == 0 {
        return if sign { -0.0 } else { 0.0 };
    }
    let integer_bit = if biased == 0 { 0 } else { 1u64 << 63 };
    let mantissa = integer_bit | (frac >> 49) as u64;
    join_f64(sign, mantissa, biased.max(1) - EXT_BIAS)
}

impl ArgumentSlot {
    pub fn write_long_double(&mut self, value: f64) {
        match LONG_DOUBLE {
            LongDoubleFormat::X87 => {
                self.bytes.0[..10].copy_from_slice(&to_x87(value))
            }
            LongDoubleFormat::Quad => self.write(to_quad(value)),
            LongDoubleFormat::Double => self.write(value),
        }
    }

    pub fn read_long_double(&self) -> f64 {
        match LONG_DOUBLE {
            LongDoubleFormat::X87 => from_x87(&self.bytes.0[..10]),
            LongDoubleFormat::Quad => from_quad(self.read::<u128>()),
            LongDoubleFormat::Double => self.read::<f64>(),
        }
    }
}
