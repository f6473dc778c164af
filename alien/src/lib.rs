//! Call native functions by address from a dynamic context.
//!
//! A [`CallDescriptor`] is built from a resolved function address and the
//! names of its return and argument types, then invoked any number of times
//! with host [`Value`]s. Symbol resolution and the host object model live
//! outside this crate; [`host`] holds the thin layer a host binds to.

mod descriptor;
mod error;
pub mod host;
mod invoke;
pub mod marshal;
mod slot;
mod types;
mod value;

pub use descriptor::{ArgSpec, CallDescriptor, REF_MARKER, Status};
pub use error::{Error, Result};
pub use libffi::middle::CodePtr;
pub use slot::{ArgumentSlot, LONG_DOUBLE, LongDoubleFormat, SLOT_SIZE};
pub use types::TypeTag;
pub use value::Value;
