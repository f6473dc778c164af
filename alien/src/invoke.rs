use core::ffi::c_void;

use libffi::raw;
use log::trace;

use crate::descriptor::CallDescriptor;
use crate::error::Result;
use crate::marshal;
use crate::slot::ArgumentSlot;
use crate::value::Value;

impl CallDescriptor {
    /// Call the target with `args`, returning the decoded result or `None`
    /// for a `void` return.
    ///
    /// One slot is allocated per declared argument plus one for the return
    /// value; all of them are dropped before this returns. Values past the
    /// declared arity are ignored, missing ones fail with
    /// [`Error::BadArgument`](crate::Error::BadArgument) before anything is
    /// called.
    ///
    /// # Safety
    ///
    /// The declared signature must match the native function at the target
    /// address, and that address must still be mapped. `Bytes` and `Address`
    /// values passed for pointer arguments must stay valid for the whole
    /// call, and the callee may only write through them where the caller
    /// allows it. If the return type is `pointer`, a non-null result must
    /// point to a NUL-terminated string.
    pub unsafe fn invoke(&self, args: &[Value]) -> Result<Option<Value>> {
        let cif = self.cif()?;

        let mut slots: Vec<ArgumentSlot> = self
            .abi_types()
            .iter()
            .map(|&abi| ArgumentSlot::new(abi))
            .collect();
        for (idx, slot) in slots.iter_mut().enumerate() {
            marshal::encode(slot, args.get(idx), idx + 1)?;
        }
        let mut avalues: Vec<*mut c_void> =
            slots.iter_mut().map(ArgumentSlot::as_mut_ptr).collect();
        let mut rvalue = ArgumentSlot::new(cif.rtype);

        trace!(
            "calling {:p} with {} argument(s)",
            self.target().as_ptr(),
            slots.len()
        );

        // ffi_call only reads the cif; the `*mut` is an artefact of the C
        // prototype.
        let cif_ptr = cif as *const raw::ffi_cif as *mut raw::ffi_cif;
        unsafe {
            raw::ffi_call(
                cif_ptr,
                Some(*self.target().as_safe_fun()),
                rvalue.as_mut_ptr(),
                avalues.as_mut_ptr(),
            );
        }

        marshal::decode_return(&mut rvalue)
    }
}
