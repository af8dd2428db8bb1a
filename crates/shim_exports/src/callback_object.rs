//! Caller-owned callback objects.
//!
//! A consumer hands us a pointer to a [`CallbackObject`]: a table of entry
//! points followed by a flags byte and the callback kind. The object stays
//! owned by the caller; [`ForeignCallback`] only borrows it for as long as it
//! is registered.

use shim_core::{CallId, CallbackTarget, TargetId};
use std::ffi::{c_int, c_void};
use std::ptr::NonNull;

/// Set while the object sits in a registry.
pub const FLAG_REGISTERED: u8 = 0x01;
/// Routes the object to the server role.
pub const FLAG_GAME_SERVER: u8 = 0x02;

#[repr(C)]
pub struct CallbackVTable {
    pub run: unsafe extern "C" fn(this: *mut CallbackObject, param: *mut c_void),
    pub run_call_result: unsafe extern "C" fn(
        this: *mut CallbackObject,
        param: *mut c_void,
        io_failure: bool,
        call: u64,
    ),
    pub size_bytes: unsafe extern "C" fn(this: *mut CallbackObject) -> c_int,
}

#[repr(C)]
pub struct CallbackObject {
    pub vtable: *const CallbackVTable,
    pub flags: u8,
    pub kind: c_int,
}

/// A registered [`CallbackObject`].
pub struct ForeignCallback {
    object: NonNull<CallbackObject>,
}

// The object is only touched under the context lock or from a dispatch
// cycle, which the context serializes.
unsafe impl Send for ForeignCallback {}
unsafe impl Sync for ForeignCallback {}

impl ForeignCallback {
    /// Wraps `object`. Returns `None` for null pointers or a null table.
    ///
    /// # Safety
    ///
    /// `object` must stay valid until it is unregistered.
    pub unsafe fn from_raw(object: *mut CallbackObject) -> Option<Self> {
        let object = NonNull::new(object)?;
        if object.as_ref().vtable.is_null() {
            return None;
        }
        Some(Self { object })
    }

    /// Overrides the kind stored in the object, as registration does.
    pub fn set_kind(&self, kind: i32) {
        unsafe { (*self.object.as_ptr()).kind = kind };
    }

    pub fn flags(&self) -> u8 {
        unsafe { self.object.as_ref().flags }
    }

    fn vtable(&self) -> &CallbackVTable {
        unsafe { &*self.object.as_ref().vtable }
    }
}

impl CallbackTarget for ForeignCallback {
    fn kind(&self) -> i32 {
        unsafe { self.object.as_ref().kind }
    }

    fn is_game_server(&self) -> bool {
        self.flags() & FLAG_GAME_SERVER != 0
    }

    fn run(&self, payload: &[u8]) {
        let mut param = payload.to_vec();
        unsafe { (self.vtable().run)(self.object.as_ptr(), param.as_mut_ptr().cast()) }
    }

    fn run_call_result(&self, payload: &[u8], io_failure: bool, call: CallId) {
        let mut param = payload.to_vec();
        unsafe {
            (self.vtable().run_call_result)(
                self.object.as_ptr(),
                param.as_mut_ptr().cast(),
                io_failure,
                call.0,
            )
        }
    }

    /// Identity is the caller's object, not this wrapper.
    fn id(&self) -> TargetId {
        TargetId(self.object.as_ptr() as usize)
    }

    fn set_registered(&self, registered: bool) {
        let object = self.object.as_ptr();
        unsafe {
            if registered {
                (*object).flags |= FLAG_REGISTERED;
            } else {
                (*object).flags &= !FLAG_REGISTERED;
            }
        }
    }
}
