//! Registration, pump and manual dispatch exports.

use crate::callback_object::{CallbackObject, ForeignCallback};
use crate::{context, guard};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use shim_core::{CallId, PipeHandle, ShimContext};
use std::collections::HashMap;
use std::ffi::{c_int, c_void};
use std::sync::Arc;
use tracing::{debug, trace};

/// Event handed to a manual dispatch consumer.
#[repr(C)]
#[derive(Debug)]
pub struct CallbackMsg {
    pub user: c_int,
    pub kind: c_int,
    pub param: *mut u8,
    pub param_size: c_int,
}

impl Default for CallbackMsg {
    fn default() -> Self {
        Self {
            user: 0,
            kind: 0,
            param: std::ptr::null_mut(),
            param_size: 0,
        }
    }
}

/// Keeps the payload of each pipe's last fetched event alive until it is freed.
#[derive(Default)]
pub struct PinnedPayloads {
    by_pipe: Mutex<HashMap<PipeHandle, Arc<[u8]>>>,
}

impl PinnedPayloads {
    fn pin(&self, pipe: PipeHandle, payload: Arc<[u8]>) -> *mut u8 {
        let param = payload.as_ptr() as *mut u8;
        self.by_pipe.lock().insert(pipe, payload);
        param
    }

    fn release(&self, pipe: PipeHandle) {
        self.by_pipe.lock().remove(&pipe);
    }

    /// Drops pins nobody can free any more: the released pipe's, and every
    /// pin once the aggregate has been retired.
    pub fn forget(&self, context: &ShimContext, released: Option<PipeHandle>) {
        let mut by_pipe = self.by_pipe.lock();
        if !context.is_alive() {
            if !by_pipe.is_empty() {
                debug!("Dropping {} pinned payloads with the aggregate", by_pipe.len());
            }
            by_pipe.clear();
        } else if let Some(pipe) = released {
            by_pipe.remove(&pipe);
        }
    }

    pub fn len(&self) -> usize {
        self.by_pipe.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub(crate) static PINNED: Lazy<PinnedPayloads> = Lazy::new(PinnedPayloads::default);

/// Fills `out` with the next event of `pipe`'s role. `out` is untouched on failure.
pub fn next_callback(
    context: &ShimContext,
    pinned: &PinnedPayloads,
    pipe: PipeHandle,
    out: &mut CallbackMsg,
) -> bool {
    match context.manual_dispatch_get_next_callback(pipe) {
        Ok(message) => {
            out.user = message.user.0;
            out.kind = message.kind;
            out.param_size = message.payload.len() as c_int;
            out.param = pinned.pin(pipe, message.payload);
            true
        }
        Err(e) => {
            trace!("{}", e);
            false
        }
    }
}

/// Single-call fetch of the older pipe API: switches to manual dispatch,
/// runs a cycle for both roles and hands out the next event.
pub fn get_callback(
    context: &ShimContext,
    pinned: &PinnedPayloads,
    pipe: PipeHandle,
    out: &mut CallbackMsg,
) -> bool {
    context.manual_dispatch_init();
    context.run_callbacks(true, true);
    next_callback(context, pinned, pipe, out)
}

pub fn free_last_callback(context: &ShimContext, pinned: &PinnedPayloads, pipe: PipeHandle) {
    context.manual_dispatch_free_last_callback(pipe);
    pinned.release(pipe);
}

/// Copies a completed call result into `out`. Returns the success flag and
/// the failure flag of the call.
pub fn api_call_result(
    context: &ShimContext,
    pipe: PipeHandle,
    call: CallId,
    out: &mut [u8],
    expected_kind: i32,
) -> (bool, bool) {
    match context.get_api_call_result(pipe, call, out, expected_kind) {
        Ok(failed) => (true, failed),
        Err(e) => {
            debug!("GetAPICallResult: {}", e);
            (false, false)
        }
    }
}

/// # Safety
///
/// `object` must be null or a valid callback object that outlives its
/// registration.
#[no_mangle]
pub unsafe extern "C" fn SteamAPI_RegisterCallback(object: *mut CallbackObject, kind: c_int) {
    guard("SteamAPI_RegisterCallback", (), || {
        let Some(target) = ForeignCallback::from_raw(object) else {
            debug!("RegisterCallback with a null object");
            return;
        };
        target.set_kind(kind);
        context().register_callback(Arc::new(target), kind);
    })
}

/// # Safety
///
/// `object` must be null or a valid callback object.
#[no_mangle]
pub unsafe extern "C" fn SteamAPI_UnregisterCallback(object: *mut CallbackObject) {
    guard("SteamAPI_UnregisterCallback", (), || {
        if let Some(target) = ForeignCallback::from_raw(object) {
            context().unregister_callback(&target);
        }
    })
}

/// # Safety
///
/// `object` must be null or a valid callback object that outlives its
/// registration.
#[no_mangle]
pub unsafe extern "C" fn SteamAPI_RegisterCallResult(object: *mut CallbackObject, call: u64) {
    guard("SteamAPI_RegisterCallResult", (), || {
        if let Some(target) = ForeignCallback::from_raw(object) {
            context().register_call_result(Arc::new(target), CallId(call));
        }
    })
}

/// # Safety
///
/// `object` must be null or a valid callback object.
#[no_mangle]
pub unsafe extern "C" fn SteamAPI_UnregisterCallResult(object: *mut CallbackObject, call: u64) {
    guard("SteamAPI_UnregisterCallResult", (), || {
        if let Some(target) = ForeignCallback::from_raw(object) {
            context().unregister_call_result(&target, CallId(call));
        }
    })
}

#[no_mangle]
pub extern "C" fn SteamAPI_RunCallbacks() {
    guard("SteamAPI_RunCallbacks", (), || context().run_callbacks(true, false))
}

#[no_mangle]
pub extern "C" fn SteamGameServer_RunCallbacks() {
    guard("SteamGameServer_RunCallbacks", (), || {
        context().run_callbacks(false, true)
    })
}

#[no_mangle]
pub extern "C" fn Steam_RunCallbacks(_pipe: c_int, game_server_callbacks: bool) {
    guard("Steam_RunCallbacks", (), || {
        let context = context();
        context.run_callbacks(true, false);
        if game_server_callbacks {
            context.run_callbacks(false, true);
        }
    })
}

#[no_mangle]
pub extern "C" fn SteamAPI_ManualDispatch_Init() {
    guard("SteamAPI_ManualDispatch_Init", (), || {
        context().manual_dispatch_init()
    })
}

#[no_mangle]
pub extern "C" fn SteamAPI_ManualDispatch_RunFrame(pipe: c_int) {
    guard("SteamAPI_ManualDispatch_RunFrame", (), || {
        context().manual_dispatch_run_frame(PipeHandle(pipe))
    })
}

/// # Safety
///
/// `msg` must be null or valid for writes.
#[no_mangle]
pub unsafe extern "C" fn SteamAPI_ManualDispatch_GetNextCallback(
    pipe: c_int,
    msg: *mut CallbackMsg,
) -> bool {
    guard("SteamAPI_ManualDispatch_GetNextCallback", false, || {
        let Some(out) = msg.as_mut() else {
            return false;
        };
        next_callback(context(), &PINNED, PipeHandle(pipe), out)
    })
}

#[no_mangle]
pub extern "C" fn SteamAPI_ManualDispatch_FreeLastCallback(pipe: c_int) {
    guard("SteamAPI_ManualDispatch_FreeLastCallback", (), || {
        free_last_callback(context(), &PINNED, PipeHandle(pipe))
    })
}

/// # Safety
///
/// `out` must be valid for `size` bytes of writes (or null with `size` 0) and
/// `failed` must be null or valid for writes.
#[no_mangle]
pub unsafe extern "C" fn SteamAPI_ManualDispatch_GetAPICallResult(
    pipe: c_int,
    call: u64,
    out: *mut c_void,
    size: c_int,
    expected_kind: c_int,
    failed: *mut bool,
) -> bool {
    guard("SteamAPI_ManualDispatch_GetAPICallResult", false, || {
        write_call_result(pipe, call, out, size, expected_kind, failed)
    })
}

unsafe fn write_call_result(
    pipe: c_int,
    call: u64,
    out: *mut c_void,
    size: c_int,
    expected_kind: c_int,
    failed: *mut bool,
) -> bool {
    let buffer: &mut [u8] = if out.is_null() || size <= 0 {
        &mut []
    } else {
        std::slice::from_raw_parts_mut(out.cast::<u8>(), size as usize)
    };
    let (ok, io_failure) =
        api_call_result(context(), PipeHandle(pipe), CallId(call), buffer, expected_kind);
    if ok && !failed.is_null() {
        *failed = io_failure;
    }
    ok
}

/// # Safety
///
/// `msg` must be null or valid for writes.
#[no_mangle]
pub unsafe extern "C" fn Steam_BGetCallback(pipe: c_int, msg: *mut CallbackMsg) -> bool {
    guard("Steam_BGetCallback", false, || {
        let Some(out) = msg.as_mut() else {
            return false;
        };
        get_callback(context(), &PINNED, PipeHandle(pipe), out)
    })
}

#[no_mangle]
pub extern "C" fn Steam_FreeLastCallback(pipe: c_int) {
    guard("Steam_FreeLastCallback", (), || {
        free_last_callback(context(), &PINNED, PipeHandle(pipe))
    })
}

/// # Safety
///
/// Same contract as [`SteamAPI_ManualDispatch_GetAPICallResult`].
#[no_mangle]
pub unsafe extern "C" fn Steam_GetAPICallResult(
    pipe: c_int,
    call: u64,
    out: *mut c_void,
    size: c_int,
    expected_kind: c_int,
    failed: *mut bool,
) -> bool {
    guard("Steam_GetAPICallResult", false, || {
        write_call_result(pipe, call, out, size, expected_kind, failed)
    })
}
