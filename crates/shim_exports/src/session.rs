//! Pipe, user and init/shutdown exports.

use crate::dispatch::PINNED;
use crate::{context, guard};
use shim_core::{PipeHandle, ShimContext, UserHandle};
use std::ffi::{c_char, c_int, c_void};
use tracing::{debug, warn};

/// Header of a caller-owned context block. The context data follows it.
#[repr(C)]
pub struct ContextInitHeader {
    pub init: Option<unsafe extern "C" fn(ctx: *mut c_void)>,
    pub counter: usize,
}

/// Value stored in a block's counter for the current generation. Offset by
/// one so zeroed blocks always initialize on first use.
pub fn context_counter(context: &ShimContext) -> usize {
    context.generation() as usize + 1
}

/// Re-runs the block's initializer if a bind happened since it last ran and
/// returns the context data.
///
/// # Safety
///
/// `header` must be null or point to a header followed by the context data.
pub unsafe fn context_init(context: &ShimContext, header: *mut ContextInitHeader) -> *mut c_void {
    if header.is_null() {
        return std::ptr::null_mut();
    }
    let data = header.add(1).cast::<c_void>();
    let counter = context_counter(context);
    if (*header).counter != counter {
        debug!("Initializing context block at {:p}", header);
        if let Some(init) = (*header).init {
            init(data);
        }
        (*header).counter = counter;
    }
    data
}

fn pipe_or_zero(pipe: shim_core::Result<PipeHandle>) -> c_int {
    match pipe {
        Ok(pipe) => pipe.0,
        Err(e) => {
            warn!("❌ {}", e);
            0
        }
    }
}

#[no_mangle]
pub extern "C" fn Steam_CreateSteamPipe() -> c_int {
    guard("Steam_CreateSteamPipe", 0, || pipe_or_zero(context().create_pipe()))
}

#[no_mangle]
pub extern "C" fn Steam_BReleaseSteamPipe(pipe: c_int) -> bool {
    guard("Steam_BReleaseSteamPipe", false, || {
        let context = context();
        let released = context.release_pipe(PipeHandle(pipe));
        if released {
            PINNED.forget(context, Some(PipeHandle(pipe)));
        }
        released
    })
}

#[no_mangle]
pub extern "C" fn Steam_ConnectToGlobalUser(pipe: c_int) -> c_int {
    guard("Steam_ConnectToGlobalUser", 0, || {
        context().connect_global_user(PipeHandle(pipe)).0
    })
}

/// Creates a server pipe. The account type is accepted for signature
/// compatibility; every local user is a game server.
///
/// # Safety
///
/// `out_pipe` must be null or valid for writes.
#[no_mangle]
pub unsafe extern "C" fn Steam_CreateLocalUser(out_pipe: *mut c_int, account_type: c_int) -> c_int {
    guard("Steam_CreateLocalUser", 0, || {
        debug!("CreateLocalUser with account type {}", account_type);
        match context().create_local_user() {
            Ok((pipe, user)) => {
                if !out_pipe.is_null() {
                    *out_pipe = pipe.0;
                }
                user.0
            }
            Err(e) => {
                warn!("❌ {}", e);
                0
            }
        }
    })
}

#[no_mangle]
pub extern "C" fn Steam_ReleaseUser(pipe: c_int, user: c_int) {
    guard("Steam_ReleaseUser", (), || {
        context().release_user(PipeHandle(pipe), UserHandle(user))
    })
}

#[no_mangle]
pub extern "C" fn SteamAPI_Init() -> bool {
    guard("SteamAPI_Init", false, || match context().init_client() {
        Ok(_) => true,
        Err(e) => {
            warn!("❌ SteamAPI_Init failed: {}", e);
            false
        }
    })
}

#[no_mangle]
pub extern "C" fn SteamAPI_InitSafe() -> bool {
    SteamAPI_Init()
}

#[no_mangle]
pub extern "C" fn SteamAPI_Shutdown() {
    guard("SteamAPI_Shutdown", (), || {
        let context = context();
        context.shutdown_client();
        PINNED.forget(context, None);
    })
}

/// Starts the game server session. Address, ports and mode belong to the
/// server subsystem and are only logged here.
///
/// # Safety
///
/// `version` must be null or a NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn SteamInternal_GameServer_Init(
    ip: u32,
    steam_port: u16,
    game_port: u16,
    query_port: u16,
    server_mode: c_int,
    version: *const c_char,
) -> bool {
    guard("SteamInternal_GameServer_Init", false, || {
        let version = crate::token_from_ptr(version).unwrap_or_default();
        debug!(
            "GameServer init {:#X} {} {} {} mode {} version {:?}",
            ip, steam_port, game_port, query_port, server_mode, version
        );
        match context().init_server() {
            Ok(_) => true,
            Err(e) => {
                warn!("❌ GameServer init failed: {}", e);
                false
            }
        }
    })
}

#[no_mangle]
pub extern "C" fn SteamGameServer_Shutdown() {
    guard("SteamGameServer_Shutdown", (), || {
        let context = context();
        context.shutdown_server();
        PINNED.forget(context, None);
    })
}

#[no_mangle]
pub extern "C" fn SteamAPI_GetHSteamUser() -> c_int {
    guard("SteamAPI_GetHSteamUser", 0, || context().client_user().0)
}

#[no_mangle]
pub extern "C" fn SteamAPI_GetHSteamPipe() -> c_int {
    guard("SteamAPI_GetHSteamPipe", 0, || context().client_pipe().0)
}

#[no_mangle]
pub extern "C" fn SteamGameServer_GetHSteamUser() -> c_int {
    guard("SteamGameServer_GetHSteamUser", 0, || context().server_user().0)
}

#[no_mangle]
pub extern "C" fn SteamGameServer_GetHSteamPipe() -> c_int {
    guard("SteamGameServer_GetHSteamPipe", 0, || context().server_pipe().0)
}

#[no_mangle]
pub extern "C" fn GetHSteamUser() -> c_int {
    SteamAPI_GetHSteamUser()
}

#[no_mangle]
pub extern "C" fn GetHSteamPipe() -> c_int {
    SteamAPI_GetHSteamPipe()
}

/// # Safety
///
/// `block` must be null or point to a [`ContextInitHeader`] followed by the
/// context data.
#[no_mangle]
pub unsafe extern "C" fn SteamInternal_ContextInit(block: *mut c_void) -> *mut c_void {
    guard("SteamInternal_ContextInit", std::ptr::null_mut(), || {
        context_init(context(), block.cast())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use shim_core::{KeepaliveSettings, ShimConfig};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[repr(C)]
    struct Block {
        header: ContextInitHeader,
        value: usize,
    }

    static INITS: AtomicUsize = AtomicUsize::new(0);

    unsafe extern "C" fn fill(ctx: *mut c_void) {
        let value = ctx.cast::<usize>();
        *value = INITS.fetch_add(1, Ordering::SeqCst) + 100;
    }

    fn local_context() -> ShimContext {
        let config = ShimConfig {
            keepalive: KeepaliveSettings {
                enabled: false,
                ..KeepaliveSettings::default()
            },
            ..ShimConfig::default()
        };
        ShimContext::new(config, Arc::new(shim_core::DefaultSubsystems))
    }

    #[test]
    fn test_context_block_follows_generation() {
        let context = local_context();
        let mut block = Block {
            header: ContextInitHeader {
                init: Some(fill),
                counter: 0,
            },
            value: 0,
        };

        let data = unsafe { context_init(&context, &mut block.header) };
        assert_eq!(data.cast::<usize>(), std::ptr::addr_of_mut!(block.value));
        let first = block.value;
        assert!(first >= 100);

        unsafe { context_init(&context, &mut block.header) };
        assert_eq!(block.value, first);

        context.init_client().unwrap();
        unsafe { context_init(&context, &mut block.header) };
        assert_ne!(block.value, first);
        assert_eq!(block.header.counter, context_counter(&context));
    }

    #[test]
    fn test_null_block_is_ignored() {
        let context = local_context();
        assert!(unsafe { context_init(&context, std::ptr::null_mut()) }.is_null());
    }
}
