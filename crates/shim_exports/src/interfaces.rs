//! Interface lookup exports.

use crate::{context, guard, token_from_ptr};
use shim_core::{Family, InterfaceAdapter, PipeHandle, Role, ShimContext, UserHandle};
use std::ffi::{c_char, c_int, c_void};
use std::ptr;
use std::sync::Arc;

fn raw(adapter: Option<Arc<InterfaceAdapter>>) -> *mut c_void {
    adapter.map_or(ptr::null_mut(), |adapter| adapter.as_raw())
}

/// Resolves `version` for `user` on the pipe of the given role.
pub fn find_or_create(
    context: &ShimContext,
    role: Role,
    user: UserHandle,
    version: &str,
) -> Option<Arc<InterfaceAdapter>> {
    let pipe = match role {
        Role::Client => context.client_pipe(),
        Role::Server => context.server_pipe(),
    };
    context.resolve_interface(user, pipe, version)
}

/// # Safety
///
/// `version` must be null or a NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn SteamInternal_FindOrCreateUserInterface(
    user: c_int,
    version: *const c_char,
) -> *mut c_void {
    guard("SteamInternal_FindOrCreateUserInterface", ptr::null_mut(), || {
        let Some(version) = token_from_ptr(version) else {
            return ptr::null_mut();
        };
        raw(find_or_create(context(), Role::Client, UserHandle(user), &version))
    })
}

/// # Safety
///
/// `version` must be null or a NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn SteamInternal_FindOrCreateGameServerInterface(
    user: c_int,
    version: *const c_char,
) -> *mut c_void {
    guard("SteamInternal_FindOrCreateGameServerInterface", ptr::null_mut(), || {
        let Some(version) = token_from_ptr(version) else {
            return ptr::null_mut();
        };
        raw(find_or_create(context(), Role::Server, UserHandle(user), &version))
    })
}

/// Generic lookup on an explicit pipe. The first argument is the client
/// object the call was made through and is not used.
///
/// # Safety
///
/// `version` must be null or a NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn SteamAPI_ISteamClient_GetISteamGenericInterface(
    _client: *mut c_void,
    user: c_int,
    pipe: c_int,
    version: *const c_char,
) -> *mut c_void {
    guard("SteamAPI_ISteamClient_GetISteamGenericInterface", ptr::null_mut(), || {
        let Some(version) = token_from_ptr(version) else {
            return ptr::null_mut();
        };
        raw(context().resolve_interface(UserHandle(user), PipeHandle(pipe), &version))
    })
}

/// # Safety
///
/// `version` must be null or a NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn SteamInternal_CreateInterface(version: *const c_char) -> *mut c_void {
    guard("SteamInternal_CreateInterface", ptr::null_mut(), || {
        let Some(version) = token_from_ptr(version) else {
            return ptr::null_mut();
        };
        raw(context().create_interface(&version))
    })
}

/// # Safety
///
/// `version` must be null or a NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn SteamGameServerInternal_CreateInterface(
    version: *const c_char,
) -> *mut c_void {
    SteamInternal_CreateInterface(version)
}

const IFACE_OK: c_int = 0;
const IFACE_FAILED: c_int = 1;

/// Client-side creation with the factory status code of the older entry point.
pub fn create_with_status(context: &ShimContext, name: &str) -> (Option<Arc<InterfaceAdapter>>, c_int) {
    let adapter = context.create_interface(name);
    let status = if adapter.is_some() { IFACE_OK } else { IFACE_FAILED };
    (adapter, status)
}

/// # Safety
///
/// `name` must be null or a NUL-terminated string and `return_code` must be
/// null or valid for writes.
#[no_mangle]
pub unsafe extern "C" fn CreateInterface(name: *const c_char, return_code: *mut c_int) -> *mut c_void {
    guard("CreateInterface", ptr::null_mut(), || {
        let (adapter, status) = match token_from_ptr(name) {
            Some(name) => create_with_status(context(), &name),
            None => (None, IFACE_FAILED),
        };
        if !return_code.is_null() {
            *return_code = status;
        }
        raw(adapter)
    })
}

macro_rules! legacy_accessors {
    ($($name:ident => $role:ident, $family:ident;)*) => {
        $(
            #[no_mangle]
            pub extern "C" fn $name() -> *mut c_void {
                guard(stringify!($name), ptr::null_mut(), || {
                    raw(context().legacy_interface(Role::$role, Family::$family))
                })
            }
        )*
    };
}

legacy_accessors! {
    SteamClient => Client, Client;
    SteamUser => Client, User;
    SteamFriends => Client, Friends;
    SteamUtils => Client, Utils;
    SteamMatchmaking => Client, Matchmaking;
    SteamMatchmakingServers => Client, MatchmakingServers;
    SteamUserStats => Client, UserStats;
    SteamApps => Client, Apps;
    SteamNetworking => Client, Networking;
    SteamRemoteStorage => Client, RemoteStorage;
    SteamScreenshots => Client, Screenshots;
    SteamHTTP => Client, Http;
    SteamController => Client, Controller;
    SteamUGC => Client, Ugc;
    SteamAppList => Client, AppList;
    SteamMusic => Client, Music;
    SteamMusicRemote => Client, MusicRemote;
    SteamHTMLSurface => Client, HtmlSurface;
    SteamInventory => Client, Inventory;
    SteamVideo => Client, Video;
    SteamUnifiedMessages => Client, UnifiedMessages;
    SteamGameServerClient => Server, Client;
    SteamGameServer => Server, GameServer;
    SteamGameServerUtils => Server, Utils;
    SteamGameServerNetworking => Server, Networking;
    SteamGameServerStats => Server, GameServerStats;
    SteamGameServerHTTP => Server, Http;
    SteamGameServerInventory => Server, Inventory;
    SteamGameServerUGC => Server, Ugc;
    SteamGameServerApps => Server, Apps;
    SteamMasterServerUpdater => Server, MasterServerUpdater;
}

#[cfg(test)]
mod tests {
    use super::*;
    use shim_core::{KeepaliveSettings, ShimConfig};

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
    fn test_find_or_create_uses_role_pipe() {
        let context = local_context();
        assert!(find_or_create(&context, Role::Client, UserHandle::CLIENT, "SteamUser021").is_none());

        context.init_client().unwrap();
        context.init_server().unwrap();

        let client = find_or_create(&context, Role::Client, UserHandle::CLIENT, "SteamUtils010").unwrap();
        let server = find_or_create(&context, Role::Server, UserHandle::SERVER, "SteamUtils010").unwrap();
        assert_eq!(client.role(), Role::Client);
        assert_eq!(server.role(), Role::Server);
        assert!(!raw(Some(client)).is_null());
    }

    #[test]
    fn test_create_reports_status() {
        let context = local_context();
        let (adapter, status) = create_with_status(&context, "SteamClient017");
        assert!(adapter.is_none());
        assert_eq!(status, IFACE_FAILED);

        context.init_client().unwrap();
        let (adapter, status) = create_with_status(&context, "SteamClient017");
        assert_eq!(adapter.unwrap().role(), Role::Client);
        assert_eq!(status, IFACE_OK);
    }

    #[test]
    fn test_missing_adapter_is_null() {
        assert!(raw(None).is_null());
    }
}
