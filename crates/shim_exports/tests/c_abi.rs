//! Drives the exported symbols the way a consumer binary does.
//!
//! Everything shares the process-wide context, so the whole flow lives in a
//! single test.

use shim_exports::dispatch::*;
use shim_exports::interfaces::*;
use shim_exports::session::*;
use std::ffi::CString;
use std::ptr;

#[test]
fn test_full_session_through_exports() {
    unsafe {
        assert_eq!(SteamAPI_GetHSteamUser(), 0);
        assert_eq!(SteamAPI_GetHSteamPipe(), 0);
        assert!(SteamUser().is_null());

        assert!(SteamAPI_Init());
        let client_pipe = SteamAPI_GetHSteamPipe();
        assert_ne!(client_pipe, 0);
        assert_eq!(SteamAPI_GetHSteamUser(), 1);

        let user_version = CString::new("SteamUser021").unwrap();
        let user = SteamInternal_FindOrCreateUserInterface(1, user_version.as_ptr());
        assert!(!user.is_null());
        assert_eq!(
            user,
            SteamInternal_FindOrCreateUserInterface(1, user_version.as_ptr())
        );
        assert!(SteamInternal_FindOrCreateUserInterface(1, ptr::null()).is_null());

        let bogus = CString::new("NotAnInterface001").unwrap();
        assert!(SteamInternal_FindOrCreateUserInterface(1, bogus.as_ptr()).is_null());

        let client_version = CString::new("SteamClient020").unwrap();
        assert!(!SteamInternal_CreateInterface(client_version.as_ptr()).is_null());
        assert!(!SteamUser().is_null());
        assert!(!SteamFriends().is_null());

        let mut server_pipe = 0;
        let server_user = Steam_CreateLocalUser(&mut server_pipe, 4);
        assert_eq!(server_user, 2);
        assert_ne!(server_pipe, client_pipe);

        SteamAPI_ManualDispatch_Init();
        SteamAPI_ManualDispatch_RunFrame(server_pipe);
        let mut msg = CallbackMsg::default();
        assert!(!SteamAPI_ManualDispatch_GetNextCallback(server_pipe, &mut msg));
        assert!(!SteamAPI_ManualDispatch_GetNextCallback(server_pipe, ptr::null_mut()));
        SteamAPI_ManualDispatch_FreeLastCallback(server_pipe);

        let mut failed = true;
        let mut buffer = [0u8; 8];
        assert!(!SteamAPI_ManualDispatch_GetAPICallResult(
            server_pipe,
            1,
            buffer.as_mut_ptr().cast(),
            buffer.len() as i32,
            1,
            &mut failed,
        ));
        assert!(failed);

        Steam_ReleaseUser(server_pipe, server_user);
        assert!(Steam_BReleaseSteamPipe(server_pipe));
        assert!(!Steam_BReleaseSteamPipe(server_pipe));

        SteamAPI_RunCallbacks();
        SteamAPI_Shutdown();
        assert_eq!(SteamAPI_GetHSteamPipe(), 0);
        assert!(SteamUser().is_null());
        assert!(!Steam_BReleaseSteamPipe(client_pipe));
    }
}
