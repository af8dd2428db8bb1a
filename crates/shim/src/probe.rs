//! Drives a built export library through its C interface.

use anyhow::{bail, Context};
use libloading::{Library, Symbol};
use serde::Serialize;
use std::ffi::{c_char, c_int, c_void, CString};
use std::path::Path;
use tracing::{debug, info};

type CreatePipeFn = unsafe extern "C" fn() -> c_int;
type ConnectFn = unsafe extern "C" fn(c_int) -> c_int;
type GenericInterfaceFn =
    unsafe extern "C" fn(*mut c_void, c_int, c_int, *const c_char) -> *mut c_void;
type RunCallbacksFn = unsafe extern "C" fn();
type ReleasePipeFn = unsafe extern "C" fn(c_int) -> bool;

/// What the library answered.
#[derive(Debug, Clone, Serialize)]
pub struct ProbeReport {
    pub library: String,
    pub pipe: i32,
    pub user: i32,
    /// Token and whether the library returned an interface for it
    pub interfaces: Vec<(String, bool)>,
    pub released: bool,
}

fn symbol<'lib, T>(library: &'lib Library, name: &str) -> anyhow::Result<Symbol<'lib, T>> {
    unsafe { library.get(name.as_bytes()) }
        .with_context(|| format!("Library does not export {name}"))
}

/// Creates a pipe, binds it, resolves `tokens`, pumps once and releases it.
pub fn probe(path: &Path, tokens: &[String]) -> anyhow::Result<ProbeReport> {
    info!("🔍 Probing {}", path.display());
    let library = unsafe { Library::new(path) }
        .with_context(|| format!("Failed to load library {}", path.display()))?;

    let create_pipe: Symbol<CreatePipeFn> = symbol(&library, "Steam_CreateSteamPipe")?;
    let connect: Symbol<ConnectFn> = symbol(&library, "Steam_ConnectToGlobalUser")?;
    let generic: Symbol<GenericInterfaceFn> =
        symbol(&library, "SteamAPI_ISteamClient_GetISteamGenericInterface")?;
    let run_callbacks: Symbol<RunCallbacksFn> = symbol(&library, "SteamAPI_RunCallbacks")?;
    let release: Symbol<ReleasePipeFn> = symbol(&library, "Steam_BReleaseSteamPipe")?;

    let pipe = unsafe { create_pipe() };
    if pipe == 0 {
        bail!("Steam_CreateSteamPipe returned no pipe");
    }
    let user = unsafe { connect(pipe) };
    debug!("Pipe {} bound to user {}", pipe, user);

    let mut interfaces = Vec::with_capacity(tokens.len());
    for token in tokens {
        let version = CString::new(token.as_str())
            .with_context(|| format!("Version token {token:?} contains a NUL byte"))?;
        let interface = unsafe { generic(std::ptr::null_mut(), user, pipe, version.as_ptr()) };
        debug!("{} -> {:p}", token, interface);
        interfaces.push((token.clone(), !interface.is_null()));
    }

    unsafe { run_callbacks() };
    let released = unsafe { release(pipe) };
    info!("✅ Probe finished, pipe {} released: {}", pipe, released);

    Ok(ProbeReport {
        library: path.display().to_string(),
        pipe,
        user,
        interfaces,
        released,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_library_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("libmissing_shim.so");

        let err = probe(&path, &[]).unwrap_err();
        assert!(err.to_string().contains("Failed to load library"));
    }

    #[test]
    fn test_non_library_file_is_an_error() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), b"not a shared object").unwrap();

        assert!(probe(file.path(), &["SteamUser021".to_string()]).is_err());
    }
}
