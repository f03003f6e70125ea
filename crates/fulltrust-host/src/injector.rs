//! Library injection using CreateRemoteThread + LoadLibraryW
//!
//! The sequence is strictly ordered and each step aborts the rest on failure:
//! open the target with injection rights, resolve `LoadLibraryW`, copy the
//! UTF-16 path into a fresh remote region, run a remote thread on it, wait
//! with a timeout and read the thread's exit code. The region, the remote
//! thread handle and the re-opened process handle are owned values, so they
//! are released on every path, including timeouts.

use crate::backend::encode_wide_path;
use crate::error::InjectorError;
use crate::handle::{OwnedHandle, RemoteAllocation};
use crate::process::win32_code;
use std::ffi::c_void;
use std::time::Duration;
use tracing::{debug, info, warn};
use windows::core::{s, w};
use windows::Win32::Foundation::{GetLastError, WAIT_FAILED, WAIT_OBJECT_0, WAIT_TIMEOUT};
use windows::Win32::System::Diagnostics::Debug::WriteProcessMemory;
use windows::Win32::System::LibraryLoader::{GetModuleHandleW, GetProcAddress};
use windows::Win32::System::Memory::{VirtualAllocEx, MEM_COMMIT, MEM_RESERVE, PAGE_READWRITE};
use windows::Win32::System::Threading::{
    CreateRemoteThread, GetExitCodeThread, OpenProcess, WaitForSingleObject,
    LPTHREAD_START_ROUTINE, PROCESS_CREATE_THREAD, PROCESS_QUERY_INFORMATION, PROCESS_VM_OPERATION,
    PROCESS_VM_READ, PROCESS_VM_WRITE,
};

/// Inject `library_path` into process `pid`, returning the loaded module base
///
/// The returned base is the remote thread's exit code, so it is truncated to
/// 32 bits for 64-bit targets; it is only meaningful as "non-zero".
pub fn inject_library(
    pid: u32,
    library_path: &str,
    timeout: Duration,
) -> Result<usize, InjectorError> {
    info!(
        target: "fulltrust_host::injector",
        pid,
        library = %library_path,
        "Injecting library"
    );

    let process = open_for_injection(pid)?;
    let load_library = resolve_load_library()?;

    let path_bytes = encode_wide_path(library_path);
    let remote = allocate(&process, path_bytes.len())?;
    write(&remote, &path_bytes)?;

    let thread = start_remote_thread(&process, load_library, &remote)?;
    wait_for_thread(&thread, timeout)?;

    let exit_code = exit_code(&thread)?;
    if exit_code == 0 {
        warn!(
            target: "fulltrust_host::injector",
            pid,
            library = %library_path,
            "LoadLibraryW returned NULL"
        );
        return Err(InjectorError::LibraryNotLoaded);
    }

    info!(
        target: "fulltrust_host::injector",
        pid,
        base = format!("{:#010x}", exit_code),
        "Library loaded"
    );
    Ok(exit_code as usize)
}

/// Re-open the target with the rights remote execution needs
fn open_for_injection(pid: u32) -> Result<OwnedHandle, InjectorError> {
    let access = PROCESS_CREATE_THREAD
        | PROCESS_QUERY_INFORMATION
        | PROCESS_VM_OPERATION
        | PROCESS_VM_WRITE
        | PROCESS_VM_READ;

    unsafe {
        let handle = OpenProcess(access, false, pid).map_err(|e| InjectorError::OpenProcess {
            pid,
            code: win32_code(&e),
        })?;
        Ok(OwnedHandle::from_raw(handle))
    }
}

/// `kernel32!LoadLibraryW` as seen by this process
///
/// kernel32 is mapped at the same base in every process of a boot session,
/// so the local address is valid in the target.
fn resolve_load_library() -> Result<LPTHREAD_START_ROUTINE, InjectorError> {
    unsafe {
        let kernel32 = GetModuleHandleW(w!("kernel32.dll"))
            .map_err(|e| InjectorError::ResolveLoader(e.to_string()))?;

        let load_library = GetProcAddress(kernel32, s!("LoadLibraryW"))
            .ok_or_else(|| InjectorError::ResolveLoader("GetProcAddress returned NULL".into()))?;

        Ok(Some(std::mem::transmute::<
            unsafe extern "system" fn() -> isize,
            unsafe extern "system" fn(*mut c_void) -> u32,
        >(load_library)))
    }
}

fn allocate(process: &OwnedHandle, size: usize) -> Result<RemoteAllocation<'_>, InjectorError> {
    unsafe {
        let address = VirtualAllocEx(
            process.as_raw(),
            None,
            size,
            MEM_COMMIT | MEM_RESERVE,
            PAGE_READWRITE,
        );

        if address.is_null() {
            return Err(InjectorError::AllocMemory {
                code: GetLastError().0,
            });
        }

        debug!(
            target: "fulltrust_host::injector",
            address = format!("{:p}", address),
            size,
            "Allocated remote memory"
        );
        Ok(RemoteAllocation::from_raw(process, address, size))
    }
}

fn write(remote: &RemoteAllocation<'_>, bytes: &[u8]) -> Result<(), InjectorError> {
    let mut written = 0usize;
    let result = unsafe {
        WriteProcessMemory(
            remote.process().as_raw(),
            remote.address(),
            bytes.as_ptr() as *const c_void,
            bytes.len(),
            Some(&mut written),
        )
    };

    match result {
        Ok(()) if written == bytes.len() => Ok(()),
        Ok(()) => Err(InjectorError::WriteMemory {
            code: 0,
            written,
            expected: bytes.len(),
        }),
        Err(e) => Err(InjectorError::WriteMemory {
            code: win32_code(&e),
            written,
            expected: bytes.len(),
        }),
    }
}

fn start_remote_thread(
    process: &OwnedHandle,
    start: LPTHREAD_START_ROUTINE,
    argument: &RemoteAllocation<'_>,
) -> Result<OwnedHandle, InjectorError> {
    unsafe {
        let thread = CreateRemoteThread(
            process.as_raw(),
            None,
            0,
            start,
            Some(argument.address() as *const c_void),
            0,
            None,
        )
        .map_err(|e| InjectorError::CreateThread {
            code: win32_code(&e),
        })?;
        Ok(OwnedHandle::from_raw(thread))
    }
}

fn wait_for_thread(thread: &OwnedHandle, timeout: Duration) -> Result<(), InjectorError> {
    let millis = u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX - 1);
    let result = unsafe { WaitForSingleObject(thread.as_raw(), millis) };

    if result == WAIT_OBJECT_0 {
        Ok(())
    } else if result == WAIT_TIMEOUT {
        warn!(
            target: "fulltrust_host::injector",
            timeout_ms = millis,
            "Timeout waiting for DLL load"
        );
        Err(InjectorError::WaitTimeout(u64::from(millis)))
    } else if result == WAIT_FAILED {
        Err(InjectorError::WaitFailed {
            code: unsafe { GetLastError().0 },
        })
    } else {
        Err(InjectorError::WaitFailed { code: result.0 })
    }
}

fn exit_code(thread: &OwnedHandle) -> Result<u32, InjectorError> {
    let mut code = 0u32;
    unsafe { GetExitCodeThread(thread.as_raw(), &mut code) }.map_err(|e| {
        InjectorError::ExitCode {
            code: win32_code(&e),
        }
    })?;
    Ok(code)
}
