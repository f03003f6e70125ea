//! Suspended process creation and main thread resumption

use crate::backend::{build_command_line, SpawnedProcess};
use crate::error::InjectorError;
use crate::handle::OwnedHandle;
use fulltrust_common::ProcessStartInfoRequest;
use std::ffi::OsStr;
use std::os::windows::ffi::OsStrExt;
use tracing::{debug, info, warn};
use windows::core::{PCWSTR, PWSTR};
use windows::Win32::Foundation::GetLastError;
use windows::Win32::System::Threading::{
    CreateProcessW, ResumeThread, CREATE_SUSPENDED, PROCESS_CREATION_FLAGS, PROCESS_INFORMATION,
    STARTUPINFOW,
};

fn to_wide(s: &str) -> Vec<u16> {
    OsStr::new(s)
        .encode_wide()
        .chain(std::iter::once(0))
        .collect()
}

/// Win32 error code carried by a `windows::core::Error`
pub(crate) fn win32_code(error: &windows::core::Error) -> u32 {
    let hresult = error.code().0 as u32;
    if hresult & 0xFFFF_0000 == 0x8007_0000 {
        hresult & 0xFFFF
    } else {
        hresult
    }
}

/// Launch the requested executable with its main thread suspended
pub fn spawn_suspended(
    request: &ProcessStartInfoRequest,
) -> Result<SpawnedProcess<OwnedHandle, OwnedHandle>, InjectorError> {
    let command_line = build_command_line(&request.application_name, &request.command_line);
    let mut command_line_wide = to_wide(&command_line);

    let current_directory_wide =
        (!request.current_directory.is_empty()).then(|| to_wide(&request.current_directory));

    let creation_flags = PROCESS_CREATION_FLAGS(request.creation_flags) | CREATE_SUSPENDED;

    debug!(
        target: "fulltrust_host::process",
        command_line = %command_line,
        current_directory = %request.current_directory,
        flags = format!("{:#x}", creation_flags.0),
        "Creating suspended process"
    );

    let startup_info = STARTUPINFOW {
        cb: std::mem::size_of::<STARTUPINFOW>() as u32,
        ..Default::default()
    };
    let mut process_info = PROCESS_INFORMATION::default();

    let result = unsafe {
        CreateProcessW(
            PCWSTR::null(),
            PWSTR(command_line_wide.as_mut_ptr()),
            None,
            None,
            false,
            creation_flags,
            None,
            current_directory_wide
                .as_ref()
                .map(|v| PCWSTR(v.as_ptr()))
                .unwrap_or(PCWSTR::null()),
            &startup_info,
            &mut process_info,
        )
    };

    if let Err(e) = result {
        let code = win32_code(&e);
        warn!(
            target: "fulltrust_host::process",
            command_line = %command_line,
            code,
            error = %e,
            "CreateProcessW failed"
        );
        return Err(InjectorError::CreateProcess { code });
    }

    // Wrap immediately so both handles close on every later path.
    let (process, main_thread) = unsafe {
        (
            OwnedHandle::from_raw(process_info.hProcess),
            OwnedHandle::from_raw(process_info.hThread),
        )
    };

    info!(
        target: "fulltrust_host::process",
        pid = process_info.dwProcessId,
        tid = process_info.dwThreadId,
        "Process created suspended"
    );

    Ok(SpawnedProcess {
        pid: process_info.dwProcessId,
        process,
        main_thread,
    })
}

/// Resume a suspended thread, returning its previous suspend count
pub fn resume_thread(thread: &OwnedHandle) -> Result<u32, InjectorError> {
    let previous = unsafe { ResumeThread(thread.as_raw()) };
    if previous == u32::MAX {
        let code = unsafe { GetLastError().0 };
        warn!(target: "fulltrust_host::process", code, "ResumeThread failed");
        return Err(InjectorError::ResumeThread { code });
    }

    info!(
        target: "fulltrust_host::process",
        previous_suspend_count = previous,
        "Resumed main thread"
    );
    Ok(previous)
}
