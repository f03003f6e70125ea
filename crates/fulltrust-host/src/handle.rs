//! Owned Win32 resources
//!
//! Every handle and remote allocation acquired by the host lives in one of
//! these wrappers, so early returns cannot leak them.

use std::ffi::c_void;
use tracing::warn;
use windows::Win32::Foundation::{CloseHandle, HANDLE};
use windows::Win32::System::Memory::{VirtualFreeEx, MEM_RELEASE};

/// Kernel handle closed on drop
#[derive(Debug)]
pub struct OwnedHandle(HANDLE);

// Kernel handles are process-wide and usable from any thread.
unsafe impl Send for OwnedHandle {}

impl OwnedHandle {
    /// Take ownership of `handle`
    ///
    /// # Safety
    /// `handle` must be open and not owned by anything else.
    pub unsafe fn from_raw(handle: HANDLE) -> Self {
        Self(handle)
    }

    pub fn as_raw(&self) -> HANDLE {
        self.0
    }
}

impl Drop for OwnedHandle {
    fn drop(&mut self) {
        if !self.0.is_invalid() {
            unsafe {
                let _ = CloseHandle(self.0);
            }
        }
    }
}

/// Committed memory inside another process, released on drop
pub struct RemoteAllocation<'a> {
    process: &'a OwnedHandle,
    address: *mut c_void,
    size: usize,
}

impl<'a> RemoteAllocation<'a> {
    /// Wrap a region returned by `VirtualAllocEx`
    ///
    /// # Safety
    /// `address` must be the non-null base of a live allocation in `process`.
    pub unsafe fn from_raw(process: &'a OwnedHandle, address: *mut c_void, size: usize) -> Self {
        Self {
            process,
            address,
            size,
        }
    }

    pub fn address(&self) -> *mut c_void {
        self.address
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn process(&self) -> &OwnedHandle {
        self.process
    }
}

impl Drop for RemoteAllocation<'_> {
    fn drop(&mut self) {
        unsafe {
            if let Err(e) = VirtualFreeEx(self.process.as_raw(), self.address, 0, MEM_RELEASE) {
                warn!(
                    target: "fulltrust_host::injector",
                    error = %e,
                    address = format!("{:p}", self.address),
                    "Failed to release remote memory"
                );
            }
        }
    }
}
