//! Windows guard backed by a kill-on-close job object.

use std::ffi::c_void;
use std::io::{self, ErrorKind};
use std::{mem, ptr};

use tracing::debug;
use windows_sys::Win32::Foundation::{CloseHandle, HANDLE};
use windows_sys::Win32::System::JobObjects::{
    AssignProcessToJobObject, CreateJobObjectW, JOB_OBJECT_LIMIT_KILL_ON_JOB_CLOSE,
    JOBOBJECT_EXTENDED_LIMIT_INFORMATION, JobObjectExtendedLimitInformation,
    SetInformationJobObject,
};
use windows_sys::Win32::System::Threading::{OpenProcess, PROCESS_SET_QUOTA, PROCESS_TERMINATE};

use crate::error::WatchdogError;
use crate::guard::{ProcessGuard, WATCHDOG_TARGET};
use crate::protocol::is_supervisable;

/// Guard that places tracked processes in a job object.
///
/// The job is configured to kill its members when its last handle closes,
/// which the OS does on owner exit. Membership cannot be revoked, so
/// [`ProcessGuard::untrack`] does nothing.
#[derive(Debug)]
pub struct JobObjectGuard {
    job: OwnedHandle,
}

#[derive(Debug)]
struct OwnedHandle(HANDLE);

// SAFETY: kernel handles are process-wide and usable from any thread.
unsafe impl Send for OwnedHandle {}
// SAFETY: job object calls made through the handle are thread-safe.
unsafe impl Sync for OwnedHandle {}

impl Drop for OwnedHandle {
    fn drop(&mut self) {
        // SAFETY: the handle is owned and closed exactly once.
        unsafe {
            CloseHandle(self.0);
        }
    }
}

impl JobObjectGuard {
    /// Creates the job object.
    ///
    /// # Errors
    ///
    /// Returns [`WatchdogError::JobObject`] when the job cannot be created or
    /// configured.
    pub fn spawn() -> Result<Self, WatchdogError> {
        // SAFETY: null attributes and name request an anonymous job.
        let handle = unsafe { CreateJobObjectW(ptr::null(), ptr::null()) };
        if handle.is_null() {
            return Err(last_error("CreateJobObjectW"));
        }
        let job = OwnedHandle(handle);

        // SAFETY: the structure is plain data for which all-zero is valid.
        let mut limits: JOBOBJECT_EXTENDED_LIMIT_INFORMATION = unsafe { mem::zeroed() };
        limits.BasicLimitInformation.LimitFlags = JOB_OBJECT_LIMIT_KILL_ON_JOB_CLOSE;
        let size = u32::try_from(mem::size_of_val(&limits)).map_err(|_| {
            WatchdogError::JobObject {
                operation: "SetInformationJobObject",
                source: io::Error::from(ErrorKind::InvalidInput),
            }
        })?;
        // SAFETY: `limits` outlives the call and `size` matches its layout.
        let configured = unsafe {
            SetInformationJobObject(
                job.0,
                JobObjectExtendedLimitInformation,
                ptr::from_ref(&limits).cast::<c_void>(),
                size,
            )
        };
        if configured == 0 {
            return Err(last_error("SetInformationJobObject"));
        }
        debug!(target: WATCHDOG_TARGET, "job object created");
        Ok(Self { job })
    }
}

impl ProcessGuard for JobObjectGuard {
    fn track(&self, pid: u32) -> Result<(), WatchdogError> {
        if !is_supervisable(pid) {
            return Err(WatchdogError::InvalidPid { pid });
        }
        // SAFETY: `OpenProcess` has no memory-safety preconditions.
        let raw = unsafe { OpenProcess(PROCESS_SET_QUOTA | PROCESS_TERMINATE, 0, pid) };
        if raw.is_null() {
            return Err(last_error("OpenProcess"));
        }
        let process = OwnedHandle(raw);
        // SAFETY: both handles are open for the duration of the call.
        let assigned = unsafe { AssignProcessToJobObject(self.job.0, process.0) };
        if assigned == 0 {
            return Err(last_error("AssignProcessToJobObject"));
        }
        debug!(target: WATCHDOG_TARGET, pid, "process assigned to job");
        Ok(())
    }

    fn untrack(&self, _pid: u32) -> Result<(), WatchdogError> {
        Ok(())
    }
}

fn last_error(operation: &'static str) -> WatchdogError {
    WatchdogError::JobObject {
        operation,
        source: io::Error::last_os_error(),
    }
}
