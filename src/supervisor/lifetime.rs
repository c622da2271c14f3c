//! Ties the worker's lifetime to this process.
//!
//! `kill_on_drop` covers orderly teardown. The platform hooks here cover the
//! host dying without running destructors:
//! - Linux: `PR_SET_PDEATHSIG = SIGKILL` in the child. The signal fires when
//!   the thread that spawned the child exits, not the whole process.
//! - Windows: the child is placed in a job object with
//!   `JOB_OBJECT_LIMIT_KILL_ON_JOB_CLOSE`; the job handle closes with this
//!   process.
//! - Elsewhere: nothing beyond `kill_on_drop`.

use tokio::process::{Child, Command};

use crate::Result;

/// Keeps whatever OS object ties the child to this process alive.
#[derive(Debug, Default)]
pub struct ParentLink {
    #[cfg(windows)]
    job: Option<job::JobHandle>,
}

impl ParentLink {
    /// Configure `cmd` before it is spawned.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Spawn` if the Windows job object cannot be queried
    /// or created.
    pub fn prepare(cmd: &mut Command) -> Result<Self> {
        #[cfg(target_os = "linux")]
        set_parent_death_signal(cmd);

        #[cfg(windows)]
        {
            if job::plan_for_current_process()? != JobPlan::Create {
                return Ok(Self { job: None });
            }
            cmd.creation_flags(winapi::um::winbase::CREATE_BREAKAWAY_FROM_JOB);
            Ok(Self {
                job: Some(job::JobHandle::kill_on_close()?),
            })
        }

        #[cfg(not(windows))]
        {
            let _ = cmd;
            Ok(Self::default())
        }
    }

    /// Attach a freshly spawned `child`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Spawn` if the child cannot be assigned to the job.
    pub fn attach(&self, child: &Child) -> Result<()> {
        #[cfg(windows)]
        if let Some(job) = &self.job {
            let handle = child.raw_handle().ok_or_else(|| {
                crate::AppError::Spawn("worker exited before it could be assigned to a job".into())
            })?;
            job.assign(handle)?;
            tracing::debug!(pid = child.id(), "worker assigned to kill-on-close job");
        }

        #[cfg(not(windows))]
        let _ = child;

        Ok(())
    }
}

#[cfg(target_os = "linux")]
#[allow(unsafe_code)]
fn set_parent_death_signal(cmd: &mut Command) {
    use nix::sys::prctl;
    use nix::sys::signal::Signal;

    // SAFETY: the closure runs between fork and exec and only calls prctl,
    // which is async-signal-safe and does not allocate.
    unsafe {
        cmd.pre_exec(|| prctl::set_pdeathsig(Signal::SIGKILL).map_err(std::io::Error::from));
    }
}

/// What to do about job objects when spawning on Windows.
#[cfg(any(test, windows))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum JobPlan {
    /// The current job already kills its members when it closes.
    Inherit,
    /// The current job forbids breakaway; the child cannot get its own job.
    Degraded,
    /// Create a kill-on-close job and break the child away into it.
    Create,
}

/// Decide on a [`JobPlan`] from the current process's job state.
#[cfg(any(test, windows))]
pub(crate) fn plan_job(in_job: bool, kill_on_close: bool, breakaway_ok: bool) -> JobPlan {
    if !in_job {
        JobPlan::Create
    } else if kill_on_close {
        JobPlan::Inherit
    } else if breakaway_ok {
        JobPlan::Create
    } else {
        JobPlan::Degraded
    }
}

#[cfg(windows)]
#[allow(unsafe_code)]
mod job {
    use std::io;
    use std::mem::{size_of, zeroed};
    use std::os::windows::io::RawHandle;
    use std::ptr;

    use tracing::{debug, warn};
    use winapi::shared::minwindef::{BOOL, DWORD, FALSE, LPVOID};
    use winapi::um::handleapi::CloseHandle;
    use winapi::um::jobapi::IsProcessInJob;
    use winapi::um::jobapi2::{
        AssignProcessToJobObject, CreateJobObjectW, QueryInformationJobObject,
        SetInformationJobObject,
    };
    use winapi::um::processthreadsapi::GetCurrentProcess;
    use winapi::um::winnt::{
        JobObjectBasicLimitInformation, JobObjectExtendedLimitInformation, HANDLE,
        JOBOBJECT_BASIC_LIMIT_INFORMATION, JOBOBJECT_EXTENDED_LIMIT_INFORMATION,
        JOB_OBJECT_LIMIT_BREAKAWAY_OK, JOB_OBJECT_LIMIT_KILL_ON_JOB_CLOSE,
    };

    use super::{plan_job, JobPlan};
    use crate::{AppError, Result};

    fn os_error(what: &str) -> AppError {
        AppError::Spawn(format!("{what} failed: {}", io::Error::last_os_error()))
    }

    pub(super) fn plan_for_current_process() -> Result<JobPlan> {
        let mut in_job: BOOL = FALSE;
        // SAFETY: GetCurrentProcess returns a pseudo-handle; a null job handle
        // asks about any job; `in_job` outlives the call.
        let ok = unsafe { IsProcessInJob(GetCurrentProcess(), ptr::null_mut(), &mut in_job) };
        if ok == FALSE {
            return Err(os_error("IsProcessInJob"));
        }

        if in_job == FALSE {
            return Ok(plan_job(false, false, false));
        }

        // SAFETY: plain-old-data struct; all-zero is a valid value.
        let mut info: JOBOBJECT_BASIC_LIMIT_INFORMATION = unsafe { zeroed() };
        // SAFETY: a null job handle queries the job of the calling process;
        // the buffer and its size match the requested information class.
        let ok = unsafe {
            QueryInformationJobObject(
                ptr::null_mut(),
                JobObjectBasicLimitInformation,
                ptr::addr_of_mut!(info).cast(),
                size_of_dword::<JOBOBJECT_BASIC_LIMIT_INFORMATION>(),
                ptr::null_mut(),
            )
        };
        if ok == FALSE {
            return Err(os_error("QueryInformationJobObject"));
        }

        let plan = plan_job(
            true,
            info.LimitFlags & JOB_OBJECT_LIMIT_KILL_ON_JOB_CLOSE != 0,
            info.LimitFlags & JOB_OBJECT_LIMIT_BREAKAWAY_OK != 0,
        );
        match plan {
            JobPlan::Inherit => debug!("current job already kills members on close"),
            JobPlan::Degraded => warn!(
                "current job forbids breakaway; the worker may outlive this process if it dies abruptly"
            ),
            JobPlan::Create => {}
        }
        Ok(plan)
    }

    fn size_of_dword<T>() -> DWORD {
        DWORD::try_from(size_of::<T>()).unwrap_or(DWORD::MAX)
    }

    /// Owned job object handle, closed on drop.
    pub(super) struct JobHandle(HANDLE);

    // SAFETY: a job handle is a kernel object reference usable from any thread.
    unsafe impl Send for JobHandle {}
    // SAFETY: the handle is only passed to thread-safe kernel calls.
    unsafe impl Sync for JobHandle {}

    impl std::fmt::Debug for JobHandle {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_tuple("JobHandle").field(&self.0).finish()
        }
    }

    impl JobHandle {
        pub(super) fn kill_on_close() -> Result<Self> {
            // SAFETY: null attributes and name create an anonymous job.
            let raw = unsafe { CreateJobObjectW(ptr::null_mut(), ptr::null()) };
            if raw.is_null() {
                return Err(os_error("CreateJobObjectW"));
            }
            let job = Self(raw);

            // SAFETY: plain-old-data struct; all-zero is a valid value.
            let mut info: JOBOBJECT_EXTENDED_LIMIT_INFORMATION = unsafe { zeroed() };
            let info_ptr: LPVOID = ptr::addr_of_mut!(info).cast();
            let info_len = size_of_dword::<JOBOBJECT_EXTENDED_LIMIT_INFORMATION>();

            // SAFETY: `job.0` is a valid job handle and the buffer matches the class.
            let ok = unsafe {
                QueryInformationJobObject(
                    job.0,
                    JobObjectExtendedLimitInformation,
                    info_ptr,
                    info_len,
                    ptr::null_mut(),
                )
            };
            if ok == FALSE {
                return Err(os_error("QueryInformationJobObject"));
            }

            info.BasicLimitInformation.LimitFlags |= JOB_OBJECT_LIMIT_KILL_ON_JOB_CLOSE;

            // SAFETY: as above.
            let ok = unsafe {
                SetInformationJobObject(
                    job.0,
                    JobObjectExtendedLimitInformation,
                    info_ptr,
                    info_len,
                )
            };
            if ok == FALSE {
                return Err(os_error("SetInformationJobObject"));
            }

            debug!("created kill-on-close job for worker");
            Ok(job)
        }

        pub(super) fn assign(&self, process: RawHandle) -> Result<()> {
            // SAFETY: both handles are valid for the duration of the call.
            let ok = unsafe { AssignProcessToJobObject(self.0, process.cast()) };
            if ok == FALSE {
                return Err(os_error("AssignProcessToJobObject"));
            }
            Ok(())
        }
    }

    impl Drop for JobHandle {
        fn drop(&mut self) {
            // SAFETY: the handle is owned and closed exactly once.
            unsafe {
                CloseHandle(self.0);
            }
        }
    }
}
