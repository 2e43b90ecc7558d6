// Copyright 2024-2025 Golem Cloud
//
// Licensed under the Golem Source License v1.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://license.golem.cloud/LICENSE
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use clap::Parser;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{error, trace};

static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);
static SIGNAL_HANDLERS_INSTALLED: AtomicBool = AtomicBool::new(false);

/// Whether a termination signal requested a graceful shutdown. Event loops
/// observe this flag and exit on their next iteration.
pub fn shutdown_requested() -> bool {
    SHUTDOWN_REQUESTED.load(Ordering::Relaxed)
}

pub(crate) fn signal_handlers_installed() -> bool {
    SIGNAL_HANDLERS_INSTALLED.load(Ordering::Relaxed)
}

/// Process-level options recognized by the runtime.
#[derive(Debug, Clone, Default, Parser)]
#[command(name = "filament", about = "Filament runtime options")]
pub struct RuntimeArgs {
    /// User (name or numeric id) to switch to after startup
    #[arg(long, visible_alias = "user")]
    pub uid: Option<String>,

    /// Group (name or numeric id) to switch to after startup
    #[arg(long, visible_alias = "group")]
    pub gid: Option<String>,
}

/// Drops process privileges to the configured user/group, group first. A
/// no-op when neither option is set.
pub fn lower_privileges(args: &RuntimeArgs) -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use anyhow::Context;

        if let Some(gid) = &args.gid {
            let gid = resolve_gid(gid)?;
            if unsafe { libc::setgid(gid) } != 0 {
                return Err(std::io::Error::last_os_error())
                    .context(format!("failed to switch to group id {gid}"));
            }
            trace!(gid, "lowered group privileges");
        }
        if let Some(uid) = &args.uid {
            let uid = resolve_uid(uid)?;
            if unsafe { libc::setuid(uid) } != 0 {
                return Err(std::io::Error::last_os_error())
                    .context(format!("failed to switch to user id {uid}"));
            }
            trace!(uid, "lowered user privileges");
        }
        Ok(())
    }
    #[cfg(not(unix))]
    {
        if args.uid.is_some() || args.gid.is_some() {
            anyhow::bail!("privilege lowering is only supported on unix");
        }
        Ok(())
    }
}

#[cfg(unix)]
fn resolve_uid(spec: &str) -> anyhow::Result<libc::uid_t> {
    use anyhow::Context;

    if let Ok(uid) = spec.parse::<libc::uid_t>() {
        return Ok(uid);
    }
    let name = std::ffi::CString::new(spec).context("invalid user name")?;
    let mut passwd: libc::passwd = unsafe { std::mem::zeroed() };
    let mut buffer = vec![0u8; 4096];
    let mut result: *mut libc::passwd = std::ptr::null_mut();
    loop {
        let rc = unsafe {
            libc::getpwnam_r(
                name.as_ptr(),
                &mut passwd,
                buffer.as_mut_ptr() as *mut libc::c_char,
                buffer.len(),
                &mut result,
            )
        };
        if rc == libc::ERANGE {
            let len = buffer.len() * 2;
            buffer.resize(len, 0);
            continue;
        }
        if rc != 0 {
            return Err(std::io::Error::from_raw_os_error(rc))
                .context(format!("failed to look up user '{spec}'"));
        }
        break;
    }
    if result.is_null() {
        anyhow::bail!("unknown user '{spec}'");
    }
    Ok(passwd.pw_uid)
}

#[cfg(unix)]
fn resolve_gid(spec: &str) -> anyhow::Result<libc::gid_t> {
    use anyhow::Context;

    if let Ok(gid) = spec.parse::<libc::gid_t>() {
        return Ok(gid);
    }
    let name = std::ffi::CString::new(spec).context("invalid group name")?;
    let mut group: libc::group = unsafe { std::mem::zeroed() };
    let mut buffer = vec![0u8; 4096];
    let mut result: *mut libc::group = std::ptr::null_mut();
    loop {
        let rc = unsafe {
            libc::getgrnam_r(
                name.as_ptr(),
                &mut group,
                buffer.as_mut_ptr() as *mut libc::c_char,
                buffer.len(),
                &mut result,
            )
        };
        if rc == libc::ERANGE {
            let len = buffer.len() * 2;
            buffer.resize(len, 0);
            continue;
        }
        if rc != 0 {
            return Err(std::io::Error::from_raw_os_error(rc))
                .context(format!("failed to look up group '{spec}'"));
        }
        break;
    }
    if result.is_null() {
        anyhow::bail!("unknown group '{spec}'");
    }
    Ok(group.gr_gid)
}

#[cfg(unix)]
extern "C" fn on_shutdown_signal(_signal: libc::c_int) {
    // only async-signal-safe operations are allowed here: a second signal
    // after shutdown already started terminates immediately
    if SHUTDOWN_REQUESTED.swap(true, Ordering::SeqCst) {
        unsafe { libc::_exit(1) };
    }
}

/// Installs process signal handlers: SIGINT and SIGTERM request a graceful
/// event-loop exit, SIGPIPE is ignored. A second termination signal while
/// shutdown is in progress terminates the process with status 1.
pub fn setup_signal_handlers() {
    #[cfg(unix)]
    unsafe {
        let handler = on_shutdown_signal as extern "C" fn(libc::c_int) as libc::sighandler_t;
        libc::signal(libc::SIGINT, handler);
        libc::signal(libc::SIGTERM, handler);
        libc::signal(libc::SIGPIPE, libc::SIG_IGN);
        trace!("ignoring SIGPIPE");
    }
    SIGNAL_HANDLERS_INSTALLED.store(true, Ordering::Relaxed);
}

/// Standard application entry point: lowers privileges, installs signal
/// handlers, runs the event loop and shuts worker threads down afterwards.
/// Returns the process exit code.
pub fn run_application(args: &RuntimeArgs) -> i32 {
    if let Err(err) = lower_privileges(args) {
        error!(error = %format!("{err:#}"), "failed to lower privileges");
        return 1;
    }
    setup_signal_handlers();
    let code = crate::scheduler::run_event_loop();
    crate::workers::shutdown_worker_threads();
    code
}
