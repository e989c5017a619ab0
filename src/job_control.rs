use std::io;

use crate::status;

/// Result of polling or waiting on a single pipeline stage.
pub(crate) enum WaitOutcome {
    /// WNOHANG and the process has not changed state.
    StillRunning,
    /// The process received a stop signal (reported via WUNTRACED).
    Stopped,
    /// The process terminated; carries the shell-style exit code.
    Exited(i32),
    /// waitpid returned ECHILD: this pid was already reaped.
    AlreadyReaped,
}

pub(crate) fn current_process_group() -> libc::pid_t {
    unsafe { libc::getpgrp() }
}

pub(crate) fn is_terminal(fd: libc::c_int) -> bool {
    unsafe { libc::isatty(fd) == 1 }
}

/// The terminal's current foreground process group.
pub(crate) fn terminal_foreground_group(fd: libc::c_int) -> io::Result<libc::pid_t> {
    loop {
        let pgid = unsafe { libc::tcgetpgrp(fd) };
        if pgid >= 0 {
            return Ok(pgid);
        }

        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::EINTR) {
            continue;
        }
        return Err(err);
    }
}

pub(crate) fn set_process_group(pid: libc::pid_t, pgid: libc::pid_t) -> io::Result<()> {
    loop {
        let rc = unsafe { libc::setpgid(pid, pgid) };
        if rc == 0 {
            return Ok(());
        }

        let err = io::Error::last_os_error();
        match err.raw_os_error() {
            Some(code) if code == libc::EINTR => continue,
            // Already exec'd or gone; the child-side setpgid won the race.
            Some(code) if code == libc::EACCES || code == libc::ESRCH => return Ok(()),
            _ => return Err(err),
        }
    }
}

#[cfg(test)]
pub(crate) fn process_group_id(pid: libc::pid_t) -> io::Result<libc::pid_t> {
    loop {
        let rc = unsafe { libc::getpgid(pid) };
        if rc >= 0 {
            return Ok(rc);
        }

        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::EINTR) {
            continue;
        }
        return Err(err);
    }
}

/// Deliver SIGCONT to every process in the group.
pub(crate) fn send_continue_to_group(pgid: libc::pid_t) -> io::Result<()> {
    if pgid <= 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "invalid process group id",
        ));
    }

    loop {
        let rc = unsafe { libc::kill(-pgid, libc::SIGCONT) };
        if rc == 0 {
            return Ok(());
        }

        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::EINTR) {
            continue;
        }
        return Err(err);
    }
}

/// Hands the terminal's foreground slot to `target_pgid` on acquisition and
/// returns it to `shell_pgid` when dropped, so the shell gets its terminal
/// back on every exit path out of a foreground wait, unwinding included.
pub(crate) struct ForegroundTerminalGuard {
    tty_fd: Option<libc::c_int>,
    shell_pgid: libc::pid_t,
}

impl ForegroundTerminalGuard {
    pub(crate) fn acquire(target_pgid: libc::pid_t, shell_pgid: libc::pid_t) -> io::Result<Self> {
        let tty_fd = if is_terminal(libc::STDIN_FILENO) {
            Some(libc::STDIN_FILENO)
        } else {
            None
        };

        let guard = Self { tty_fd, shell_pgid };

        if let Some(fd) = guard.tty_fd {
            set_terminal_foreground(fd, target_pgid)?;
        }

        Ok(guard)
    }
}

impl Drop for ForegroundTerminalGuard {
    fn drop(&mut self) {
        let Some(fd) = self.tty_fd else { return };
        if let Err(err) = set_terminal_foreground(fd, self.shell_pgid) {
            // A shell that cannot reacquire its terminal is no longer an
            // interactive controller.
            eprintln!("shell-demo: failed to reclaim the terminal: {err}");
            std::process::exit(1);
        }
    }
}

/// Wait on one pipeline stage with WUNTRACED, optionally without blocking.
pub(crate) fn wait_process(pid: libc::pid_t, nohang: bool) -> io::Result<WaitOutcome> {
    let mut raw_status: libc::c_int = 0;
    let mut options = libc::WUNTRACED;
    if nohang {
        options |= libc::WNOHANG;
    }

    loop {
        let rc = unsafe { libc::waitpid(pid, &mut raw_status, options) };
        if rc < 0 {
            let err = io::Error::last_os_error();
            match err.raw_os_error() {
                Some(code) if code == libc::EINTR => continue,
                Some(code) if code == libc::ECHILD => return Ok(WaitOutcome::AlreadyReaped),
                _ => return Err(err),
            }
        }

        if rc == 0 {
            return Ok(WaitOutcome::StillRunning);
        }

        if unsafe { libc::WIFSTOPPED(raw_status) } {
            return Ok(WaitOutcome::Stopped);
        }

        if let Some(code) = status::exit_code_from_wait_status(raw_status) {
            return Ok(WaitOutcome::Exited(code));
        }
    }
}

struct SignalIgnoreGuard {
    signal: libc::c_int,
    previous: libc::sighandler_t,
}

impl SignalIgnoreGuard {
    fn ignore(signal: libc::c_int) -> io::Result<Self> {
        let previous = unsafe { libc::signal(signal, libc::SIG_IGN) };
        if previous == libc::SIG_ERR {
            return Err(io::Error::last_os_error());
        }
        Ok(Self { signal, previous })
    }
}

impl Drop for SignalIgnoreGuard {
    fn drop(&mut self) {
        unsafe {
            libc::signal(self.signal, self.previous);
        }
    }
}

/// tcsetpgrp, with SIGTTOU ignored for the duration of the call. Without
/// the guard the kernel would stop the shell itself whenever it changes
/// the foreground group from outside the foreground group.
pub(crate) fn set_terminal_foreground(fd: libc::c_int, pgid: libc::pid_t) -> io::Result<()> {
    if pgid <= 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "invalid process group id",
        ));
    }

    let _sigttou = SignalIgnoreGuard::ignore(libc::SIGTTOU)?;
    loop {
        let rc = unsafe { libc::tcsetpgrp(fd, pgid) };
        if rc == 0 {
            return Ok(());
        }

        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::EINTR) {
            continue;
        }
        return Err(err);
    }
}
