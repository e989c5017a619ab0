#![allow(dead_code)]

use std::ffi::CStr;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::os::fd::AsRawFd;
use std::os::fd::FromRawFd;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::process::CommandExt;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

/// A shell-demo process running on its own pseudo-terminal.
///
/// The shell refuses to start without a controlling terminal it owns, so
/// the harness opens a pty pair, makes the slave the child's controlling
/// terminal (`setsid` + `TIOCSCTTY` between fork and exec) and drives the
/// session through the master end. Slave echo is switched off so the
/// transcript contains only what the shell and its jobs wrote.
pub struct PtyShell {
    master: File,
    child: Child,
    transcript: String,
    cursor: usize,
}

pub fn spawn_shell_on_pty() -> PtyShell {
    let master_fd = unsafe { libc::posix_openpt(libc::O_RDWR | libc::O_NOCTTY) };
    assert!(master_fd >= 0, "posix_openpt failed");
    let master = unsafe { File::from_raw_fd(master_fd) };
    unsafe {
        assert_eq!(libc::grantpt(master_fd), 0, "grantpt failed");
        assert_eq!(libc::unlockpt(master_fd), 0, "unlockpt failed");
    }

    let mut name = [0u8; 128];
    let rc =
        unsafe { libc::ptsname_r(master_fd, name.as_mut_ptr() as *mut libc::c_char, name.len()) };
    assert_eq!(rc, 0, "ptsname_r failed");
    let slave_path = CStr::from_bytes_until_nul(&name)
        .expect("ptsname_r result")
        .to_str()
        .expect("pty path is utf-8")
        .to_string();

    let slave = OpenOptions::new()
        .read(true)
        .write(true)
        .custom_flags(libc::O_NOCTTY)
        .open(&slave_path)
        .expect("open pty slave");

    // Keep canonical mode and signal generation (the tests type Ctrl-Z and
    // Ctrl-D); only echo goes, so input lines do not show up as output.
    unsafe {
        let mut termios = std::mem::zeroed::<libc::termios>();
        assert_eq!(libc::tcgetattr(slave.as_raw_fd(), &mut termios), 0);
        termios.c_lflag &= !libc::ECHO;
        assert_eq!(
            libc::tcsetattr(slave.as_raw_fd(), libc::TCSANOW, &termios),
            0
        );
    }

    let stdin = slave.try_clone().expect("clone slave for stdin");
    let stdout = slave.try_clone().expect("clone slave for stdout");

    let mut command = Command::new(env!("CARGO_BIN_EXE_shell-demo"));
    command
        .stdin(Stdio::from(stdin))
        .stdout(Stdio::from(stdout))
        .stderr(Stdio::from(slave));
    unsafe {
        command.pre_exec(|| {
            if libc::setsid() < 0 {
                return Err(std::io::Error::last_os_error());
            }
            // Adopt the slave (already dup'ed to fd 0) as the controlling
            // terminal; the new session leader's group becomes the
            // terminal's foreground group.
            if libc::ioctl(0, libc::TIOCSCTTY, 0) < 0 {
                return Err(std::io::Error::last_os_error());
            }
            Ok(())
        });
    }

    let child = command.spawn().expect("spawn shell-demo");
    PtyShell {
        master,
        child,
        transcript: String::new(),
        cursor: 0,
    }
}

impl PtyShell {
    /// Type a line into the terminal.
    pub fn send_line(&mut self, line: &str) {
        self.send_bytes(format!("{line}\n").as_bytes());
    }

    pub fn send_ctrl_z(&mut self) {
        self.send_bytes(&[0x1a]);
    }

    pub fn send_ctrl_d(&mut self) {
        self.send_bytes(&[0x04]);
    }

    pub fn send_bytes(&mut self, bytes: &[u8]) {
        self.master.write_all(bytes).expect("write to pty master");
    }

    /// Wait until `needle` shows up in terminal output past the last match,
    /// advancing the match cursor over it.
    pub fn expect(&mut self, needle: &str, timeout: Duration) {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(pos) = self.transcript[self.cursor..].find(needle) {
                self.cursor += pos + needle.len();
                return;
            }
            assert!(
                Instant::now() < deadline,
                "timed out waiting for {needle:?}; transcript so far:\n{}",
                self.transcript
            );
            self.read_pending(Duration::from_millis(100));
        }
    }

    /// Everything the terminal has produced so far.
    pub fn transcript(&self) -> &str {
        &self.transcript
    }

    /// Current match-cursor position, for slicing the transcript around a
    /// point of interest.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Send `exit`, wait for the shell to finish and return its exit code.
    pub fn exit_shell(&mut self) -> i32 {
        self.send_line("exit");
        self.wait_for_exit()
    }

    pub fn wait_for_exit(&mut self) -> i32 {
        let deadline = Instant::now() + Duration::from_secs(10);
        loop {
            if let Some(status) = self.child.try_wait().expect("try_wait") {
                self.read_pending(Duration::from_millis(50));
                return status.code().unwrap_or(-1);
            }
            assert!(
                Instant::now() < deadline,
                "shell did not exit; transcript so far:\n{}",
                self.transcript
            );
            self.read_pending(Duration::from_millis(50));
        }
    }

    fn read_pending(&mut self, max_wait: Duration) {
        let mut pollfd = libc::pollfd {
            fd: self.master.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        };
        let timeout_ms = max_wait.as_millis().min(1000) as libc::c_int;
        let rc = unsafe { libc::poll(&mut pollfd, 1, timeout_ms) };
        if rc <= 0 {
            return;
        }

        let mut buf = [0u8; 4096];
        match self.master.read(&mut buf) {
            Ok(n) => self
                .transcript
                .push_str(&String::from_utf8_lossy(&buf[..n])),
            // EIO once the slave side is fully closed; nothing more to read.
            Err(_) => {}
        }
    }
}

impl Drop for PtyShell {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}
