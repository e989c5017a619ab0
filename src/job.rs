use std::io;
use std::os::unix::process::CommandExt;
use std::process::{Child, Command, Stdio};

use anyhow::{Context, Result, bail};
use log::debug;

use crate::job_control::{self, WaitOutcome};
use crate::parser::Pipeline;

/// Sentinel exit codes for a job that has not reached a terminal state.
pub const RUNNING: i32 = -1;
pub const STOPPED: i32 = -2;

/// One command of a pipeline and, once started, its process handle.
pub struct Stage {
    pub argv: Vec<String>,
    pub process: Option<Child>,
}

/// One pipeline launched from one input line.
///
/// All stages share a process group led by the first stage, so terminal
/// signals and `kill(-pgid, ...)` reach the whole pipeline at once. The
/// job's exit code is `RUNNING` until every stage has been reaped (or any
/// stage stops), and the last stage's status decides the final value.
pub struct Job {
    pub command: String,
    pub stages: Vec<Stage>,
    pub pgid: libc::pid_t,
    pub background: bool,
    pub exit_code: i32,
}

impl Job {
    pub fn new(pipeline: Pipeline) -> Self {
        Self {
            command: pipeline.command,
            stages: pipeline
                .stages
                .into_iter()
                .map(|argv| Stage {
                    argv,
                    process: None,
                })
                .collect(),
            pgid: 0,
            background: pipeline.background,
            exit_code: RUNNING,
        }
    }

    /// True once the job has exited; stopped jobs are not terminal.
    pub fn is_terminal(&self) -> bool {
        self.exit_code != RUNNING && self.exit_code != STOPPED
    }

    /// Spawn every stage, wired stdin-to-stdout through pipes, all in one
    /// process group.
    ///
    /// The first stage becomes the group leader via `setpgid(0, 0)` between
    /// fork and exec; later stages join that group the same way, and the
    /// parent repeats each `setpgid` after the spawn so the group is fully
    /// formed no matter which side runs first. For a foreground job on a
    /// real terminal the first stage also hands itself the terminal before
    /// exec, so no stage can read the terminal while the shell still owns
    /// it.
    ///
    /// On a mid-pipeline spawn failure the already-started stages are left
    /// running; the caller drops the job and recovers the terminal.
    pub fn start(&mut self) -> Result<()> {
        if self.stages.is_empty() {
            bail!("empty pipeline");
        }
        if self.pgid != 0 {
            bail!("job already started");
        }

        let claim_terminal =
            !self.background && job_control::is_terminal(libc::STDIN_FILENO);
        let stage_count = self.stages.len();
        let mut prev_reader: Option<os_pipe::PipeReader> = None;

        for (index, stage) in self.stages.iter_mut().enumerate() {
            let mut command = Command::new(&stage.argv[0]);
            command.args(&stage.argv[1..]);

            // First stage reads the shell's stdin; later stages read the
            // previous stage's pipe. The last stage writes the shell's
            // stdout; stderr is inherited everywhere.
            if let Some(reader) = prev_reader.take() {
                command.stdin(Stdio::from(reader));
            }
            if index + 1 < stage_count {
                let (reader, writer) =
                    os_pipe::pipe().context("failed to create pipe")?;
                command.stdout(Stdio::from(writer));
                prev_reader = Some(reader);
            }

            let pgid = self.pgid;
            let claim = index == 0 && claim_terminal;
            unsafe {
                command.pre_exec(move || child_setup(pgid, claim));
            }

            let child = command
                .spawn()
                .with_context(|| format!("{}: failed to start", stage.argv[0]))?;
            let pid = child.id() as libc::pid_t;
            if index == 0 {
                self.pgid = pid;
            }
            job_control::set_process_group(pid, self.pgid)
                .with_context(|| format!("{}: setpgid failed", stage.argv[0]))?;

            stage.process = Some(child);
            // `command` drops here, closing the parent's copies of the pipe
            // ends this stage inherited.
        }

        debug!("started job pgid={} command={:?}", self.pgid, self.command);
        Ok(())
    }

    /// Update the job's aggregate state from its stages.
    ///
    /// With `nohang` the poll never blocks (background sweep); without it
    /// the call blocks until every stage has exited or some stage stops
    /// (foreground wait). A stop observed on any stage marks the whole job
    /// stopped: the terminal delivers SIGTSTP to the entire foreground
    /// group, so per-stage stop bookkeeping would add nothing. A stage that
    /// was reaped on an earlier call shows up as ECHILD and is skipped.
    ///
    /// No-op once the job has left the running state.
    pub fn wait(&mut self, nohang: bool) -> Result<()> {
        if self.exit_code != RUNNING {
            return Ok(());
        }

        let stage_count = self.stages.len();
        for (index, stage) in self.stages.iter_mut().enumerate() {
            let Some(child) = stage.process.as_ref() else {
                continue;
            };
            let pid = child.id() as libc::pid_t;

            match job_control::wait_process(pid, nohang)
                .with_context(|| format!("{}: waitpid failed", stage.argv[0]))?
            {
                WaitOutcome::StillRunning => {}
                WaitOutcome::AlreadyReaped => {}
                WaitOutcome::Stopped => {
                    debug!("job pgid={} stopped", self.pgid);
                    self.exit_code = STOPPED;
                    return Ok(());
                }
                WaitOutcome::Exited(code) => {
                    if index + 1 == stage_count {
                        self.exit_code = code;
                    }
                }
            }
        }

        Ok(())
    }
}

/// Runs in the child between fork and exec; only async-signal-safe calls.
fn child_setup(pgid: libc::pid_t, claim_terminal: bool) -> io::Result<()> {
    unsafe {
        if libc::setpgid(0, pgid) < 0 {
            return Err(io::Error::last_os_error());
        }

        if claim_terminal {
            // Not the foreground group yet, so tcsetpgrp would stop us with
            // SIGTTOU unless it is ignored for the call.
            libc::signal(libc::SIGTTOU, libc::SIG_IGN);
            let rc = libc::tcsetpgrp(libc::STDIN_FILENO, libc::getpgrp());
            let err = if rc < 0 {
                Some(io::Error::last_os_error())
            } else {
                None
            };
            libc::signal(libc::SIGTTOU, libc::SIG_DFL);
            if let Some(err) = err {
                return Err(err);
            }
        }

        // The shell ignores SIGTSTP and the Rust runtime ignores SIGPIPE;
        // ignored dispositions survive exec, so restore the defaults.
        libc::signal(libc::SIGTSTP, libc::SIG_DFL);
        libc::signal(libc::SIGPIPE, libc::SIG_DFL);
    }
    Ok(())
}
