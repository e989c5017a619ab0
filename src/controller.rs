use anyhow::{Context, Result, anyhow, bail};
use log::debug;

use crate::job::{self, Job};
use crate::job_control::{self, ForegroundTerminalGuard};
use crate::jobs::JobTable;
use crate::parser;

/// Owns the job table and the shell's claim on the controlling terminal.
pub struct JobController {
    /// The shell's own process group, captured at startup; the terminal is
    /// returned to this group after every foreground wait.
    shell_pgid: libc::pid_t,
    jobs: JobTable,
}

/// One line of job reporting, e.g. `[1] Done                  sleep 1`.
/// The gap is a fixed column so consecutive reports line up.
fn report_line(id: usize, status: &str, command: &str) -> String {
    format!("[{id}] {status}                  {command}")
}

fn exit_status_label(exit_code: i32) -> String {
    if exit_code == 0 {
        "Done".to_string()
    } else {
        format!("Exit {exit_code}")
    }
}

fn status_label(job: &Job) -> String {
    match job.exit_code {
        job::RUNNING => "Running".to_string(),
        job::STOPPED => "Stopped".to_string(),
        code => exit_status_label(code),
    }
}

impl JobController {
    pub fn new() -> Self {
        Self {
            shell_pgid: job_control::current_process_group(),
            jobs: JobTable::new(),
        }
    }

    /// Job control needs a controlling terminal that currently belongs to
    /// the shell's own process group.
    pub fn can_enable_job_control(&self) -> bool {
        if !job_control::is_terminal(libc::STDIN_FILENO) {
            return false;
        }
        match job_control::terminal_foreground_group(libc::STDIN_FILENO) {
            Ok(pgid) => pgid == self.shell_pgid,
            Err(_) => false,
        }
    }

    /// Run one input line: sweep finished background jobs, then dispatch a
    /// built-in or launch a pipeline.
    ///
    /// Built-in errors are reported here and do not become `Err`; an `Err`
    /// return means the launch or a wait failed and the REPL should report
    /// it (and carry on).
    pub fn execute(&mut self, line: &str) -> Result<()> {
        self.reap_background()?;

        let line = line.trim();
        if line.is_empty() {
            return Ok(());
        }

        if let Some(result) = self.dispatch_builtin(line) {
            if let Err(err) = result {
                eprintln!("{err:#}");
            }
            return Ok(());
        }

        let pipeline = parser::parse(line);
        if pipeline.stages.is_empty() {
            return Ok(());
        }
        let background = pipeline.background;

        let id = self.jobs.add(Job::new(pipeline));
        if let Err(err) = self.start_job(id) {
            // Stage 0 of a foreground job may already own the terminal even
            // though a later stage failed to spawn; take it back before
            // reporting.
            if !background && job_control::is_terminal(libc::STDIN_FILENO) {
                if let Err(reclaim_err) =
                    job_control::set_terminal_foreground(libc::STDIN_FILENO, self.shell_pgid)
                {
                    debug!("terminal reclaim after failed start: {reclaim_err}");
                }
            }
            self.jobs.remove(id);
            return Err(err);
        }

        if background {
            let pgid = self.jobs.get(id).map(|job| job.pgid).unwrap_or(0);
            println!("[{id}] {pgid}");
            return Ok(());
        }

        self.wait_foreground(id)
    }

    /// Poll every background job and report the ones that finished since
    /// the last command, in ascending job-id order. Finished jobs leave the
    /// table; stopped ones stay (they are resumable) and print nothing.
    fn reap_background(&mut self) -> Result<()> {
        for id in self.jobs.ids() {
            let Some(job) = self.jobs.get_mut(id) else {
                continue;
            };
            if !job.background {
                continue;
            }

            job.wait(true)?;
            if !job.is_terminal() {
                continue;
            }

            let status = exit_status_label(job.exit_code);
            let command = job.command.clone();
            println!("{}", report_line(id, &status, &command));
            debug!("reaped background job {id}");
            self.jobs.remove(id);
        }
        Ok(())
    }

    fn dispatch_builtin(&mut self, line: &str) -> Option<Result<()>> {
        let args: Vec<&str> = line.split_whitespace().collect();
        match args.first().copied() {
            Some("jobs") => Some(self.builtin_jobs()),
            Some("bg") => Some(self.builtin_bg(&args[1..])),
            Some("fg") => Some(self.builtin_fg(&args[1..])),
            _ => None,
        }
    }

    fn builtin_jobs(&mut self) -> Result<()> {
        for (id, job) in self.jobs.iter() {
            let mut command = job.command.clone();
            if job.exit_code == job::RUNNING && job.background {
                command.push_str(" &");
            }
            println!("{}", report_line(id, &status_label(job), &command));
        }
        Ok(())
    }

    /// `bg <id>`: resume a stopped job without giving it the terminal.
    fn builtin_bg(&mut self, args: &[&str]) -> Result<()> {
        let [id_str] = args else {
            bail!("bg: usage: bg <jobid>");
        };
        let id: usize = id_str
            .parse()
            .map_err(|_| anyhow!("bg: invalid job id: {id_str}"))?;

        let Some(job) = self.jobs.get_mut(id) else {
            bail!("bg: job {id} not found");
        };
        if job.exit_code != job::STOPPED {
            bail!("bg: job {id} is not stopped");
        }

        job_control::send_continue_to_group(job.pgid)
            .with_context(|| format!("bg: failed to send SIGCONT to job {id}"))?;

        job.exit_code = job::RUNNING;
        job.background = true;
        println!("[{id}] {} &", job.command);
        Ok(())
    }

    /// `fg <id>`: give a running or stopped job the terminal and wait for
    /// it in the foreground.
    fn builtin_fg(&mut self, args: &[&str]) -> Result<()> {
        let [id_str] = args else {
            bail!("fg: usage: fg <jobid>");
        };
        let id: usize = id_str
            .parse()
            .map_err(|_| anyhow!("fg: invalid job id: {id_str}"))?;

        let Some(job) = self.jobs.get_mut(id) else {
            bail!("fg: job {id} not found");
        };

        println!("{}", job.command);

        if job.exit_code == job::STOPPED {
            job_control::send_continue_to_group(job.pgid)
                .with_context(|| format!("fg: failed to send SIGCONT to job {id}"))?;
        }

        job.background = false;
        job.exit_code = job::RUNNING;
        self.wait_foreground(id)
    }

    fn start_job(&mut self, id: usize) -> Result<()> {
        match self.jobs.get_mut(id) {
            Some(job) => job.start(),
            None => bail!("job {id} not found"),
        }
    }

    /// The single foreground-wait path, used by new foreground jobs and by
    /// `fg`: hand the terminal to the job, block until it exits or stops,
    /// and reclaim the terminal no matter how the wait ends. A stopped job
    /// is announced and kept for `bg`/`fg`; an exited one is dropped with
    /// no extra output beyond the job's own.
    fn wait_foreground(&mut self, id: usize) -> Result<()> {
        let pgid = match self.jobs.get(id) {
            Some(job) => job.pgid,
            None => bail!("job {id} not found"),
        };

        let _terminal = ForegroundTerminalGuard::acquire(pgid, self.shell_pgid)
            .context("failed to hand the terminal to the job")?;

        let Some(job) = self.jobs.get_mut(id) else {
            bail!("job {id} not found");
        };
        job.wait(false)?;

        let exit_code = job.exit_code;
        let command = job.command.clone();
        if exit_code == job::STOPPED {
            println!("{}", report_line(id, "Stopped", &command));
        } else if exit_code != job::RUNNING {
            self.jobs.remove(id);
        }
        Ok(())
    }
}
