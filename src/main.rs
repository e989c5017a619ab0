mod controller;
mod job;
mod job_control;
mod jobs;
mod parser;
mod status;

use std::io::{self, Write};

use crate::controller::JobController;

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let mut controller = JobController::new();
    if !controller.can_enable_job_control() {
        println!("Job control not available. Exiting.");
        std::process::exit(1);
    }

    // Ctrl-Z at the prompt must not stop the shell itself; spawned stages
    // get the default disposition back before exec.
    if unsafe { libc::signal(libc::SIGTSTP, libc::SIG_IGN) } == libc::SIG_ERR {
        eprintln!("shell-demo: failed to ignore SIGTSTP");
    }

    // Ctrl-C at the prompt only interrupts the current line. While a job
    // runs, the kernel delivers SIGINT to the job's group, not to us.
    ctrlc::set_handler(|| {
        println!();
        let _ = io::stdout().flush();
    })
    .expect("Failed to set Ctrl-C handler");

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        print!("shell-demo> ");
        if stdout.flush().is_err() {
            break;
        }

        let mut input = String::new();
        match stdin.read_line(&mut input) {
            Ok(0) => {
                println!("\nGoodbye!");
                break;
            }
            Ok(_) => {
                let trimmed = input.trim();
                if trimmed == "exit" {
                    println!("Goodbye!");
                    break;
                }

                // Empty lines still go through execute: pressing Enter is
                // how finished background jobs get reported.
                if let Err(err) = controller.execute(trimmed) {
                    eprintln!("Error executing command: {err:#}");
                }
            }
            Err(err) => {
                eprintln!("Error reading input: {err}");
                break;
            }
        }
    }
}
