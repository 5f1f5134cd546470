//! Stand-in binary entry point.
//!
//! No logging setup here: this process impersonates the stubbed command,
//! its stdout and stderr belong to the outcome payload.

use std::io::{self, Write};
use std::process;

fn main() {
    let exec_path = match std::env::current_exe() {
        Ok(path) => path,
        Err(e) => {
            eprintln!("error getting stand-in executable path: {e}");
            process::exit(i32::from(cmdstub_core::INTERNAL_FAILURE_EXIT_CODE));
        }
    };
    let args: Vec<String> = std::env::args().collect();

    let mut stdout = io::stdout();
    let mut stderr = io::stderr();
    let exit_code = cmdstub_standin::run(&exec_path, &args, &mut stdout, &mut stderr);
    let _ = stdout.flush();
    let _ = stderr.flush();
    process::exit(i32::from(exit_code));
}
