mod attach;
mod debugger;
mod error;
mod fdlist;
mod fdpass;
mod masterfd;
mod pgroup;
mod procstat;
mod ptrace_x86_64;
mod reader;
mod relay;
mod scratch;
mod session;
mod shim;
mod signal;
mod status;
mod steal;
mod stopresume;
mod term;
mod ttyfd;
mod writer;

use crate::error::Error;
use crate::status::*;
use clap::error::ErrorKind;
use clap::{Parser, Subcommand};
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};

/// Enable debug logs. `pub` so every module can gate its own diagnostics
/// through the single `debug!` macro rather than threading a logger handle
/// through every orchestrator call.
pub static DEBUG: AtomicBool = AtomicBool::new(false);

/// Print message to stderr if debug logs are enabled. Exported so the core
/// modules can log through it with `crate::debug!` instead of threading a
/// logger handle through every orchestrator call.
#[macro_export]
macro_rules! debug {
    ($fmt:expr $(,$args:expr)*) => ({
        if $crate::DEBUG.load(std::sync::atomic::Ordering::Relaxed) {
            eprintln!(
                concat!("ptygraft: {}: ", $fmt),
                std::thread::current().name().unwrap_or("main"),
                $($args),*);
        }
    });
}

/// Print message to stderr and exit with given code.
macro_rules! terminate {
    ($code:expr; $fmt:expr) => ({
        eprintln!(concat!("ptygraft: ", $fmt));
        process::exit($code);
    });
    ($code:expr; $fmt:expr, $($args:expr),+) => ({
        eprintln!(concat!("ptygraft: ", $fmt), $($args),+);
        process::exit($code);
    });
}

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Enable debug logging to stderr.
    #[arg(short = 'D', long, default_value_t = false, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Redirect a running process's tty fds onto a pty slave the caller
    /// already allocated, making that pty the target's controlling terminal.
    Attach {
        /// Target process id.
        pid: i32,

        /// Path to the pty slave (e.g. /dev/pts/7) to become the target's
        /// controlling terminal.
        pty: String,

        /// Redirect fds 0/1/2 unconditionally, even if none of them
        /// currently resolve to a tty.
        #[arg(long, default_value_t = false)]
        force_stdio: bool,
    },

    /// Extract the master side of the pty currently driving a target from
    /// its terminal emulator, and relay it on our own stdio.
    Steal {
        /// Target process id.
        pid: i32,
    },
}

/// Parse CLI arguments. Also handles `--help`, `--version`, and usage errors
/// the way clap's own `try_parse` reports them.
fn parse_args() -> Args {
    match Args::try_parse() {
        Ok(args) => {
            if args.debug {
                DEBUG.store(true, Ordering::SeqCst);
            }
            args
        }
        Err(err) if err.kind() == ErrorKind::DisplayHelp => {
            print!("{}", err);
            process::exit(EXIT_SUCCESS);
        }
        Err(err) if err.kind() == ErrorKind::DisplayVersion => {
            print!(
                "{} {}\nCopyright (C) {}\n",
                env!("CARGO_PKG_NAME"),
                env!("CARGO_PKG_VERSION"),
                env!("CARGO_PKG_AUTHORS")
            );
            process::exit(EXIT_SUCCESS);
        }
        Err(err) => {
            eprint!("{}", err);
            process::exit(EXIT_USAGE);
        }
    }
}

fn run(command: Command) -> Result<(), Error> {
    match command {
        Command::Attach {
            pid,
            pty,
            force_stdio,
        } => {
            debug!("attaching pid {} to {}", pid, pty);
            attach::attach(pid, &pty, force_stdio)?;
            debug!("attach succeeded for pid {}", pid);
            relay::post_attach(&pty);
            Ok(())
        }
        Command::Steal { pid } => {
            debug!("stealing pty master from pid {}", pid);
            let master = steal::steal(pid)?;
            debug!("steal succeeded for pid {}, relaying", pid);
            relay::post_steal(master)
        }
    }
}

fn main() {
    let args = parse_args();

    if let Err(err) = run(args.command) {
        terminate!(status::exit_code(&err); "{}", err);
    }
}
