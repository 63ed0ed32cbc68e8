mod config;

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use crossbeam_channel::Receiver;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use config::Config;
use libtelq::{ChannelObserver, Job, JobEvent, Mode, ModeSet, Priority, Scheduler};

/// telq - run commands against a telnet-managed daemon's CLI port
#[derive(Parser)]
#[command(name = "telq", version, about)]
struct Cli {
    /// CLI port of the daemon (defaults to the configured port)
    #[arg(short, long, global = true)]
    port: Option<u16>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run commands in order and print their output
    Run {
        /// Modes the commands may run in, e.g. "PRIVILEGED" or
        /// "DEFAULT|PRIVILEGED"
        #[arg(short, long, default_value = "DEFAULT")]
        mode: String,

        /// Commands to execute
        commands: Vec<String>,
    },

    /// Set properties, then read one back
    Property {
        /// Modes the commands may run in
        #[arg(short, long, default_value = "PRIVILEGED")]
        mode: String,

        /// Setter commands, run first in the given order
        #[arg(short, long)]
        set: Vec<String>,

        /// Getter command; always runs last, its output is printed
        #[arg(short, long)]
        get: String,
    },

    /// Ask the daemon to shut itself down
    Shutdown,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let Some(port) = cli.port.or_else(|| Config::load().port) else {
        eprintln!("No port given and none configured; use --port or set one in the config file");
        return ExitCode::FAILURE;
    };
    debug!("using daemon CLI port {port}");

    let scheduler = Scheduler::new();
    scheduler.start();
    scheduler.set_connection_details(port);

    match cli.command {
        Command::Run { mode, commands } => cmd_run(&scheduler, &mode, commands),
        Command::Property { mode, set, get } => cmd_property(&scheduler, &mode, set, get),
        Command::Shutdown => cmd_shutdown(&scheduler),
    }
}

fn cmd_run(scheduler: &Scheduler, mode: &str, commands: Vec<String>) -> ExitCode {
    let Some(modes) = parse_modes(mode) else {
        return ExitCode::FAILURE;
    };
    if commands.is_empty() {
        eprintln!("Nothing to run");
        return ExitCode::FAILURE;
    }

    let (observer, events) = ChannelObserver::new();
    let mut job = Job::new(observer);
    for text in commands {
        job.push_command(libtelq::Command::new(text, modes));
    }
    scheduler.enqueue(job, Priority::Default);

    drain_job(&events, |_| true)
}

fn cmd_property(scheduler: &Scheduler, mode: &str, set: Vec<String>, get: String) -> ExitCode {
    let Some(modes) = parse_modes(mode) else {
        return ExitCode::FAILURE;
    };

    let setters = set
        .into_iter()
        .map(|text| libtelq::Command::new(text, modes))
        .collect();
    let getter = libtelq::Command::new(get.clone(), modes);

    let (observer, events) = ChannelObserver::new();
    scheduler.enqueue(Job::property(setters, getter, observer), Priority::Default);

    // only the getter's output is interesting
    drain_job(&events, |command| command == get)
}

fn cmd_shutdown(scheduler: &Scheduler) -> ExitCode {
    let (observer, events) = ChannelObserver::new();
    let job = Job::single("shutdown", ModeSet::only(Mode::Privileged), observer);
    scheduler.enqueue(job, Priority::Highest);

    drain_job(&events, |_| false)
}

fn parse_modes(field: &str) -> Option<ModeSet> {
    let modes = ModeSet::parse_field(field);
    if modes.is_empty() {
        eprintln!("Unknown mode set {field:?} (expected names like DEFAULT|PRIVILEGED|CONFIG)");
        return None;
    }
    Some(modes)
}

/// Drain job events until a terminal one decides the exit code, printing the
/// result lines `print_for` selects.
fn drain_job(events: &Receiver<JobEvent>, print_for: impl Fn(&str) -> bool) -> ExitCode {
    loop {
        match events.recv() {
            Ok(JobEvent::Started) => {}
            Ok(JobEvent::Result { command, lines }) => {
                if print_for(&command) {
                    for line in lines {
                        println!("{line}");
                    }
                }
            }
            Ok(JobEvent::Completed) => return ExitCode::SUCCESS,
            Ok(JobEvent::Aborted) => {
                eprintln!("Job was aborted before it ran");
                return ExitCode::FAILURE;
            }
            Ok(JobEvent::Failed) => {
                eprintln!("Job failed: connection error while talking to the daemon");
                return ExitCode::FAILURE;
            }
            Err(_) => {
                eprintln!("Job was dropped: could not connect to the daemon (is it running?)");
                return ExitCode::FAILURE;
            }
        }
    }
}
