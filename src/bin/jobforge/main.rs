//! The generic command surface (spec.md §6). This binary itself registers
//! no callables — callables are supplied by whatever program used
//! `jobforge::register` to populate a store in the first place (the same
//! way the original's `compmake` console is invoked against a directory a
//! separate `make.py` script already populated via `comp()`). What this
//! binary gives you is everything that doesn't need a callable to run:
//! `make` (assuming the store's callables also happen to be registered
//! here, which is true only when this binary and the defining program are
//! literally the same build), `clean`, `invalidate`, `ls`, `details`,
//! `dump`, and `check-consistency`, plus the hidden `__run-job` subcommand
//! `job_worker::run_new_process` re-execs per job in `new_process` mode.

extern crate clap;
extern crate jobforge;
#[macro_use]
extern crate slog;
extern crate slog_async;
extern crate slog_term;

use std::path::PathBuf;
use std::process;

use clap::{App, AppSettings, Arg, ArgMatches, SubCommand};
use slog::{Drain, Logger};

use jobforge::errors::*;
use jobforge::model::JobId;
use jobforge::{Config, Session};

fn main() {
    let mut app = build_app();
    let matches = app.clone().get_matches();
    let options = GlobalOptions::from_matches(&matches);
    let log = log(&options);

    let res = match matches.subcommand_name() {
        Some("make") => subcommand_make(&log, &matches, &options),
        Some("clean") => subcommand_clean(&log, &matches, &options),
        Some("invalidate") => subcommand_invalidate(&log, &matches, &options),
        Some("ls") => subcommand_ls(&log, &matches, &options),
        Some("details") => subcommand_details(&log, &matches, &options),
        Some("dump") => subcommand_dump(&log, &matches, &options),
        Some("check-consistency") => subcommand_check_consistency(&log, &matches, &options),
        Some("__run-job") => subcommand_run_job(&log, &matches, &options),
        None => {
            app.print_help().unwrap();
            Ok(())
        }
        _ => unreachable!(),
    };

    if let Err(ref e) = res {
        handle_error(&log, e);
    }
}

//
// Subcommands
//

fn subcommand_make(log: &Logger, matches: &ArgMatches, options: &GlobalOptions) -> Result<()> {
    let matches = matches.subcommand_matches("make").unwrap();
    let expr = targets_expr(matches, "all");

    let mut config = options.config();
    if let Some(n) = matches.value_of("num-workers") {
        config.num_workers = n.parse().chain_err(|| "invalid --num-workers")?;
    }
    if matches.is_present("new-process") {
        config.new_process = true;
    }

    let session = open_session(log, options, config)?;
    let result = session.make(&expr)?;
    info!(log, "Build finished"; "num_done" => result.done.len());
    for id in &result.done {
        println!("{}", id);
    }
    Ok(())
}

fn subcommand_clean(log: &Logger, matches: &ArgMatches, options: &GlobalOptions) -> Result<()> {
    let matches = matches.subcommand_matches("clean").unwrap();
    let expr = targets_expr(matches, "all");

    let mut session = open_session(log, options, options.config())?;
    session.clean(&expr)
}

fn subcommand_invalidate(log: &Logger, matches: &ArgMatches, options: &GlobalOptions) -> Result<()> {
    let matches = matches.subcommand_matches("invalidate").unwrap();
    let expr = targets_expr(matches, "all");

    let mut session = open_session(log, options, options.config())?;
    session.invalidate(&expr)
}

fn subcommand_ls(log: &Logger, matches: &ArgMatches, options: &GlobalOptions) -> Result<()> {
    let matches = matches.subcommand_matches("ls").unwrap();
    let expr = targets_expr(matches, "all");

    let session = open_session(log, options, options.config())?;
    for (id, state) in session.ls(&expr)? {
        println!("{:<40} {}", id, state);
    }
    Ok(())
}

fn subcommand_details(log: &Logger, matches: &ArgMatches, options: &GlobalOptions) -> Result<()> {
    let matches = matches.subcommand_matches("details").unwrap();
    let expr = targets_expr(matches, "all");

    let session = open_session(log, options, options.config())?;
    for details in session.details(&expr)? {
        println!("{}", details.job.job_id);
        println!("  callable:    {}", details.job.callable_ref);
        println!("  state:       {}", details.cache.state);
        println!("  fresh:       {} ({})", details.freshness.fresh, details.freshness.reason);
        println!("  children:    {}", details.job.children.len());
        println!("  defines:     {}", details.job.defines.len());
    }
    Ok(())
}

fn subcommand_dump(log: &Logger, matches: &ArgMatches, options: &GlobalOptions) -> Result<()> {
    let matches = matches.subcommand_matches("dump").unwrap();
    let directory = PathBuf::from(matches.value_of("DIRECTORY").unwrap());
    let expr = targets_expr(matches, "all");

    let session = open_session(log, options, options.config())?;
    session.dump(&directory, &expr)
}

fn subcommand_check_consistency(
    log: &Logger,
    matches: &ArgMatches,
    options: &GlobalOptions,
) -> Result<()> {
    let matches = matches.subcommand_matches("check-consistency").unwrap();
    let raise_if_error = matches.is_present("raise-if-error");

    let session = open_session(log, options, options.config())?;
    let violations = session.check_consistency(raise_if_error)?;
    if violations.is_empty() {
        info!(log, "Store is consistent");
    } else {
        for v in &violations {
            println!("{}", v);
        }
    }
    Ok(())
}

/// The hidden subcommand `new_process` dispatch re-execs itself with, one
/// job at a time. Not meant to be invoked by hand.
fn subcommand_run_job(log: &Logger, matches: &ArgMatches, options: &GlobalOptions) -> Result<()> {
    let matches = matches.subcommand_matches("__run-job").unwrap();
    let job_id = JobId::new(matches.value_of("JOB_ID").unwrap());

    let store = jobforge::store::SledStore::open(&options.store_dir)?;
    jobforge::mediators::job_worker::execute_job_inline(&store, &options.config(), log, &job_id)
}

//
// Private types/functions
//

fn build_app() -> App<'static, 'static> {
    App::new("jobforge")
        .version("0.1")
        .about("A persistent, dependency-aware computation engine")
        .arg_from_usage("--store-dir=[PATH] 'Directory the job store lives in'")
        .arg_from_usage("--log-async 'Log asynchronously (good for logging on servers)'")
        .arg_from_usage("-q, --quiet 'Quiets all output'")
        .arg_from_usage("--debug-check-invariants 'Re-check store invariants after every mutating command'")
        .arg_from_usage("--interactive 'Run in interactive mode'")
        .arg_from_usage("--no-console-status 'Disable the live console status display'")
        .arg_from_usage("--no-check-params 'Allow redefining a job with different arguments instead of erroring'")
        .subcommand(
            SubCommand::with_name("make")
                .about("Builds every stale job reachable from the given targets")
                .arg_from_usage("[TARGETS]... 'Job-set expression selecting what to build (default: all)'")
                .arg_from_usage("-n, --num-workers=[N] 'Number of local worker threads'")
                .arg_from_usage("--new-process 'Dispatch each job in its own worker process'"),
        )
        .subcommand(
            SubCommand::with_name("clean")
                .about("Deletes cached results and definitions for the given targets")
                .arg_from_usage("[TARGETS]... 'Job-set expression (default: all)'"),
        )
        .subcommand(
            SubCommand::with_name("invalidate")
                .about("Marks the given targets as not started, without forgetting their definitions")
                .arg_from_usage("[TARGETS]... 'Job-set expression (default: all)'"),
        )
        .subcommand(
            SubCommand::with_name("ls")
                .about("Lists jobs and their cache state")
                .arg_from_usage("[TARGETS]... 'Job-set expression (default: all)'"),
        )
        .subcommand(
            SubCommand::with_name("details")
                .about("Prints the full record for the given targets")
                .arg_from_usage("[TARGETS]... 'Job-set expression (default: all)'"),
        )
        .subcommand(
            SubCommand::with_name("dump")
                .about("Writes one JSON file per selected job into a directory")
                .arg(Arg::with_name("DIRECTORY").required(true))
                .arg_from_usage("[TARGETS]... 'Job-set expression (default: all)'"),
        )
        .subcommand(
            SubCommand::with_name("check-consistency")
                .about("Scans the store for broken invariants")
                .arg_from_usage("--raise-if-error 'Exit nonzero if any violation is found'"),
        )
        .subcommand(
            SubCommand::with_name("__run-job")
                .setting(AppSettings::Hidden)
                .arg_from_usage("<JOB_ID> 'Job id to run inline'"),
        )
}

struct GlobalOptions {
    store_dir: PathBuf,
    quiet: bool,
    log_async: bool,
    config: Config,
}

impl GlobalOptions {
    fn from_matches(matches: &ArgMatches) -> GlobalOptions {
        GlobalOptions {
            store_dir: matches
                .value_of("store-dir")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(".jobforge-store")),
            quiet: matches.is_present("quiet"),
            log_async: matches.is_present("log-async"),
            config: Config::from_matches(matches),
        }
    }

    fn config(&self) -> Config {
        self.config.clone()
    }
}

/// Joins a subcommand's variadic `TARGETS` into the single selection
/// expression `Session::select` parses, falling back to `default` (usually
/// `"all"`) when none were given.
fn targets_expr(matches: &ArgMatches, default: &str) -> String {
    match matches.values_of("TARGETS") {
        Some(values) => values.collect::<Vec<_>>().join(" "),
        None => default.to_owned(),
    }
}

fn open_session(log: &Logger, options: &GlobalOptions, config: Config) -> Result<Session> {
    ::std::fs::create_dir_all(&options.store_dir)?;
    Session::open(&options.store_dir, config, log.clone())
}

fn handle_error(log: &Logger, e: &Error) {
    jobforge::error_helpers::print_error(log, e);
    process::exit(jobforge::errors::exit_code(e));
}

fn log(options: &GlobalOptions) -> Logger {
    if options.quiet {
        slog::Logger::root(slog::Discard, o!())
    } else if options.log_async {
        let decorator = slog_term::PlainSyncDecorator::new(::std::io::stdout());
        let drain = slog_term::FullFormat::new(decorator).build().fuse();
        slog::Logger::root(drain, o!())
    } else {
        let decorator = slog_term::PlainSyncDecorator::new(::std::io::stdout());
        let drain = slog_term::CompactFormat::new(decorator).build().fuse();
        let async_drain = slog_async::Async::new(drain).build().fuse();
        slog::Logger::root(async_drain, o!())
    }
}
