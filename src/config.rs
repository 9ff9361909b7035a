//! A3: configuration, populated by `clap` in the same derive-free
//! `App`/`SubCommand` style `podcore::bin::podcore::main` uses.

use clap::ArgMatches;

/// The options spec.md §6 says the core must recognise, plus the two
/// dispatch-mode knobs §4.6 describes (`num_workers`, `new_process`).
#[derive(Clone, Debug)]
pub struct Config {
    pub interactive: bool,
    pub console_status: bool,
    pub check_params: bool,
    pub debug_check_invariants: bool,
    pub num_workers: u32,
    pub new_process: bool,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            interactive: false,
            console_status: true,
            check_params: true,
            debug_check_invariants: false,
            num_workers: 1,
            new_process: false,
        }
    }
}

impl Config {
    /// Builds a `Config` from the top-level `App`'s matches (where the
    /// session-wide options from spec.md §6 live: `--interactive`,
    /// `--no-console-status`, `--no-check-params`, `--debug-check-invariants`).
    /// `num_workers`/`new_process` are `make`-specific and are layered on by
    /// the caller from that subcommand's own matches, since no other
    /// subcommand has a use for them.
    pub fn from_matches(matches: &ArgMatches) -> Config {
        Config {
            interactive: matches.is_present("interactive"),
            console_status: !matches.is_present("no-console-status"),
            check_params: !matches.is_present("no-check-params"),
            debug_check_invariants: matches.is_present("debug-check-invariants"),
            ..Config::default()
        }
    }
}
