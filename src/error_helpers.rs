use errors::*;

use slog::Logger;

// Prints an error to stderr.
//
// `podcore` pairs this with a `report_error` that phones a web error
// tracker (Sentry) over `hyper`. That half is dropped here: it belongs to
// the command-shell/outer-surface layer spec.md places out of scope, not
// the core (see DESIGN.md).
pub fn print_error(log: &Logger, error: &Error) {
    let error_strings = error_strings(error);
    error!(log, "Error: {}", error_strings[0]);
    for s in error_strings.iter().skip(1) {
        error!(log, "Chained error: {}", s);
    }

    // The backtrace is not always generated. Programs must be run with
    // `RUST_BACKTRACE=1`.
    if let Some(backtrace) = error.backtrace() {
        error!(log, "{:?}", backtrace);
    }
}
