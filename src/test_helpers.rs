//! A5: test tooling. spec.md's Design Notes translate "deep inheritance in
//! the original test harness" into "a single test-fixture builder exposing
//! the verbs `comp`, `get_job`, `assert_cmd_success`, `assert_cmd_fail`,
//! `assert_make_failed`, `assert_jobs_equal` — no OO hierarchy needed".
//! `TestBootstrap` is that builder: a throwaway `Session` over a
//! `tempfile`-rooted store, torn down when the `TempDir` drops. Gated
//! behind `#[cfg(test)]` the same way `podcore::test_helpers` is.

use std::collections::BTreeMap;

use slog;
use slog::{Drain, Logger};
use slog_async;
use slog_term;
use std;
use tempfile::TempDir;

use errors::*;
use model::{ArgTree, CacheState, Job, JobId};
use registry::CallContext;
use session::Session;
use Config;

pub fn log() -> Logger {
    let decorator = slog_term::PlainSyncDecorator::new(std::io::stdout());
    let drain = slog_term::CompactFormat::new(decorator).build().fuse();
    let async_drain = slog_async::Async::new(drain).build().fuse();
    slog::Logger::root(async_drain, o!("env" => "test"))
}

/// A fresh store plus a `Session` over it.
pub struct TestBootstrap {
    _dir: TempDir,
    pub session: Session,
}

impl TestBootstrap {
    pub fn new() -> TestBootstrap {
        TestBootstrap::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> TestBootstrap {
        let dir = TempDir::new().expect("could not create temp dir");
        let session = Session::open(dir.path(), config, log()).expect("could not open store");
        TestBootstrap { _dir: dir, session }
    }

    /// Re-opens the same on-disk store under a fresh `Session`, simulating
    /// a process restart between two commands (scenario 3's "second
    /// session").
    pub fn reopen(self) -> TestBootstrap {
        let config = self.session.config.clone();
        let path = self._dir.path().to_path_buf();
        let session = Session::open(&path, config, log()).expect("could not reopen store");
        TestBootstrap { _dir: self._dir, session }
    }

    /// `comp`: defines a top-level static job.
    pub fn comp(&mut self, job_id: &str, callable_ref: &str, args: Vec<ArgTree>) -> JobId {
        self.session
            .define(job_id, callable_ref, args, BTreeMap::new(), false)
            .expect("comp() failed")
    }

    /// `comp_dynamic`: defines a top-level dynamic job.
    pub fn comp_dynamic(&mut self, job_id: &str, callable_ref: &str, args: Vec<ArgTree>) -> JobId {
        self.session
            .define(job_id, callable_ref, args, BTreeMap::new(), true)
            .expect("comp_dynamic() failed")
    }

    pub fn get_job(&self, job_id: &str) -> Job {
        ::store::get_job(&self.session.store, job_id)
            .expect("store error")
            .unwrap_or_else(|| panic!("no such job: {}", job_id))
    }

    pub fn cache_state(&self, job_id: &str) -> CacheState {
        ::store::get_cache(&self.session.store, job_id)
            .expect("store error")
            .unwrap_or_else(|| panic!("no such cache: {}", job_id))
            .state
    }

    /// Runs `make` on `expr` and asserts it completed successfully.
    pub fn assert_cmd_success(&mut self, expr: &str) {
        if let Err(e) = self.session.make(expr) {
            panic!("expected {:?} to succeed, got {:?}", expr, e);
        }
    }

    /// Runs `make` on `expr` and asserts it returned an error (any kind).
    pub fn assert_cmd_fail(&mut self, expr: &str) {
        if self.session.make(expr).is_ok() {
            panic!("expected {:?} to fail, but it succeeded", expr);
        }
    }

    /// Runs `make` on `expr` and asserts it failed with `MakeFailed`,
    /// handing back the `(failed, blocked)` sets for further assertions.
    pub fn assert_make_failed(&mut self, expr: &str) -> (Vec<JobId>, Vec<JobId>) {
        match self.session.make(expr) {
            Err(Error(ErrorKind::MakeFailed(failed, blocked), _)) => (failed, blocked),
            other => panic!("expected MakeFailed for {:?}, got {:?}", expr, other),
        }
    }

    /// Asserts that selecting `expr` yields exactly `expected` (order-free).
    pub fn assert_jobs_equal(&self, expr: &str, expected: &[&str]) {
        let mut got: Vec<String> = self
            .session
            .select(expr)
            .expect("selection failed")
            .into_iter()
            .map(|id| id.to_string())
            .collect();
        got.sort();
        let mut want: Vec<String> = expected.iter().map(|s| s.to_string()).collect();
        want.sort();
        assert_eq!(got, want, "selection {:?}", expr);
    }
}

/// A no-op callable usable anywhere a test just needs "some job that
/// succeeds".
pub fn no_op(_ctx: CallContext) -> Result<ArgTree> {
    Ok(ArgTree::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use registry;

    #[test]
    fn test_bootstrap_comp_and_run() {
        registry::register("jobforge::test_helpers::no_op", no_op).ok();
        let mut bootstrap = TestBootstrap::new();
        bootstrap.comp("a", "jobforge::test_helpers::no_op", vec![]);
        bootstrap.assert_cmd_success("a");
        assert_eq!(bootstrap.cache_state("a"), CacheState::Done);
    }
}
