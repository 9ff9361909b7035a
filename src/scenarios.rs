//! End-to-end scenarios, each one exercising a handful of modules together
//! through `Session`/`TestBootstrap` rather than one mediator in isolation.
//! Where a scenario is already pinned down precisely by a unit test
//! elsewhere (e.g. the selection-language grammar in `selection.rs`), this
//! module adds a thin end-to-end wrapper rather than duplicating the whole
//! matrix.

use std::collections::HashMap;
use std::sync::Mutex;

use serde_json::Number;

use errors::*;
use model::{ArgTree, CacheState, JobId};
use registry::{self, CallContext, Expander};
use test_helpers::TestBootstrap;
use Config;

lazy_static! {
    /// Records callable invocation order across scenarios that care about
    /// dispatch ordering rather than just final state. Cleared at the start
    /// of each test that reads it.
    static ref CALL_ORDER: Mutex<Vec<String>> = Mutex::new(Vec::new());
}

fn record(job_id: &JobId) {
    CALL_ORDER.lock().unwrap().push(job_id.to_string());
}

fn no_op(ctx: CallContext) -> Result<ArgTree> {
    record(&ctx.job_id);
    Ok(ArgTree::Null)
}

fn always_fails(ctx: CallContext) -> Result<ArgTree> {
    record(&ctx.job_id);
    bail!(ErrorKind::JobFailed(ctx.job_id, "scenario failure".to_owned()))
}

/// Scenario 1: a job whose only child is `FAILED` ends the run `BLOCKED`,
/// and the run as a whole is reported as `MakeFailed`.
#[test]
fn scenario_blocked_propagation() {
    registry::register("jobforge::scenarios::no_op", no_op).ok();
    registry::register("jobforge::scenarios::always_fails", always_fails).ok();

    let mut bootstrap = TestBootstrap::new();
    bootstrap.comp("child", "jobforge::scenarios::always_fails", vec![]);
    bootstrap.comp(
        "parent",
        "jobforge::scenarios::no_op",
        vec![ArgTree::Promise(JobId::new("child"))],
    );

    let (failed, blocked) = bootstrap.assert_make_failed("parent");
    assert_eq!(failed, vec![JobId::new("child")]);
    assert_eq!(bootstrap.cache_state("child"), CacheState::Failed);
    assert_eq!(bootstrap.cache_state("parent"), CacheState::Blocked);
    assert!(blocked.is_empty() || blocked == vec![JobId::new("parent")]);
}

fn recurse(mut ctx: CallContext) -> Result<ArgTree> {
    record(&ctx.job_id);
    let level = match ctx.args.get(0) {
        Some(ArgTree::Number(n)) => n.as_i64().unwrap_or(0),
        _ => 0,
    };
    if level > 0 {
        let expander = ctx.expander.as_mut().expect("dynamic job must get an expander");
        expander.comp_dynamic(
            "jobforge::scenarios::recurse",
            vec![ArgTree::Number(Number::from(level - 1))],
            HashMap::new(),
        )?;
    }
    Ok(ArgTree::Number(Number::from(level)))
}

/// Scenario 2: a dynamic job whose callable recursively defines one more
/// dynamic job at a lower "level", bottoming out at 0. Five levels deep,
/// matching the root -> r5 -> r4 -> ... -> r1 chain spec.md describes.
#[test]
fn scenario_linear_dynamic_recursion() {
    registry::register("jobforge::scenarios::recurse", recurse).ok();

    let mut bootstrap = TestBootstrap::new();
    bootstrap.comp_dynamic(
        "root",
        "jobforge::scenarios::recurse",
        vec![ArgTree::Number(Number::from(5))],
    );
    bootstrap.assert_cmd_success("root");

    let mut current = JobId::new("root");
    for depth in 0..5 {
        assert_eq!(
            bootstrap.cache_state(current.as_str()),
            CacheState::Done,
            "level at depth {} should be done",
            depth
        );
        let job = bootstrap.get_job(current.as_str());
        let children = job.dynamic_children.get(&current).cloned().unwrap_or_default();
        assert_eq!(children.len(), 1, "job {} should define exactly one child", current);
        current = children.into_iter().next().unwrap();
    }

    assert_eq!(bootstrap.cache_state(current.as_str()), CacheState::Done);
    let leaf = bootstrap.get_job(current.as_str());
    assert!(leaf
        .dynamic_children
        .get(&current)
        .map_or(true, |s| s.is_empty()));
}

fn make_n_leaves(mut ctx: CallContext) -> Result<ArgTree> {
    let n = match ctx.args.get(0) {
        Some(ArgTree::Number(num)) => num.as_i64().unwrap_or(0),
        _ => 0,
    };
    let expander = ctx.expander.as_mut().expect("dynamic job must get an expander");
    for _ in 0..n {
        expander.comp("jobforge::scenarios::leaf", vec![], HashMap::new())?;
    }
    Ok(ArgTree::Number(Number::from(n)))
}

fn leaf(_ctx: CallContext) -> Result<ArgTree> {
    Ok(ArgTree::Null)
}

/// Scenario 3: redefining a dynamic job so that its callable defines fewer
/// children than before discards the orphaned ones.
#[test]
fn scenario_dynamic_redefinition_shrinks() {
    registry::register("jobforge::scenarios::make_n_leaves", make_n_leaves).ok();
    registry::register("jobforge::scenarios::leaf", leaf).ok();

    let config = Config {
        check_params: false,
        ..Config::default()
    };
    let mut bootstrap = TestBootstrap::with_config(config);

    bootstrap.session
        .define(
            "root",
            "jobforge::scenarios::make_n_leaves",
            vec![ArgTree::Number(Number::from(3))],
            Default::default(),
            true,
        )
        .unwrap();
    bootstrap.assert_cmd_success("root");

    let root = bootstrap.get_job("root");
    let first_children = root
        .dynamic_children
        .get(&JobId::new("root"))
        .cloned()
        .unwrap_or_default();
    assert_eq!(first_children.len(), 3);

    bootstrap.session
        .define(
            "root",
            "jobforge::scenarios::make_n_leaves",
            vec![ArgTree::Number(Number::from(1))],
            Default::default(),
            true,
        )
        .unwrap();
    bootstrap.session.invalidate("root").unwrap();
    bootstrap.assert_cmd_success("root");

    let root = bootstrap.get_job("root");
    let second_children = root
        .dynamic_children
        .get(&JobId::new("root"))
        .cloned()
        .unwrap_or_default();
    assert_eq!(second_children.len(), 1);

    for orphan in first_children.difference(&second_children) {
        assert!(
            ::store::get_job(&bootstrap.session.store, orphan.as_str())
                .unwrap()
                .is_none(),
            "orphaned child {} should have been discarded",
            orphan
        );
    }
}

/// Scenario 4: a callable name shaped like a closure or a locally nested
/// function is rejected at definition time — the Rust-native analogue of
/// the original's "lambdas and nested defs can't be re-resolved" rule,
/// since a real Rust closure can't even coerce to `CallableFn` in the
/// first place (see `registry`'s doc comment on that type).
#[test]
fn scenario_invalid_callables_rejected() {
    let mut bootstrap = TestBootstrap::new();

    match bootstrap.session.define(
        "a",
        "demo::{{closure}}",
        vec![],
        Default::default(),
        false,
    ) {
        Err(Error(ErrorKind::UserError(_), _)) => {}
        other => panic!("expected UserError for closure-shaped name, got {:?}", other),
    }

    match bootstrap.session.define(
        "b",
        "demo::run::<locals>::helper",
        vec![],
        Default::default(),
        false,
    ) {
        Err(Error(ErrorKind::UserError(_), _)) => {}
        other => panic!("expected UserError for locally nested name, got {:?}", other),
    }
}

/// Scenario 5: the job-selection language exercised over a real, executed
/// graph rather than jobs poked directly into the store. The grammar's
/// full matrix (union/except/in/not, wildcards, case-insensitive state
/// keywords) is covered exhaustively in `selection.rs`'s own tests; this
/// checks the same expressions resolve correctly through `Session::select`
/// once jobs have actually run.
#[test]
fn scenario_selection_language_end_to_end() {
    registry::register("jobforge::scenarios::no_op", no_op).ok();
    registry::register("jobforge::scenarios::always_fails", always_fails).ok();

    let mut bootstrap = TestBootstrap::new();
    bootstrap.comp("a", "jobforge::scenarios::no_op", vec![]);
    bootstrap.comp("b", "jobforge::scenarios::always_fails", vec![]);
    bootstrap.comp("c", "jobforge::scenarios::no_op", vec![]);
    bootstrap.comp("d", "jobforge::scenarios::no_op", vec![]);

    // `a`, `c`, `d` succeed; `b` fails. Each target is built independently
    // so one job's failure doesn't block the others' runs.
    bootstrap.assert_cmd_success("a");
    bootstrap.assert_cmd_fail("b");
    bootstrap.assert_cmd_success("c");
    bootstrap.assert_cmd_success("d");

    bootstrap.assert_jobs_equal("all", &["a", "b", "c", "d"]);
    bootstrap.assert_jobs_equal("failed", &["b"]);
    bootstrap.assert_jobs_equal("done", &["a", "c", "d"]);
    bootstrap.assert_jobs_equal("not failed", &["a", "c", "d"]);
    bootstrap.assert_jobs_equal("all except failed", &["a", "c", "d"]);
    bootstrap.assert_jobs_equal("a c in done", &["a", "c"]);
    bootstrap.assert_jobs_equal("d*", &["d"]);
}

fn recording_no_op(ctx: CallContext) -> Result<ArgTree> {
    record(&ctx.job_id);
    Ok(ArgTree::Null)
}

/// Scenario 6: when a wave has more than one ready job, the scheduler runs
/// the one that unblocks more of the target set first (spec.md §4.6),
/// breaking ties by job id. `hub` is an ancestor of two targets (`left`,
/// `right`); `solo` is itself a target but unblocks nothing further, so it
/// must run after `hub` even though both are ready in the same wave.
#[test]
fn scenario_priority_favors_wider_unblock() {
    registry::register("jobforge::scenarios::recording_no_op", recording_no_op).ok();
    CALL_ORDER.lock().unwrap().clear();

    let mut bootstrap = TestBootstrap::new();
    bootstrap.comp("hub", "jobforge::scenarios::recording_no_op", vec![]);
    bootstrap.comp(
        "left",
        "jobforge::scenarios::recording_no_op",
        vec![ArgTree::Promise(JobId::new("hub"))],
    );
    bootstrap.comp(
        "right",
        "jobforge::scenarios::recording_no_op",
        vec![ArgTree::Promise(JobId::new("hub"))],
    );
    bootstrap.comp("solo", "jobforge::scenarios::recording_no_op", vec![]);

    bootstrap.assert_cmd_success("left right solo");

    let order = CALL_ORDER.lock().unwrap().clone();
    let hub_pos = order.iter().position(|s| s == "hub").expect("hub ran");
    let solo_pos = order.iter().position(|s| s == "solo").expect("solo ran");
    assert!(hub_pos < solo_pos, "hub (unblocks 2 targets) should run before solo (unblocks 0): {:?}", order);
}
