//! A4: the callable registry.
//!
//! spec.md assumes a `callable_ref` can always be re-resolved into the
//! function it names (§4.3, §9) — true in Python, where a fully qualified
//! name can be `getattr`'d back into a function object. Rust has no
//! equivalent reflection, so this module is the explicit stand-in: user
//! code calls `jobforge::register` once at startup to populate a
//! process-global table, and every later lookup by name goes through it.

use std::collections::HashMap;
use std::sync::RwLock;

use errors::*;
use model::{ArgTree, JobId};

/// What a dynamic job's callable is handed so it can register children.
/// Kept as a trait object rather than a concrete type so `dynamic_expander`
/// doesn't need to be imported here (it imports `registry`, not the other
/// way around).
pub trait Expander {
    fn comp(
        &mut self,
        callable_ref: &str,
        args: Vec<ArgTree>,
        kwargs: HashMap<String, ArgTree>,
    ) -> Result<JobId>;

    fn comp_dynamic(
        &mut self,
        callable_ref: &str,
        args: Vec<ArgTree>,
        kwargs: HashMap<String, ArgTree>,
    ) -> Result<JobId>;
}

/// Everything a callable needs in order to run: its materialised
/// arguments, its own id (mirroring the reserved `job_id` parameter
/// spec.md §4.3 describes), and, for a dynamic job, a handle back into the
/// scheduler for registering children.
pub struct CallContext<'a> {
    pub job_id: JobId,
    pub args: Vec<ArgTree>,
    pub kwargs: HashMap<String, ArgTree>,
    pub expander: Option<&'a mut Expander>,
}

/// The shape every registered callable must have. A plain function
/// pointer, not a `Box<Fn>`: a real Rust closure cannot coerce to this
/// type (it fails at the `register` call site, at compile time), which is
/// exactly the "lambdas are rejected" contract from spec.md §4.3 — the
/// rejection just happens earlier than at a runtime name check.
pub type CallableFn = fn(CallContext) -> Result<ArgTree>;

lazy_static! {
    static ref REGISTRY: RwLock<HashMap<String, CallableFn>> = RwLock::new(HashMap::new());
}

/// A name is rejected if it looks like it was produced by something other
/// than a real, top-level, nameable item — the Rust stand-ins for
/// Python's "lambda" and "locally nested function" cases from
/// `test_invalid_functions.py`.
fn looks_unresolvable(name: &str) -> bool {
    name.is_empty() || name.contains("{{closure}}") || name.contains("::<locals>")
}

/// Registers `callable_ref` so that jobs defined against it can be run
/// later, including after a process restart. Returns `UserError` for a
/// name that could never be re-resolved; this is the same validation
/// `mediators::definer` re-runs at definition time so that a bad name is
/// caught at `define()` rather than only discovered at dispatch.
pub fn register<S: Into<String>>(name: S, f: CallableFn) -> Result<()> {
    let name = name.into();
    if looks_unresolvable(&name) {
        bail!(ErrorKind::UserError(format!(
            "callable name {:?} cannot be re-resolved across a restart",
            name
        )));
    }
    REGISTRY
        .write()
        .expect("callable registry lock poisoned")
        .insert(name, f);
    Ok(())
}

pub fn is_registered(name: &str) -> bool {
    REGISTRY
        .read()
        .expect("callable registry lock poisoned")
        .contains_key(name)
}

pub fn resolve(name: &str) -> Result<CallableFn> {
    REGISTRY
        .read()
        .expect("callable registry lock poisoned")
        .get(name)
        .cloned()
        .ok_or_else(|| ErrorKind::UserError(format!("no callable registered under {:?}", name)).into())
}

/// Checked purely on the name's shape, independent of whether it happens
/// to be registered yet (`define` may run before `register`, e.g. when
/// jobs are defined by a dynamic parent before its sibling modules have
/// had a chance to register).
pub fn validate_name(name: &str) -> Result<()> {
    if looks_unresolvable(name) {
        bail!(ErrorKind::UserError(format!(
            "callable name {:?} cannot be re-resolved across a restart",
            name
        )));
    }
    Ok(())
}
