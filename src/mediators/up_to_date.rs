//! C5: the up-to-date oracle. `CacheQueryDb` mirrors the original's
//! `CacheQueryDB`: a thin wrapper over a `Store` reference with a
//! memoisation table scoped to a single query session — never persisted,
//! since staleness facts can change between sessions.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};

use errors::*;
use model::{CacheState, JobId};
use store::Store;

#[derive(Clone, Debug, PartialEq)]
pub struct Freshness {
    pub fresh: bool,
    pub reason: String,
    pub timestamp: Option<i64>,
}

pub struct CacheQueryDb<'a> {
    store: &'a Store,
    memo: RefCell<HashMap<JobId, Freshness>>,
}

impl<'a> CacheQueryDb<'a> {
    pub fn new(store: &'a Store) -> CacheQueryDb<'a> {
        CacheQueryDb {
            store,
            memo: RefCell::new(HashMap::new()),
        }
    }

    pub fn up_to_date(&self, job_id: &JobId) -> Result<Freshness> {
        if let Some(cached) = self.memo.borrow().get(job_id) {
            return Ok(cached.clone());
        }

        let result = self.compute(job_id)?;
        self.memo.borrow_mut().insert(job_id.clone(), result.clone());
        Ok(result)
    }

    fn compute(&self, job_id: &JobId) -> Result<Freshness> {
        // Rule 1: unknown job.
        let job = ::store::get_job(self.store, job_id.as_str())?
            .ok_or_else(|| ErrorKind::DbError(format!("job {} not found", job_id)))?;
        let cache = ::store::get_cache(self.store, job_id.as_str())?
            .ok_or_else(|| ErrorKind::DbError(format!("cache for {} not found", job_id)))?;

        // Rule 2.
        if cache.state == CacheState::Failed || cache.state == CacheState::Blocked {
            return Ok(Freshness {
                fresh: false,
                reason: "failed".to_owned(),
                timestamp: None,
            });
        }

        // Rule 3.
        if cache.state == CacheState::NotStarted {
            return Ok(Freshness {
                fresh: false,
                reason: "never run".to_owned(),
                timestamp: None,
            });
        }

        // Rule 4: every static child must be fresh.
        for child in &job.children {
            let child_fresh = self.up_to_date(child)?;
            if !child_fresh.fresh {
                return Ok(Freshness {
                    fresh: false,
                    reason: format!("child {} stale", child),
                    timestamp: None,
                });
            }
        }

        // Rule 5: a child's recorded timestamp must still match.
        if let Some(stale) = self.find_changed_child(&cache.hashes_of_children)? {
            return Ok(Freshness {
                fresh: false,
                reason: format!("child {} updated after this job", stale),
                timestamp: None,
            });
        }

        // Rule 6: every dynamic-child-set currently attributed to J.
        for set in job.dynamic_children.values() {
            for child in set {
                let child_fresh = self.up_to_date(child)?;
                if !child_fresh.fresh {
                    return Ok(Freshness {
                        fresh: false,
                        reason: format!("dynamic child {} stale", child),
                        timestamp: None,
                    });
                }
            }
        }

        // Rule 7.
        Ok(Freshness {
            fresh: true,
            reason: "ok".to_owned(),
            timestamp: cache.timestamp,
        })
    }

    fn find_changed_child(&self, hashes: &BTreeMap<JobId, i64>) -> Result<Option<JobId>> {
        for (child, recorded_ts) in hashes {
            let child_cache = ::store::get_cache(self.store, child.as_str())?
                .ok_or_else(|| ErrorKind::DbError(format!("cache for {} not found", child)))?;
            if child_cache.timestamp != Some(*recorded_ts) {
                return Ok(Some(child.clone()));
            }
        }
        Ok(None)
    }
}
