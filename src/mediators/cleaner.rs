//! C9: clean/invalidate, plus the orphan sweep a fresh session runs before
//! accepting new top-level definitions.

use std::collections::BTreeSet;

use slog::Logger;

use errors::*;
use mediators::common;
use model::JobId;
use store::Store;

pub struct Cleaner<'a> {
    pub store: &'a Store,
}

impl<'a> Cleaner<'a> {
    /// `clean(S)`: deletes Cache, UserObject and progress for every job in
    /// `S`, and recursively for every job in each one's definition closure,
    /// severing both the parent `children` edges and the definer `defines`
    /// edge that pointed at it.
    pub fn clean(&self, log: &Logger, selection: &[JobId]) -> Result<()> {
        common::log_timed(&log.new(o!("step" => "clean", "num_roots" => selection.len())), |log| {
            let roots: BTreeSet<JobId> = selection.iter().cloned().collect();
            let closure = ::graph::definition_closure(self.store, &roots)?;
            info!(log, "Cleaning jobs"; "num_jobs" => closure.len());
            for id in &closure {
                self.delete_one(id)?;
            }
            Ok(())
        })
    }

    /// `invalidate(S)`: resets `Cache.state` to `NOT_STARTED` without
    /// touching job records or definitions. Staleness is not written
    /// upward to transitive parents here — the same lazy propagation
    /// `mediators::definer` relies on (C5 rule 4 recursing into this job
    /// once it's no longer `Done`) makes that write redundant.
    pub fn invalidate(&self, log: &Logger, selection: &[JobId]) -> Result<()> {
        common::log_timed(&log.new(o!("step" => "invalidate", "num_jobs" => selection.len())), |_log| {
            for id in selection {
                if let Some(mut cache) = ::store::get_cache(self.store, id.as_str())? {
                    cache.state = ::model::CacheState::NotStarted;
                    ::store::set_cache(self.store, id.as_str(), &cache)?;
                }
            }
            Ok(())
        })
    }

    /// `clean_other_jobs`: run once at the start of a fresh session, after
    /// the user's root-level `comp()` calls have all executed. Any job that
    /// was a top-level definition (`defined_by == ["root"]`) in a previous
    /// session but wasn't re-registered this time is swept, along with its
    /// own definition closure — the same full removal `clean` performs,
    /// since a no-longer-registered root job's descendants can never be
    /// reached by anything still registered.
    pub fn clean_other_jobs(&self, log: &Logger, registered_this_session: &BTreeSet<JobId>) -> Result<()> {
        common::log_timed(&log.new(o!("step" => "clean_other_jobs")), |log| {
            let root = vec![JobId::new("root")];
            let mut orphans = BTreeSet::new();
            for id_str in ::store::all_job_ids(self.store)? {
                let id = JobId::new(id_str);
                if let Some(job) = ::store::get_job(self.store, id.as_str())? {
                    if job.defined_by == root && !registered_this_session.contains(&id) {
                        orphans.insert(id);
                    }
                }
            }
            if orphans.is_empty() {
                return Ok(());
            }
            let closure = ::graph::definition_closure(self.store, &orphans)?;
            info!(log, "Sweeping orphaned root jobs"; "num_roots" => orphans.len(), "num_jobs" => closure.len());
            for id in &closure {
                self.delete_one(id)?;
            }
            Ok(())
        })
    }

    fn delete_one(&self, id: &JobId) -> Result<()> {
        if let Some(job) = ::store::get_job(self.store, id.as_str())? {
            for parent in &job.parents {
                ::graph::remove_child_edge(self.store, parent, id)?;
            }
            for dynamic_parent in &job.dynamic_parents {
                ::graph::remove_dynamic_child_edge(self.store, dynamic_parent, id)?;
            }
            if let Some(definer) = job.defined_by.last() {
                ::graph::remove_defines_edge(self.store, definer, id)?;
            }
        }
        ::store::delete_cache(self.store, id.as_str())?;
        ::store::delete_user_object(self.store, id.as_str())?;
        ::store::delete_progress(self.store, id.as_str())?;
        ::store::delete_job(self.store, id.as_str())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mediators::definer::Definer;
    use model::{ArgTree, CacheState};
    use std::collections::BTreeMap;
    use store::SledStore;
    use tempfile::TempDir;
    use Config;

    fn store() -> (TempDir, SledStore) {
        let dir = TempDir::new().unwrap();
        let store = SledStore::open(dir.path()).unwrap();
        (dir, store)
    }

    fn define(store: &Store, config: &Config, id: &str, defined_by: Vec<JobId>) {
        Definer {
            store,
            config,
            job_id: JobId::new(id),
            callable_ref: "demo::no_op".to_owned(),
            args: vec![ArgTree::Null],
            kwargs: BTreeMap::new(),
            defined_by,
            needs_context: false,
            is_dynamic: false,
            check_params: true,
        }.run(&::slog::Logger::root(::slog::Discard, o!()))
        .unwrap();
    }

    #[test]
    fn test_clean_removes_job_and_cache() {
        let (_dir, store) = store();
        let config = Config::default();
        define(&store, &config, "a", vec![JobId::new("root")]);

        let cleaner = Cleaner { store: &store };
        cleaner
            .clean(&::slog::Logger::root(::slog::Discard, o!()), &[JobId::new("a")])
            .unwrap();

        assert!(::store::get_job(&store, "a").unwrap().is_none());
        assert!(::store::get_cache(&store, "a").unwrap().is_none());
    }

    #[test]
    fn test_invalidate_preserves_job_record() {
        let (_dir, store) = store();
        let config = Config::default();
        define(&store, &config, "a", vec![JobId::new("root")]);

        let mut cache = ::store::get_cache(&store, "a").unwrap().unwrap();
        cache.state = CacheState::Done;
        ::store::set_cache(&store, "a", &cache).unwrap();

        let cleaner = Cleaner { store: &store };
        cleaner
            .invalidate(&::slog::Logger::root(::slog::Discard, o!()), &[JobId::new("a")])
            .unwrap();

        assert!(::store::get_job(&store, "a").unwrap().is_some());
        assert_eq!(
            ::store::get_cache(&store, "a").unwrap().unwrap().state,
            CacheState::NotStarted
        );
    }

    #[test]
    fn test_clean_other_jobs_sweeps_unregistered_roots() {
        let (_dir, store) = store();
        let config = Config::default();
        define(&store, &config, "kept", vec![JobId::new("root")]);
        define(&store, &config, "stale", vec![JobId::new("root")]);

        let mut registered = BTreeSet::new();
        registered.insert(JobId::new("kept"));

        let cleaner = Cleaner { store: &store };
        cleaner
            .clean_other_jobs(&::slog::Logger::root(::slog::Discard, o!()), &registered)
            .unwrap();

        assert!(::store::get_job(&store, "kept").unwrap().is_some());
        assert!(::store::get_job(&store, "stale").unwrap().is_none());
    }
}
