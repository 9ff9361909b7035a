//! C1: a typed, namespaced persistent map of records keyed by job id.
//!
//! The four namespaces spec.md §4.1 requires (`job`, `cache`, `userobject`,
//! `progress`) are kept as separate `sled::Tree`s rather than as a single
//! tree with a `"namespace:"` byte prefix glued onto every key: sled trees
//! already give each namespace its own ordered keyspace and its own
//! iterator, which is exactly the "Keys are strings formed from `namespace
//! + ':' + job_id`" requirement, just without hand-rolling the split back
//! out of every key on read.

use std::path::Path;

use lz4;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json;
use sled;

use errors::*;
use model::{Cache, Job, JobProgress, UserObject};
use selection::wildcard_to_regexp;

const NS_JOB: &str = "job";
const NS_CACHE: &str = "cache";
const NS_USEROBJECT: &str = "userobject";
const NS_PROGRESS: &str = "progress";

/// The key/value abstraction the rest of the core is written against.
/// `SledStore` is the only production implementation, but keeping this as
/// a trait (rather than hard-wiring `sled::Db` everywhere) is what lets
/// `test_helpers` swap in a fresh store per test without touching disk
/// layout concerns, and is explicitly the boundary spec.md §1 calls out as
/// "the core requires a key/value map abstraction" over a backend whose
/// byte layout is someone else's concern.
pub trait Store: Send + Sync {
    fn has(&self, namespace: &str, job_id: &str) -> Result<bool>;
    fn get_raw(&self, namespace: &str, job_id: &str) -> Result<Option<Vec<u8>>>;
    fn set_raw(&self, namespace: &str, job_id: &str, value: Vec<u8>) -> Result<()>;
    fn delete(&self, namespace: &str, job_id: &str) -> Result<()>;
    /// Every job id current present in `namespace` whose id matches the
    /// given shell-glob `pattern` (`*` = any chars). `"*"` returns every
    /// key in the namespace.
    fn keys(&self, namespace: &str, pattern: &str) -> Result<Vec<String>>;
    fn flush(&self) -> Result<()>;
}

pub struct SledStore {
    db: sled::Db,
}

impl SledStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<SledStore> {
        let db = sled::open(path)
            .map_err(|e| ErrorKind::DbError(format!("could not open store: {}", e)))?;
        Ok(SledStore { db })
    }

    fn tree(&self, namespace: &str) -> Result<sled::Tree> {
        self.db
            .open_tree(namespace.as_bytes())
            .map_err(|e| ErrorKind::DbError(format!("could not open tree {}: {}", namespace, e)).into())
    }
}

impl Store for SledStore {
    fn has(&self, namespace: &str, job_id: &str) -> Result<bool> {
        let tree = self.tree(namespace)?;
        Ok(tree.contains_key(job_id.as_bytes())?)
    }

    fn get_raw(&self, namespace: &str, job_id: &str) -> Result<Option<Vec<u8>>> {
        let tree = self.tree(namespace)?;
        Ok(tree.get(job_id.as_bytes())?.map(|v| v.to_vec()))
    }

    fn set_raw(&self, namespace: &str, job_id: &str, value: Vec<u8>) -> Result<()> {
        let tree = self.tree(namespace)?;
        tree.insert(job_id.as_bytes(), value)?;
        Ok(())
    }

    fn delete(&self, namespace: &str, job_id: &str) -> Result<()> {
        let tree = self.tree(namespace)?;
        tree.remove(job_id.as_bytes())?;
        Ok(())
    }

    fn keys(&self, namespace: &str, pattern: &str) -> Result<Vec<String>> {
        let tree = self.tree(namespace)?;
        let regexp = wildcard_to_regexp(pattern);
        let mut out = Vec::new();
        for kv in tree.iter() {
            let (k, _v) = kv?;
            if let Ok(key) = String::from_utf8(k.to_vec()) {
                if regexp.is_match(&key) {
                    out.push(key);
                }
            }
        }
        Ok(out)
    }

    fn flush(&self) -> Result<()> {
        self.db.flush().map_err(|e| ErrorKind::DbError(format!("flush failed: {}", e)))?;
        Ok(())
    }
}

//
// Typed helpers. Everything above the `Store` trait talks to the store
// through these rather than through raw bytes.
//

fn get_json<T: DeserializeOwned>(store: &Store, namespace: &str, job_id: &str) -> Result<Option<T>> {
    match store.get_raw(namespace, job_id)? {
        Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        None => Ok(None),
    }
}

fn set_json<T: Serialize>(store: &Store, namespace: &str, job_id: &str, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec(value)?;
    store.set_raw(namespace, job_id, bytes)
}

pub fn get_job(store: &Store, job_id: &str) -> Result<Option<Job>> {
    get_json(store, NS_JOB, job_id)
}

pub fn set_job(store: &Store, job: &Job) -> Result<()> {
    set_json(store, NS_JOB, &job.job_id.0, job)
}

pub fn delete_job(store: &Store, job_id: &str) -> Result<()> {
    store.delete(NS_JOB, job_id)
}

pub fn get_cache(store: &Store, job_id: &str) -> Result<Option<Cache>> {
    get_json(store, NS_CACHE, job_id)
}

pub fn set_cache(store: &Store, job_id: &str, cache: &Cache) -> Result<()> {
    set_json(store, NS_CACHE, job_id, cache)
}

pub fn delete_cache(store: &Store, job_id: &str) -> Result<()> {
    store.delete(NS_CACHE, job_id)
}

/// UserObjects are compressed before they hit the store: unlike `Job` and
/// `Cache`, which are small fixed-shape records, a `UserObject` can be an
/// arbitrarily large user value, so the original's
/// `StorageFilesystem(..., compress=True)` choice is carried over here via
/// `lz4` rather than dropped for simplicity.
pub fn get_user_object(store: &Store, job_id: &str) -> Result<Option<UserObject>> {
    match store.get_raw(NS_USEROBJECT, job_id)? {
        Some(bytes) => {
            let decompressed = lz4::block::decompress(&bytes, None)
                .map_err(|e| ErrorKind::DbError(format!("corrupt userobject for {}: {}", job_id, e)))?;
            Ok(Some(serde_json::from_slice(&decompressed)?))
        }
        None => Ok(None),
    }
}

pub fn set_user_object(store: &Store, obj: &UserObject) -> Result<()> {
    let json = serde_json::to_vec(obj)?;
    let compressed = lz4::block::compress(&json, None, false)
        .map_err(|e| ErrorKind::DbError(format!("could not compress userobject: {}", e)))?;
    store.set_raw(NS_USEROBJECT, &obj.job_id.0, compressed)
}

pub fn delete_user_object(store: &Store, job_id: &str) -> Result<()> {
    store.delete(NS_USEROBJECT, job_id)
}

pub fn get_progress(store: &Store, job_id: &str) -> Result<Option<JobProgress>> {
    get_json(store, NS_PROGRESS, job_id)
}

pub fn set_progress(store: &Store, job_id: &str, progress: &JobProgress) -> Result<()> {
    set_json(store, NS_PROGRESS, job_id, progress)
}

pub fn delete_progress(store: &Store, job_id: &str) -> Result<()> {
    store.delete(NS_PROGRESS, job_id)
}

pub fn all_job_ids(store: &Store) -> Result<Vec<String>> {
    store.keys(NS_JOB, "*")
}

#[cfg(test)]
mod tests {
    use super::*;
    use model::{CallableRef, JobId};
    use std::collections::{BTreeMap, BTreeSet};
    use tempfile::TempDir;

    fn store() -> (TempDir, SledStore) {
        let dir = TempDir::new().unwrap();
        let store = SledStore::open(dir.path()).unwrap();
        (dir, store)
    }

    fn sample_job(id: &str) -> Job {
        Job {
            job_id: JobId::new(id),
            callable_ref: CallableRef("demo::no_op".to_owned()),
            args: vec![],
            kwargs: BTreeMap::new(),
            children: BTreeSet::new(),
            dynamic_children: BTreeMap::new(),
            defined_by: vec![JobId::new("root")],
            parents: BTreeSet::new(),
            dynamic_parents: BTreeSet::new(),
            defines: BTreeSet::new(),
            needs_context: false,
            is_dynamic: false,
            definition_timestamp: 0,
        }
    }

    #[test]
    fn test_job_roundtrip() {
        let (_dir, store) = store();
        assert!(!store.has(NS_JOB, "a").unwrap());

        let job = sample_job("a");
        set_job(&store, &job).unwrap();
        assert!(store.has(NS_JOB, "a").unwrap());

        let loaded = get_job(&store, "a").unwrap().unwrap();
        assert_eq!(loaded.job_id, job.job_id);

        delete_job(&store, "a").unwrap();
        assert!(!store.has(NS_JOB, "a").unwrap());
    }

    #[test]
    fn test_keys_glob() {
        let (_dir, store) = store();
        set_job(&store, &sample_job("key1")).unwrap();
        set_job(&store, &sample_job("key2")).unwrap();
        set_job(&store, &sample_job("other")).unwrap();

        let mut matched = store.keys(NS_JOB, "key*").unwrap();
        matched.sort();
        assert_eq!(matched, vec!["key1".to_owned(), "key2".to_owned()]);

        assert_eq!(store.keys(NS_JOB, "nope*").unwrap(), Vec::<String>::new());
    }

    #[test]
    fn test_user_object_roundtrip() {
        use model::ArgTree;

        let (_dir, store) = store();
        let obj = UserObject {
            job_id: JobId::new("a"),
            value: ArgTree::string("result value"),
            created_at: ::chrono::Utc::now(),
        };
        set_user_object(&store, &obj).unwrap();
        let loaded = get_user_object(&store, "a").unwrap().unwrap();
        assert_eq!(loaded.value, obj.value);
    }
}
