//! The commit map of one repository, with parent-chain navigation.
//!
//! Commits live in an arena (`Vec` slot per commit, stable index) with a
//! hash-to-index map on the side. Parent links are resolved through the map,
//! so there are no pointers between commits and nothing to keep alive.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

use serde::de::Deserializer;
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

use crate::graph::commit::Commit;
use crate::graph::error::{GraphError, GraphResult, ObjectKind};
use crate::graph::types::CommitId;

/// Commit storage for a single repository.
#[derive(Clone)]
pub struct CommitStore {
    slots: Vec<Option<Commit>>,
    index: HashMap<CommitId, usize>,
    /// vacated slots, reused on insert
    free: Vec<usize>,
    walk_limit: usize,
}

impl CommitStore {
    /// walk cap used when none is configured
    pub const DEFAULT_WALK_LIMIT: usize = 100_000;

    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            index: HashMap::new(),
            free: Vec::new(),
            walk_limit: Self::DEFAULT_WALK_LIMIT,
        }
    }

    /// set the maximum number of commits a single history walk may visit
    pub fn with_walk_limit(mut self, limit: usize) -> Self {
        self.set_walk_limit(limit);
        self
    }

    pub fn set_walk_limit(&mut self, limit: usize) {
        self.walk_limit = limit.max(1);
    }

    pub fn walk_limit(&self) -> usize {
        self.walk_limit
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn contains(&self, id: &CommitId) -> bool {
        self.index.contains_key(id)
    }

    /// look a commit up, returning None when absent
    pub fn find(&self, id: &CommitId) -> Option<&Commit> {
        self.index
            .get(id)
            .and_then(|&slot| self.slots[slot].as_ref())
    }

    /// look a commit up, failing with NotFound when absent
    pub fn get(&self, id: &CommitId) -> GraphResult<&Commit> {
        self.find(id)
            .ok_or_else(|| GraphError::not_found(ObjectKind::Commit, id))
    }

    /// iterate over all commits in no particular order
    pub fn iter(&self) -> impl Iterator<Item = &Commit> {
        self.slots.iter().filter_map(Option::as_ref)
    }

    /// insert a commit
    ///
    /// Returns `Ok(true)` when the commit was added and `Ok(false)` when an
    /// identical commit was already present. A different commit under the same
    /// id is rejected; existing commits are never overwritten.
    pub fn put(&mut self, commit: Commit) -> GraphResult<bool> {
        if let Some(existing) = self.find(commit.id()) {
            if existing == &commit {
                return Ok(false);
            }
            return Err(GraphError::CommitCollision(commit.id().clone()));
        }

        let id = commit.id().clone();
        let slot = match self.free.pop() {
            Some(slot) => {
                self.slots[slot] = Some(commit);
                slot
            }
            None => {
                self.slots.push(Some(commit));
                self.slots.len() - 1
            }
        };
        self.index.insert(id, slot);
        Ok(true)
    }

    /// walk the parent chain from `head`, newest first
    pub fn history(&self, head: &CommitId) -> History<'_> {
        History {
            store: self,
            head: head.clone(),
            next: Some(head.clone()),
            child: None,
            steps: 0,
            done: false,
        }
    }

    /// the full ancestor chain of `head` (including `head`), newest first
    pub fn ancestors(&self, head: &CommitId) -> GraphResult<Vec<&Commit>> {
        self.history(head).collect()
    }

    /// ids of every commit reachable from `head`
    pub fn ancestor_ids(&self, head: &CommitId) -> GraphResult<HashSet<CommitId>> {
        self.history(head)
            .map(|c| c.map(|c| c.id().clone()))
            .collect()
    }

    /// number of commits in the chain ending at `head`
    pub fn count(&self, head: &CommitId) -> GraphResult<usize> {
        let mut n = 0;
        for commit in self.history(head) {
            commit?;
            n += 1;
        }
        Ok(n)
    }

    /// remove commits by id, returning how many were present
    ///
    /// The caller guarantees no remaining branch head can reach them.
    pub fn prune<'a>(&mut self, ids: impl IntoIterator<Item = &'a CommitId>) -> usize {
        let mut removed = 0;
        for id in ids {
            if let Some(slot) = self.index.remove(id) {
                self.slots[slot] = None;
                self.free.push(slot);
                removed += 1;
            }
        }
        removed
    }

    /// ids of commits whose stored id doesn't match their content
    pub fn verify_ids(&self) -> Vec<CommitId> {
        let mut bad: Vec<CommitId> = self
            .iter()
            .filter(|c| !c.verify_id())
            .map(|c| c.id().clone())
            .collect();
        bad.sort();
        bad
    }
}

impl Default for CommitStore {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CommitStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommitStore")
            .field("commits", &self.len())
            .field("walk_limit", &self.walk_limit)
            .finish()
    }
}

impl PartialEq for CommitStore {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().all(|c| other.find(c.id()) == Some(c))
    }
}

impl Eq for CommitStore {}

// persisted as a plain `id -> commit` map, sorted for stable output
impl Serialize for CommitStore {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut commits: Vec<&Commit> = self.iter().collect();
        commits.sort_by(|a, b| a.id().cmp(b.id()));
        serializer.collect_map(commits.into_iter().map(|c| (c.id(), c)))
    }
}

impl<'de> Deserialize<'de> for CommitStore {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let map = BTreeMap::<CommitId, Commit>::deserialize(deserializer)?;
        let mut store = CommitStore::new();
        for (key, commit) in map {
            if &key != commit.id() {
                return Err(serde::de::Error::custom(format!(
                    "commit map key {} doesn't match commit id {}",
                    key,
                    commit.id()
                )));
            }
            store.put(commit).map_err(serde::de::Error::custom)?;
        }
        Ok(store)
    }
}

/// iterator over a commit's ancestors, newest first
///
/// Yields an error and stops if a parent is missing from the store or the
/// walk exceeds the store's limit.
pub struct History<'a> {
    store: &'a CommitStore,
    head: CommitId,
    next: Option<CommitId>,
    child: Option<CommitId>,
    steps: usize,
    done: bool,
}

impl<'a> Iterator for History<'a> {
    type Item = GraphResult<&'a Commit>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let id = self.next.take()?;

        if self.steps >= self.store.walk_limit {
            self.done = true;
            tracing::error!(
                head = %self.head,
                limit = self.store.walk_limit,
                "commit history walk exceeded limit, history may be cyclic"
            );
            return Some(Err(GraphError::HistoryTooDeep {
                head: self.head.clone(),
                limit: self.store.walk_limit,
            }));
        }

        let commit = match self.store.find(&id) {
            Some(c) => c,
            None => {
                self.done = true;
                let commit = self
                    .child
                    .as_ref()
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "(reference head)".to_string());
                tracing::error!(
                    head = %self.head,
                    commit = %commit,
                    missing_parent = %id,
                    "broken commit history encountered"
                );
                return Some(Err(GraphError::BrokenHistory {
                    commit,
                    missing_parent: id.to_string(),
                }));
            }
        };

        self.steps += 1;
        self.child = Some(id);
        self.next = commit.parent().cloned();
        Some(Ok(commit))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::graph::commit::CommitBuilder;
    use crate::graph::tree::{Tree, TreeEntry};
    use crate::graph::types::Signature;
    use chrono::{Duration, TimeZone, Utc};

    /// build a commit with a distinct timestamp per `seq`
    pub(crate) fn make_commit(parent: Option<&CommitId>, seq: i64, message: &str) -> Commit {
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::minutes(seq);
        let tree = Tree::new(vec![TreeEntry::database(
            "test.sqlite",
            format!("{:064x}", seq),
            100 + seq as u64,
            ts,
            "",
        )]);
        CommitBuilder::new()
            .tree(tree)
            .parent_opt(parent.cloned())
            .author(Signature::new("Tester", "tester@example.org"))
            .timestamp(ts)
            .message(message)
            .build()
            .unwrap()
    }

    fn chain(n: i64) -> (CommitStore, Vec<CommitId>) {
        let mut store = CommitStore::new();
        let mut ids: Vec<CommitId> = Vec::new();
        for i in 0..n {
            let c = make_commit(ids.last(), i, &format!("c{}", i + 1));
            ids.push(c.id().clone());
            store.put(c).unwrap();
        }
        (store, ids)
    }

    #[test]
    fn test_put_and_get() {
        let (store, ids) = chain(2);
        assert_eq!(store.len(), 2);
        assert_eq!(store.get(&ids[1]).unwrap().parent(), Some(&ids[0]));

        let unknown = CommitId::from_hex(&"ee".repeat(32)).unwrap();
        assert!(store.get(&unknown).unwrap_err().is_not_found());
    }

    #[test]
    fn test_put_is_idempotent_for_identical_commits() {
        let (mut store, ids) = chain(1);
        let again = store.get(&ids[0]).unwrap().clone();
        assert!(!store.put(again).unwrap());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_put_rejects_different_content_under_same_id() {
        let (mut store, ids) = chain(1);
        let imposter = make_commit(None, 99, "imposter");
        let mut json = serde_json::to_value(&imposter).unwrap();
        json["id"] = serde_json::json!(ids[0].as_str());
        let imposter: Commit = serde_json::from_value(json).unwrap();

        let err = store.put(imposter).unwrap_err();
        assert!(matches!(err, GraphError::CommitCollision(_)));
        assert!(store.get(&ids[0]).unwrap().verify_id());
    }

    #[test]
    fn test_ancestors_newest_first() {
        let (store, ids) = chain(3);
        let walked: Vec<&CommitId> = store
            .ancestors(&ids[2])
            .unwrap()
            .into_iter()
            .map(|c| c.id())
            .collect();
        assert_eq!(walked, vec![&ids[2], &ids[1], &ids[0]]);
        assert_eq!(store.count(&ids[2]).unwrap(), 3);
        assert_eq!(store.count(&ids[0]).unwrap(), 1);
    }

    #[test]
    fn test_missing_parent_is_fatal() {
        let (mut store, ids) = chain(3);
        store.prune([&ids[1]]);

        let err = store.ancestors(&ids[2]).unwrap_err();
        assert!(err.is_fatal());
        match err {
            GraphError::BrokenHistory { commit, missing_parent } => {
                assert_eq!(commit, ids[2].to_string());
                assert_eq!(missing_parent, ids[1].to_string());
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_walk_limit() {
        let (store, ids) = chain(5);
        let store = store.with_walk_limit(3);
        let err = store.ancestors(&ids[4]).unwrap_err();
        assert!(matches!(err, GraphError::HistoryTooDeep { limit: 3, .. }));
        assert_eq!(store.count(&ids[2]).unwrap(), 3);
    }

    #[test]
    fn test_prune_reuses_slots() {
        let (mut store, ids) = chain(3);
        assert_eq!(store.prune([&ids[2], &ids[2]]), 1);
        assert_eq!(store.len(), 2);
        assert!(!store.contains(&ids[2]));

        let replacement = make_commit(Some(&ids[1]), 10, "c3'");
        let new_id = replacement.id().clone();
        store.put(replacement).unwrap();
        assert_eq!(store.slots.len(), 3);
        assert_eq!(store.count(&new_id).unwrap(), 3);
    }

    #[test]
    fn test_serde_as_map() {
        let (store, ids) = chain(2);
        let json = serde_json::to_value(&store).unwrap();
        assert!(json.get(ids[0].as_str()).is_some());
        assert!(json.get(ids[1].as_str()).is_some());

        let back: CommitStore = serde_json::from_value(json).unwrap();
        assert_eq!(back, store);
        assert!(back.verify_ids().is_empty());
    }

    #[test]
    fn test_deserialize_rejects_mismatched_key() {
        let (store, ids) = chain(2);
        let mut json = serde_json::to_value(&store).unwrap();
        let map = json.as_object_mut().unwrap();
        let moved = map.remove(ids[0].as_str()).unwrap();
        map.insert("ff".repeat(32), moved);

        let result: Result<CommitStore, _> = serde_json::from_value(json);
        assert!(result.is_err());
    }
}
