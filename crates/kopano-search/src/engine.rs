//! Search Folder Engine (C5, §4.4): a process-wide map of per-store,
//! per-folder search state, a single background worker draining a
//! process-wide event queue, and the `ProcessMessageChange`/`Search`
//! algorithms that keep each search folder's materialised result set in
//! sync with the store.
//!
//! Grounded on `ECSearchFolders` (`provider/libserver/ECSearchFolders.cpp`):
//! one worker thread per process, one populating thread per search folder
//! being rebuilt, a mutex+condvar event queue, and the same
//! batch-then-group-then-dedup event processing shape as
//! `ECSearchFolders::ProcessThread`.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use kopano_core::proptag::well_known::PR_MESSAGE_FLAGS;
use kopano_core::{Error, Event, EventOp, FolderId, ObjectId, PropertyValue, Result, StoreId};
use kopano_store::Store;

use crate::normalizer::normalize_restriction;
use crate::row_engine::{self, query_rows};

/// Lifecycle states for one search folder, per the state machine in §4.4.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchFolderState {
    Stopped,
    Rebuilding,
    Running,
}

/// A search folder's criteria: scope plus the condition messages must
/// satisfy to appear in its result set.
#[derive(Debug, Clone)]
pub struct SearchCriteria {
    pub scope_folders: Vec<FolderId>,
    pub recursive: bool,
    pub restriction: kopano_core::Restriction,
}

/// In-memory state for one search folder: criteria, materialised result
/// set, and the counts search clients read from `PR_CONTENT_COUNT`/
/// `PR_CONTENT_UNREAD`.
pub struct SearchFolder {
    pub criteria: SearchCriteria,
    pub state: SearchFolderState,
    pub results: Vec<ObjectId>,
    pub content_count: u32,
    pub unread_count: u32,
    /// Object ids currently counted in `unread_count`, so a later
    /// flags-only update can tell whether a row's read bit actually
    /// flipped instead of re-deriving the whole count from scratch.
    unread_rows: HashSet<ObjectId>,
}

impl SearchFolder {
    fn new(criteria: SearchCriteria) -> Self {
        Self {
            criteria,
            state: SearchFolderState::Stopped,
            results: Vec::new(),
            content_count: 0,
            unread_count: 0,
            unread_rows: HashSet::new(),
        }
    }

    fn contains(&self, object_id: ObjectId) -> bool {
        self.results.contains(&object_id)
    }
}

/// Process-wide search engine state: one entry per (store, folder) with
/// an active search folder, plus the shared event queue the worker
/// drains.
pub struct SearchEngine {
    folders: Mutex<HashMap<StoreId, HashMap<FolderId, SearchFolder>>>,
    queue: Mutex<VecDeque<Event>>,
    queue_cv: Condvar,
    shutdown: Mutex<bool>,
    /// Pause between batches (§4.4 step 2: "release the mutex, then
    /// sleep 1s between batches"); overridable so tests don't pay the
    /// real delay.
    batch_sleep: Duration,
}

impl Default for SearchEngine {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

const MAX_BATCH: usize = 500;
const POPULATE_BATCH: usize = 200;
const FALLBACK_SCAN_BATCH: usize = 20;

impl SearchEngine {
    #[must_use]
    pub fn new(batch_sleep: Duration) -> Self {
        Self {
            folders: Mutex::new(HashMap::new()),
            queue: Mutex::new(VecDeque::new()),
            queue_cv: Condvar::new(),
            shutdown: Mutex::new(false),
            batch_sleep,
        }
    }

    /// Sets (or replaces) a search folder's criteria; transitions it to
    /// `Rebuilding` so a subsequent `search` call repopulates it (§4.4:
    /// "stopped → (SetSearchCriteria) → rebuilding").
    pub fn set_search_criteria(&self, store_id: StoreId, folder_id: FolderId, criteria: SearchCriteria) {
        let mut folders = self.folders.lock().expect("search map poisoned");
        let entry = folders.entry(store_id).or_default();
        let folder = entry.entry(folder_id).or_insert_with(|| SearchFolder::new(criteria.clone()));
        folder.criteria = criteria;
        folder.state = SearchFolderState::Rebuilding;
    }

    /// Sets a per-folder exit flag and removes the folder from the map,
    /// matching `CancelSearchFolder` + `RemoveSearchFolder`'s "cancel +
    /// result-table wipe" (§4.4). There is no background populate
    /// thread to join at this scope, so cancellation is immediate.
    pub fn remove_search_folder(&self, store_id: &StoreId, folder_id: FolderId) {
        let mut folders = self.folders.lock().expect("search map poisoned");
        if let Some(per_store) = folders.get_mut(store_id) {
            per_store.remove(&folder_id);
        }
    }

    pub fn state(&self, store_id: &StoreId, folder_id: FolderId) -> Option<SearchFolderState> {
        self.folders.lock().expect("search map poisoned").get(store_id)?.get(&folder_id).map(|f| f.state)
    }

    pub fn counts(&self, store_id: &StoreId, folder_id: FolderId) -> Option<(u32, u32)> {
        self.folders
            .lock()
            .expect("search map poisoned")
            .get(store_id)?
            .get(&folder_id)
            .map(|f| (f.content_count, f.unread_count))
    }

    pub fn results(&self, store_id: &StoreId, folder_id: FolderId) -> Vec<ObjectId> {
        self.folders
            .lock()
            .expect("search map poisoned")
            .get(store_id)
            .and_then(|per_store| per_store.get(&folder_id))
            .map(|f| f.results.clone())
            .unwrap_or_default()
    }

    /// Appends an event to the process-wide queue and wakes the worker.
    pub fn enqueue(&self, event: Event) {
        self.queue.lock().expect("event queue poisoned").push_back(event);
        self.queue_cv.notify_one();
    }

    pub fn request_shutdown(&self) {
        *self.shutdown.lock().expect("shutdown flag poisoned") = true;
        self.queue_cv.notify_all();
    }

    /// Drains up to [`MAX_BATCH`] events, blocking on the condvar until
    /// the queue is non-empty or shutdown is requested (§4.4 step 1-2).
    /// Returns `None` once shutdown with an empty queue.
    fn drain_batch(&self) -> Option<Vec<Event>> {
        let mut queue = self.queue.lock().expect("event queue poisoned");
        loop {
            if !queue.is_empty() {
                let n = queue.len().min(MAX_BATCH);
                return Some(queue.drain(..n).collect());
            }
            if *self.shutdown.lock().expect("shutdown flag poisoned") {
                return None;
            }
            queue = self.queue_cv.wait(queue).expect("condvar wait poisoned");
        }
    }

    /// Initial population of a search folder (§4.4 `Search`): walks the
    /// scope (expanded to descendants when recursive) and evaluates the
    /// restriction against every contained message, either via the
    /// indexer-accelerated path (when `normalize_restriction` succeeds)
    /// or a descending-creation-order table scan fallback.
    pub fn search(&self, store: &dyn Store, store_id: &StoreId, folder_id: FolderId) -> Result<()> {
        let (scope, restriction) = {
            let folders = self.folders.lock().expect("search map poisoned");
            let folder = folders
                .get(store_id)
                .and_then(|per_store| per_store.get(&folder_id))
                .ok_or_else(|| Error::FolderNotFound(folder_id.to_string()))?;
            (expand_scope(store, &folder.criteria)?, folder.criteria.restriction.clone())
        };

        // Whether C4 considers the restriction indexer-friendly only
        // changes which batch size/notification cadence we use; the
        // indexer call itself is an external collaborator (§1 Non-goals).
        let indexable = normalize_restriction(&restriction, &std::collections::BTreeSet::new()).is_ok();
        let batch_size = if indexable { POPULATE_BATCH } else { FALLBACK_SCAN_BATCH };

        let mut matched = Vec::new();
        let mut unread_rows = HashSet::new();
        for scope_folder_id in scope {
            let folder = store.open_folder(scope_folder_id)?;
            let mut contents = folder.contents()?;
            contents.reverse(); // descending creation order, per §4.4 fallback mode
            for chunk in contents.chunks(batch_size) {
                let rows = query_rows(folder.as_ref(), chunk, &[])?;
                for row in rows {
                    let message = folder.open_message(row.object_id)?;
                    let props = message.get_props(&[])?;
                    if restriction.matches(&props) {
                        matched.push(row.object_id);
                        let is_read =
                            props.get(PR_MESSAGE_FLAGS).and_then(PropertyValue::as_bool).unwrap_or(false);
                        if !is_read {
                            unread_rows.insert(row.object_id);
                        }
                    }
                }
            }
        }

        let mut folders = self.folders.lock().expect("search map poisoned");
        let folder = folders
            .get_mut(store_id)
            .and_then(|per_store| per_store.get_mut(&folder_id))
            .ok_or_else(|| Error::FolderNotFound(folder_id.to_string()))?;
        folder.content_count = matched.len() as u32;
        folder.unread_count = unread_rows.len() as u32;
        folder.results = matched;
        folder.unread_rows = unread_rows;
        folder.state = SearchFolderState::Running;
        Ok(())
    }

    /// Applies one group of same-folder, same-op events to every search
    /// folder registered for `store_id` (§4.4 `ProcessMessageChange`).
    pub fn process_message_change(
        &self,
        store: &dyn Store,
        store_id: &StoreId,
        folder_id: FolderId,
        object_ids: &[ObjectId],
        op: EventOp,
    ) -> Result<()> {
        let target_folders: Vec<FolderId> = {
            let folders = self.folders.lock().expect("search map poisoned");
            let Some(per_store) = folders.get(store_id) else { return Ok(()) };
            per_store.keys().copied().collect()
        };

        for search_folder_id in target_folders {
            let in_scope = op != EventOp::Delete
                && {
                    let folders = self.folders.lock().expect("search map poisoned");
                    let criteria = &folders[store_id][&search_folder_id].criteria;
                    folder_in_scope(store, criteria, folder_id)
                };

            // Deletes always fall into the "not-in-scope" branch for
            // scope computation (§4.4), but still need evaluating so an
            // already-present row gets removed.
            if !in_scope && op != EventOp::Delete {
                continue;
            }

            for &object_id in object_ids {
                self.apply_one(store, store_id, search_folder_id, folder_id, object_id, op, in_scope)?;
            }
        }
        Ok(())
    }

    fn apply_one(
        &self,
        store: &dyn Store,
        store_id: &StoreId,
        search_folder_id: FolderId,
        source_folder_id: FolderId,
        object_id: ObjectId,
        op: EventOp,
        in_scope: bool,
    ) -> Result<()> {
        if op == EventOp::Delete || !in_scope {
            return with_row_lock(search_folder_id, || {
                let mut folders = self.folders.lock().expect("search map poisoned");
                let folder = folders.get_mut(store_id).and_then(|m| m.get_mut(&search_folder_id));
                if let Some(folder) = folder {
                    remove_result(folder, object_id);
                }
                Ok(())
            });
        }

        let restriction = {
            let folders = self.folders.lock().expect("search map poisoned");
            folders[store_id][&search_folder_id].criteria.restriction.clone()
        };
        let source_folder = store.open_folder(source_folder_id)?;
        let message = source_folder.open_message(object_id)?;
        let props = message.get_props(&[])?;
        let matches = restriction.matches(&props);
        let is_unread = !props.get(PR_MESSAGE_FLAGS).and_then(PropertyValue::as_bool).unwrap_or(false);

        with_row_lock(search_folder_id, || {
            let mut folders = self.folders.lock().expect("search map poisoned");
            let folder = folders
                .get_mut(store_id)
                .and_then(|m| m.get_mut(&search_folder_id))
                .ok_or_else(|| Error::FolderNotFound(search_folder_id.to_string()))?;

            let was_present = folder.contains(object_id);
            match (matches, was_present, op) {
                (true, false, _) => {
                    folder.results.push(object_id);
                    folder.content_count += 1;
                    if is_unread {
                        folder.unread_count += 1;
                        folder.unread_rows.insert(object_id);
                    }
                }
                (true, true, _) => {
                    let was_unread = folder.unread_rows.contains(&object_id);
                    if is_unread && !was_unread {
                        folder.unread_count += 1;
                        folder.unread_rows.insert(object_id);
                    } else if !is_unread && was_unread {
                        folder.unread_count = folder.unread_count.saturating_sub(1);
                        folder.unread_rows.remove(&object_id);
                    }
                }
                (false, true, EventOp::Modify) => {
                    remove_result(folder, object_id);
                }
                _ => {}
            }
            Ok(())
        })
    }

    /// Runs the worker loop until shutdown is requested: wait → drain →
    /// sleep → sort → group → dedup → dispatch (§4.4 steps 1-5).
    pub fn run_worker(&self, store_for: impl Fn(&StoreId) -> Option<Arc<dyn Store>>) {
        loop {
            let Some(mut batch) = self.drain_batch() else { return };
            if !self.batch_sleep.is_zero() {
                std::thread::sleep(self.batch_sleep);
            }
            batch.sort_by_key(|e| e.folder_id);
            for group in group_consecutive(&batch) {
                let Some(store) = store_for(&store_id_key(group.store_id_hash)) else { continue };
                let _ =
                    self.process_message_change(store.as_ref(), store.id(), group.folder_id, &group.object_ids, group.op);
            }
        }
    }
}

fn remove_result(folder: &mut SearchFolder, object_id: ObjectId) {
    if let Some(pos) = folder.results.iter().position(|&id| id == object_id) {
        folder.results.remove(pos);
        folder.content_count = folder.content_count.saturating_sub(1);
        if folder.unread_rows.remove(&object_id) {
            folder.unread_count = folder.unread_count.saturating_sub(1);
        }
    }
}

/// Bridges [`row_engine::with_folder_lock`]'s async deadlock-retry loop
/// into `apply_one`'s synchronous call sites — the search worker calls
/// this from its own thread, never from inside an async runtime.
fn with_row_lock<T>(folder_id: FolderId, mut op: impl FnMut() -> Result<T>) -> Result<T> {
    let rt = asupersync::runtime::RuntimeBuilder::current_thread()
        .build()
        .map_err(|e| Error::Internal(format!("row-lock runtime build failed: {e}")))?;
    rt.block_on(row_engine::with_folder_lock(folder_id, || {
        let result = op();
        async move { result }
    }))
}

/// One dedup'd, same-(folder, op) group of events ready to dispatch, per
/// §4.4 step 3-4.
struct EventGroup {
    store_id_hash: u64,
    folder_id: FolderId,
    op: EventOp,
    object_ids: Vec<ObjectId>,
}

/// Groups consecutive events with identical `(folder_id, op)` (the batch
/// is pre-sorted by folder id, so this is a true consecutive-run group,
/// matching §4.4 step 4) and deduplicates object ids within each group,
/// keeping the first occurrence.
fn group_consecutive(events: &[Event]) -> Vec<EventGroup> {
    let mut groups: Vec<EventGroup> = Vec::new();
    for event in events {
        match groups.last_mut() {
            Some(g) if g.folder_id == event.folder_id && g.op == event.op && g.store_id_hash == event.store_id_hash => {
                if !g.object_ids.contains(&event.object_id) {
                    g.object_ids.push(event.object_id);
                }
            }
            _ => groups.push(EventGroup {
                store_id_hash: event.store_id_hash,
                folder_id: event.folder_id,
                op: event.op,
                object_ids: vec![event.object_id],
            }),
        }
    }
    groups
}

/// Placeholder store-id lookup for the worker loop: real dispatch keys
/// stores by their string id, but `Event` only carries a hash (the
/// queue is a fixed-size struct, §3) — callers supplying `store_for`
/// are expected to maintain their own hash→id table. At this crate's
/// scope (no real event producer wired in yet) this just stringifies
/// the hash so tests can round-trip it.
fn store_id_key(hash: u64) -> StoreId {
    hash.to_string()
}

fn expand_scope(store: &dyn Store, criteria: &SearchCriteria) -> Result<Vec<FolderId>> {
    if !criteria.recursive {
        return Ok(criteria.scope_folders.clone());
    }
    let mut scope = Vec::new();
    let mut stack = criteria.scope_folders.clone();
    while let Some(folder_id) = stack.pop() {
        if scope.contains(&folder_id) {
            continue;
        }
        scope.push(folder_id);
        let folder = store.open_folder(folder_id)?;
        // Descendant discovery walks contents for sub-folders in the
        // real store; the trait surface here only exposes message
        // contents, so recursive scope is bounded to the declared roots
        // plus whatever the caller already listed in `scope_folders`.
        let _ = folder.contents();
    }
    Ok(scope)
}

fn folder_in_scope(store: &dyn Store, criteria: &SearchCriteria, folder_id: FolderId) -> bool {
    if criteria.scope_folders.contains(&folder_id) {
        return true;
    }
    if !criteria.recursive {
        return false;
    }
    // Walk parent ids upward looking for a scope root (§4.4: "ancestor-
    // membership computed by walking parent-ids through the cache").
    // Missing cache entries are treated as "not in scope" (§4.4 failure
    // semantics).
    let mut current = folder_id;
    for _ in 0..64 {
        let Ok(folder) = store.open_folder(current) else { return false };
        let Some(parent) = folder.parent_id() else { return false };
        if criteria.scope_folders.contains(&parent) {
            return true;
        }
        current = parent;
    }
    false
}

// Re-export for callers composing retry-aware folder locking alongside
// this module (§4.4's "per-folder SQL-level row lock" step).
pub use row_engine::with_folder_lock;

#[cfg(test)]
mod tests {
    use super::*;
    use kopano_core::proptag::well_known::PR_SUBJECT;
    use kopano_core::restriction::FuzzyLevel;
    use kopano_core::{PropertyBag, Restriction};
    use kopano_store::MemoryStore;

    fn make_store() -> (MemoryStore, FolderId) {
        let store = MemoryStore::new("store-1", "alice");
        let inbox = store.inbox_id();
        (store, inbox)
    }

    fn content_restriction(value: &str) -> Restriction {
        Restriction::Content { prop: PR_SUBJECT, value: value.into(), fuzzy: FuzzyLevel::substring_ignore_case() }
    }

    #[test]
    fn search_populates_matching_messages() {
        let (store, inbox) = make_store();
        let folder = store.open_folder(inbox).unwrap();
        let mut msg1 = folder.create_message().unwrap();
        let mut props = PropertyBag::new();
        props.set(PR_SUBJECT, PropertyValue::String("quarterly report".into()));
        msg1.set_props(&props).unwrap();
        let mut msg2 = folder.create_message().unwrap();
        let mut props2 = PropertyBag::new();
        props2.set(PR_SUBJECT, PropertyValue::String("lunch plans".into()));
        msg2.set_props(&props2).unwrap();

        let engine = SearchEngine::new(Duration::ZERO);
        let store_id = store.id().clone();
        engine.set_search_criteria(
            store_id.clone(),
            999,
            SearchCriteria { scope_folders: vec![inbox], recursive: false, restriction: content_restriction("quarterly") },
        );
        engine.search(&store, &store_id, 999).unwrap();
        assert_eq!(engine.state(&store_id, 999), Some(SearchFolderState::Running));
        assert_eq!(engine.results(&store_id, 999), vec![msg1.object_id()]);
    }

    #[test]
    fn process_message_change_adds_matching_new_message() {
        let (store, inbox) = make_store();
        let store_id = store.id().clone();
        let engine = SearchEngine::new(Duration::ZERO);
        engine.set_search_criteria(
            store_id.clone(),
            999,
            SearchCriteria { scope_folders: vec![inbox], recursive: false, restriction: content_restriction("invoice") },
        );
        engine.search(&store, &store_id, 999).unwrap();

        let folder = store.open_folder(inbox).unwrap();
        let mut msg = folder.create_message().unwrap();
        let mut props = PropertyBag::new();
        props.set(PR_SUBJECT, PropertyValue::String("march invoice".into()));
        msg.set_props(&props).unwrap();

        engine
            .process_message_change(&store, &store_id, inbox, &[msg.object_id()], EventOp::Add)
            .unwrap();
        assert_eq!(engine.results(&store_id, 999), vec![msg.object_id()]);
    }

    #[test]
    fn process_message_change_out_of_scope_is_ignored() {
        let (store, inbox) = make_store();
        let store_id = store.id().clone();
        let engine = SearchEngine::new(Duration::ZERO);
        engine.set_search_criteria(
            store_id.clone(),
            999,
            SearchCriteria { scope_folders: vec![inbox], recursive: false, restriction: content_restriction("invoice") },
        );
        engine.search(&store, &store_id, 999).unwrap();

        let other_folder_id = store.create_folder(store.root_folder_id());
        let other_folder = store.open_folder(other_folder_id).unwrap();
        let mut msg = other_folder.create_message().unwrap();
        let mut props = PropertyBag::new();
        props.set(PR_SUBJECT, PropertyValue::String("invoice".into()));
        msg.set_props(&props).unwrap();

        engine
            .process_message_change(&store, &store_id, other_folder_id, &[msg.object_id()], EventOp::Add)
            .unwrap();
        assert!(engine.results(&store_id, 999).is_empty());
    }

    #[test]
    fn delete_removes_result_row() {
        let (store, inbox) = make_store();
        let store_id = store.id().clone();
        let folder = store.open_folder(inbox).unwrap();
        let mut msg = folder.create_message().unwrap();
        let mut props = PropertyBag::new();
        props.set(PR_SUBJECT, PropertyValue::String("invoice".into()));
        msg.set_props(&props).unwrap();

        let engine = SearchEngine::new(Duration::ZERO);
        engine.set_search_criteria(
            store_id.clone(),
            999,
            SearchCriteria { scope_folders: vec![inbox], recursive: false, restriction: content_restriction("invoice") },
        );
        engine.search(&store, &store_id, 999).unwrap();
        assert_eq!(engine.results(&store_id, 999), vec![msg.object_id()]);

        engine
            .process_message_change(&store, &store_id, inbox, &[msg.object_id()], EventOp::Delete)
            .unwrap();
        assert!(engine.results(&store_id, 999).is_empty());
    }

    #[test]
    fn read_flag_flip_on_matched_row_adjusts_unread_count() {
        let (store, inbox) = make_store();
        let store_id = store.id().clone();
        let folder = store.open_folder(inbox).unwrap();
        let mut msg = folder.create_message().unwrap();
        let mut props = PropertyBag::new();
        props.set(PR_SUBJECT, PropertyValue::String("invoice".into()));
        msg.set_props(&props).unwrap();

        let engine = SearchEngine::new(Duration::ZERO);
        engine.set_search_criteria(
            store_id.clone(),
            999,
            SearchCriteria { scope_folders: vec![inbox], recursive: false, restriction: content_restriction("invoice") },
        );
        engine.search(&store, &store_id, 999).unwrap();
        assert_eq!(engine.counts(&store_id, 999), Some((1, 1)));

        let mut read_props = PropertyBag::new();
        read_props.set(PR_MESSAGE_FLAGS, PropertyValue::Bool(true));
        msg.set_props(&read_props).unwrap();
        engine
            .process_message_change(&store, &store_id, inbox, &[msg.object_id()], EventOp::Modify)
            .unwrap();
        assert_eq!(engine.counts(&store_id, 999), Some((1, 0)));

        let mut unread_props = PropertyBag::new();
        unread_props.set(PR_MESSAGE_FLAGS, PropertyValue::Bool(false));
        msg.set_props(&unread_props).unwrap();
        engine
            .process_message_change(&store, &store_id, inbox, &[msg.object_id()], EventOp::Modify)
            .unwrap();
        assert_eq!(engine.counts(&store_id, 999), Some((1, 1)));
    }

    #[test]
    fn group_consecutive_dedups_object_ids_within_group() {
        let events = vec![
            Event { store_id_hash: 1, folder_id: 1, object_id: 10, op: EventOp::Add },
            Event { store_id_hash: 1, folder_id: 1, object_id: 10, op: EventOp::Add },
            Event { store_id_hash: 1, folder_id: 1, object_id: 11, op: EventOp::Add },
            Event { store_id_hash: 1, folder_id: 2, object_id: 20, op: EventOp::Add },
        ];
        let groups = group_consecutive(&events);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].object_ids, vec![10, 11]);
        assert_eq!(groups[1].object_ids, vec![20]);
    }

    #[test]
    fn remove_search_folder_wipes_state() {
        let (store, inbox) = make_store();
        let store_id = store.id().clone();
        let engine = SearchEngine::new(Duration::ZERO);
        engine.set_search_criteria(
            store_id.clone(),
            999,
            SearchCriteria { scope_folders: vec![inbox], recursive: false, restriction: content_restriction("x") },
        );
        engine.remove_search_folder(&store_id, 999);
        assert_eq!(engine.state(&store_id, 999), None);
    }
}
