//! An in-memory `Store`/`Folder`/`Message` implementation used only by this
//! workspace's unit tests. Never a production backend — the real property
//! store is out of scope per the design.

use std::collections::HashMap;
use std::io::Cursor;
use std::sync::{Arc, Mutex};

use kopano_core::{Error, FolderId, ObjectId, OutOfOffice, PropTag, PropertyBag, Result, StoreId};

use crate::traits::{Folder, Message, QuotaStatus, Store};

#[derive(Default)]
struct FolderState {
    parent: Option<FolderId>,
    objects: Vec<ObjectId>,
    children: HashMap<String, FolderId>,
}

#[derive(Default)]
struct MessageState {
    props: PropertyBag,
}

struct Inner {
    folders: HashMap<FolderId, FolderState>,
    messages: HashMap<ObjectId, MessageState>,
    next_object_id: i64,
    next_folder_id: FolderId,
    inbox: FolderId,
    outbox: FolderId,
    root: FolderId,
    oof: OutOfOffice,
    quota: QuotaStatus,
}

/// Shared handle to an in-memory store; clone to hand out multiple
/// `Store`-trait views onto the same underlying state.
#[derive(Clone)]
pub struct MemoryStore {
    id: StoreId,
    owner: Arc<str>,
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new(id: impl Into<StoreId>, owner: impl Into<String>) -> Self {
        let mut folders = HashMap::new();
        folders.insert(1, FolderState::default());
        folders.insert(2, FolderState::default());
        folders.insert(0, FolderState::default());
        Self {
            id: id.into(),
            owner: Arc::from(owner.into().as_str()),
            inner: Arc::new(Mutex::new(Inner {
                folders,
                messages: HashMap::new(),
                next_object_id: 1,
                next_folder_id: 100,
                inbox: 1,
                outbox: 2,
                root: 0,
                oof: OutOfOffice {
                    active: false,
                    from_ts: None,
                    until_ts: None,
                    subject: None,
                    body_text: String::new(),
                    auto_process_enabled: false,
                    auto_accept_enabled: false,
                },
                quota: QuotaStatus { used_bytes: 0, soft_quota_bytes: None, hard_quota_bytes: None },
            })),
        }
    }

    pub fn set_out_of_office(&self, oof: OutOfOffice) {
        self.inner.lock().unwrap().oof = oof;
    }

    pub fn set_quota(&self, quota: QuotaStatus) {
        self.inner.lock().unwrap().quota = quota;
    }

    pub fn create_folder(&self, parent: FolderId) -> FolderId {
        let mut inner = self.inner.lock().unwrap();
        let id = inner.next_folder_id;
        inner.next_folder_id += 1;
        inner.folders.insert(id, FolderState { parent: Some(parent), objects: Vec::new(), children: HashMap::new() });
        id
    }
}

impl Store for MemoryStore {
    fn id(&self) -> &StoreId {
        &self.id
    }

    fn owner_username(&self) -> &str {
        &self.owner
    }

    fn open_folder(&self, folder_id: FolderId) -> Result<Box<dyn Folder>> {
        let inner = self.inner.lock().unwrap();
        if !inner.folders.contains_key(&folder_id) {
            return Err(Error::FolderNotFound(folder_id.to_string()));
        }
        Ok(Box::new(MemoryFolder { store: self.clone(), id: folder_id }))
    }

    fn receive_folder(&self, _message_class_root: &str) -> Result<FolderId> {
        Ok(self.inner.lock().unwrap().inbox)
    }

    fn inbox_id(&self) -> FolderId {
        self.inner.lock().unwrap().inbox
    }

    fn outbox_id(&self) -> FolderId {
        self.inner.lock().unwrap().outbox
    }

    fn root_folder_id(&self) -> FolderId {
        self.inner.lock().unwrap().root
    }

    fn out_of_office(&self) -> Result<OutOfOffice> {
        Ok(self.inner.lock().unwrap().oof.clone())
    }

    fn quota_status(&self) -> Result<QuotaStatus> {
        Ok(self.inner.lock().unwrap().quota)
    }

    fn resolve_child_folder(&self, parent: FolderId, name: &str, create_if_missing: bool) -> Result<FolderId> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.folders.contains_key(&parent) {
            return Err(Error::FolderNotFound(parent.to_string()));
        }
        if let Some(&existing) = inner.folders[&parent].children.get(name) {
            return Ok(existing);
        }
        if !create_if_missing {
            return Err(Error::FolderNotFound(name.to_string()));
        }
        let id = inner.next_folder_id;
        inner.next_folder_id += 1;
        inner.folders.insert(id, FolderState { parent: Some(parent), objects: Vec::new(), children: HashMap::new() });
        inner.folders.get_mut(&parent).expect("checked above").children.insert(name.to_string(), id);
        Ok(id)
    }

    fn open_message_by_entryid(&self, entry_id: &str) -> Result<Box<dyn Message>> {
        let object_id: ObjectId =
            entry_id.parse().map_err(|_| Error::NotFound(entry_id.to_string()))?;
        if !self.inner.lock().unwrap().messages.contains_key(&object_id) {
            return Err(Error::NotFound(entry_id.to_string()));
        }
        Ok(Box::new(MemoryMessage { store: self.clone(), object_id }))
    }
}

pub struct MemoryFolder {
    store: MemoryStore,
    id: FolderId,
}

impl Folder for MemoryFolder {
    fn id(&self) -> FolderId {
        self.id
    }

    fn parent_id(&self) -> Option<FolderId> {
        self.store.inner.lock().unwrap().folders.get(&self.id).and_then(|f| f.parent)
    }

    fn create_message(&self) -> Result<Box<dyn Message>> {
        let mut inner = self.store.inner.lock().unwrap();
        let object_id = inner.next_object_id;
        inner.next_object_id += 1;
        inner.messages.insert(object_id, MessageState::default());
        inner.folders.get_mut(&self.id).ok_or_else(|| Error::FolderNotFound(self.id.to_string()))?
            .objects.push(object_id);
        Ok(Box::new(MemoryMessage { store: self.store.clone(), object_id }))
    }

    fn open_message(&self, object_id: ObjectId) -> Result<Box<dyn Message>> {
        if !self.store.inner.lock().unwrap().messages.contains_key(&object_id) {
            return Err(Error::NotFound(object_id.to_string()));
        }
        Ok(Box::new(MemoryMessage { store: self.store.clone(), object_id }))
    }

    fn contents(&self) -> Result<Vec<ObjectId>> {
        Ok(self.store.inner.lock().unwrap().folders.get(&self.id).map(|f| f.objects.clone()).unwrap_or_default())
    }

    fn content_count(&self) -> Result<u32> {
        Ok(self.contents()?.len() as u32)
    }

    fn unread_count(&self) -> Result<u32> {
        let inner = self.store.inner.lock().unwrap();
        let Some(folder) = inner.folders.get(&self.id) else { return Ok(0) };
        Ok(folder
            .objects
            .iter()
            .filter(|id| {
                inner.messages.get(id).is_none_or(|m| {
                    !m.props
                        .get(kopano_core::proptag::well_known::PR_MESSAGE_FLAGS)
                        .and_then(kopano_core::PropertyValue::as_bool)
                        .unwrap_or(false)
                })
            })
            .count() as u32)
    }
}

pub struct MemoryMessage {
    store: MemoryStore,
    object_id: ObjectId,
}

impl Message for MemoryMessage {
    fn object_id(&self) -> ObjectId {
        self.object_id
    }

    fn get_props(&self, _tags: &[PropTag]) -> Result<PropertyBag> {
        let inner = self.store.inner.lock().unwrap();
        inner
            .messages
            .get(&self.object_id)
            .map(|m| m.props.clone())
            .ok_or_else(|| Error::NotFound(self.object_id.to_string()))
    }

    fn set_props(&mut self, props: &PropertyBag) -> Result<()> {
        let mut inner = self.store.inner.lock().unwrap();
        let entry = inner
            .messages
            .get_mut(&self.object_id)
            .ok_or_else(|| Error::NotFound(self.object_id.to_string()))?;
        entry.props = merge(entry.props.clone(), props.clone());
        Ok(())
    }

    fn copy_to(&self, dest: &mut dyn Folder) -> Result<Box<dyn Message>> {
        let props = self.get_props(&[])?;
        let mut copy = dest.create_message()?;
        copy.set_props(&props)?;
        copy.save_changes()?;
        Ok(copy)
    }

    fn save_changes(&mut self) -> Result<()> {
        Ok(())
    }

    fn submit(&mut self) -> Result<()> {
        Ok(())
    }

    fn set_read_flag(&mut self, _suppress_receipt: bool) -> Result<()> {
        let mut inner = self.store.inner.lock().unwrap();
        if let Some(m) = inner.messages.get_mut(&self.object_id) {
            m.props.set(
                kopano_core::proptag::well_known::PR_MESSAGE_FLAGS,
                kopano_core::PropertyValue::Bool(true),
            );
        }
        Ok(())
    }

    fn open_property_as_stream(&self, tag: PropTag) -> Result<Box<dyn std::io::Read>> {
        let bag = self.get_props(&[tag])?;
        let bytes = match bag.get(tag) {
            Some(kopano_core::PropertyValue::Binary(b)) => b.clone(),
            Some(kopano_core::PropertyValue::String(s)) => s.clone().into_bytes(),
            _ => Vec::new(),
        };
        Ok(Box::new(Cursor::new(bytes)))
    }
}

fn merge(mut base: PropertyBag, overlay: PropertyBag) -> PropertyBag {
    base.merge_from(&overlay);
    base
}

#[cfg(test)]
mod tests {
    use super::*;
    use kopano_core::proptag::well_known::{PR_BODY, PR_SUBJECT};
    use kopano_core::PropertyValue;

    #[test]
    fn second_set_props_call_keeps_earlier_untouched_keys() {
        let store = MemoryStore::new("store-1", "alice");
        let folder = store.open_folder(store.inbox_id()).unwrap();
        let mut message = folder.create_message().unwrap();

        let mut first = PropertyBag::new();
        first.set(PR_SUBJECT, PropertyValue::String("hello".into()));
        first.set(PR_BODY, PropertyValue::String("body text".into()));
        message.set_props(&first).unwrap();

        let mut second = PropertyBag::new();
        second.set(PR_SUBJECT, PropertyValue::String("overwritten".into()));
        message.set_props(&second).unwrap();

        let props = message.get_props(&[]).unwrap();
        assert_eq!(props.get(PR_SUBJECT).and_then(PropertyValue::as_str), Some("overwritten"));
        assert_eq!(props.get(PR_BODY).and_then(PropertyValue::as_str), Some("body text"));
    }

    #[test]
    fn resolve_child_folder_creates_and_reuses_named_children() {
        let store = MemoryStore::new("store-1", "alice");
        let root = store.root_folder_id();

        let created = store.resolve_child_folder(root, "Processed", true).unwrap();
        let reused = store.resolve_child_folder(root, "Processed", true).unwrap();
        assert_eq!(created, reused);

        let folder = store.open_folder(created).unwrap();
        assert_eq!(folder.parent_id(), Some(root));
    }

    #[test]
    fn resolve_child_folder_fails_without_create_flag() {
        let store = MemoryStore::new("store-1", "alice");
        let root = store.root_folder_id();
        let result = store.resolve_child_folder(root, "Missing", false);
        assert!(matches!(result, Err(Error::FolderNotFound(_))));
    }

    #[test]
    fn open_message_by_entryid_finds_message_independent_of_folder_handle() {
        let store = MemoryStore::new("store-1", "alice");
        let folder = store.open_folder(store.outbox_id()).unwrap();
        let message = folder.create_message().unwrap();

        let found = store.open_message_by_entryid(&message.object_id().to_string()).unwrap();
        assert_eq!(found.object_id(), message.object_id());
    }

    #[test]
    fn open_message_by_entryid_rejects_unknown_id() {
        let store = MemoryStore::new("store-1", "alice");
        assert!(store.open_message_by_entryid("999999").is_err());
    }
}
