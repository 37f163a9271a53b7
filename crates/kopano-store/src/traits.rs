//! The property-store facade the rest of the workspace consumes.
//!
//! Per the design's scope, the MAPI-like property-store abstraction itself
//! (messages, folders, streams, tables, property tags, restrictions) and
//! its SQL persistence are external collaborators, not something this
//! workspace implements — they are "a given object model with operations
//! {open, create, copy, setprops, getprops, submit, openproperty-as-stream}".
//! This module carries exactly that operation set as traits so the search
//! engine, rule engine and delivery orchestrator have something concrete to
//! compile against and unit-test with.

use kopano_core::{FolderId, ObjectId, PropTag, PropertyBag, Result, StoreId};

/// A per-user store root: inbox, outbox, sent-items, public-root pointer,
/// OOF settings (§3).
pub trait Store: Send + Sync {
    fn id(&self) -> &StoreId;

    fn owner_username(&self) -> &str;

    fn open_folder(&self, folder_id: FolderId) -> Result<Box<dyn Folder>>;

    /// Resolves the receive folder for the given message class root, e.g.
    /// `"IPM"` (§4.10.b).
    fn receive_folder(&self, message_class_root: &str) -> Result<FolderId>;

    fn inbox_id(&self) -> FolderId;

    fn outbox_id(&self) -> FolderId;

    fn root_folder_id(&self) -> FolderId;

    fn out_of_office(&self) -> Result<kopano_core::OutOfOffice>;

    /// `(used_bytes, soft_quota, hard_quota)`; `None` quota means unlimited.
    fn quota_status(&self) -> Result<QuotaStatus>;

    /// Looks up the child folder named `name` directly under `parent`,
    /// creating it when missing if `create_if_missing` is set (§4.10.b,
    /// §6 `-C`). Unlike [`Folder::contents`], which lists messages, this
    /// resolves the folder hierarchy itself.
    fn resolve_child_folder(&self, parent: FolderId, name: &str, create_if_missing: bool) -> Result<FolderId>;

    /// Opens any message in the store by its entry-id, independent of
    /// which folder holds it — used to copy a user-stored reply template
    /// (§4.6.1).
    fn open_message_by_entryid(&self, entry_id: &str) -> Result<Box<dyn Message>>;
}

#[derive(Debug, Clone, Copy)]
pub struct QuotaStatus {
    pub used_bytes: u64,
    pub soft_quota_bytes: Option<u64>,
    pub hard_quota_bytes: Option<u64>,
}

impl QuotaStatus {
    #[must_use]
    pub fn over_hard_quota(&self) -> bool {
        self.hard_quota_bytes.is_some_and(|q| self.used_bytes > q)
    }
}

/// A container of messages and subfolders, addressable by folder id (§3).
pub trait Folder: Send + Sync {
    fn id(&self) -> FolderId;

    fn parent_id(&self) -> Option<FolderId>;

    fn create_message(&self) -> Result<Box<dyn Message>>;

    fn open_message(&self, object_id: ObjectId) -> Result<Box<dyn Message>>;

    /// Object ids directly contained in this folder, newest first.
    fn contents(&self) -> Result<Vec<ObjectId>>;

    fn content_count(&self) -> Result<u32>;

    fn unread_count(&self) -> Result<u32>;
}

/// A message: opaque identified object with a property map (§3).
pub trait Message: Send + Sync {
    fn object_id(&self) -> ObjectId;

    fn get_props(&self, tags: &[PropTag]) -> Result<PropertyBag>;

    fn set_props(&mut self, props: &PropertyBag) -> Result<()>;

    /// Copies this message's full contents into `dest`, optionally including
    /// attachments and recipient tables (`CopyTo(full)` semantics, §4.6.1).
    fn copy_to(&self, dest: &mut dyn Folder) -> Result<Box<dyn Message>>;

    fn save_changes(&mut self) -> Result<()>;

    /// Hands the message to the spooler for outbound delivery (reply /
    /// forward / delegate actions route through here).
    fn submit(&mut self) -> Result<()>;

    fn set_read_flag(&mut self, suppress_receipt: bool) -> Result<()>;

    fn open_property_as_stream(&self, tag: PropTag) -> Result<Box<dyn std::io::Read>>;
}

/// Resolves a folder path such as `"Inbox\Processed"` under a store,
/// optionally creating missing components (§4.10.b).
pub fn resolve_path(
    store: &dyn Store,
    path: &str,
    separator: char,
    create_if_missing: bool,
) -> Result<FolderId> {
    let mut current = store.root_folder_id();
    for component in path.split(separator).filter(|c| !c.is_empty()) {
        current = store.resolve_child_folder(current, component, create_if_missing)?;
    }
    Ok(current)
}
