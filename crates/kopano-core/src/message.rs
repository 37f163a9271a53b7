//! Value types for the data model: property values, recipients, rules,
//! actions and the events the search engine consumes.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::proptag::PropTag;

/// A typed property value, scalar or multi-value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PropertyValue {
    Int32(i32),
    Int64(i64),
    Bool(bool),
    String(String),
    Binary(Vec<u8>),
    FileTime(DateTime<Utc>),
    Guid(uuid::Uuid),
    MvString(Vec<String>),
    MvBinary(Vec<Vec<u8>>),
    MvInt32(Vec<i32>),
    Error(String),
}

impl PropertyValue {
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_filetime(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::FileTime(t) => Some(*t),
            _ => None,
        }
    }

    /// Expands a multi-value property into one `PropertyValue` per element,
    /// for MVI row expansion (§4.5). Scalars expand to a single-element
    /// vector containing themselves.
    #[must_use]
    pub fn expand_instances(&self) -> Vec<PropertyValue> {
        match self {
            Self::MvString(v) => v.iter().cloned().map(PropertyValue::String).collect(),
            Self::MvBinary(v) => v.iter().cloned().map(PropertyValue::Binary).collect(),
            Self::MvInt32(v) => v.iter().copied().map(PropertyValue::Int32).collect(),
            other => vec![other.clone()],
        }
    }
}

/// A row-addressable bag of typed properties: a message, folder or other
/// store object as seen by the restriction evaluator and row engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PropertyBag {
    values: HashMap<u32, PropertyValue>,
}

impl PropertyBag {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, tag: PropTag, value: PropertyValue) -> &mut Self {
        self.values.insert(tag.packed(), value);
        self
    }

    #[must_use]
    pub fn get(&self, tag: PropTag) -> Option<&PropertyValue> {
        self.values.get(&tag.packed())
    }

    #[must_use]
    pub fn exists(&self, tag: PropTag) -> bool {
        self.values.contains_key(&tag.packed())
    }

    /// Overlays every value `overlay` carries onto `self`, leaving tags
    /// `overlay` doesn't touch untouched. Used when a second `set_props`
    /// call against the same object needs to add or replace properties
    /// without discarding what an earlier call already set.
    pub fn merge_from(&mut self, overlay: &PropertyBag) {
        for (&tag, value) in &overlay.values {
            self.values.insert(tag, value.clone());
        }
    }
}

/// An object identifier within a store: opaque, stable for the object's
/// lifetime.
pub type ObjectId = i64;
pub type FolderId = i64;
pub type StoreId = String;

/// A resolved mail recipient, as produced by the recipient resolver (C9)
/// and consumed by the LMTP session and delivery orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Recipient {
    pub raw_input: String,
    pub resolved_username: String,
    pub resolved_fullname: String,
    pub company: String,
    pub home_server: String,
    pub smtp: String,
    pub addr_type: String,
    pub entry_id: String,
    pub search_key: String,
    pub display_type: u32,
    pub admin_level: u32,
    pub has_imap_feature: bool,
    /// printf-style template used to build the per-recipient DATA response,
    /// e.g. `"250 2.1.5 %s Ok"`.
    pub delivery_status_template: String,
    /// Every raw RCPT TO alias that resolved to this recipient, kept so the
    /// LMTP session can answer each one individually.
    pub aliases: Vec<String>,
}

impl Recipient {
    #[must_use]
    pub fn format_status(&self, base_status: &str) -> String {
        base_status.replacen("%s", &self.raw_input, 1)
    }
}

/// Why a resolver lookup did not produce exactly one match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveOutcome {
    Resolved,
    Ambiguous,
    NotFound,
}

/// Rule action flavor bits carried on FORWARD/REDIRECT actions (§3, §4.6.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwardFlags {
    pub preserve_sender: bool,
    pub do_not_munge: bool,
    pub as_attachment: bool,
}

/// One action within a rule's action list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Action {
    Move { store: String, folder: String },
    Copy { store: String, folder: String },
    Reply { template_ref: String, flavor: ReplyFlavor },
    OofReply,
    Forward { recipients: Vec<String>, flags: ForwardFlags },
    Delegate { recipients: Vec<String> },
    Bounce,
    Tag,
    Delete,
    MarkRead,
    Defer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplyFlavor {
    Standard,
    OutOfOffice,
}

bitflags::bitflags! {
    /// Rule state flags (§3).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct RuleState: u32 {
        const ENABLED       = 0b0001;
        const ONLY_WHEN_OOF = 0b0010;
        const EXIT_LEVEL    = 0b0100;
    }
}

/// A user-defined delivery rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub id: i64,
    pub sequence: i32,
    pub state: RuleState,
    pub user_flags: u32,
    pub condition: crate::restriction::Restriction,
    pub actions: Vec<Action>,
    pub provider_tag: String,
    pub name: String,
    pub level: i32,
    pub provider_data: Vec<u8>,
}

/// The outcome of running the rule engine against a newly delivered
/// message (§4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleOutcome {
    /// Save the message normally in the inbox.
    Delivered,
    /// A MOVE/DELETE action fired: caller must not also save in the inbox.
    Cancel,
}

/// A search-engine input event (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub store_id_hash: u64,
    pub folder_id: FolderId,
    pub object_id: ObjectId,
    pub op: EventOp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventOp {
    Add,
    Modify,
    Delete,
}

/// Out-of-office configuration carried on a store (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutOfOffice {
    pub active: bool,
    pub from_ts: Option<DateTime<Utc>>,
    pub until_ts: Option<DateTime<Utc>>,
    pub subject: Option<String>,
    pub body_text: String,
    pub auto_process_enabled: bool,
    pub auto_accept_enabled: bool,
}

impl OutOfOffice {
    /// OOF is active iff the flag is set and `now` falls within
    /// `[from, until]`, with a missing bound meaning unbounded (§4.7).
    #[must_use]
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        if !self.active {
            return false;
        }
        let after_from = self.from_ts.is_none_or(|from| now >= from);
        let before_until = self.until_ts.is_none_or(|until| now <= until);
        after_from && before_until
    }
}
