//! Property tags: the (id, type) pairs that key every value in the
//! property-store object model.
//!
//! A tag packs a 16-bit property id and a 16-bit type into one `u32`,
//! matching the MAPI convention: `PROP_ID(tag) << 16 | PROP_TYPE(tag)`.

use serde::{Deserialize, Serialize};

/// Scalar and multi-value property types. `Mvi` is not a real storage type;
/// it is a per-instance marker a table request can set on an MV tag to ask
/// the row engine to expand one physical row per element (§4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[non_exhaustive]
pub enum PropType {
    Int32,
    Int64,
    Bool,
    String,
    Binary,
    FileTime,
    Guid,
    Error,
    MvString,
    MvBinary,
    MvInt32,
}

impl PropType {
    /// Whether this type carries more than one logical value per row.
    #[must_use]
    pub const fn is_multi_value(self) -> bool {
        matches!(self, Self::MvString | Self::MvBinary | Self::MvInt32)
    }
}

/// A `(id, type)` property tag, packed as `id:16 | type-discriminant:16`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PropTag {
    pub id: u16,
    pub prop_type: PropType,
}

impl PropTag {
    #[must_use]
    pub const fn new(id: u16, prop_type: PropType) -> Self {
        Self { id, prop_type }
    }

    /// Packs the tag into a single `u32`, matching the MAPI wire layout.
    #[must_use]
    pub const fn packed(self) -> u32 {
        (self.id as u32) << 16 | Self::type_discriminant(self.prop_type) as u32
    }

    const fn type_discriminant(t: PropType) -> u16 {
        match t {
            PropType::Int32 => 0x0003,
            PropType::Int64 => 0x0014,
            PropType::Bool => 0x000b,
            PropType::String => 0x001f,
            PropType::Binary => 0x0102,
            PropType::FileTime => 0x0040,
            PropType::Guid => 0x0048,
            PropType::Error => 0x000a,
            PropType::MvString => 0x101f,
            PropType::MvBinary => 0x1102,
            PropType::MvInt32 => 0x1003,
        }
    }
}

/// Well-known property ids used throughout the rule engine, search
/// normaliser and delivery orchestrator. Not exhaustive — real deployments
/// carry thousands of named properties; these are the ones this crate's
/// algorithms branch on by name.
pub mod well_known {
    use super::{PropTag, PropType};

    pub const PR_SUBJECT: PropTag = PropTag::new(0x0037, PropType::String);
    pub const PR_BODY: PropTag = PropTag::new(0x1000, PropType::String);
    pub const PR_HTML: PropTag = PropTag::new(0x1013, PropType::Binary);
    pub const PR_RTF_IN_SYNC: PropTag = PropTag::new(0x0e1f, PropType::Bool);
    pub const PR_MESSAGE_FLAGS: PropTag = PropTag::new(0x0e07, PropType::Int32);
    pub const PR_MESSAGE_CLASS: PropTag = PropTag::new(0x001a, PropType::String);
    pub const PR_TRANSPORT_MESSAGE_HEADERS: PropTag = PropTag::new(0x007d, PropType::String);
    pub const PR_INTERNET_MESSAGE_ID: PropTag = PropTag::new(0x1035, PropType::String);
    pub const PR_IN_REPLY_TO_ID: PropTag = PropTag::new(0x1042, PropType::String);
    pub const PR_EXPIRY_TIME: PropTag = PropTag::new(0x0015, PropType::FileTime);
    pub const PR_RULE_SEQUENCE: PropTag = PropTag::new(0x6676, PropType::Int32);
    pub const PR_ICON_INDEX: PropTag = PropTag::new(0x1080, PropType::Int32);
    pub const PR_LAST_VERB_EXECUTED: PropTag = PropTag::new(0x1081, PropType::Int32);
    pub const PR_LAST_VERB_EXECUTION_TIME: PropTag = PropTag::new(0x1082, PropType::FileTime);
    pub const PR_SENTMAIL_ENTRYID: PropTag = PropTag::new(0x0e0a, PropType::Binary);
    pub const PR_DELEGATED_BY_RULE: PropTag = PropTag::new(0x3fe3, PropType::Bool);
    pub const PR_DELETE_AFTER_SUBMIT: PropTag = PropTag::new(0x0e01, PropType::Bool);
    pub const PR_RESPONSE_REQUESTED: PropTag = PropTag::new(0x0063, PropType::Bool);
    pub const PR_CONTENT_COUNT: PropTag = PropTag::new(0x3602, PropType::Int32);
    pub const PR_CONTENT_UNREAD: PropTag = PropTag::new(0x3603, PropType::Int32);
    pub const PR_EC_OUTOFOFFICE: PropTag = PropTag::new(0x6a00, PropType::Bool);
    pub const PR_EC_SEARCHCRIT: PropTag = PropTag::new(0x6a01, PropType::String);
    pub const PR_EC_SEARCHFOLDER_STATUS: PropTag = PropTag::new(0x6a02, PropType::Int32);
    pub const PR_EC_SUGGESTION: PropTag = PropTag::new(0x6a03, PropType::String);
    pub const PR_ADDITIONAL_REN_ENTRYIDS: PropTag = PropTag::new(0x36d8, PropType::MvBinary);
    pub const PR_MESSAGE_RECIP_ME: PropTag = PropTag::new(0x0059, PropType::Bool);
    pub const PR_MESSAGE_TO_ME: PropTag = PropTag::new(0x0057, PropType::Bool);
    pub const PR_MESSAGE_CC_ME: PropTag = PropTag::new(0x0058, PropType::Bool);
    pub const PR_EC_MESSAGE_BCC_ME: PropTag = PropTag::new(0x6a04, PropType::Bool);
    pub const PR_RECEIVED_BY_ENTRYID: PropTag = PropTag::new(0x0075, PropType::Binary);
    pub const PR_RECEIVED_BY_EMAIL_ADDRESS: PropTag = PropTag::new(0x0076, PropType::String);
    pub const PR_SENT_REPRESENTING_ENTRYID: PropTag = PropTag::new(0x0041, PropType::Binary);
    pub const PR_SENT_REPRESENTING_EMAIL_ADDRESS: PropTag = PropTag::new(0x0065, PropType::String);
    pub const PR_DISPLAY_TO: PropTag = PropTag::new(0x0e04, PropType::String);
}
