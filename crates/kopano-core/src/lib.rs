//! Shared data model, configuration and error taxonomy for the Kopano
//! LMTP delivery agent and search folder engine.

pub mod config;
pub mod error;
pub mod logging;
pub mod message;
pub mod proptag;
pub mod restriction;

pub use config::Config;
pub use error::{Error, Result};
pub use message::{
    Action, Event, EventOp, FolderId, ForwardFlags, ObjectId, OutOfOffice, PropertyBag,
    PropertyValue, Recipient, ReplyFlavor, ResolveOutcome, Rule, RuleOutcome, RuleState, StoreId,
};
pub use proptag::{PropTag, PropType};
pub use restriction::{FuzzyLevel, FuzzyMatch, RelOp, Restriction, SubrestrictionScope};
