//! Trait surface for the property-store object model (messages, folders,
//! streams, tables) consumed by the search, rules and LMTP crates. The real
//! store — its SQL persistence, property tags, and table mechanics beyond
//! what §4.5 names — is an external collaborator per the design's scope.

pub mod memory;
pub mod traits;

pub use memory::MemoryStore;
pub use traits::{resolve_path, Folder, Message, QuotaStatus, Store};
