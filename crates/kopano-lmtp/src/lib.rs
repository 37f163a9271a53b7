//! LMTP channel, recipient resolver, session state machine, delivery
//! orchestrator and listener for the Kopano delivery agent.

pub mod channel;
pub mod listener;
pub mod orchestrator;
pub mod resolver;
pub mod session;

pub use channel::{Channel, RawStream, ReadOutcome};
pub use listener::{run_listener, ListenerHandle, ShutdownSignal};
pub use orchestrator::{deliver_one, Archiver, MessageConverter, OrchestratorConfig};
pub use resolver::{resolve_one, to_recipient, AddressBook, GroupedRecipients, Lookup, ObjectType, ResolvedEntry};
pub use session::{
    destuff_line, format_recipient_statuses, is_data_terminator, parse_command, AcceptedRecipient,
    Command, Session, SessionState,
};
