//! Rule engine, auto-reply loop guard, and meeting/out-of-office
//! auto-dispatch (§4.6–§4.7): everything that decides what happens to a
//! message after it lands in a recipient's inbox.

pub mod auto_reply;
pub mod loop_guard;
pub mod rule_engine;

pub use auto_reply::{
    compose_oof_reply, invoke_meeting_helper, process_message, should_invoke_meeting_helper,
    should_send_oof_reply, write_reply_to_tempfile, MeetingHelperConfig,
};
pub use loop_guard::should_suppress;
pub use rule_engine::{process, RuleEngineConfig};
