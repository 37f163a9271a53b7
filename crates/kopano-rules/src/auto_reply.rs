//! Auto-accept and out-of-office auto-reply dispatcher (C8, §4.7).
//!
//! Meeting requests are handed to an external helper process rather than
//! answered in-process: `Command::new(...)` with argv/stdio and a
//! checked exit status, never a re-implementation of the accept/process
//! logic itself.

use std::io::Write;
use std::process::Command;

use chrono::{DateTime, Utc};
use kopano_core::proptag::well_known::{PR_MESSAGE_CLASS, PR_RESPONSE_REQUESTED, PR_SUBJECT};
use kopano_core::{Error, OutOfOffice, PropertyValue, Result};
use kopano_store::{Folder, Message, Store};

use crate::loop_guard::should_suppress;

const MEETING_REQUEST_CLASS: &str = "IPM.Schedule.Meeting.Request";
const MEETING_CANCELED_CLASS: &str = "IPM.Schedule.Meeting.Canceled";

/// Paths to the external meeting-accept and meeting-process helpers
/// (§4.7.1: auto-accept/auto-process delegate to separate binaries,
/// never answered in-process). Gating on whether auto-accept/auto-process
/// is enabled at all lives on the store's [`OutOfOffice`] flags, read via
/// [`should_invoke_meeting_helper`]; a `None` path here means the
/// operator never configured that helper, so the dispatch is skipped
/// silently even if the store flag is set.
#[derive(Debug, Clone, Default)]
pub struct MeetingHelperConfig {
    pub accept_helper_path: Option<String>,
    pub process_helper_path: Option<String>,
}

/// Classifies a message class against the meeting auto-accept/auto-process
/// rules (§4.7.1): only `IPM.Schedule.Meeting.*` classes are eligible, and
/// only when the store has the matching flag enabled.
#[must_use]
pub fn should_invoke_meeting_helper(message_class: &str, oof: &OutOfOffice) -> bool {
    if message_class == MEETING_REQUEST_CLASS {
        oof.auto_accept_enabled
    } else if message_class.starts_with("IPM.Schedule.Meeting.") {
        oof.auto_process_enabled
    } else {
        false
    }
}

/// Invokes the external meeting-processor helper for a message already
/// known to be a meeting request/response (§4.7.1). The helper receives
/// the object id as its sole argument and the store id/username via
/// environment variables.
pub fn invoke_meeting_helper(
    helper_path: &str,
    store: &dyn Store,
    object_id: kopano_core::ObjectId,
) -> Result<()> {
    let output = Command::new(helper_path)
        .arg(object_id.to_string())
        .env("KOPANO_STORE_ID", store.id())
        .env("KOPANO_USERNAME", store.owner_username())
        .output()
        .map_err(|e| Error::Internal(format!("meeting helper spawn failed: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::Internal(format!("meeting helper exited with {}: {stderr}", output.status)));
    }
    Ok(())
}

/// Whether an out-of-office reply should be generated for this message
/// (§4.7.2): skipped for junk-classified mail, delegate-rule deliveries,
/// and loop-guard-suppressed senders, and only while OOF is active.
#[must_use]
pub fn should_send_oof_reply(
    oof: &OutOfOffice,
    now: DateTime<Utc>,
    is_junk: bool,
    is_delegated_by_rule: bool,
    transport_headers: &str,
) -> bool {
    if is_junk || is_delegated_by_rule {
        return false;
    }
    if should_suppress(transport_headers) {
        return false;
    }
    oof.is_active_at(now)
}

/// Composes the RFC 5322 out-of-office reply as a complete message blob
/// (headers + base64 body, wrapped at 76 columns per RFC 2045) ready to
/// hand to the spooler or an external sender helper.
#[must_use]
pub fn compose_oof_reply(oof: &OutOfOffice, sender_smtp: &str, original_subject: &str, original_message_id: &str) -> String {
    let subject = oof.subject.as_deref().unwrap_or("Out of Office");
    let mut out = String::new();
    out.push_str(&format!("Subject: Re: {subject} [{original_subject}]\n"));
    out.push_str(&format!("To: {sender_smtp}\n"));
    if !original_message_id.is_empty() {
        out.push_str(&format!("In-Reply-To: {original_message_id}\n"));
    }
    out.push_str("Auto-Submitted: auto-replied\n");
    out.push_str("Content-Transfer-Encoding: base64\n");
    out.push_str("Content-Type: text/plain; charset=utf-8\n");
    out.push('\n');
    out.push_str(&wrap_base64(&oof.body_text));
    out.push('\n');
    out
}

/// Base64-encodes `body` and hard-wraps it at 76 characters per line, the
/// MIME line-length limit (RFC 2045 §6.8).
fn wrap_base64(body: &str) -> String {
    use base64::Engine as _;
    let encoded = base64::engine::general_purpose::STANDARD.encode(body.as_bytes());
    encoded
        .as_bytes()
        .chunks(76)
        .map(|chunk| std::str::from_utf8(chunk).expect("base64 alphabet is ascii"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Writes a composed OOF reply to a temp file so an external sender
/// helper (matching the meeting helper's invocation contract) can be
/// handed a path instead of piped stdin.
pub fn write_reply_to_tempfile(body: &str) -> Result<tempfile::NamedTempFile> {
    let mut file = tempfile::NamedTempFile::new()?;
    file.write_all(body.as_bytes())?;
    file.flush()?;
    Ok(file)
}

/// Top-level entry point driving the checks in §4.7: inspects the
/// delivered message's class and headers, then either invokes the
/// meeting helper or composes and submits an OOF reply via the outbox.
pub fn process_message(
    config: &MeetingHelperConfig,
    store: &dyn Store,
    message: &dyn Message,
    sender_smtp: &str,
    is_junk: bool,
    is_delegated_by_rule: bool,
    now: DateTime<Utc>,
) -> Result<()> {
    let props = message.get_props(&[])?;
    let message_class = props.get(PR_MESSAGE_CLASS).and_then(PropertyValue::as_str).unwrap_or("IPM.Note");
    let oof = store.out_of_office()?;

    if message_class.starts_with("IPM.Schedule.Meeting.") {
        let response_requested = props.get(PR_RESPONSE_REQUESTED).and_then(PropertyValue::as_bool).unwrap_or(true);
        let eligible = (message_class != MEETING_REQUEST_CLASS || response_requested)
            && should_invoke_meeting_helper(message_class, &oof);
        if eligible {
            let helper_path = if message_class == MEETING_REQUEST_CLASS {
                config.accept_helper_path.as_deref()
            } else {
                config.process_helper_path.as_deref()
            };
            if let Some(helper_path) = helper_path {
                invoke_meeting_helper(helper_path, store, message.object_id())?;
            }
        }
        // Meeting traffic never also gets an OOF auto-reply (§4.7.1).
        return Ok(());
    }

    let transport_headers = props.get(kopano_core::proptag::well_known::PR_TRANSPORT_MESSAGE_HEADERS)
        .and_then(PropertyValue::as_str)
        .unwrap_or("");
    if !should_send_oof_reply(&oof, now, is_junk, is_delegated_by_rule, transport_headers) {
        return Ok(());
    }

    let subject = props.get(PR_SUBJECT).and_then(PropertyValue::as_str).unwrap_or("");
    let message_id = props
        .get(kopano_core::proptag::well_known::PR_INTERNET_MESSAGE_ID)
        .and_then(PropertyValue::as_str)
        .unwrap_or("");
    let reply_body = compose_oof_reply(&oof, sender_smtp, subject, message_id);

    let outbox_id = store.outbox_id();
    let outbox = store.open_folder(outbox_id)?;
    let mut reply = outbox.create_message()?;
    let mut out_props = kopano_core::PropertyBag::new();
    out_props.set(PR_SUBJECT, PropertyValue::String(format!("Re: {subject}")));
    out_props.set(kopano_core::proptag::well_known::PR_BODY, PropertyValue::String(reply_body));
    reply.set_props(&out_props)?;
    reply.submit()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use kopano_store::MemoryStore;

    fn store_with_oof(oof: OutOfOffice) -> MemoryStore {
        let store = MemoryStore::new("store-1", "alice");
        store.set_out_of_office(oof);
        store
    }

    fn oof(active: bool) -> OutOfOffice {
        OutOfOffice {
            active,
            from_ts: None,
            until_ts: None,
            subject: Some("Away".into()),
            body_text: "I am away until next week.".into(),
            auto_process_enabled: true,
            auto_accept_enabled: true,
        }
    }

    #[test]
    fn meeting_request_needs_auto_accept_flag() {
        let mut o = oof(true);
        o.auto_accept_enabled = false;
        assert!(!should_invoke_meeting_helper(MEETING_REQUEST_CLASS, &o));
        o.auto_accept_enabled = true;
        assert!(should_invoke_meeting_helper(MEETING_REQUEST_CLASS, &o));
    }

    #[test]
    fn meeting_cancel_needs_auto_process_flag() {
        let mut o = oof(true);
        o.auto_process_enabled = false;
        assert!(!should_invoke_meeting_helper(MEETING_CANCELED_CLASS, &o));
    }

    #[test]
    fn non_meeting_class_never_invokes_helper() {
        assert!(!should_invoke_meeting_helper("IPM.Note", &oof(true)));
    }

    #[test]
    fn oof_reply_skipped_when_junk() {
        assert!(!should_send_oof_reply(&oof(true), Utc::now(), true, false, ""));
    }

    #[test]
    fn oof_reply_skipped_when_delegated_by_rule() {
        assert!(!should_send_oof_reply(&oof(true), Utc::now(), false, true, ""));
    }

    #[test]
    fn oof_reply_skipped_for_mailing_list_headers() {
        assert!(!should_send_oof_reply(&oof(true), Utc::now(), false, false, "List-Id: <x>"));
    }

    #[test]
    fn oof_reply_sent_when_active_and_clean() {
        assert!(should_send_oof_reply(&oof(true), Utc::now(), false, false, "Subject: hi"));
    }

    #[test]
    fn oof_reply_skipped_when_not_active() {
        assert!(!should_send_oof_reply(&oof(false), Utc::now(), false, false, ""));
    }

    #[test]
    fn base64_body_wraps_at_76_columns() {
        let body = "x".repeat(200);
        let wrapped = wrap_base64(&body);
        for line in wrapped.lines() {
            assert!(line.len() <= 76);
        }
    }

    #[test]
    fn compose_oof_reply_includes_in_reply_to_when_present() {
        let reply = compose_oof_reply(&oof(true), "bob@example.com", "Q3 numbers", "<abc@example.com>");
        assert!(reply.contains("In-Reply-To: <abc@example.com>"));
        assert!(reply.contains("To: bob@example.com"));
        assert!(reply.contains("Auto-Submitted: auto-replied"));
    }

    #[test]
    fn compose_oof_reply_omits_in_reply_to_when_absent() {
        let reply = compose_oof_reply(&oof(true), "bob@example.com", "Q3 numbers", "");
        assert!(!reply.contains("In-Reply-To"));
    }

    #[test]
    fn process_message_skips_meeting_helper_when_path_not_configured() {
        let store = store_with_oof(oof(true));
        let folder = store.open_folder(store.inbox_id()).unwrap();
        let mut message = folder.create_message().unwrap();
        let mut props = kopano_core::PropertyBag::new();
        props.set(PR_MESSAGE_CLASS, PropertyValue::String(MEETING_REQUEST_CLASS.into()));
        message.set_props(&props).unwrap();

        let config = MeetingHelperConfig { accept_helper_path: None, process_helper_path: None };
        let result = process_message(&config, &store, message.as_ref(), "bob@example.com", false, false, Utc::now());
        assert!(result.is_ok());
        let outbox = store.open_folder(store.outbox_id()).unwrap();
        assert_eq!(outbox.content_count().unwrap(), 0);
    }

    #[test]
    fn process_message_sends_oof_reply_for_plain_note() {
        let store = store_with_oof(oof(true));
        let folder = store.open_folder(store.inbox_id()).unwrap();
        let mut message = folder.create_message().unwrap();
        let mut props = kopano_core::PropertyBag::new();
        props.set(PR_SUBJECT, PropertyValue::String("quarterly numbers".into()));
        message.set_props(&props).unwrap();

        let config = MeetingHelperConfig::default();
        process_message(&config, &store, message.as_ref(), "bob@example.com", false, false, Utc::now()).unwrap();

        let outbox = store.open_folder(store.outbox_id()).unwrap();
        assert_eq!(outbox.content_count().unwrap(), 1);
    }

    #[test]
    fn process_message_skips_oof_reply_when_delegated_by_rule() {
        let store = store_with_oof(oof(true));
        let folder = store.open_folder(store.inbox_id()).unwrap();
        let message = folder.create_message().unwrap();

        let config = MeetingHelperConfig::default();
        process_message(&config, &store, message.as_ref(), "bob@example.com", false, true, Utc::now()).unwrap();

        let outbox = store.open_folder(store.outbox_id()).unwrap();
        assert_eq!(outbox.content_count().unwrap(), 0);
    }
}
