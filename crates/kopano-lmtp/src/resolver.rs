//! Recipient Resolver (C9, §4.8): turns raw `RCPT TO` strings into
//! `Recipient`s grouped by company and home-server, merging duplicates and
//! synthesising a search-key when the address book did not supply one.

use std::collections::BTreeMap;

use kopano_core::{Recipient, ResolveOutcome};

/// One address-book hit, as the resolver would receive it from an
/// external directory lookup (out of scope per the design: the directory
/// itself is an external collaborator, this is its result shape).
#[derive(Debug, Clone)]
pub struct ResolvedEntry {
    pub entry_id: String,
    pub display_name: String,
    pub account: String,
    pub smtp: String,
    pub addr_type: String,
    pub unicode_email: bool,
    pub display_type: u32,
    pub company_name: String,
    pub home_server: String,
    pub is_admin: bool,
    pub has_imap_feature: bool,
    pub object_type: ObjectType,
    pub search_key: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectType {
    MailUser,
    Other,
}

/// A remote-mailuser is a display-type the resolver must reject even when
/// the object-type is otherwise acceptable (§4.8).
pub(crate) const DISPLAY_TYPE_REMOTE_MAILUSER: u32 = 0x6;

pub trait AddressBook: Send + Sync {
    /// Looks up one raw `RCPT TO` address. Returns `Ok(None)` for
    /// not-found so the caller can distinguish it from a resolver I/O
    /// error, which is surfaced as `Err`.
    fn lookup(&self, raw: &str) -> kopano_core::Result<Lookup>;
}

pub enum Lookup {
    Resolved(ResolvedEntry),
    Ambiguous,
    NotFound,
}

/// company → (home-server → recipient), as §4.8 specifies. `BTreeMap` gives
/// deterministic iteration order, which the delivery orchestrator relies on
/// for master-message reuse grouping (§4.10 step 3).
pub type GroupedRecipients = BTreeMap<String, BTreeMap<String, Vec<Recipient>>>;

/// Resolves one raw recipient, synthesising a `Recipient` on success.
/// Mirrors §4.8's acceptance rule: only `object_type = mailuser` with a
/// non-remote display-type is accepted.
pub fn resolve_one(book: &dyn AddressBook, raw: &str) -> kopano_core::Result<ResolveOutcome> {
    match book.lookup(raw)? {
        Lookup::Ambiguous => Ok(ResolveOutcome::Ambiguous),
        Lookup::NotFound => Ok(ResolveOutcome::NotFound),
        Lookup::Resolved(entry) => {
            if entry.object_type != ObjectType::MailUser || entry.display_type == DISPLAY_TYPE_REMOTE_MAILUSER {
                Ok(ResolveOutcome::NotFound)
            } else {
                Ok(ResolveOutcome::Resolved)
            }
        }
    }
}

/// Builds the `Recipient` value for an accepted [`ResolvedEntry`],
/// synthesising `SMTP:<UPPER(smtp)>\0` when the directory supplied none.
#[must_use]
pub fn to_recipient(raw: &str, entry: &ResolvedEntry) -> Recipient {
    let search_key = entry
        .search_key
        .clone()
        .unwrap_or_else(|| format!("SMTP:{}\0", entry.smtp.to_uppercase()));
    Recipient {
        raw_input: raw.to_string(),
        resolved_username: entry.account.clone(),
        resolved_fullname: entry.display_name.clone(),
        company: entry.company_name.clone(),
        home_server: entry.home_server.clone(),
        smtp: entry.smtp.clone(),
        addr_type: entry.addr_type.clone(),
        entry_id: entry.entry_id.clone(),
        search_key,
        display_type: entry.display_type,
        admin_level: u32::from(entry.is_admin),
        has_imap_feature: entry.has_imap_feature,
        delivery_status_template: "250 2.1.5 %s Ok".into(),
        aliases: vec![raw.to_string()],
    }
}

/// Merges a newly resolved recipient into the grouped map, appending its
/// raw alias to an existing entry for the same (company, home-server,
/// smtp) rather than creating a duplicate (§4.8: "duplicates merged, the
/// merged recipient retains all raw RCPT aliases").
pub fn merge_into(grouped: &mut GroupedRecipients, recipient: Recipient) {
    let company = grouped.entry(recipient.company.clone()).or_default();
    let bucket = company.entry(recipient.home_server.clone()).or_default();
    if let Some(existing) = bucket.iter_mut().find(|r| r.smtp.eq_ignore_ascii_case(&recipient.smtp)) {
        existing.aliases.extend(recipient.aliases);
    } else {
        bucket.push(recipient);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(smtp: &str, object_type: ObjectType, display_type: u32) -> ResolvedEntry {
        ResolvedEntry {
            entry_id: "id1".into(),
            display_name: "Alice".into(),
            account: "alice".into(),
            smtp: smtp.into(),
            addr_type: "SMTP".into(),
            unicode_email: true,
            display_type,
            company_name: "acme".into(),
            home_server: "srv1".into(),
            is_admin: false,
            has_imap_feature: false,
            object_type,
            search_key: None,
        }
    }

    struct FakeBook(Lookup);
    impl AddressBook for FakeBook {
        fn lookup(&self, _raw: &str) -> kopano_core::Result<Lookup> {
            match &self.0 {
                Lookup::Resolved(e) => Ok(Lookup::Resolved(e.clone())),
                Lookup::Ambiguous => Ok(Lookup::Ambiguous),
                Lookup::NotFound => Ok(Lookup::NotFound),
            }
        }
    }

    #[test]
    fn mail_user_resolves() {
        let book = FakeBook(Lookup::Resolved(entry("alice@acme.com", ObjectType::MailUser, 0)));
        assert_eq!(resolve_one(&book, "<alice@acme.com>").unwrap(), ResolveOutcome::Resolved);
    }

    #[test]
    fn remote_mailuser_is_rejected_as_not_found() {
        let book = FakeBook(Lookup::Resolved(entry("alice@acme.com", ObjectType::MailUser, DISPLAY_TYPE_REMOTE_MAILUSER)));
        assert_eq!(resolve_one(&book, "<alice@acme.com>").unwrap(), ResolveOutcome::NotFound);
    }

    #[test]
    fn non_mailuser_object_is_rejected() {
        let book = FakeBook(Lookup::Resolved(entry("group@acme.com", ObjectType::Other, 0)));
        assert_eq!(resolve_one(&book, "<group@acme.com>").unwrap(), ResolveOutcome::NotFound);
    }

    #[test]
    fn missing_search_key_is_synthesised() {
        let e = entry("alice@acme.com", ObjectType::MailUser, 0);
        let r = to_recipient("<alice@acme.com>", &e);
        assert_eq!(r.search_key, "SMTP:ALICE@ACME.COM\0");
    }

    #[test]
    fn duplicate_recipients_merge_aliases() {
        let mut grouped = GroupedRecipients::new();
        let e = entry("alice@acme.com", ObjectType::MailUser, 0);
        merge_into(&mut grouped, to_recipient("<alice@acme.com>", &e));
        merge_into(&mut grouped, to_recipient("<Alice@ACME.com>", &e));
        let bucket = &grouped["acme"]["srv1"];
        assert_eq!(bucket.len(), 1);
        assert_eq!(bucket[0].aliases, vec!["<alice@acme.com>", "<Alice@ACME.com>"]);
    }
}
