//! Single-delivery mode (§6's default): the MTA invokes this binary once
//! per message with the already-accepted recipient usernames on the
//! command line and the raw message on stdin or via `-f`.

use std::io::Read;

use chrono::Utc;
use kopano_core::config::{Config, DeliveryMode};
use kopano_core::{Error, Result};
use kopano_lmtp::orchestrator::{self, OrchestratorConfig};
use kopano_lmtp::resolver::{resolve_one, to_recipient, AddressBook, Lookup};
use kopano_rules::auto_reply::MeetingHelperConfig;
use kopano_rules::RuleEngineConfig;

use crate::address_book::LocalAddressBook;
use crate::cli::Cli;
use crate::converter::HeaderSplitConverter;
use crate::store_registry::{InMemoryStoreRegistry, StoreRegistry};

/// Reads the raw message from `-f FILE`, or stdin if absent.
pub fn read_message(cli: &Cli) -> Result<Vec<u8>> {
    match &cli.input_file {
        Some(path) => std::fs::read(path).map_err(Error::Io),
        None => {
            let mut buf = Vec::new();
            std::io::stdin().read_to_end(&mut buf).map_err(Error::Io)?;
            Ok(buf)
        }
    }
}

fn delivery_mode(cli: &Cli) -> DeliveryMode {
    if cli.junk {
        DeliveryMode::Junk
    } else if let Some(path) = &cli.public_folder {
        DeliveryMode::Public(path.clone())
    } else {
        DeliveryMode::Store
    }
}

fn qualify(username: &str) -> String {
    if username.contains('@') {
        username.to_string()
    } else {
        format!("{username}@localhost")
    }
}

fn orchestrator_config(config: &Config, cli: &Cli) -> OrchestratorConfig {
    OrchestratorConfig {
        rule_engine: RuleEngineConfig {
            forward_whitelist_domains: config.forward_whitelist_domains.clone(),
            no_double_forward: config.no_double_forward,
            path_separator: cli.path_separator,
            create_missing_subfolder: cli.create_missing_subfolder || config.create_missing_subfolder,
            forward_whitelist_domain_subject: config.forward_whitelist_domain_subject.clone(),
            forward_whitelist_domain_message: config.forward_whitelist_domain_message.clone(),
        },
        archive_on_delivery: config.archive_on_delivery,
        newmail_notify: !cli.no_notify && config.newmail_notify,
        spam_header_name: config.spam_header_name.clone(),
        spam_header_value: config.spam_header_value.clone(),
        meeting_helper: MeetingHelperConfig {
            accept_helper_path: config.meeting_autoaccept_path.as_ref().map(|p| p.display().to_string()),
            process_helper_path: config.meeting_autoprocess_path.as_ref().map(|p| p.display().to_string()),
        },
    }
}

/// Delivers `raw_message` to every username on the command line. Returns
/// the first error encountered (after attempting every recipient) so the
/// caller can still report per-recipient failures to its own log; `-R`
/// makes any single resolution failure abort the whole batch up front.
pub fn deliver_to_all(config: &Config, cli: &Cli, raw_message: &[u8]) -> Result<()> {
    let book = LocalAddressBook { strip_domain: cli.strip_domain };
    let registry = InMemoryStoreRegistry::new();
    let converter = HeaderSplitConverter;
    let mode = delivery_mode(cli);
    let subfolder = cli.store_subfolder.as_deref().or(cli.public_folder.as_deref());
    // `HeaderSplitConverter` never populates a delivery timestamp from
    // headers, so `-n` (delivery time = now) is this binary's only mode.
    let _ = cli.delivery_time_now;
    let now = Utc::now();
    let orch_config = orchestrator_config(config, cli);

    if cli.require_resolve {
        for username in &cli.usernames {
            let addr = qualify(username);
            if resolve_one(&book, &addr)? != kopano_core::ResolveOutcome::Resolved {
                return Err(Error::NotFound(username.clone()));
            }
        }
    }

    let mut last_err: Option<Error> = None;
    for username in &cli.usernames {
        let addr = qualify(username);
        let entry = match book.lookup(&addr)? {
            Lookup::Resolved(entry) => entry,
            Lookup::Ambiguous => {
                last_err = Some(Error::Ambiguous(username.clone()));
                continue;
            }
            Lookup::NotFound => {
                last_err = Some(Error::NotFound(username.clone()));
                continue;
            }
        };
        let recipient = to_recipient(&addr, &entry);
        let store = registry.open_for(&recipient.resolved_username)?;

        let outcome = orchestrator::deliver_one(
            &store,
            &converter,
            None,
            &orch_config,
            raw_message,
            &recipient,
            "mta@localhost",
            mode.clone(),
            subfolder,
            now,
        );
        if let Err(e) = outcome {
            tracing::warn!(recipient = %recipient.smtp, error = %e, "delivery failed");
            last_err = Some(e);
        } else if cli.mark_read {
            mark_latest_read(&store, &mode, subfolder, &orch_config)?;
        }
    }

    match last_err {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

fn mark_latest_read(
    store: &kopano_store::MemoryStore,
    mode: &DeliveryMode,
    subfolder: Option<&str>,
    orch_config: &OrchestratorConfig,
) -> Result<()> {
    use kopano_store::{Folder, Store};
    let folder_id = match mode {
        DeliveryMode::Store | DeliveryMode::Public(_) => {
            match subfolder {
                Some(path) if !path.is_empty() => kopano_store::resolve_path(
                    store,
                    path,
                    orch_config.rule_engine.path_separator,
                    orch_config.rule_engine.create_missing_subfolder,
                )?,
                _ => store.inbox_id(),
            }
        }
        DeliveryMode::Junk => store.inbox_id(),
    };
    let folder = store.open_folder(folder_id)?;
    if let Some(&latest) = folder.contents()?.last() {
        let mut message = folder.open_message(latest)?;
        message.set_read_flag(true)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn cli(args: &[&str]) -> Cli {
        let mut full = vec!["kopano-lmtpd"];
        full.extend_from_slice(args);
        Cli::parse_from(full)
    }

    #[test]
    fn delivers_to_a_single_local_user() {
        let config = Config::default();
        let cli = cli(&["alice"]);
        let raw = b"Subject: hi\r\n\r\nbody";
        assert!(deliver_to_all(&config, &cli, raw).is_ok());
    }

    #[test]
    fn qualify_appends_localhost_when_no_domain_given() {
        assert_eq!(qualify("alice"), "alice@localhost");
        assert_eq!(qualify("alice@example.com"), "alice@example.com");
    }

    #[test]
    fn require_resolve_aborts_before_any_delivery_on_bad_username() {
        let config = Config::default();
        let cli = cli(&["-R", ""]);
        let raw = b"Subject: hi\r\n\r\nbody";
        assert!(deliver_to_all(&config, &cli, raw).is_err());
    }
}
