//! Daemon/listener mode (`-l`/`-d`, §4.9 + §4.11): drives one LMTP session
//! to completion over an already-accepted connection, then delivers the
//! DATA-phase payload to every accepted recipient via the orchestrator.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use kopano_core::config::{Config, DeliveryMode};
use kopano_core::Result;
use kopano_lmtp::channel::{Channel, RawStream, ReadOutcome};
use kopano_lmtp::listener::Connection;
use kopano_lmtp::orchestrator::{self, apply_spam_override, OrchestratorConfig};
use kopano_lmtp::session::{self, destuff_line, is_data_terminator, parse_command, Session};
use kopano_rules::auto_reply::MeetingHelperConfig;
use kopano_rules::RuleEngineConfig;

use crate::address_book::LocalAddressBook;
use crate::converter::HeaderSplitConverter;
use crate::store_registry::{InMemoryStoreRegistry, StoreRegistry};

pub struct ConnectionContext {
    pub config: Config,
    pub registry: InMemoryStoreRegistry,
}

impl ConnectionContext {
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self { config, registry: InMemoryStoreRegistry::new() }
    }

    pub fn handle(&self, conn: Connection) {
        let result = match conn {
            Connection::Tcp(stream) => self.run(stream),
            Connection::Unix(stream) => self.run(stream),
        };
        if let Err(e) = result {
            tracing::warn!(error = %e, "session ended with an error");
        }
    }

    fn run<S: RawStream>(&self, stream: S) -> Result<()> {
        let mut channel = Channel::new(
            stream,
            Duration::from_secs(self.config.read_timeout_secs),
            self.config.max_line_length,
        );
        channel.write_line(session::GREETING)?;

        let book = LocalAddressBook { strip_domain: false };
        let mut sess = Session::new();

        loop {
            let line = match channel.read_line()? {
                ReadOutcome::Line(line) => line,
                ReadOutcome::Timeout => {
                    if channel.consecutive_timeouts() >= self.config.max_consecutive_timeouts {
                        channel.write_line(session::timeout_close_line())?;
                        return Ok(());
                    }
                    continue;
                }
                ReadOutcome::Closed => return Ok(()),
            };

            let cmd = parse_command(&line);
            let is_data = matches!(cmd, session::Command::Data);
            let is_quit = matches!(cmd, session::Command::Quit);
            for response in sess.handle_command(&cmd, &book)? {
                channel.write_line(&response)?;
            }
            if is_quit {
                return Ok(());
            }
            if is_data {
                let raw = read_data_body(&mut channel)?;
                let outcomes = self.deliver(&sess, &raw);
                for line in session::format_recipient_statuses(&sess.ordered_recipients, &outcomes) {
                    channel.write_line(&line)?;
                }
                sess = Session::new();
                sess.state = session::SessionState::Hello;
            }
        }
    }

    fn deliver(&self, sess: &Session, raw: &[u8]) -> Vec<Result<()>> {
        let converter = HeaderSplitConverter;
        let headers = String::from_utf8_lossy(raw);
        let base_mode = DeliveryMode::Store;
        let mode = apply_spam_override(
            base_mode,
            &headers,
            self.config.spam_header_name.as_deref(),
            self.config.spam_header_value.as_deref(),
        );
        let orch_config = OrchestratorConfig {
            rule_engine: RuleEngineConfig {
                forward_whitelist_domains: self.config.forward_whitelist_domains.clone(),
                no_double_forward: self.config.no_double_forward,
                path_separator: self.config.path_separator,
                create_missing_subfolder: self.config.create_missing_subfolder,
                forward_whitelist_domain_subject: self.config.forward_whitelist_domain_subject.clone(),
                forward_whitelist_domain_message: self.config.forward_whitelist_domain_message.clone(),
            },
            archive_on_delivery: self.config.archive_on_delivery,
            newmail_notify: self.config.newmail_notify,
            spam_header_name: self.config.spam_header_name.clone(),
            spam_header_value: self.config.spam_header_value.clone(),
            meeting_helper: MeetingHelperConfig {
                accept_helper_path: self.config.meeting_autoaccept_path.as_ref().map(|p| p.display().to_string()),
                process_helper_path: self.config.meeting_autoprocess_path.as_ref().map(|p| p.display().to_string()),
            },
        };
        let sender = sess.sender.as_deref().unwrap_or("unknown@localhost");
        let now = Utc::now();

        sess.ordered_recipients
            .iter()
            .map(|accepted| {
                let store = self.registry.open_for(&accepted.recipient.resolved_username)?;
                orchestrator::deliver_one(
                    &store,
                    &converter,
                    None,
                    &orch_config,
                    raw,
                    &accepted.recipient,
                    sender,
                    mode.clone(),
                    None,
                    now,
                )
            })
            .collect()
    }
}

fn read_data_body<S: RawStream>(channel: &mut Channel<S>) -> Result<Vec<u8>> {
    let mut body = Vec::new();
    loop {
        match channel.read_line()? {
            ReadOutcome::Line(line) if is_data_terminator(&line) => break,
            ReadOutcome::Line(line) => {
                body.extend_from_slice(destuff_line(&line).as_bytes());
                body.extend_from_slice(b"\r\n");
            }
            ReadOutcome::Timeout => continue,
            ReadOutcome::Closed => break,
        }
    }
    Ok(body)
}

/// Runs the listener until a shutdown signal arrives, building one
/// [`ConnectionContext`] shared across every accepted connection.
pub fn serve(config: Config) -> Result<()> {
    let ctx = Arc::new(ConnectionContext::new(config.clone()));
    kopano_lmtp::listener::run_listener(&config, move |conn| ctx.handle(conn)).map(|_| ())
}
