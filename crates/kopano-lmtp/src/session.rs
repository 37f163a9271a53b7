//! LMTP session state machine (C10, §4.9). Parses the command stream,
//! enforces the `START → HELLO → MAIL → RCPT → DATA` transitions, and
//! produces the literal response strings downstream MTAs parse.

use kopano_core::{Recipient, Result};

use crate::resolver::GroupedRecipients;

pub const GREETING: &str = "220 2.1.5 LMTP server is ready";
const LHLO_LINES: &[&str] =
    &["250-SERVER ready", "250-PIPELINING", "250-ENHANCEDSTATUSCODE", "250-RSET", "250 SMTPUTF8"];
const BAD_SENDER_SYNTAX: &str = "503 5.1.7 Bad sender's mailbox address syntax";
const MAIL_OK: &str = "250 2.1.0 Ok";
const RCPT_OK: &str = "250 2.1.5 Ok";
const RSET_OK: &str = "250 2.1.0 Ok";
const DATA_START: &str = "354 2.1.5 Start mail input; end with <CRLF>.<CRLF>";
const QUIT_BYE: &str = "221 2.0.0 Bye";
const UNKNOWN_VERB: &str = "555 5.5.4 Command not recognized";
const TIMEOUT_CLOSE: &str = "221 5.0.0 Connection closed due to timeout";
const SHUTDOWN_CLOSE: &str = "221 2.0.0 Server is shutting down";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Start,
    Hello,
    Mail,
    Rcpt,
    Data,
    Quit,
}

/// A parsed client command, case-insensitive on the verb per §4.9.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Lhlo(String),
    MailFrom(String),
    RcptTo(String),
    Data,
    Rset,
    Quit,
    Unknown,
}

/// Parses one command line. The verb is matched case-insensitively; the
/// argument (everything after the verb and its following delimiter) is
/// passed through unmodified.
#[must_use]
pub fn parse_command(line: &str) -> Command {
    let upper = line.to_ascii_uppercase();
    if let Some(rest) = upper.strip_prefix("LHLO") {
        let _ = rest;
        let hostname = line.get(4..).unwrap_or("").trim().to_string();
        return Command::Lhlo(hostname);
    }
    if upper.starts_with("MAIL FROM:") {
        return Command::MailFrom(line[10..].trim().to_string());
    }
    if upper.starts_with("RCPT TO:") {
        return Command::RcptTo(line[8..].trim().to_string());
    }
    if upper == "DATA" {
        return Command::Data;
    }
    if upper == "RSET" {
        return Command::Rset;
    }
    if upper == "QUIT" {
        return Command::Quit;
    }
    Command::Unknown
}

/// Extracts the bracketed address from a `MAIL FROM:<...>` / `RCPT
/// TO:<...>` argument. `None` if the `<...>` delimiters are missing.
fn extract_address(arg: &str) -> Option<&str> {
    let start = arg.find('<')?;
    let end = arg[start..].find('>')? + start;
    Some(&arg[start + 1..end])
}

/// One accepted recipient, carrying the object id it will resolve to
/// during DATA-phase delivery plus the data needed to answer its RCPT TO
/// and DATA lines.
#[derive(Debug, Clone)]
pub struct AcceptedRecipient {
    pub raw: String,
    pub recipient: Recipient,
}

/// The session's mutable state across the command stream. The driver in
/// `run_session` (kept in `crate::listener`/CLI call sites rather than
/// here, to keep this module I/O-free and directly testable) owns a
/// `Session` and feeds it one parsed `Command` at a time.
pub struct Session {
    pub state: SessionState,
    pub sender: Option<String>,
    /// Recipients in the exact order `RCPT TO` accepted them — drives
    /// DATA-phase response ordering (§4.9, testable property 9).
    pub ordered_recipients: Vec<AcceptedRecipient>,
    pub grouped: GroupedRecipients,
}

impl Default for Session {
    fn default() -> Self {
        Self { state: SessionState::Start, sender: None, ordered_recipients: Vec::new(), grouped: GroupedRecipients::new() }
    }
}

impl Session {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Resets MAIL/RCPT state only, per `RSET` semantics (§4.9); does not
    /// affect whether `LHLO` has already happened.
    fn reset_transaction(&mut self) {
        self.sender = None;
        self.ordered_recipients.clear();
        self.grouped.clear();
        if self.state != SessionState::Start {
            self.state = SessionState::Hello;
        }
    }

    /// Handles one command, advancing `self.state` and returning the
    /// response line(s) to send. `DATA`'s body is read by the caller after
    /// seeing `DATA_START`; this function only validates the preconditions
    /// for entering the data phase.
    pub fn handle_command(&mut self, cmd: &Command, resolver: &dyn crate::resolver::AddressBook) -> Result<Vec<String>> {
        match cmd {
            Command::Lhlo(_hostname) => {
                // The hostname argument is logged by the caller, never
                // validated (§ SUPPLEMENTED FEATURES: LHLO accepts any
                // token after the command word, including none).
                self.state = SessionState::Hello;
                Ok(LHLO_LINES.iter().map(|s| (*s).to_string()).collect())
            }
            Command::MailFrom(arg) => match extract_address(arg) {
                Some(addr) => {
                    self.sender = Some(addr.to_string());
                    self.state = SessionState::Mail;
                    Ok(vec![MAIL_OK.to_string()])
                }
                None => Ok(vec![BAD_SENDER_SYNTAX.to_string()]),
            },
            Command::RcptTo(arg) => {
                let Some(addr) = extract_address(arg) else {
                    return Ok(vec![BAD_SENDER_SYNTAX.to_string()]);
                };
                match resolver.lookup(addr) {
                    Ok(crate::resolver::Lookup::Ambiguous) => {
                        Ok(vec!["503 5.1.4 Destination mailbox address ambiguous".to_string()])
                    }
                    Ok(crate::resolver::Lookup::NotFound) => Ok(vec!["503 5.1.1 User does not exist".to_string()]),
                    Ok(crate::resolver::Lookup::Resolved(entry)) => {
                        if entry.object_type != crate::resolver::ObjectType::MailUser
                            || entry.display_type == crate::resolver::DISPLAY_TYPE_REMOTE_MAILUSER
                        {
                            return Ok(vec!["503 5.1.1 User does not exist".to_string()]);
                        }
                        let recipient = crate::resolver::to_recipient(addr, &entry);
                        crate::resolver::merge_into(&mut self.grouped, recipient.clone());
                        self.ordered_recipients.push(AcceptedRecipient { raw: addr.to_string(), recipient });
                        self.state = SessionState::Rcpt;
                        Ok(vec![RCPT_OK.to_string()])
                    }
                    Err(e) => Ok(vec![format!("503 5.1.1 Connection error: {}", e.kind())]),
                }
            }
            Command::Data => {
                if self.ordered_recipients.is_empty() {
                    return Ok(vec!["503 5.5.1 No valid recipients".to_string()]);
                }
                self.state = SessionState::Data;
                Ok(vec![DATA_START.to_string()])
            }
            Command::Rset => {
                self.reset_transaction();
                Ok(vec![RSET_OK.to_string()])
            }
            Command::Quit => {
                self.state = SessionState::Quit;
                Ok(vec![QUIT_BYE.to_string()])
            }
            Command::Unknown => Ok(vec![UNKNOWN_VERB.to_string()]),
        }
    }
}

/// De-stuffs one DATA-phase body line per §4.9: a line beginning with `.`
/// has exactly one leading dot removed; the line terminator is not part of
/// `line` (callers split on CRLF before calling this).
#[must_use]
pub fn destuff_line(line: &str) -> &str {
    line.strip_prefix('.').unwrap_or(line)
}

/// Whether a DATA-phase line is the terminator (`.` alone).
#[must_use]
pub fn is_data_terminator(line: &str) -> bool {
    line == "."
}

/// Maps per-recipient delivery outcomes into the literal status lines
/// §4.9 specifies, in the same order as `ordered_recipients`.
#[must_use]
pub fn format_recipient_statuses(recipients: &[AcceptedRecipient], outcomes: &[Result<()>]) -> Vec<String> {
    recipients
        .iter()
        .zip(outcomes)
        .map(|(r, outcome)| match outcome {
            Ok(()) => r.recipient.format_status(&r.recipient.delivery_status_template),
            Err(e) => e.lmtp_status(&r.raw),
        })
        .collect()
}

#[must_use]
pub fn timeout_close_line() -> &'static str {
    TIMEOUT_CLOSE
}

#[must_use]
pub fn shutdown_close_line() -> &'static str {
    SHUTDOWN_CLOSE
}
