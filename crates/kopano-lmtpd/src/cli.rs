//! Command-line surface (§6): single-delivery mode (the default, invoked
//! by an MTA per recipient) plus the `-l`/`-d` listener mode and the
//! shared config/verbosity/exit-code flags.

use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "kopano-lmtpd", version, about = "Kopano LMTP delivery agent")]
pub struct Cli {
    /// Path to the configuration file (`lmtp_listen`, `forward_whitelist_domains`, ...).
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    pub config_path: Option<PathBuf>,

    /// Server socket URL for the admin/store connection (e.g. `file:///var/run/kopano/server.sock`).
    #[arg(short = 'h', long = "host", value_name = "URL")]
    pub server_path: Option<String>,

    /// Reads the message body from `FILE` instead of stdin.
    #[arg(short = 'f', long = "file", value_name = "FILE")]
    pub input_file: Option<PathBuf>,

    /// Delivers into the Junk folder instead of the inbox.
    #[arg(short = 'j', long = "junk")]
    pub junk: bool,

    /// Delivers into a subfolder path under the user's own store.
    #[arg(short = 'F', long = "folder", value_name = "PATH", conflicts_with = "public_folder")]
    pub store_subfolder: Option<String>,

    /// Delivers into a subfolder path under the public store.
    #[arg(short = 'P', long = "public-folder", value_name = "PATH", conflicts_with = "store_subfolder")]
    pub public_folder: Option<String>,

    /// Path separator for `-F`/`-P` (default `\`).
    #[arg(short = 'p', long = "path-separator", default_value = "\\")]
    pub path_separator: char,

    /// Creates the destination subfolder if it does not already exist.
    #[arg(short = 'C', long = "create-folder")]
    pub create_missing_subfolder: bool,

    /// Runs as an LMTP listener instead of single-delivery mode.
    #[arg(short = 'l', long = "listen")]
    pub listen: bool,

    /// Daemonizes and listens (implies `-l`).
    #[arg(short = 'd', long = "daemonize")]
    pub daemonize: bool,

    /// Marks the delivered message as read.
    #[arg(short = 'r', long = "read")]
    pub mark_read: bool,

    /// Suppresses the new-mail notification.
    #[arg(short = 'N', long = "no-notify")]
    pub no_notify: bool,

    /// Uses the current time as the delivery time instead of any header-carried value.
    #[arg(short = 'n', long = "now")]
    pub delivery_time_now: bool,

    /// Strips the domain part from each recipient username before resolving.
    #[arg(short = 'e', long = "strip-domain")]
    pub strip_domain: bool,

    /// Requires every recipient to resolve; any failure aborts the whole delivery.
    #[arg(short = 'R', long = "require-resolve")]
    pub require_resolve: bool,

    /// Maps exit codes to the qmail convention (111/100) instead of EX_* (75/70).
    #[arg(short = 'q', long = "qmail")]
    pub qmail_exit_codes: bool,

    /// Suppresses informational output.
    #[arg(short = 's', long = "silent")]
    pub silent: bool,

    /// Increases verbosity; repeat for trace-level logs.
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Path to the autoresponder helper script.
    #[arg(short = 'a', long = "autoresponder", value_name = "PATH")]
    pub autoresponder_path: Option<PathBuf>,

    /// Prints the effective configuration and exits.
    #[arg(long = "dump-config")]
    pub dump_config: bool,

    /// Recipient usernames (single-delivery mode); ignored in listener mode.
    pub usernames: Vec<String>,
}

/// Exit codes per §6: `sysexits.h`-style by default, qmail-style (`-q`) on request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitOutcome {
    Ok,
    Tempfail,
    Software,
    Usage,
}

impl ExitOutcome {
    #[must_use]
    pub fn code(self, qmail: bool) -> i32 {
        match (self, qmail) {
            (Self::Ok, _) => 0,
            (Self::Tempfail, true) => 111,
            (Self::Tempfail, false) => 75,
            (Self::Software, true) => 100,
            (Self::Software, false) => 70,
            (Self::Usage, _) => 64,
        }
    }
}

/// Classifies a delivery error into the exit-code family §6/§7 specify.
#[must_use]
pub fn classify_error(err: &kopano_core::Error) -> ExitOutcome {
    if err.is_recoverable() {
        return ExitOutcome::Tempfail;
    }
    match err {
        kopano_core::Error::Database(_) | kopano_core::Error::StoreNotFound(_) => ExitOutcome::Tempfail,
        kopano_core::Error::InvalidArgument(_) | kopano_core::Error::MissingField(_) => ExitOutcome::Usage,
        _ => ExitOutcome::Software,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sysexits_mapping_matches_spec_codes() {
        assert_eq!(ExitOutcome::Ok.code(false), 0);
        assert_eq!(ExitOutcome::Tempfail.code(false), 75);
        assert_eq!(ExitOutcome::Software.code(false), 70);
        assert_eq!(ExitOutcome::Usage.code(false), 64);
    }

    #[test]
    fn qmail_mapping_overrides_tempfail_and_software() {
        assert_eq!(ExitOutcome::Tempfail.code(true), 111);
        assert_eq!(ExitOutcome::Software.code(true), 100);
        assert_eq!(ExitOutcome::Ok.code(true), 0);
    }

    #[test]
    fn deadlock_classifies_as_tempfail() {
        let err = kopano_core::Error::Deadlock("t1".into());
        assert_eq!(classify_error(&err), ExitOutcome::Tempfail);
    }

    #[test]
    fn invalid_argument_classifies_as_usage() {
        let err = kopano_core::Error::InvalidArgument("bad flag".into());
        assert_eq!(classify_error(&err), ExitOutcome::Usage);
    }
}
