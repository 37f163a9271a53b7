//! Configuration for the LMTP delivery agent and search folder engine.
//!
//! Loaded from environment variables: every setting has a typed field, a
//! documented default, and an `env` lookup helper so `--dump-config` can
//! round-trip what was actually used.

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;

use serde::Serialize;

/// Process model for the LMTP listener (§4.11).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ProcessModel {
    Fork,
    Thread,
}

impl ProcessModel {
    fn parse(s: &str) -> Self {
        if s.eq_ignore_ascii_case("thread") {
            Self::Thread
        } else {
            Self::Fork
        }
    }
}

/// Delivery mode selector (§4.10).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum DeliveryMode {
    Store,
    Junk,
    Public(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct Config {
    // Listener (§4.11)
    pub lmtp_listen: Vec<String>,
    pub server_bind: Option<String>,
    pub lmtp_port: Option<u16>,
    pub bind_to_device: Option<String>,
    pub lmtp_max_threads: usize,
    pub process_model: ProcessModel,
    pub python_plugin_enabled: bool,

    // Channel (§4.1)
    pub read_timeout_secs: u64,
    pub max_consecutive_timeouts: u32,
    pub max_line_length: usize,

    // Indexer (§4.2)
    pub indexer_socket_path: Option<PathBuf>,
    pub indexer_timeout_secs: u64,
    pub indexer_excluded_properties: Vec<u16>,

    // Rule engine / forward anti-loop (§4.6)
    pub forward_whitelist_domains: Vec<String>,
    pub forward_whitelist_domain_subject: String,
    pub forward_whitelist_domain_message: String,
    pub no_double_forward: bool,

    // Delivery (§4.10)
    pub path_separator: char,
    pub create_missing_subfolder: bool,
    pub archive_on_delivery: bool,
    pub newmail_notify: bool,
    pub spam_header_name: Option<String>,
    pub spam_header_value: Option<String>,

    // Autoresponder / auto-accept (§4.7)
    pub autoresponder_path: Option<PathBuf>,
    pub meeting_autoaccept_path: Option<PathBuf>,
    pub meeting_autoprocess_path: Option<PathBuf>,

    // Raw-message-log policy
    pub raw_message_log_enabled: bool,
    pub raw_message_log_dir: Option<PathBuf>,

    // Misc
    pub config_path: Option<PathBuf>,
    pub server_path: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            lmtp_listen: vec!["*:2003".to_string()],
            server_bind: None,
            lmtp_port: None,
            bind_to_device: None,
            lmtp_max_threads: 20,
            process_model: ProcessModel::Fork,
            python_plugin_enabled: false,
            read_timeout_secs: 60,
            max_consecutive_timeouts: 10,
            max_line_length: 65536,
            indexer_socket_path: None,
            indexer_timeout_secs: 10,
            indexer_excluded_properties: Vec::new(),
            forward_whitelist_domains: Vec::new(),
            forward_whitelist_domain_subject: "Undeliverable: forwarded message rejected".into(),
            forward_whitelist_domain_message: "The rule could not forward this message because the destination domain is not in the administrator's whitelist.".into(),
            no_double_forward: true,
            path_separator: '\\',
            create_missing_subfolder: false,
            archive_on_delivery: false,
            newmail_notify: true,
            spam_header_name: None,
            spam_header_value: None,
            autoresponder_path: None,
            meeting_autoaccept_path: None,
            meeting_autoprocess_path: None,
            raw_message_log_enabled: false,
            raw_message_log_dir: None,
            config_path: None,
            server_path: "default:".into(),
        }
    }
}

impl Config {
    /// Loads configuration from environment variables, falling back to the
    /// documented defaults for anything unset.
    #[must_use]
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Ok(v) = env::var("lmtp_listen") {
            cfg.lmtp_listen = v.split_whitespace().map(str::to_string).collect();
        }
        cfg.server_bind = env::var("server_bind").ok();
        cfg.lmtp_port = env::var("lmtp_port").ok().and_then(|v| v.parse().ok());
        cfg.bind_to_device = env::var("server_bind_interface").ok();
        if let Ok(v) = env::var("lmtp_max_threads") {
            cfg.lmtp_max_threads = v.parse().unwrap_or(cfg.lmtp_max_threads);
        }
        if let Ok(v) = env::var("process_model") {
            cfg.process_model = ProcessModel::parse(&v);
        }
        cfg.python_plugin_enabled = env_bool("python_plugin_enabled", false);
        if let Ok(v) = env::var("indexer_socket") {
            cfg.indexer_socket_path = Some(PathBuf::from(v));
        }
        if let Ok(v) = env::var("forward_whitelist_domains") {
            cfg.forward_whitelist_domains = v.split_whitespace().map(str::to_string).collect();
        }
        cfg.no_double_forward = env_bool("no_double_forward", cfg.no_double_forward);
        if let Ok(v) = env::var("path_separator") {
            cfg.path_separator = v.chars().next().unwrap_or(cfg.path_separator);
        }
        cfg.create_missing_subfolder = env_bool("create_missing_subfolder", cfg.create_missing_subfolder);
        cfg.archive_on_delivery = env_bool("archive_on_delivery", cfg.archive_on_delivery);
        cfg.newmail_notify = env_bool("newmail_notify", cfg.newmail_notify);
        cfg.spam_header_name = env::var("spam_header_name").ok();
        cfg.spam_header_value = env::var("spam_header_value").ok();
        if let Ok(v) = env::var("autoresponder_path") {
            cfg.autoresponder_path = Some(PathBuf::from(v));
        }
        if let Ok(v) = env::var("mr_accept_path") {
            cfg.meeting_autoaccept_path = Some(PathBuf::from(v));
        }
        if let Ok(v) = env::var("mr_process_path") {
            cfg.meeting_autoprocess_path = Some(PathBuf::from(v));
        }
        cfg
    }

    /// A flat map suitable for `--dump-config`, built from the same
    /// `serde` derive as everything else rather than a second hand-rolled
    /// serialization format.
    #[must_use]
    pub fn dump(&self) -> HashMap<String, String> {
        serde_json::to_value(self)
            .ok()
            .and_then(|v| v.as_object().cloned())
            .map(|obj| {
                obj.into_iter()
                    .map(|(k, v)| (k, v.to_string()))
                    .collect()
            })
            .unwrap_or_default()
    }
}

fn env_bool(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(v) => matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}
