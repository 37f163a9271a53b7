//! Auto-reply loop guard (§4.6.2): before any REPLY, OOF-REPLY or
//! FORWARD action, the message's raw transport headers are checked
//! against two header stop-lists so the rule engine never auto-replies
//! to a mailing list, vacation responder, or bulk sender.
//!
//! Grounded on the header-matching pass in `rules.cpp`: this
//! implementation uses the stricter "prefix before first `:`"
//! exact-match rule rather than a looser bare-name match.

/// Header names whose presence (matched case-insensitively against the
/// text before the first `:`) suppresses the action, regardless of
/// value.
const EXACT_HEADER_NAMES: &[&str] = &[
    "x-kopano-vacation",
    "auto-submitted",
    "precedence",
    "list-id",
    "list-help",
    "list-subscribe",
    "list-unsubscribe",
    "list-post",
    "list-owner",
    "list-archive",
];

/// Whole-line prefixes (matched case-insensitively against the full
/// line) that suppress the action.
const LINE_PREFIXES: &[&str] = &["x-spam-flag: yes", "x-is-junk: yes", "x-amazon", "x-linkedin"];

/// Returns `true` if `transport_headers` (the raw, `\n`-joined header
/// block) matches either stop-list, meaning a REPLY/OOF-REPLY/FORWARD
/// action must be skipped.
#[must_use]
pub fn should_suppress(transport_headers: &str) -> bool {
    for line in transport_headers.split('\n') {
        let line = line.trim_end_matches('\r');
        if LINE_PREFIXES.iter().any(|p| line.to_lowercase().starts_with(p)) {
            return true;
        }
        let name = line.split(':').next().unwrap_or(line).trim().to_lowercase();
        if EXACT_HEADER_NAMES.contains(&name.as_str()) {
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_header_name_match_is_case_insensitive() {
        let headers = "Subject: hi\nAuto-Submitted: auto-replied\nFrom: a@b.com";
        assert!(should_suppress(headers));
    }

    #[test]
    fn list_id_header_suppresses() {
        assert!(should_suppress("List-Id: <foo.example.com>"));
    }

    #[test]
    fn line_prefix_match_is_case_insensitive() {
        assert!(should_suppress("X-Spam-Flag: YES\nSubject: test"));
    }

    #[test]
    fn amazon_prefix_matches_without_colon_value() {
        assert!(should_suppress("X-AMAZON-TRACKING-ID: abc123"));
    }

    #[test]
    fn ordinary_headers_do_not_suppress() {
        let headers = "Subject: hi\nFrom: a@b.com\nTo: c@d.com";
        assert!(!should_suppress(headers));
    }

    #[test]
    fn header_name_substring_without_colon_prefix_does_not_match() {
        // "precedence-ish" is not an exact "precedence" header name.
        assert!(!should_suppress("Precedence-ish: bulk"));
    }
}
