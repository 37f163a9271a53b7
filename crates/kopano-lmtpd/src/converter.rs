//! Minimal RFC 5322 header/body split, standing in for `IMToMAPI` (an
//! external collaborator per the design — see
//! `kopano_lmtp::orchestrator::MessageConverter`). Good enough to drive
//! the rule engine's header-backed conditions; does not parse MIME
//! bodies, attachments or multipart structure.

use kopano_core::proptag::well_known::{
    PR_BODY, PR_INTERNET_MESSAGE_ID, PR_IN_REPLY_TO_ID, PR_MESSAGE_CLASS, PR_SUBJECT,
    PR_TRANSPORT_MESSAGE_HEADERS,
};
use kopano_core::{Error, PropertyBag, PropertyValue, Result};
use kopano_lmtp::orchestrator::MessageConverter;

pub struct HeaderSplitConverter;

impl MessageConverter for HeaderSplitConverter {
    fn convert(&self, raw: &[u8]) -> Result<PropertyBag> {
        let text = std::str::from_utf8(raw).map_err(|e| Error::ParseFail(e.to_string()))?;
        let (header_block, body) = split_headers(text);
        let headers = parse_headers(header_block);

        let mut props = PropertyBag::new();
        props.set(PR_MESSAGE_CLASS, PropertyValue::String("IPM.Note".into()));
        props.set(PR_TRANSPORT_MESSAGE_HEADERS, PropertyValue::String(header_block.to_string()));
        props.set(PR_BODY, PropertyValue::String(body.to_string()));
        if let Some(subject) = headers.get("subject") {
            props.set(PR_SUBJECT, PropertyValue::String(subject.clone()));
        }
        if let Some(id) = headers.get("message-id") {
            props.set(PR_INTERNET_MESSAGE_ID, PropertyValue::String(id.clone()));
        }
        if let Some(id) = headers.get("in-reply-to") {
            props.set(PR_IN_REPLY_TO_ID, PropertyValue::String(id.clone()));
        }
        Ok(props)
    }
}

fn split_headers(text: &str) -> (&str, &str) {
    for sep in ["\r\n\r\n", "\n\n"] {
        if let Some(pos) = text.find(sep) {
            return (&text[..pos], &text[pos + sep.len()..]);
        }
    }
    (text, "")
}

/// Unfolds continuation lines (leading whitespace) and lower-cases field
/// names; keeps the first occurrence of a repeated header.
fn parse_headers(block: &str) -> std::collections::HashMap<String, String> {
    let mut headers = std::collections::HashMap::new();
    let mut current: Option<(String, String)> = None;
    for line in block.lines() {
        if line.starts_with([' ', '\t']) {
            if let Some((_, value)) = current.as_mut() {
                value.push(' ');
                value.push_str(line.trim());
            }
            continue;
        }
        if let Some((name, value)) = current.take() {
            headers.entry(name).or_insert(value);
        }
        if let Some((name, value)) = line.split_once(':') {
            current = Some((name.trim().to_ascii_lowercase(), value.trim().to_string()));
        }
    }
    if let Some((name, value)) = current {
        headers.entry(name).or_insert(value);
    }
    headers
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_subject_and_body() {
        let raw = b"Subject: hello\r\nMessage-ID: <1@x>\r\n\r\nbody text";
        let props = HeaderSplitConverter.convert(raw).unwrap();
        assert_eq!(props.get(PR_SUBJECT).and_then(PropertyValue::as_str), Some("hello"));
        assert_eq!(props.get(PR_BODY).and_then(PropertyValue::as_str), Some("body text"));
        assert_eq!(props.get(PR_INTERNET_MESSAGE_ID).and_then(PropertyValue::as_str), Some("<1@x>"));
    }

    #[test]
    fn unfolds_continuation_lines() {
        let raw = b"Subject: hello\r\n  world\r\n\r\nbody";
        let props = HeaderSplitConverter.convert(raw).unwrap();
        assert_eq!(props.get(PR_SUBJECT).and_then(PropertyValue::as_str), Some("hello world"));
    }

    #[test]
    fn missing_body_separator_leaves_body_empty() {
        let raw = b"Subject: hello";
        let props = HeaderSplitConverter.convert(raw).unwrap();
        assert_eq!(props.get(PR_BODY).and_then(PropertyValue::as_str), Some(""));
    }
}
