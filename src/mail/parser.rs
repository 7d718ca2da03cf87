use mail_parser::{MessageParser, MimeHeaders, PartType};

use super::types::Message;
use crate::error::DecodeError;

/// Decode one raw RFC 822 message. Never fails: anything that cannot be
/// parsed is logged and replaced by the raw payload as lossy text.
pub fn decode_message(id: u32, raw: &[u8], source_account: &str) -> Message {
    match parse_message(id, raw, source_account) {
        Ok(message) => message,
        Err(e) => {
            tracing::warn!("{}; substituting raw payload", e);
            Message {
                id,
                subject: String::new(),
                from: String::new(),
                to: String::new(),
                date: String::new(),
                body: normalize_body(&String::from_utf8_lossy(raw)),
                source_account: source_account.to_string(),
            }
        }
    }
}

fn parse_message(id: u32, raw: &[u8], source_account: &str) -> Result<Message, DecodeError> {
    let (headers, body) = split_header_block(raw).ok_or_else(|| DecodeError {
        id,
        reason: "no header block".to_string(),
    })?;

    let message = MessageParser::default()
        .parse(raw)
        .ok_or_else(|| DecodeError {
            id,
            reason: "unparseable MIME structure".to_string(),
        })?;

    // mail-parser handles RFC 2047 encoded words and charsets
    let subject = message
        .subject()
        .map(|s| s.to_string())
        .or_else(|| raw_header(headers, "Subject"))
        .unwrap_or_default();

    let body = match extract_text_body(&message) {
        Some(text) => text,
        None => {
            tracing::debug!("Message {}: no decodable text part, using raw body", id);
            String::from_utf8_lossy(body).into_owned()
        }
    };

    Ok(Message {
        id,
        subject,
        from: raw_header(headers, "From").unwrap_or_default(),
        to: raw_header(headers, "To").unwrap_or_default(),
        date: raw_header(headers, "Date").unwrap_or_default(),
        body: normalize_body(&body),
        source_account: source_account.to_string(),
    })
}

fn extract_text_body(message: &mail_parser::Message) -> Option<String> {
    // First text/plain part of the body structure
    for part in message.text_bodies() {
        if let PartType::Text(text) = &part.body {
            return Some(text.to_string());
        }
    }

    // Fallback: any text part that is not explicitly something else
    for part in message.parts.iter() {
        if let PartType::Text(text) = &part.body {
            let content_type = part.content_type();
            if content_type
                .map(|ct| ct.subtype() == Some("plain"))
                .unwrap_or(true)
            {
                return Some(text.to_string());
            }
        }
    }

    // Single-part message of another type: the whole payload
    if message.parts.len() == 1 {
        let contents = message.parts[0].contents();
        if !contents.is_empty() {
            return Some(String::from_utf8_lossy(contents).into_owned());
        }
    }

    None
}

fn normalize_body(body: &str) -> String {
    body.trim_end_matches(['\r', '\n']).to_string()
}

/// Split a raw message at the blank line ending its header block. A message
/// with headers only and no body is accepted; one whose first line is not a
/// header is not.
fn split_header_block(raw: &[u8]) -> Option<(&[u8], &[u8])> {
    let first_line = raw.split(|&b| b == b'\n').next()?;
    if !looks_like_header(first_line) {
        return None;
    }

    if let Some(pos) = find(raw, b"\r\n\r\n") {
        return Some((&raw[..pos], &raw[pos + 4..]));
    }
    if let Some(pos) = find(raw, b"\n\n") {
        return Some((&raw[..pos], &raw[pos + 2..]));
    }
    Some((raw, &[]))
}

fn looks_like_header(line: &[u8]) -> bool {
    let Some(colon) = line.iter().position(|&b| b == b':') else {
        return false;
    };
    colon > 0
        && line[..colon]
            .iter()
            .all(|&b| b.is_ascii_graphic() && b != b':')
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Value of the first header named `name`, unfolded and trimmed but
/// otherwise verbatim.
fn raw_header(headers: &[u8], name: &str) -> Option<String> {
    let text = String::from_utf8_lossy(headers);
    let mut value: Option<String> = None;

    for line in text.split('\n') {
        let line = line.trim_end_matches('\r');
        if let Some(current) = value.as_mut() {
            if line.starts_with(' ') || line.starts_with('\t') {
                current.push(' ');
                current.push_str(line.trim());
                continue;
            }
            break;
        }
        if let Some((field, rest)) = line.split_once(':')
            && field.trim().eq_ignore_ascii_case(name)
        {
            value = Some(rest.trim().to_string());
        }
    }

    value
}
