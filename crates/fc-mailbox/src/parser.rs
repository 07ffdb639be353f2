//! RFC822 parsing: headers, body extraction, HTML stripping, quoted-text
//! and signature removal, and the reply-to-outreach filter.

use crate::contact::{self, ContactSignal};
use crate::error::{MailboxError, Result};
use chrono::{DateTime, Utc};
use mailparse::MailHeaderMap;
use std::sync::OnceLock;

#[derive(Debug, Clone)]
pub struct ParsedMessage {
    pub message_id: String,
    pub thread_id: String,
    pub subject: String,
    pub from_email: String,
    pub to_email: String,
    pub body: String,
    pub contact: ContactSignal,
    /// Parsed `Date` header; falls back to the moment it was parsed if the
    /// header is missing or unparseable.
    pub received_at: DateTime<Utc>,
}

impl ParsedMessage {
    /// A reply to outreach has a threading reference to an earlier message
    /// (`thread_id != message_id`) or a `re:`/`fwd:` subject.
    pub fn is_reply_to_outreach(&self) -> bool {
        if self.thread_id != self.message_id {
            return true;
        }
        let subject = self.subject.to_lowercase();
        subject.starts_with("re:") || subject.starts_with("fwd:")
    }
}

pub fn parse_message(raw: &[u8]) -> Result<ParsedMessage> {
    let parsed = mailparse::parse_mail(raw).map_err(|e| MailboxError::Parse(e.to_string()))?;
    let headers = &parsed.headers;

    let message_id = strip_angle_brackets(
        &headers
            .get_first_value("Message-ID")
            .unwrap_or_default(),
    );
    let thread_id = extract_thread_id(&headers, &message_id);
    let subject = headers.get_first_value("Subject").unwrap_or_default();
    let from_email = extract_email_address(&headers.get_first_value("From").unwrap_or_default());
    let to_email = extract_email_address(&headers.get_first_value("To").unwrap_or_default());

    let raw_body = extract_body(&parsed)?;
    let body = clean_body(&raw_body);
    let contact = contact::detect(&body);
    let received_at = extract_date(&headers);

    Ok(ParsedMessage {
        message_id,
        thread_id,
        subject,
        from_email,
        to_email,
        body,
        contact,
        received_at,
    })
}

fn extract_date(headers: &[mailparse::MailHeader]) -> DateTime<Utc> {
    headers
        .get_first_value("Date")
        .and_then(|raw| mailparse::dateparse(&raw).ok())
        .and_then(|epoch| DateTime::from_timestamp(epoch, 0))
        .unwrap_or_else(Utc::now)
}

fn extract_thread_id(headers: &[mailparse::MailHeader], message_id: &str) -> String {
    if let Some(in_reply_to) = headers.get_first_value("In-Reply-To") {
        if let Some(first) = in_reply_to.split_whitespace().next() {
            return strip_angle_brackets(first);
        }
    }
    if let Some(references) = headers.get_first_value("References") {
        if let Some(first) = references.split_whitespace().next() {
            return strip_angle_brackets(first);
        }
    }
    message_id.to_string()
}

fn strip_angle_brackets(raw: &str) -> String {
    raw.trim().trim_start_matches('<').trim_end_matches('>').to_string()
}

fn extract_email_address(header: &str) -> String {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    let re = RE.get_or_init(|| regex::Regex::new(r"<([^>]+)>").unwrap());
    match re.captures(header) {
        Some(caps) => caps[1].to_string(),
        None => header.trim().to_string(),
    }
}

fn extract_body(parsed: &mailparse::ParsedMail) -> Result<String> {
    if parsed.subparts.is_empty() {
        return parsed
            .get_body()
            .map_err(|e| MailboxError::Parse(e.to_string()));
    }

    let mut html_fallback: Option<String> = None;
    for part in parsed.subparts.iter() {
        let content_type = &part.ctype.mimetype;
        let disposition = part
            .get_headers()
            .get_first_value("Content-Disposition")
            .unwrap_or_default();
        if disposition.to_lowercase().contains("attachment") {
            continue;
        }
        if content_type == "text/plain" {
            if let Ok(body) = part.get_body() {
                return Ok(body);
            }
        } else if content_type == "text/html" && html_fallback.is_none() {
            html_fallback = part.get_body().ok();
        } else if !part.subparts.is_empty() {
            if let Ok(nested) = extract_body(part) {
                if !nested.is_empty() {
                    return Ok(nested);
                }
            }
        }
    }

    Ok(html_fallback.unwrap_or_default())
}

fn clean_body(raw: &str) -> String {
    let stripped = strip_html(raw);
    let no_quotes = strip_quoted_and_signature(&stripped);
    normalize_whitespace(&no_quotes)
}

fn strip_html(text: &str) -> String {
    if !text.contains('<') {
        return text.to_string();
    }
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    let re = RE.get_or_init(|| regex::Regex::new(r"(?s)<[^>]+>").unwrap());
    re.replace_all(text, "").to_string()
}

fn strip_quoted_and_signature(text: &str) -> String {
    static WROTE_RE: OnceLock<regex::Regex> = OnceLock::new();
    let wrote_re = WROTE_RE.get_or_init(|| regex::Regex::new(r"^On .+ wrote:$").unwrap());

    let mut kept = Vec::new();
    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with('>') {
            continue;
        }
        if trimmed == "--" || trimmed == "___" || trimmed == "---" {
            break;
        }
        if wrote_re.is_match(trimmed) {
            break;
        }
        kept.push(line);
    }
    kept.join("\n")
}

fn normalize_whitespace(text: &str) -> String {
    let mut normalized = Vec::new();
    let mut blank_count = 0;
    for line in text.lines() {
        let trimmed = line.trim_end();
        if trimmed.trim().is_empty() {
            blank_count += 1;
            if blank_count <= 2 {
                normalized.push(trimmed);
            }
        } else {
            blank_count = 0;
            normalized.push(trimmed);
        }
    }
    normalized.join("\n").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_message(in_reply_to: Option<&str>, subject: &str, body: &str) -> String {
        let mut headers = format!(
            "From: Jane Doe <jane@example.com>\r\nTo: outreach@example.com\r\nMessage-ID: <m2@example.com>\r\nSubject: {subject}\r\n"
        );
        if let Some(irt) = in_reply_to {
            headers.push_str(&format!("In-Reply-To: <{irt}>\r\n"));
        }
        format!("{headers}Content-Type: text/plain\r\n\r\n{body}")
    }

    #[test]
    fn reply_with_threading_reference_is_detected() {
        let raw = raw_message(Some("m1@example.com"), "Re: outreach", "Sounds good.");
        let parsed = parse_message(raw.as_bytes()).unwrap();
        assert_eq!(parsed.thread_id, "m1@example.com");
        assert!(parsed.is_reply_to_outreach());
    }

    #[test]
    fn reply_by_subject_prefix_alone_is_detected() {
        let raw = raw_message(None, "Fwd: outreach", "Sounds good.");
        let parsed = parse_message(raw.as_bytes()).unwrap();
        assert_eq!(parsed.thread_id, parsed.message_id);
        assert!(parsed.is_reply_to_outreach());
    }

    #[test]
    fn brand_new_message_is_not_a_reply() {
        let raw = raw_message(None, "Hello there", "Just saying hi.");
        let parsed = parse_message(raw.as_bytes()).unwrap();
        assert!(!parsed.is_reply_to_outreach());
    }

    #[test]
    fn quoted_text_and_signature_are_stripped() {
        let body = "I'm interested, tell me more.\n\nOn Tue, Jan 1 wrote:\n> original text\n--\nJane";
        let raw = raw_message(Some("m1@example.com"), "Re: outreach", body);
        let parsed = parse_message(raw.as_bytes()).unwrap();
        assert_eq!(parsed.body, "I'm interested, tell me more.");
    }
}
