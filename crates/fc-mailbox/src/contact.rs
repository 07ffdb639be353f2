//! Cheap contact-info pre-signal. Not authoritative — the Analyzer has the
//! final word on intent and contact detection; this only gives the Poller
//! a rough `has_contact` hint for logging/metrics before the reply even
//! reaches the pipeline.

use phonenumber::Mode;
use std::sync::OnceLock;

const ADDRESS_KEYWORDS: &[&str] = &[
    "address", "shipping", "delivery", "street", "avenue", "road", "city", "state", "zip",
    "postal", "country", "apt", "suite", "building", "floor", "house", "lane", "boulevard",
    "drive",
];

fn address_pattern() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| {
        regex::Regex::new(r"(?i)(?:shipping\s+|delivery\s+)?address[:\s]+([^\n]+)").unwrap()
    })
}

#[derive(Debug, Clone, Default)]
pub struct ContactSignal {
    pub has_phone: bool,
    pub has_address: bool,
    pub phone_numbers: Vec<String>,
    pub address_text: Option<String>,
}

/// Scan text for phone numbers and address-shaped content. Phone numbers
/// are only reported if they parse as valid E.164 numbers.
pub fn detect(text: &str) -> ContactSignal {
    let phone_numbers = extract_phone_numbers(text);
    let address_text = extract_address(text);

    ContactSignal {
        has_phone: !phone_numbers.is_empty(),
        has_address: address_text.is_some(),
        phone_numbers,
        address_text,
    }
}

fn extract_phone_numbers(text: &str) -> Vec<String> {
    let mut found = Vec::new();
    for candidate in candidate_tokens(text) {
        if let Ok(parsed) = phonenumber::parse(None, &candidate) {
            if phonenumber::is_valid(&parsed) {
                let e164 = parsed.format().mode(Mode::E164).to_string();
                if !found.contains(&e164) {
                    found.push(e164);
                }
            }
        }
    }
    found
}

/// Loose tokenization: runs of digits, plus punctuation/whitespace/`+`
/// commonly found inside phone numbers.
fn candidate_tokens(text: &str) -> Vec<String> {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    let re = RE.get_or_init(|| regex::Regex::new(r"[+(]?[\d][\d\s().-]{6,}\d").unwrap());
    re.find_iter(text).map(|m| m.as_str().to_string()).collect()
}

fn extract_address(text: &str) -> Option<String> {
    let lower = text.to_lowercase();
    if !ADDRESS_KEYWORDS.iter().any(|kw| lower.contains(kw)) {
        return None;
    }

    if let Some(caps) = address_pattern().captures(text) {
        return Some(caps[1].trim().to_string());
    }

    for line in text.lines() {
        let line_lower = line.to_lowercase();
        if ADDRESS_KEYWORDS.iter().any(|kw| line_lower.contains(kw)) && line.trim().len() > 10 {
            return Some(line.trim().to_string());
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_phone_is_detected() {
        let signal = detect("Call me at +1 415 555 0100 whenever you're free.");
        assert!(signal.has_phone);
        assert_eq!(signal.phone_numbers, vec!["+14155550100".to_string()]);
    }

    #[test]
    fn address_keyword_with_content_is_detected() {
        let signal = detect("Shipping address: 123 Main Street, Springfield");
        assert!(signal.has_address);
        assert!(signal.address_text.unwrap().contains("123 Main Street"));
    }

    #[test]
    fn plain_text_has_neither() {
        let signal = detect("Sounds great, let's talk more about the campaign timelines.");
        assert!(!signal.has_phone);
        assert!(!signal.has_address);
    }
}
