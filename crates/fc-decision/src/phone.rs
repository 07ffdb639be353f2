//! E.164 re-validation of phone numbers the Analyzer claims to have found.
//!
//! The Analyzer is untrusted input (see the adversarial-classifier note):
//! a number it reports is only trusted once it actually parses to a valid
//! E.164 number. Numbers that don't carry a country code and can't be
//! inferred default-region are discarded rather than guessed at.

use phonenumber::Mode;

/// Keep only the numbers that parse as valid E.164 numbers. Order is
/// preserved; duplicates are not deduplicated here (the Analyzer output is
/// expected to already be small and distinct).
pub fn validate_e164(candidates: &[String]) -> Vec<String> {
    candidates
        .iter()
        .filter_map(|raw| {
            let parsed = phonenumber::parse(None, raw).ok()?;
            if phonenumber::is_valid(&parsed) {
                Some(parsed.format().mode(Mode::E164).to_string())
            } else {
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_e164_number_survives() {
        let result = validate_e164(&["+14155550100".to_string()]);
        assert_eq!(result, vec!["+14155550100".to_string()]);
    }

    #[test]
    fn garbage_is_discarded() {
        let result = validate_e164(&["call me maybe".to_string(), "12345".to_string()]);
        assert!(result.is_empty());
    }
}
