//! Shannon-entropy scoring, high-entropy candidate extraction, and Luhn-10
//! credit-card validation.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;

/// Regex selecting runs of base64/url-safe alphabet characters, 20 chars or
/// longer, that are candidates for high-entropy scanning.
static HIGH_ENTROPY_CANDIDATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Za-z0-9+/=_-]{20,}").unwrap());

/// Candidate regex for credit-card-shaped digit runs, allowing space/dot/dash
/// separators, 13-19 digits once normalized.
static CARD_CANDIDATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(?:\d[ .\-]*?){13,19}\b").unwrap());

/// Default threshold used when `find_high_entropy` is called with a
/// non-positive threshold.
pub const HIGH_ENTROPY_DEFAULT_THRESHOLD: f64 = 4.5;

/// Default candidate cap used when `find_high_entropy` is called with a
/// non-positive `max_matches`.
pub const DEFAULT_MAX_ENTROPY_MATCHES: usize = 10;

/// Shannon entropy of `s`, in bits per character: `H = -Σ p(c)·log2 p(c)`.
pub fn shannon_entropy(s: &str) -> f64 {
    if s.is_empty() {
        return 0.0;
    }
    let mut freq: HashMap<char, usize> = HashMap::new();
    for c in s.chars() {
        *freq.entry(c).or_insert(0) += 1;
    }
    let len = s.chars().count() as f64;
    freq.values().fold(0.0, |acc, &count| {
        let p = count as f64 / len;
        acc - p * p.log2()
    })
}

/// One high-entropy candidate found in a scanned payload.
#[derive(Debug, Clone, PartialEq)]
pub struct EntropyCandidate {
    pub value: String,
    pub entropy: f64,
}

/// Find up to `max_matches` substrings whose Shannon entropy strictly exceeds
/// `threshold`. `threshold <= 0.0` defaults to [`HIGH_ENTROPY_DEFAULT_THRESHOLD`];
/// `max_matches == 0` defaults to [`DEFAULT_MAX_ENTROPY_MATCHES`].
///
/// Candidates whose exact text is present in `suppress` are dropped, so a
/// caller can avoid double-reporting a string already matched by another
/// pattern.
pub fn find_high_entropy(
    content: &str,
    threshold: f64,
    max_matches: usize,
    suppress: &[String],
) -> Vec<EntropyCandidate> {
    let threshold = if threshold <= 0.0 {
        HIGH_ENTROPY_DEFAULT_THRESHOLD
    } else {
        threshold
    };
    let max_matches = if max_matches == 0 {
        DEFAULT_MAX_ENTROPY_MATCHES
    } else {
        max_matches
    };

    let mut out = Vec::new();
    for m in HIGH_ENTROPY_CANDIDATE.find_iter(content) {
        if out.len() >= max_matches {
            break;
        }
        let value = m.as_str();
        if suppress.iter().any(|s| s == value) {
            continue;
        }
        let entropy = shannon_entropy(value);
        if entropy > threshold {
            out.push(EntropyCandidate {
                value: value.to_string(),
                entropy,
            });
        }
    }
    out
}

/// Luhn-10 validity check over the digits of `s` (non-digit characters are
/// ignored). Right-to-left, every second digit doubled and 9-reduced if it
/// exceeds 9; valid iff the sum is a multiple of 10.
pub fn luhn_valid(s: &str) -> bool {
    let digits: Vec<u32> = s.chars().filter_map(|c| c.to_digit(10)).collect();
    if digits.len() < 2 {
        return false;
    }
    let sum: u32 = digits
        .iter()
        .rev()
        .enumerate()
        .map(|(i, &d)| {
            if i % 2 == 1 {
                let doubled = d * 2;
                if doubled > 9 { doubled - 9 } else { doubled }
            } else {
                d
            }
        })
        .sum();
    sum % 10 == 0
}

/// Card network classification by leading-digit prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardType {
    Visa,
    Mastercard,
    Amex,
    Discover,
    Jcb,
    Diners,
    Unknown,
}

impl CardType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CardType::Visa => "visa",
            CardType::Mastercard => "mastercard",
            CardType::Amex => "amex",
            CardType::Discover => "discover",
            CardType::Jcb => "jcb",
            CardType::Diners => "diners",
            CardType::Unknown => "unknown",
        }
    }
}

/// Normalize a candidate to its bare digit string, stripping separators.
pub fn normalize_digits(s: &str) -> String {
    s.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// Classify a (normalized) card number by its leading digits.
pub fn classify_card(digits: &str) -> CardType {
    let digits = normalize_digits(digits);
    let len = digits.len();
    let prefix1 = digits.chars().next().and_then(|c| c.to_digit(10));
    let prefix2: Option<u32> = digits.get(0..2).and_then(|p| p.parse().ok());
    let prefix4: Option<u32> = digits.get(0..4).and_then(|p| p.parse().ok());

    if prefix1 == Some(4) && (len == 13 || len == 16 || len == 19) {
        return CardType::Visa;
    }
    if let Some(p2) = prefix2 {
        if (51..=55).contains(&p2) && len == 16 {
            return CardType::Mastercard;
        }
        if matches!(p2, 34 | 37) && len == 15 {
            return CardType::Amex;
        }
        if matches!(p2, 36 | 38 | 39) && (len == 14 || len == 16) {
            return CardType::Diners;
        }
    }
    if let Some(p4) = prefix4 {
        if p4 == 6011 && len == 16 {
            return CardType::Discover;
        }
        if (3528..=3589).contains(&p4) && (len == 16 || len == 19) {
            return CardType::Jcb;
        }
    }
    if digits.get(0..3).and_then(|p| p.parse::<u32>().ok())
        .map(|p| (644..=649).contains(&p))
        .unwrap_or(false)
        && len == 16
    {
        return CardType::Discover;
    }
    CardType::Unknown
}

/// Curated set of valid card-length prefixes; the credit-card `Pattern`
/// validator rejects anything outside this shape before running Luhn.
pub fn plausible_card_shape(digits: &str) -> bool {
    matches!(digits.len(), 13..=19)
}

/// Scan `content` for credit-card-shaped substrings, normalize, validate
/// (shape + Luhn), and return each distinct valid card exactly once
/// (deduplicated by normalized digit string so separator variants collapse).
pub fn extract_card_numbers(content: &str) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for m in CARD_CANDIDATE.find_iter(content) {
        let digits = normalize_digits(m.as_str());
        if !plausible_card_shape(&digits) || !luhn_valid(&digits) {
            continue;
        }
        if seen.insert(digits.clone()) {
            out.push(digits);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn entropy_of_empty_string_is_zero() {
        assert_eq!(shannon_entropy(""), 0.0);
    }

    #[test]
    fn entropy_of_repeated_char_is_zero() {
        assert_eq!(shannon_entropy(&"a".repeat(50)), 0.0);
    }

    #[test]
    fn entropy_of_alphabet_is_log2_26() {
        let alphabet: String = ('a'..='z').collect();
        let h = shannon_entropy(&alphabet);
        assert!((h - 26f64.log2()).abs() < 0.1);
    }

    #[test]
    fn luhn_validates_known_test_cards() {
        for card in [
            "4111111111111111",
            "5500000000000004",
            "340000000000009",
            "6011000000000004",
        ] {
            assert!(luhn_valid(card), "{card} should be luhn-valid");
        }
    }

    #[test]
    fn luhn_rejects_mutated_digit() {
        assert!(!luhn_valid("4111111111111112"));
    }

    #[test]
    fn extract_card_numbers_dedups_separator_variants() {
        let content = "Card: 4111 1111 1111 1111 and 4111-1111-1111-1111";
        let cards = extract_card_numbers(content);
        assert_eq!(cards, vec!["4111111111111111".to_string()]);
    }

    #[test]
    fn classify_visa_and_amex() {
        assert_eq!(classify_card("4111111111111111"), CardType::Visa);
        assert_eq!(classify_card("340000000000009"), CardType::Amex);
    }

    #[test]
    fn find_high_entropy_defaults_threshold_and_limit() {
        let content = "xK9pL2mQ7vR4tY8wZ1nB6jH3cF5dA0sE aaaaaaaaaaaaaaaaaaaa";
        let found = find_high_entropy(content, 0.0, 0, &[]);
        assert!(found.iter().any(|c| c.value.starts_with("xK9pL2mQ")));
        assert!(found.iter().all(|c| c.entropy > HIGH_ENTROPY_DEFAULT_THRESHOLD));
    }

    #[test]
    fn find_high_entropy_respects_suppression() {
        let content = "xK9pL2mQ7vR4tY8wZ1nB6jH3cF5dA0sE";
        let suppressed = vec!["xK9pL2mQ7vR4tY8wZ1nB6jH3cF5dA0sE".to_string()];
        let found = find_high_entropy(content, 0.0, 0, &suppressed);
        assert!(found.is_empty());
    }

    proptest! {
        #[test]
        fn entropy_is_non_negative(s in ".*") {
            prop_assert!(shannon_entropy(&s) >= 0.0);
        }

        #[test]
        fn luhn_valid_cards_stay_valid_with_separators(
            digits in "[0-9]{16}"
        ) {
            if luhn_valid(&digits) {
                let spaced = digits
                    .chars()
                    .collect::<Vec<_>>()
                    .chunks(4)
                    .map(|c| c.iter().collect::<String>())
                    .collect::<Vec<_>>()
                    .join(" ");
                prop_assert!(luhn_valid(&spaced));
            }
        }
    }
}
