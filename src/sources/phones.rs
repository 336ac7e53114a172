//! Phone number extraction and normalization.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

static PHONE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:\+?1[-.\s]?)?\(?\d{3}\)?[-.\s]?\d{3}[-.\s]?\d{4}").expect("phone regex")
});

/// Normalize a US number to `+1 (AAA) BBB-CCCC`. Numbers that do not carry
/// ten national digits are returned trimmed but otherwise untouched.
pub fn normalize_phone(raw: &str) -> String {
    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
    let national = match digits.len() {
        11 if digits.starts_with('1') => &digits[1..],
        10 => digits.as_str(),
        _ => return raw.trim().to_string(),
    };
    format!(
        "+1 ({}) {}-{}",
        &national[..3],
        &national[3..6],
        &national[6..]
    )
}

/// Normalize and deduplicate, keeping first-seen order.
pub fn dedup_phones<I, S>(phones: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = HashSet::new();
    phones
        .into_iter()
        .map(|phone| normalize_phone(phone.as_ref()))
        .filter(|phone| !phone.is_empty() && seen.insert(phone.clone()))
        .collect()
}

/// Every phone-looking substring of `text`, normalized and deduplicated.
pub fn extract_phones(text: &str) -> Vec<String> {
    dedup_phones(PHONE_RE.find_iter(text).map(|m| m.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_common_formats() {
        assert_eq!(normalize_phone("(260) 555-1234"), "+1 (260) 555-1234");
        assert_eq!(normalize_phone("260.555.1234"), "+1 (260) 555-1234");
        assert_eq!(normalize_phone("1-260-555-1234"), "+1 (260) 555-1234");
        assert_eq!(normalize_phone(" 555-1234 "), "555-1234");
    }

    #[test]
    fn extraction_never_yields_duplicates() {
        let text = "Call (260) 555-1234 or 260-555-1234, alt 260.555.9876 / +1 260 555 1234";
        let phones = extract_phones(text);
        assert_eq!(phones, vec!["+1 (260) 555-1234", "+1 (260) 555-9876"]);
    }
}
