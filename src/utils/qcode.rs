// src/utils/qcode.rs

use std::sync::LazyLock;

use regex::Regex;

/// Shape every question code must have: no whitespace, no leading separator.
/// Bank codes look like `AB20AA-01`, derived ones like `AB20AA-01-B2`.
pub static QCODE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_-]*$").expect("QCODE pattern compiles"));

pub fn is_valid_qcode(code: &str) -> bool {
    QCODE_PATTERN.is_match(code)
}

/// Code of the `index`-th variant derived from `source`.
pub fn derived_code(source: &str, index: u32) -> String {
    format!("{}-B{}", source, index)
}

/// Returns `n` when `code` is exactly `<source>-B<n>`.
pub fn derivation_index(source: &str, code: &str) -> Option<u32> {
    code.strip_prefix(source)?
        .strip_prefix("-B")?
        .parse()
        .ok()
}

/// Next free variant code for `source`, given the codes already in use.
/// `None` once the index space is used up.
pub fn next_derived_code<'a>(source: &str, existing: impl IntoIterator<Item = &'a str>) -> Option<String> {
    let highest = existing
        .into_iter()
        .filter_map(|code| derivation_index(source, code))
        .max()
        .unwrap_or(0);
    highest.checked_add(1).map(|index| derived_code(source, index))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_bank_and_derived_codes() {
        assert!(is_valid_qcode("AB20AA-01"));
        assert!(is_valid_qcode("AB20AA-01-B3"));
        assert!(is_valid_qcode("Q1"));
    }

    #[test]
    fn rejects_blank_and_spaced_codes() {
        assert!(!is_valid_qcode(""));
        assert!(!is_valid_qcode("AB 20"));
        assert!(!is_valid_qcode("-B1"));
    }

    #[test]
    fn derivation_index_requires_exact_source() {
        assert_eq!(derivation_index("AB20AA-01", "AB20AA-01-B4"), Some(4));
        assert_eq!(derivation_index("AB20AA-01", "AB20AA-011-B4"), None);
        assert_eq!(derivation_index("AB20AA-01", "AB20AA-01-B4-B1"), None);
    }

    #[test]
    fn next_code_skips_used_indices() {
        let used = ["AB20AA-01-B1", "AB20AA-01-B3", "AB20AA-02-B9"];
        assert_eq!(next_derived_code("AB20AA-01", used).as_deref(), Some("AB20AA-01-B4"));
        assert_eq!(next_derived_code("AB20AA-05", used).as_deref(), Some("AB20AA-05-B1"));
    }

    #[test]
    fn next_code_is_none_when_indices_run_out() {
        assert_eq!(next_derived_code("Q1", ["Q1-B4294967295"]), None);
    }
}
