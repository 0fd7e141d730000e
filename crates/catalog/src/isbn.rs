//! ISBN normalization and shape validation.
//!
//! Books store the ISBN as entered; uniqueness and lookups work on the
//! normalized form.

/// Strip whitespace and hyphens, lowercase the rest.
pub fn normalize(raw: &str) -> String {
    raw.chars()
        .filter(|c| !c.is_whitespace() && *c != '-')
        .collect::<String>()
        .to_lowercase()
}

/// Shape check on a normalized ISBN: 10 or 13 characters, digits only, except
/// that an ISBN-10 may end in `x`.
pub fn is_valid_normalized(normalized: &str) -> bool {
    let len = normalized.len();
    if len != 10 && len != 13 {
        return false;
    }
    normalized
        .bytes()
        .enumerate()
        .all(|(i, b)| b.is_ascii_digit() || (len == 10 && i == 9 && b == b'x'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn normalization_strips_separators_and_case_folds() {
        assert_eq!(normalize(" 978-0-439-42089-5 "), "9780439420895");
        assert_eq!(normalize("0 439 42089 X"), "043942089x");
    }

    #[test]
    fn accepts_isbn10_and_isbn13() {
        assert!(is_valid_normalized("0439420890"));
        assert!(is_valid_normalized("043942089x"));
        assert!(is_valid_normalized("9780439420895"));
    }

    #[test]
    fn rejects_wrong_lengths_and_characters() {
        assert!(!is_valid_normalized(""));
        assert!(!is_valid_normalized("12345"));
        assert!(!is_valid_normalized("123456789012"));
        assert!(!is_valid_normalized("04394208x0"));
        assert!(!is_valid_normalized("978043942089x"));
        assert!(!is_valid_normalized("04394208a0"));
    }

    proptest! {
        #[test]
        fn normalization_is_idempotent(raw in ".*") {
            let once = normalize(&raw);
            prop_assert_eq!(normalize(&once), once);
        }

        #[test]
        fn normalized_form_carries_no_separators_or_uppercase(raw in ".*") {
            let normalized = normalize(&raw);
            prop_assert!(
                !normalized
                    .chars()
                    .any(|c| c.is_whitespace() || c == '-' || c.is_uppercase())
            );
        }

        #[test]
        fn digit_strings_validate_by_length_alone(s in "[0-9]{0,20}") {
            prop_assert_eq!(is_valid_normalized(&s), s.len() == 10 || s.len() == 13);
        }
    }
}
