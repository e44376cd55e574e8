/// Normalizes a raw ROI name for matching
///
/// `'` becomes `` ` ``, `_` a space and `:` a `;`; whitespace is trimmed and
/// collapsed and the result lower-cased.
pub fn clean_name(name: &str) -> String {
    let replaced = name.replace('\'', "`").replace('_', " ").replace(':', ";");
    replaced
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Normalizes a physician name: upper case with `_` for spaces
pub fn clean_physician_name(name: &str) -> String {
    let replaced = name.replace('\'', "`").replace('_', " ").replace(':', ";");
    replaced
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
        .to_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("Lung_L", "lung l")]
    #[case("  PTV  6000 ", "ptv 6000")]
    #[case("Cord's:PRV", "cord`s;prv")]
    #[case("", "")]
    fn test_clean_name(#[case] raw: &str, #[case] expected: &str) {
        assert_eq!(clean_name(raw), expected);
    }

    #[rstest]
    #[case("Dr. A", "DR._A")]
    #[case("smith  john", "SMITH_JOHN")]
    #[case("DEFAULT", "DEFAULT")]
    fn test_clean_physician_name(#[case] raw: &str, #[case] expected: &str) {
        assert_eq!(clean_physician_name(raw), expected);
    }
}
