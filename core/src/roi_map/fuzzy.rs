use super::name::clean_name;

const SIMPLE_WEIGHT: f64 = 1.0;
const PARTIAL_WEIGHT: f64 = 0.6;

fn lcs_len(a: &[char], b: &[char]) -> usize {
    if a.is_empty() || b.is_empty() {
        return 0;
    }
    let mut previous = vec![0usize; b.len() + 1];
    let mut current = vec![0usize; b.len() + 1];
    for ca in a {
        for (j, cb) in b.iter().enumerate() {
            current[j + 1] = if ca == cb {
                previous[j] + 1
            } else {
                current[j].max(previous[j + 1])
            };
        }
        std::mem::swap(&mut previous, &mut current);
    }
    previous[b.len()]
}

fn ratio_chars(a: &[char], b: &[char]) -> f64 {
    let total = a.len() + b.len();
    if total == 0 {
        return 1.0;
    }
    2.0 * lcs_len(a, b) as f64 / total as f64
}

/// Normalized indel similarity in `[0, 1]`
pub fn ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    ratio_chars(&a, &b)
}

/// Best [`ratio`] of the shorter string against every equally long window
/// of the longer one
pub fn partial_ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let (short, long) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    if short.is_empty() {
        return if long.is_empty() { 1.0 } else { 0.0 };
    }
    long.windows(short.len())
        .map(|window| ratio_chars(&short, window))
        .fold(0.0, f64::max)
}

/// Weighted geometric mean of simple and partial similarity of two cleaned
/// names
pub fn combined_score(a: &str, b: &str) -> f64 {
    let (a, b) = (clean_name(a), clean_name(b));
    let norm = SIMPLE_WEIGHT + PARTIAL_WEIGHT;
    let simple = ratio(&a, &b) * 2.0 * SIMPLE_WEIGHT / norm;
    let partial = partial_ratio(&a, &b) * 2.0 * PARTIAL_WEIGHT / norm;
    (simple * partial).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("ptv", "ptv", 1.0)]
    #[case("abc", "xyz", 0.0)]
    #[case("ptv1", "ptv 6000", 0.5)]
    fn test_ratio(#[case] a: &str, #[case] b: &str, #[case] expected: f64) {
        assert!((ratio(a, b) - expected).abs() < 1e-12);
    }

    #[test]
    fn test_partial_ratio_finds_substring() {
        assert_eq!(partial_ratio("lung", "lung l"), 1.0);
        assert!((partial_ratio("ptv1", "ptv 6000") - 0.75).abs() < 1e-12);
        assert_eq!(partial_ratio("", ""), 1.0);
    }

    #[test]
    fn test_combined_score_ranks_closer_names_higher() {
        let close = combined_score("Lung_L", "lung left");
        let far = combined_score("Lung_L", "brainstem");
        assert!(close > far);
        assert!(combined_score("PTV", "ptv") > 0.96);
        // symmetric after cleaning
        assert_eq!(combined_score("Cord", "cord prv"), combined_score("cord prv", "Cord"));
    }
}
