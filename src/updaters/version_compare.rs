use std::cmp::Ordering;

/// Compare two dotted-numeric version strings.
///
/// Each `.`-separated segment is read as a non-negative integer; a missing or
/// non-numeric segment counts as 0, so "1.2" and "1.2.0" are equal. An empty
/// version on either side carries no information and compares Equal.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    if a.is_empty() || b.is_empty() {
        return Ordering::Equal;
    }

    let seg_a: Vec<u64> = a.split('.').map(parse_segment).collect();
    let seg_b: Vec<u64> = b.split('.').map(parse_segment).collect();

    let max_len = seg_a.len().max(seg_b.len());
    for i in 0..max_len {
        let na = seg_a.get(i).copied().unwrap_or(0);
        let nb = seg_b.get(i).copied().unwrap_or(0);
        match na.cmp(&nb) {
            Ordering::Equal => continue,
            other => return other,
        }
    }

    Ordering::Equal
}

/// True if `candidate` is strictly newer than `current`.
pub fn is_newer(current: &str, candidate: &str) -> bool {
    compare_versions(candidate, current) == Ordering::Greater
}

fn parse_segment(segment: &str) -> u64 {
    segment.trim().parse::<u64>().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trailing_zero_padding() {
        assert_eq!(compare_versions("1.2", "1.2.0"), Ordering::Equal);
        assert_eq!(compare_versions("1.2.0.0", "1.2"), Ordering::Equal);
    }

    #[test]
    fn test_numeric_not_lexical() {
        assert_eq!(compare_versions("1.10.0", "1.9.9"), Ordering::Greater);
        assert_eq!(compare_versions("9.0", "10.0"), Ordering::Less);
    }

    #[test]
    fn test_empty_is_no_information() {
        assert_eq!(compare_versions("", "1.0"), Ordering::Equal);
        assert_eq!(compare_versions("1.0", ""), Ordering::Equal);
        assert!(!is_newer("", "5.0"));
    }

    #[test]
    fn test_non_numeric_segments_are_zero() {
        assert_eq!(compare_versions("1.beta", "1.0"), Ordering::Equal);
        assert_eq!(compare_versions("1.x.1", "1.0.0"), Ordering::Greater);
        assert_eq!(compare_versions("-1", "0"), Ordering::Equal);
    }

    #[test]
    fn test_is_newer() {
        assert!(is_newer("1.0.0.0", "1.1.0.0"));
        assert!(!is_newer("1.1.0.0", "1.1.0.0"));
        assert!(!is_newer("2.0", "1.9"));
        assert!(is_newer("5", "5.1"));
    }
}
