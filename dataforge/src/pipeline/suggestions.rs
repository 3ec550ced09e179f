//! Nearest-name lookup for misspelled column names.

/// Levenshtein distance between two strings, counted in chars.
#[must_use]
pub fn edit_distance(a: &str, b: &str) -> usize {
    let b_chars: Vec<char> = b.chars().collect();
    let mut previous: Vec<usize> = (0..=b_chars.len()).collect();
    let mut current = vec![0; b_chars.len() + 1];

    for (i, ca) in a.chars().enumerate() {
        current[0] = i + 1;
        for (j, cb) in b_chars.iter().enumerate() {
            let substitution = previous[j] + usize::from(ca != *cb);
            current[j + 1] = substitution
                .min(previous[j + 1] + 1)
                .min(current[j] + 1);
        }
        std::mem::swap(&mut previous, &mut current);
    }

    previous[b_chars.len()]
}

/// Largest distance still considered a plausible typo of `target`.
#[must_use]
pub fn suggestion_threshold(target: &str) -> usize {
    (target.chars().count() / 3).max(2)
}

/// Returns the known name closest to `target`, or `None` if nothing is
/// within [`suggestion_threshold`].
///
/// Comparison is case-insensitive. Ties go to the name that appears first
/// in `known`.
#[must_use]
pub fn closest_match<'a, I>(target: &str, known: I) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a str>,
{
    let needle = target.to_lowercase();
    let threshold = suggestion_threshold(target);

    let mut best: Option<(usize, &'a str)> = None;
    for candidate in known {
        let distance = edit_distance(&needle, &candidate.to_lowercase());
        if distance > threshold {
            continue;
        }
        match best {
            Some((best_distance, _)) if best_distance <= distance => {}
            _ => best = Some((distance, candidate)),
        }
    }

    best.map(|(_, name)| name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_edit_distance() {
        assert_eq!(edit_distance("", ""), 0);
        assert_eq!(edit_distance("abc", ""), 3);
        assert_eq!(edit_distance("titl", "title"), 1);
        assert_eq!(edit_distance("kitten", "sitting"), 3);
        assert_eq!(edit_distance("summary", "summary"), 0);
    }

    #[test]
    fn test_closest_match_typo() {
        let known = ["title", "content"];
        assert_eq!(closest_match("titl", known), Some("title"));
        assert_eq!(closest_match("contnet", known), Some("content"));
    }

    #[test]
    fn test_closest_match_is_case_insensitive() {
        assert_eq!(closest_match("Summary", ["chunk", "summary"]), Some("summary"));
    }

    #[test]
    fn test_closest_match_tie_prefers_first() {
        // "cat" is one edit from both "bat" and "car".
        assert_eq!(closest_match("cat", ["bat", "car"]), Some("bat"));
        assert_eq!(closest_match("cat", ["car", "bat"]), Some("car"));
    }

    #[test]
    fn test_closest_match_none_when_far() {
        assert_eq!(closest_match("zzzzzz", ["title", "content"]), None);
        assert_eq!(closest_match("title", std::iter::empty()), None);
    }
}
