//! Slug generation for benchmark case ids.
//!
//! The benchmark line identifies a run by a deterministic slug of its
//! goal text, stable across reruns of the same goal.

/// Maximum length for a case id slug.
const MAX_SLUG_LENGTH: usize = 48;

/// Convert a string to a URL-friendly slug (basic conversion).
///
/// Does NOT truncate - use `slugify_truncate` for length-limited slugs.
pub fn slugify(text: &str) -> String {
    let slug: String = text
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '-' })
        .collect();

    // Collapse consecutive dashes and trim leading/trailing dashes
    let mut result = String::new();
    let mut prev_dash = true;
    for c in slug.chars() {
        if c == '-' {
            if !prev_dash {
                result.push(c);
            }
            prev_dash = true;
        } else {
            result.push(c);
            prev_dash = false;
        }
    }

    if result.ends_with('-') {
        result.pop();
    }

    result
}

/// Slugify with truncation at word boundaries.
pub fn slugify_truncate(text: &str) -> String {
    let mut result = slugify(text);

    if result.len() > MAX_SLUG_LENGTH {
        if let Some(pos) = result[..MAX_SLUG_LENGTH].rfind('-') {
            result.truncate(pos);
        } else {
            result.truncate(MAX_SLUG_LENGTH);
        }
    }

    if result.ends_with('-') {
        result.pop();
    }

    if result.is_empty() {
        result.push_str("unnamed-case");
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slugify_basic() {
        assert_eq!(slugify("Hello World"), "hello-world");
        assert_eq!(slugify("Fix multiply(a, b)!"), "fix-multiply-a-b");
        assert_eq!(slugify("  Multiple   Spaces  "), "multiple-spaces");
    }

    #[test]
    fn test_slugify_truncate_long_goal() {
        let goal = "Repair the calculator module where multiply returns the quotient instead of the product of its arguments";
        let slug = slugify_truncate(goal);
        assert!(slug.len() <= MAX_SLUG_LENGTH);
        assert!(!slug.ends_with('-'));
        assert!(!slug.is_empty());
    }

    #[test]
    fn test_slugify_truncate_is_deterministic() {
        assert_eq!(slugify_truncate("same goal"), slugify_truncate("same goal"));
    }

    #[test]
    fn test_empty_goal_gets_placeholder() {
        assert_eq!(slugify_truncate("!!!"), "unnamed-case");
    }
}
