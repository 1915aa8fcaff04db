//! Path-segment sanitizing and collision suffixing.
//!
//! Torrent and file names from the provider can contain separators, control
//! characters or be empty. Every name exposed over WebDAV goes through
//! [`sanitize_name`], and names that collide within one collection get a
//! ` (2)`, ` (3)`, ... suffix from [`unique_name`].

use std::collections::HashSet;

const FALLBACK_NAME: &str = "unnamed";

/// Turn an arbitrary provider name into a single safe path segment.
pub fn sanitize_name(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| match c {
            '/' | '\\' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let trimmed = cleaned.trim();

    match trimmed {
        "" | "." | ".." => FALLBACK_NAME.to_string(),
        name => name.to_string(),
    }
}

/// Pick `base` or the first free `base (n)` not present in `taken`.
pub fn unique_name<F>(base: &str, taken: F) -> String
where
    F: Fn(&str) -> bool,
{
    if !taken(base) {
        return base.to_string();
    }
    let mut n = 2usize;
    loop {
        let candidate = format!("{} ({})", base, n);
        if !taken(&candidate) {
            return candidate;
        }
        n += 1;
    }
}

/// Assign unique sanitized names to a sequence of raw names, in order.
pub fn assign_names<'a, I>(raw_names: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut taken = HashSet::new();
    raw_names
        .into_iter()
        .map(|raw| {
            let name = unique_name(&sanitize_name(raw), |n| taken.contains(n));
            taken.insert(name.clone());
            name
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_sanitize_replaces_separators() {
        assert_eq!(sanitize_name("a/b\\c"), "a_b_c");
        assert_eq!(sanitize_name("  Movie.2020.mkv  "), "Movie.2020.mkv");
        assert_eq!(sanitize_name("tab\there"), "tab_here");
    }

    #[test]
    fn test_sanitize_degenerate_names() {
        assert_eq!(sanitize_name(""), "unnamed");
        assert_eq!(sanitize_name("   "), "unnamed");
        assert_eq!(sanitize_name(".."), "unnamed");
        assert_eq!(sanitize_name("."), "unnamed");
    }

    #[test]
    fn test_unique_name_suffixes() {
        let taken = ["Show", "Show (2)"];
        assert_eq!(unique_name("Show", |n| taken.contains(&n)), "Show (3)");
        assert_eq!(unique_name("Other", |n| taken.contains(&n)), "Other");
    }

    #[test]
    fn test_assign_names_in_order() {
        let names = assign_names(["a", "a", "b", "a/"]);
        assert_eq!(names, vec!["a", "a (2)", "b", "a_"]);
    }

    proptest! {
        #[test]
        fn sanitized_is_single_segment(raw in ".*") {
            let name = sanitize_name(&raw);
            prop_assert!(!name.is_empty());
            prop_assert!(!name.contains('/'));
            prop_assert!(!name.contains('\\'));
            prop_assert!(name != "." && name != "..");
        }

        #[test]
        fn assigned_names_are_distinct(raws in proptest::collection::vec("[a-c/]{0,3}", 0..20)) {
            let names = assign_names(raws.iter().map(String::as_str));
            let unique: HashSet<_> = names.iter().collect();
            prop_assert_eq!(unique.len(), names.len());
        }
    }
}
