//! Glob matching over hierarchical keys, shared by cache invalidation and
//! subscriptions. `*` matches exactly one path segment, `**` matches any
//! remainder (including nothing).

pub fn matches(pattern: &str, key: &str) -> bool {
    let pattern: Vec<&str> = pattern.split('/').collect();
    let key: Vec<&str> = key.split('/').collect();
    match_segments(&pattern, &key)
}

fn match_segments(pattern: &[&str], key: &[&str]) -> bool {
    match (pattern.first(), key.first()) {
        (None, None) => true,
        (Some(&"**"), _) => {
            // `**` absorbs zero or more segments.
            match_segments(&pattern[1..], key)
                || (!key.is_empty() && match_segments(pattern, &key[1..]))
        }
        (Some(&"*"), Some(_)) => match_segments(&pattern[1..], &key[1..]),
        (Some(&segment), Some(&actual)) if segment == actual => {
            match_segments(&pattern[1..], &key[1..])
        }
        _ => false,
    }
}
