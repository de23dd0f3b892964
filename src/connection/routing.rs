//! Pure topic filter matching
//!
//! Standard MQTT filter semantics: `+` matches exactly one level, `#` matches
//! the rest of the topic (including the parent level) and must be the last
//! segment.

/// Does `topic` match the subscription `filter`?
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut filter_segments = filter.split('/');
    let mut topic_segments = topic.split('/');

    loop {
        match (filter_segments.next(), topic_segments.next()) {
            // '#' swallows the remainder; an ill-formed filter with segments
            // after '#' matches nothing.
            (Some("#"), _) => return filter_segments.next().is_none(),
            (Some("+"), Some(_)) => continue,
            (Some(segment), Some(level)) if segment == level => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}
