//! Plain-text rendering for the CLI.

use chrono::DateTime;
use nostr_core::{Pointer, Post, KIND_ARTICLE};
use std::collections::HashMap;

/// `YYYY-MM-DD` in UTC, or `-` for an out-of-range timestamp.
pub fn format_date(ts: i64) -> String {
    DateTime::from_timestamp(ts, 0)
        .map(|d| d.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| "-".to_string())
}

/// One line per post: date, kind marker, title, author.
pub fn post_line(post: &Post) -> String {
    let marker = if post.kind == KIND_ARTICLE { "A" } else { "N" };
    let title = post
        .title
        .as_deref()
        .or(post.summary.as_deref())
        .unwrap_or("(no text)");
    format!(
        "{} [{marker}] {title} by {}",
        format_date(post.effective_timestamp()),
        post.author_name
    )
}

pub fn post_detail(post: &Post) -> String {
    let mut out = String::new();
    if let Some(title) = &post.title {
        out.push_str(&format!("{title}\n"));
    }
    out.push_str(&format!(
        "{} on {}",
        post.author_name,
        format_date(post.effective_timestamp())
    ));
    if let Some(handle) = &post.author_handle {
        out.push_str(&format!(" ({handle})"));
    }
    out.push('\n');
    if let Some(reference) = &post.canonical_ref {
        out.push_str(&format!("{reference}\n"));
    }
    out.push('\n');
    out.push_str(&post.content);
    out
}

/// Multi-line description of a decoded reference.
pub fn pointer_detail(pointer: &Pointer) -> String {
    let mut lines = vec![format!("type: {}", pointer.kind_name())];
    match pointer {
        Pointer::Address(a) => {
            lines.push(format!("kind: {}", a.kind));
            lines.push(format!("author: {}", a.author));
            lines.push(format!("identifier: {}", a.identifier));
        }
        Pointer::Event(e) => {
            lines.push(format!("id: {}", e.id));
            if let Some(author) = &e.author {
                lines.push(format!("author: {author}"));
            }
            if let Some(kind) = e.kind {
                lines.push(format!("kind: {kind}"));
            }
        }
        Pointer::Id(id) => lines.push(format!("id: {id}")),
        Pointer::Author(p) => lines.push(format!("author: {}", p.author)),
    }
    for relay in pointer.relays() {
        lines.push(format!("relay: {relay}"));
    }
    lines.join("\n")
}

/// Posts in `after` that are new or a different version than in `before`.
pub fn count_changed(before: &[Post], after: &[Post]) -> usize {
    let known: HashMap<String, &str> = before
        .iter()
        .map(|p| (p.cache_key(), p.id.as_str()))
        .collect();
    after
        .iter()
        .filter(|p| known.get(&p.cache_key()) != Some(&p.id.as_str()))
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use nostr_core::{AddressPointer, KIND_NOTE};

    fn post(id: &str, kind: u16, d: Option<&str>) -> Post {
        Post {
            id: id.into(),
            kind,
            author: "pk".into(),
            created_at: 1_700_000_000,
            published_at: None,
            content: "body".into(),
            tags: d
                .map(|d| vec![vec!["d".to_string(), d.to_string()]])
                .unwrap_or_default(),
            title: Some("Hello".into()),
            summary: None,
            image: None,
            canonical_ref: None,
            author_name: "Alice".into(),
            author_avatar: None,
            author_handle: None,
        }
    }

    #[test]
    fn dates_are_utc_days() {
        assert_eq!(format_date(0), "1970-01-01");
        assert_eq!(format_date(1_700_000_000), "2023-11-14");
        assert_eq!(format_date(i64::MAX), "-");
    }

    #[test]
    fn post_line_marks_articles() {
        let line = post_line(&post("a", KIND_ARTICLE, Some("x")));
        assert_eq!(line, "2023-11-14 [A] Hello by Alice");
        assert!(post_line(&post("n", KIND_NOTE, None)).contains("[N]"));
    }

    #[test]
    fn new_versions_count_as_changed() {
        let before = vec![post("a1", KIND_ARTICLE, Some("x")), post("n", KIND_NOTE, None)];
        let after = vec![
            post("a2", KIND_ARTICLE, Some("x")),
            post("n", KIND_NOTE, None),
            post("m", KIND_NOTE, None),
        ];
        assert_eq!(count_changed(&before, &after), 2);
        assert_eq!(count_changed(&before, &before), 0);
    }

    #[test]
    fn pointer_detail_lists_fields() {
        let text = pointer_detail(&Pointer::Address(AddressPointer {
            kind: KIND_ARTICLE,
            author: "pk".into(),
            identifier: "slug".into(),
            relays: vec!["wss://r.example.com".into()],
        }));
        assert!(text.starts_with("type: naddr"));
        assert!(text.contains("identifier: slug"));
        assert!(text.contains("relay: wss://r.example.com"));
    }
}
