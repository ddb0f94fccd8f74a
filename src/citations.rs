//! Citation resolution for generated answers.
//!
//! The assistant returns answer text with inline markers such as
//! `【4:0†source】` and one annotation per marker pointing at an indexed
//! object. Answers go to a plain-text chat surface, so markers are
//! stripped and the cited documents are returned as a separate list.
//!
//! Markers are removed by literal content match, never by offset. The
//! annotation offsets refer to the original text and drift after the
//! first removal.
//!
//! Citations are deduplicated by display name rather than object id:
//! after a re-index the same document can be backed by several objects.

use std::collections::HashMap;

use crate::models::{Annotation, ResolvedAnswer};
use crate::traits::SourceNames;

/// Strip every annotation marker from `answer` and collect cited names.
///
/// Never fails. An unresolvable object id drops that citation and is
/// logged; a marker that is not in the text is skipped.
pub async fn resolve_citations(
    answer: &str,
    annotations: &[Annotation],
    names: &dyn SourceNames,
) -> ResolvedAnswer {
    let mut text = answer.to_string();
    let mut citations: Vec<String> = Vec::new();
    let mut lookups: HashMap<&str, Option<String>> = HashMap::new();

    for annotation in annotations {
        text = strip_marker(&text, &annotation.marker);

        let Some(object_id) = annotation.object_id.as_deref() else {
            continue;
        };

        if !lookups.contains_key(object_id) {
            let resolved = match names.display_name(object_id).await {
                Ok(name) => Some(name),
                Err(e) => {
                    tracing::warn!(object_id, "could not resolve cited object: {:#}", e);
                    None
                }
            };
            lookups.insert(object_id, resolved);
        }

        if let Some(Some(name)) = lookups.get(object_id) {
            if !citations.contains(name) {
                citations.push(name.clone());
            }
        }
    }

    ResolvedAnswer { text, citations }
}

/// Remove the first occurrence of `marker` from `text`.
///
/// If the removal would leave two spaces side by side, one of them is
/// dropped, so `"A [1] and"` becomes `"A and"`. Other whitespace is left
/// alone. An empty or absent marker returns `text` unchanged.
pub fn strip_marker(text: &str, marker: &str) -> String {
    if marker.is_empty() {
        return text.to_string();
    }
    let Some(start) = text.find(marker) else {
        return text.to_string();
    };

    let before = &text[..start];
    let mut after = &text[start + marker.len()..];
    if before.ends_with(' ') && after.starts_with(' ') {
        after = &after[1..];
    }

    let mut out = String::with_capacity(before.len() + after.len());
    out.push_str(before);
    out.push_str(after);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{bail, Result};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Names {
        calls: AtomicUsize,
    }

    impl Names {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl SourceNames for Names {
        async fn display_name(&self, object_id: &str) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match object_id {
                "obj-x" | "obj-x2" => Ok("doc_x".to_string()),
                "obj-y" => Ok("doc_y".to_string()),
                other => bail!("no such file: {}", other),
            }
        }
    }

    #[tokio::test]
    async fn dedup_preserves_first_seen_order() {
        let names = Names::new();
        let annotations = vec![
            Annotation::new("[1]", Some("obj-x")),
            Annotation::new("[2]", Some("obj-y")),
            Annotation::new("[1]", Some("obj-x")),
        ];

        let resolved = resolve_citations("A [1] and B [2] and C [1]", &annotations, &names).await;

        assert_eq!(resolved.text, "A and B and C ");
        assert_eq!(resolved.citations, vec!["doc_x", "doc_y"]);
        assert_eq!(names.calls.load(Ordering::SeqCst), 2, "lookups are memoized");
    }

    #[tokio::test]
    async fn dedup_is_by_name_not_object_id() {
        let annotations = vec![
            Annotation::new("【4:0†source】", Some("obj-x")),
            Annotation::new("【4:1†source】", Some("obj-x2")),
        ];
        let resolved = resolve_citations(
            "Tuition is due in May【4:0†source】 and August【4:1†source】.",
            &annotations,
            &Names::new(),
        )
        .await;
        assert_eq!(resolved.text, "Tuition is due in May and August.");
        assert_eq!(resolved.citations, vec!["doc_x"]);
    }

    #[tokio::test]
    async fn no_annotations_leaves_text_unchanged() {
        let resolved = resolve_citations("  plain answer ", &[], &Names::new()).await;
        assert_eq!(resolved.text, "  plain answer ");
        assert!(resolved.citations.is_empty());
    }

    #[tokio::test]
    async fn absent_object_and_failed_lookup_still_strip() {
        let annotations = vec![
            Annotation::new("[a]", None),
            Annotation::new("[b]", Some("obj-missing")),
            Annotation::new("[zzz]", Some("obj-y")),
        ];
        let resolved = resolve_citations("one[a] two[b] three", &annotations, &Names::new()).await;
        assert_eq!(resolved.text, "one two three");
        assert_eq!(resolved.citations, vec!["doc_y"]);
    }

    #[test]
    fn strip_marker_edges() {
        assert_eq!(strip_marker("abc", ""), "abc");
        assert_eq!(strip_marker("abc", "x"), "abc");
        assert_eq!(strip_marker("[1] start", "[1]"), " start");
        assert_eq!(strip_marker("a [1]\nb", "[1]"), "a \nb");
        assert_eq!(strip_marker("x[1][1]", "[1]"), "x[1]");
    }
}
