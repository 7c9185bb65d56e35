//! C6 — Pagination Detector. Discover candidate controls, verify them
//! against a page-state delta, and decide a `PaginationDescriptor`
//! (spec §4.6).
//!
//! The Verify phase's click/scroll trials need a live page, so this module
//! exposes the pure Discover step plus a `decide` step that a driver-backed
//! orchestrator (see `driver`/`session`) feeds with observed before/after
//! state. This keeps the decision table itself unit-testable without a
//! browser.

use scraper::{Html, Selector};

use crate::glossary::{DIGIT_RUN, LEFT_ARROW_GLYPH, NEXT_WORD_ROOT, PREV_WORD_ROOT, RIGHT_ARROW_GLYPH};
use crate::model::{OffsetPattern, OffsetStyle, PaginationDescriptor};

#[derive(Debug, Clone, serde::Serialize)]
pub struct PaginationCandidate {
    pub selector: String,
    pub kind: CandidateKind,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateKind {
    NumberedLink,
    NextButton,
    LoadMore,
}

/// Discover phase: find numbered-page links, a next-button, and a
/// load-more trigger anchored near the detected product container.
/// Previous/disabled controls are excluded.
pub fn discover(doc: &Html, container_selector: &str) -> Vec<PaginationCandidate> {
    let mut out = Vec::new();

    let anchor_sel = Selector::parse("a,button").unwrap();
    let scope: Vec<_> = match Selector::parse(container_selector) {
        Ok(sel) => doc.select(&sel).next().map(|c| c.select(&anchor_sel).collect()).unwrap_or_default(),
        Err(_) => doc.select(&anchor_sel).collect(),
    };
    // If the container scope yields nothing (e.g. pagination sits as a
    // sibling of the product grid rather than inside it), fall back to the
    // whole document.
    let candidates_source: Vec<_> = if scope.is_empty() { doc.select(&anchor_sel).collect() } else { scope };

    for el in candidates_source {
        if el.value().attr("disabled").is_some() {
            continue;
        }
        let classes: Vec<String> = el.value().classes().map(|c| c.to_string()).collect();
        let class_str = classes.join(" ").to_lowercase();
        if class_str.contains("disabled") || class_str.contains("inactive") {
            continue;
        }

        let text: String = el.text().collect::<Vec<_>>().join(" ").trim().to_string();
        if PREV_WORD_ROOT.is_match(&text) || LEFT_ARROW_GLYPH.is_match(&text) {
            continue;
        }

        let selector = format!("{}{}", el.value().name(), class_selector_suffix(&classes));

        if text.chars().all(|c| c.is_ascii_digit()) && !text.is_empty() {
            out.push(PaginationCandidate { selector, kind: CandidateKind::NumberedLink, text });
        } else if NEXT_WORD_ROOT.is_match(&text) || RIGHT_ARROW_GLYPH.is_match(&text) {
            out.push(PaginationCandidate { selector, kind: CandidateKind::NextButton, text });
        } else if class_str.contains("load-more") || class_str.contains("loadmore") || text.to_lowercase().contains("load more") || text.to_lowercase().contains("show more") {
            out.push(PaginationCandidate { selector, kind: CandidateKind::LoadMore, text });
        }
    }

    out
}

fn class_selector_suffix(classes: &[String]) -> String {
    let filtered: Vec<&String> = classes
        .iter()
        .filter(|c| !crate::glossary::is_state_or_utility_class(c))
        .take(1)
        .collect();
    if filtered.is_empty() {
        String::new()
    } else {
        format!(".{}", filtered[0])
    }
}

/// Derive an `OffsetPattern` from two observed URLs that differ by exactly
/// one numeric path/query segment (the Verify phase's URL-delta step).
pub fn derive_offset_pattern(before_url: &str, after_url: &str) -> Option<OffsetPattern> {
    let before_nums: Vec<(usize, i64)> = DIGIT_RUN
        .find_iter(before_url)
        .filter_map(|m| m.as_str().parse().ok().map(|n| (m.start(), n)))
        .collect();
    let after_nums: Vec<(usize, i64)> = DIGIT_RUN
        .find_iter(after_url)
        .filter_map(|m| m.as_str().parse().ok().map(|n| (m.start(), n)))
        .collect();

    if before_nums.len() != after_nums.len() {
        return None;
    }

    for ((pos, before_val), (_, after_val)) in before_nums.iter().zip(after_nums.iter()) {
        if before_val != after_val {
            let increment = after_val - before_val;
            if increment == 0 {
                continue;
            }
            let key = key_near(before_url, *pos);
            let style = if key.as_deref() == Some("offset") { OffsetStyle::Offset } else { OffsetStyle::Page };
            return Some(OffsetPattern { key: key.unwrap_or_else(|| "page".to_string()), start: *before_val, increment, style });
        }
    }
    None
}

fn key_near(url: &str, pos: usize) -> Option<String> {
    let prefix = &url[..pos];
    let key_start = prefix.rfind(['?', '&', '/']).map(|i| i + 1).unwrap_or(0);
    let raw = &prefix[key_start..];
    let key = raw.trim_end_matches('=');
    if key.is_empty() {
        None
    } else {
        Some(key.to_lowercase())
    }
}

/// Outcome of the Verify phase's trials, fed into `decide`.
#[derive(Debug, Clone, Default)]
pub struct VerifyOutcome {
    pub click_trial_selector: Option<String>,
    pub click_changed_items: bool,
    pub url_changed: bool,
    pub offset_pattern: Option<OffsetPattern>,
    pub scroll_trial_monotonic: bool,
    pub scroll_changed_items: bool,
    /// The `CandidateKind` of the top-ranked control discovered for this
    /// container, independent of which trial(s) actually ran.
    pub top_candidate_kind: Option<CandidateKind>,
    /// The selector of that top-ranked control.
    pub top_candidate_selector: Option<String>,
}

/// Decide phase: turn a verify outcome into a `PaginationDescriptor`
/// (hybrid / click / url-offset / infinite-scroll / none).
pub fn decide(outcome: &VerifyOutcome) -> PaginationDescriptor {
    let has_click = outcome.click_trial_selector.is_some() && outcome.click_changed_items;
    let has_scroll = outcome.scroll_trial_monotonic && outcome.scroll_changed_items;
    let top_is_load_more = outcome.top_candidate_kind == Some(CandidateKind::LoadMore);

    match (has_click, has_scroll) {
        (true, true) => PaginationDescriptor::Hybrid {
            click: Box::new(click_descriptor(outcome)),
            scroll: Box::new(PaginationDescriptor::InfiniteScroll { scroll_positions: vec![] }),
        },
        (true, false) => click_descriptor(outcome),
        (false, true) if top_is_load_more => PaginationDescriptor::Hybrid {
            click: Box::new(PaginationDescriptor::NextClick {
                selector: outcome.top_candidate_selector.clone().unwrap_or_default(),
            }),
            scroll: Box::new(PaginationDescriptor::InfiniteScroll { scroll_positions: vec![] }),
        },
        (false, true) => PaginationDescriptor::InfiniteScroll { scroll_positions: vec![] },
        (false, false) => PaginationDescriptor::None,
    }
}

fn click_descriptor(outcome: &VerifyOutcome) -> PaginationDescriptor {
    if outcome.url_changed {
        if let Some(offset) = outcome.offset_pattern.clone() {
            return PaginationDescriptor::UrlOffset {
                selector: outcome.click_trial_selector.clone(),
                offset,
            };
        }
    }
    PaginationDescriptor::NextClick {
        selector: outcome.click_trial_selector.clone().unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::parse_document;

    #[test]
    fn discovers_numbered_links_and_next_button_excludes_prev() {
        let html = r#"<nav class="pagination">
            <a class="page-prev" href="?page=1">Previous</a>
            <a class="page-link" href="?page=2">2</a>
            <a class="page-link" href="?page=3">3</a>
            <a class="page-next" href="?page=3">Next</a>
        </nav>"#;
        let doc = parse_document(html);
        let candidates = discover(&doc, "nav.pagination");
        assert!(candidates.iter().any(|c| c.kind == CandidateKind::NumberedLink));
        assert!(candidates.iter().any(|c| c.kind == CandidateKind::NextButton));
        assert!(!candidates.iter().any(|c| c.text.to_lowercase().contains("previous")));
    }

    #[test]
    fn derives_page_offset_pattern() {
        let pattern = derive_offset_pattern("/search?page=1", "/search?page=2").unwrap();
        assert_eq!(pattern.start, 1);
        assert_eq!(pattern.increment, 1);
    }

    #[test]
    fn decide_prefers_hybrid_when_both_trials_succeed() {
        let outcome = VerifyOutcome {
            click_trial_selector: Some("a.page-next".to_string()),
            click_changed_items: true,
            url_changed: true,
            offset_pattern: Some(OffsetPattern {
                key: "page".to_string(),
                start: 1,
                increment: 1,
                style: OffsetStyle::Page,
            }),
            scroll_trial_monotonic: true,
            scroll_changed_items: true,
            top_candidate_kind: None,
            top_candidate_selector: None,
        };
        let descriptor = decide(&outcome);
        assert!(matches!(descriptor, PaginationDescriptor::Hybrid { .. }));
    }

    #[test]
    fn decide_returns_none_when_nothing_verifies() {
        let outcome = VerifyOutcome::default();
        assert!(matches!(decide(&outcome), PaginationDescriptor::None));
    }

    #[test]
    fn decide_is_hybrid_when_scroll_succeeds_and_top_candidate_is_load_more() {
        let outcome = VerifyOutcome {
            click_trial_selector: None,
            click_changed_items: false,
            url_changed: false,
            offset_pattern: None,
            scroll_trial_monotonic: true,
            scroll_changed_items: true,
            top_candidate_kind: Some(CandidateKind::LoadMore),
            top_candidate_selector: Some("button.load-more".to_string()),
        };
        let descriptor = decide(&outcome);
        match descriptor {
            PaginationDescriptor::Hybrid { click, .. } => {
                assert!(matches!(*click, PaginationDescriptor::NextClick { selector } if selector == "button.load-more"));
            }
            other => panic!("expected Hybrid, got {other:?}"),
        }
    }
}
