//! C5 — Product Detector. Orchestrates C1-C4 into a single detection pass:
//! gather candidates, classify and score, group into structural patterns,
//! pick the best element, and synthesize a reusable generic selector
//! (spec §4.5).

use std::collections::HashMap;

use scraper::{ElementRef, Html, Selector};

use crate::classifier;
use crate::dom;
use crate::glossary::is_tailwind_utility;
use crate::model::{BoundingBox, DetectionResult, DominantPattern, ElementScore, SelectedElement};
use crate::probe::{self, GatherOptions};
use crate::scorer::{self, ScoringWeights};
use crate::structural;

pub const MIN_CONFIDENCE: f64 = 0.6;
const MAX_SYNTHESIS_RETRIES: u32 = 3;

#[derive(Debug, Clone)]
pub struct DetectorOptions {
    pub gather: GatherOptions,
    pub weights: ScoringWeights,
    pub min_confidence: f64,
}

impl Default for DetectorOptions {
    fn default() -> Self {
        Self {
            gather: GatherOptions::default(),
            weights: ScoringWeights::default(),
            min_confidence: MIN_CONFIDENCE,
        }
    }
}

/// Run the full C1-C4 pipeline over `doc` and return the detection result
/// (spec §4.5 state machine, minus the `InjectHelpers`/`Stabilize` steps
/// that only apply to a live page — those belong to the driver layer).
pub fn detect(doc: &Html, opts: &DetectorOptions) -> DetectionResult {
    let signals = probe::gather_candidates(doc, &opts.gather);
    if signals.is_empty() {
        return DetectionResult::no_candidates();
    }

    let mut fingerprints = Vec::with_capacity(signals.len());
    let mut scores: Vec<ElementScore> = Vec::with_capacity(signals.len());

    for s in &signals {
        let Ok(matches) = dom::select_all(doc, &s.selector) else { continue };
        let Some(el) = matches.into_iter().next() else { continue };
        let classification = classifier::classify(el, s);
        let score = scorer::score(s, &classification, &opts.weights);
        fingerprints.push((s.selector.clone(), structural::fingerprint(el)));
        scores.push(score);
    }

    if scores.is_empty() {
        return DetectionResult::no_candidates();
    }

    let groups: HashMap<u64, Vec<String>> =
        structural::group_by_pattern(fingerprints.iter().map(|(sel, fp)| (sel.as_str(), fp)));
    let fp_by_selector: HashMap<&str, u64> =
        fingerprints.iter().map(|(sel, fp)| (sel.as_str(), fp.hash)).collect();

    for score in &mut scores {
        if let Some(hash) = fp_by_selector.get(score.selector.as_str()) {
            if let Some(members) = groups.get(hash) {
                scorer::apply_pattern_boost(score, *hash, members.len());
            }
        }
    }

    scores.sort_by(|a, b| b.total_score.partial_cmp(&a.total_score).unwrap());
    let best_idx = select_with_tie_break(&scores);
    let best = &scores[best_idx];

    let dominant_pattern = groups
        .iter()
        .max_by_key(|(_, members)| members.len())
        .map(|(hash, members)| DominantPattern {
            hash: *hash,
            count: members.len(),
            sample_selector: members.first().cloned().unwrap_or_default(),
        });

    let (generic_selector, generic_selector_in_range) =
        synthesize_generic_selector(doc, best, &groups, &fp_by_selector);

    let confidence = best.confidence;
    let low_confidence = confidence < opts.min_confidence;
    let fallback_recommended = low_confidence || !generic_selector_in_range;

    DetectionResult {
        selected_element: Some(SelectedElement {
            specific_selector: best.selector.clone(),
            generic_selector,
            bbox: best.signals.bbox,
        }),
        confidence,
        fallback_recommended,
        reason: if low_confidence {
            Some(format!("confidence {confidence:.2} below minimum {}", opts.min_confidence))
        } else if !generic_selector_in_range {
            Some("no generic selector matched between 2 and 200 elements".to_string())
        } else {
            None
        },
        all_candidates: scores,
        dominant_pattern,
    }
}

/// Select the winning candidate, preferring a `div`-like container over an
/// `a` anchor when their scores are within 30 total points (or 25 content
/// points) of each other — anchors tend to outscore their container on
/// content signals alone while the container is the more reusable selector.
fn select_with_tie_break(scores: &[ElementScore]) -> usize {
    let top = &scores[0];
    if top.tag_name == "a" {
        for (i, candidate) in scores.iter().enumerate().skip(1) {
            if candidate.tag_name == "a" {
                continue;
            }
            let total_gap = top.total_score - candidate.total_score;
            let content_gap = top.breakdown.content - candidate.breakdown.content;
            if total_gap <= 30.0 || content_gap <= 25.0 {
                return i;
            }
            break;
        }
    }
    0
}

/// Seven-step generalization cascade, most to least specific:
/// 1. shared non-utility classes within the dominant pattern group
/// 2. tag + single shared non-utility class
/// 3. tag + known product data attribute
/// 4. parent selector fragment + tag
/// 5. tag + `:nth-of-type` (bare structural fallback)
/// 6. the element's own specific selector
/// 7. bare tag name (last resort; triggers a synthesis retry upstream)
///
/// A candidate is only accepted once it matches between 2 and 200 elements
/// in the document (spec §4.5/§8); the returned bool is false when every
/// attempt was exhausted without finding one, in which case the bare tag
/// name is returned but callers must mark the result `fallbackRecommended`.
fn synthesize_generic_selector(
    doc: &Html,
    best: &ElementScore,
    groups: &HashMap<u64, Vec<String>>,
    fp_by_selector: &HashMap<&str, u64>,
) -> (String, bool) {
    let group_members: Vec<&String> = fp_by_selector
        .get(best.selector.as_str())
        .and_then(|hash| groups.get(hash))
        .map(|members| members.iter().collect())
        .unwrap_or_default();

    for attempt in 0..MAX_SYNTHESIS_RETRIES {
        let candidate = synthesis_attempt(doc, best, &group_members, attempt);
        let (valid, count) = probe::test_selector(doc, &candidate);
        if valid && (2..=200).contains(&count) && candidate != best.tag_name {
            return (candidate, true);
        }
    }
    (best.tag_name.clone(), false)
}

fn synthesis_attempt(
    doc: &Html,
    best: &ElementScore,
    group_members: &[&String],
    attempt: u32,
) -> String {
    let tag = &best.tag_name;

    if attempt == 0 {
        if let Ok(sel) = Selector::parse(&best.selector) {
            if let Some(el) = doc.select(&sel).next() {
                let classes: Vec<String> = dom::classes(el)
                    .into_iter()
                    .filter(|c| !is_tailwind_utility(c))
                    .collect();
                if !classes.is_empty() && group_members.len() >= 2 {
                    return format!("{tag}.{}", classes.join("."));
                }
                if classes.len() == 1 {
                    return format!("{tag}.{}", classes[0]);
                }
                for attr in ["data-product", "data-sku", "data-product-id", "data-item", "data-itemid"] {
                    if el.value().attr(attr).is_some() {
                        return format!("{tag}[{attr}]");
                    }
                }
            }
        }
    }

    if attempt == 1 {
        if let Ok(sel) = Selector::parse(&best.selector) {
            if let Some(el) = doc.select(&sel).next() {
                if let Some(parent) = dom::parent_element(el) {
                    let parent_tag = parent.value().name();
                    return format!("{parent_tag} > {tag}");
                }
            }
        }
    }

    tag.clone()
}

#[allow(dead_code)]
fn bbox_of(el: ElementRef) -> BoundingBox {
    dom::element_bbox(el)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::parse_document;

    #[test]
    fn detects_classic_grid_with_high_confidence() {
        let html = r#"<ul class="grid">
            <li class="product-card"><img src="a.jpg" style="width:100px;height:100px"><h3>Shoe</h3><span class="price">£12.99</span><a href="/p/42">view</a></li>
            <li class="product-card"><img src="b.jpg" style="width:100px;height:100px"><h3>Hat</h3><span class="price">£9.99</span><a href="/p/43">view</a></li>
            <li class="product-card"><img src="c.jpg" style="width:100px;height:100px"><h3>Belt</h3><span class="price">£19.99</span><a href="/p/44">view</a></li>
        </ul>"#;
        let doc = parse_document(html);
        let result = detect(&doc, &DetectorOptions::default());
        let selected = result.selected_element.expect("should select an element");
        assert!(selected.specific_selector.contains("li"));
        assert!(selected.bbox.width > 0.0 && selected.bbox.height > 0.0);
        assert!(result.confidence > 0.0);
        assert!(result.dominant_pattern.is_some());
    }

    #[test]
    fn no_candidates_yields_zero_confidence() {
        let html = "<div><p>Nothing here</p></div>";
        let doc = parse_document(html);
        let result = detect(&doc, &DetectorOptions::default());
        assert_eq!(result.confidence, 0.0);
        assert!(result.fallback_recommended);
    }

    #[test]
    fn low_confidence_marks_fallback_recommended() {
        let html = r#"<div class="item-card" style="width:60px;height:60px"></div>"#;
        let doc = parse_document(html);
        let result = detect(&doc, &DetectorOptions::default());
        if result.confidence < MIN_CONFIDENCE {
            assert!(result.fallback_recommended);
        }
    }
}
