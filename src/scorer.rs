//! C4 — Element Scorer. Weighted sub-scores plus the mandatory ordered
//! adjustments (spec §4.4).

use crate::model::{Classification, ContentClass, ElementScore, ElementSignals, ScoreBreakdown};

#[derive(Debug, Clone, Copy)]
pub struct ScoringWeights {
    pub structural: f64,
    pub visual: f64,
    pub content: f64,
    pub context: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self { structural: 0.30, visual: 0.25, content: 0.30, context: 0.15 }
    }
}

pub const MIN_PATTERN_SIZE: usize = 3;
pub const PATTERN_BOOST: f64 = 10.0;

fn clamp(v: f64, lo: f64, hi: f64) -> f64 {
    v.max(lo).min(hi)
}

fn structural_subscore(signals: &ElementSignals) -> f64 {
    let mut score = 0.0;
    if signals.is_semantic_tag {
        score += 40.0;
    }
    if signals.has_product_attribute {
        score += 30.0;
    }
    if signals.is_schema_product {
        score += 30.0;
    }
    if signals.nesting_depth <= 12 {
        score += 10.0;
    }
    clamp(score, 0.0, 100.0)
}

fn visual_subscore(signals: &ElementSignals) -> f64 {
    let mut score = 0.0;
    if signals.bbox.width >= 50.0 && signals.bbox.height >= 50.0 {
        score += 25.0;
    }
    if signals.aspect_ratio > 0.4 && signals.aspect_ratio < 2.5 {
        score += 25.0;
    }
    if signals.parent_is_grid {
        score += 30.0;
    }
    if signals.has_similar_sibling {
        score += 20.0;
    }
    clamp(score, 0.0, 100.0)
}

fn content_subscore(signals: &ElementSignals) -> f64 {
    let mut score = 0.0;
    if signals.image_count >= 1 {
        score += 25.0;
    }
    if signals.price_count >= 1 {
        score += 30.0;
    }
    if signals.has_title_heading {
        score += 15.0;
    }
    if signals.has_product_link {
        score += 20.0;
    }
    if signals.text_length >= 10 && signals.text_length <= 400 {
        score += 10.0;
    }
    clamp(score, 0.0, 100.0)
}

fn context_subscore(signals: &ElementSignals) -> f64 {
    let mut score = 0.0;
    score += clamp(signals.sibling_count as f64 * 5.0, 0.0, 60.0);
    score += signals.sibling_similarity * 40.0;
    clamp(score, 0.0, 100.0)
}

/// The banner-like visual heuristic named by the classifier's signals
/// (spec §4.3): very wide relative to its container and a stretched
/// aspect ratio. Independent of the classifier's own `Banner` verdict —
/// adjustment 2 fires on the raw visual shape, not on the classification.
fn banner_heuristic_trips(signals: &ElementSignals) -> bool {
    signals.width_ratio >= 0.8 && signals.aspect_ratio >= 3.0
}

/// Score a candidate element (spec §4.4), applying the mandatory ordered
/// adjustments and clamping confidence to `[0, 1]` after each step.
pub fn score(
    signals: &ElementSignals,
    classification: &Classification,
    weights: &ScoringWeights,
) -> ElementScore {
    let breakdown = ScoreBreakdown {
        structural: structural_subscore(signals),
        visual: visual_subscore(signals),
        content: content_subscore(signals),
        context: context_subscore(signals),
    };

    let mut total = weights.structural * breakdown.structural
        + weights.visual * breakdown.visual
        + weights.content * breakdown.content
        + weights.context * breakdown.context;
    total = clamp(total, 0.0, 100.0);

    // Adjustment 1: +15*c if classified as product with confidence c,
    // -20*c if classified as any non-product class.
    total += match classification.class {
        ContentClass::Product => 15.0 * classification.confidence,
        _ => -20.0 * classification.confidence,
    };
    total = clamp(total, 0.0, 100.0);

    // Adjustment 2: banner heuristic.
    if banner_heuristic_trips(signals) {
        total -= 25.0;
    }
    total = clamp(total, 0.0, 100.0);

    // Adjustment 3: selector contains a fixed/sticky/absolute token.
    if crate::glossary::FIXED_STICKY_ABSOLUTE.is_match(&signals.selector) {
        total -= 50.0;
    }
    total = clamp(total, 0.0, 100.0);

    // Adjustment 4: selector contains a carousel/slider token.
    if crate::glossary::CAROUSEL_SLIDER.is_match(&signals.selector) {
        total -= 15.0;
    }
    total = clamp(total, 0.0, 100.0);

    let confidence = clamp(total / 100.0, 0.0, 1.0);

    ElementScore {
        selector: signals.selector.clone(),
        tag_name: signals.tag.clone(),
        total_score: total,
        confidence,
        breakdown,
        signals: signals.clone(),
        pattern_group: None,
        pattern_group_size: None,
    }
}

/// Apply the pattern-group boost (+10 for groups at least `MIN_PATTERN_SIZE`
/// strong) to an already-scored candidate.
pub fn apply_pattern_boost(es: &mut ElementScore, group_hash: u64, group_size: usize) {
    es.pattern_group = Some(group_hash);
    es.pattern_group_size = Some(group_size);
    if group_size >= MIN_PATTERN_SIZE {
        es.total_score = (es.total_score + PATTERN_BOOST).min(100.0);
        es.confidence = clamp(es.total_score / 100.0, 0.0, 1.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::BoundingBox;

    fn sample_signals() -> ElementSignals {
        ElementSignals {
            tag: "li".into(),
            selector: "li.product-card".into(),
            is_semantic_tag: false,
            has_product_attribute: false,
            is_schema_product: false,
            nesting_depth: 4,
            bbox: BoundingBox { x: 0.0, y: 0.0, width: 200.0, height: 280.0 },
            aspect_ratio: 0.71,
            width_ratio: 0.15,
            parent_is_grid: true,
            sibling_count: 8,
            has_similar_sibling: true,
            image_count: 1,
            text_length: 40,
            link_count: 1,
            price_count: 1,
            has_product_link: true,
            has_title_heading: true,
            parent_tag: "ul".into(),
            sibling_similarity: 0.9,
        }
    }

    #[test]
    fn product_classification_boosts_score() {
        let signals = sample_signals();
        let weights = ScoringWeights::default();
        let product = Classification { class: ContentClass::Product, confidence: 0.95 };
        let unknown = Classification { class: ContentClass::Unknown, confidence: 0.2 };
        let product_score = score(&signals, &product, &weights);
        let unknown_score = score(&signals, &unknown, &weights);
        assert!(product_score.total_score > unknown_score.total_score);
        assert!(product_score.confidence <= 1.0);
    }

    #[test]
    fn banner_and_ad_penalized() {
        let signals = sample_signals();
        let weights = ScoringWeights::default();
        let banner = Classification { class: ContentClass::Banner, confidence: 0.7 };
        let ad = Classification { class: ContentClass::Ad, confidence: 0.9 };
        let banner_score = score(&signals, &banner, &weights);
        let ad_score = score(&signals, &ad, &weights);
        assert!(ad_score.total_score < banner_score.total_score);
    }

    #[test]
    fn pattern_boost_requires_minimum_group_size() {
        let signals = sample_signals();
        let product = Classification { class: ContentClass::Product, confidence: 0.9 };
        let mut small = score(&signals, &product, &ScoringWeights::default());
        let before = small.total_score;
        apply_pattern_boost(&mut small, 42, 2);
        assert_eq!(small.total_score, before);

        let mut big = score(&signals, &product, &ScoringWeights::default());
        let before_big = big.total_score;
        apply_pattern_boost(&mut big, 42, 5);
        assert!(big.total_score >= before_big);
    }

    #[test]
    fn confidence_always_bounded() {
        let signals = sample_signals();
        let product = Classification { class: ContentClass::Product, confidence: 1.0 };
        let mut es = score(&signals, &product, &ScoringWeights::default());
        apply_pattern_boost(&mut es, 1, 10);
        assert!(es.confidence >= 0.0 && es.confidence <= 1.0);
    }
}
