//! C3 — Content Classifier. Rule-based classification into
//! product/banner/ad/category/ui/unknown with a bounded confidence
//! (spec §4.3).

use scraper::ElementRef;

use crate::dom;
use crate::glossary::{CAROUSEL_SLIDER, FIXED_STICKY_ABSOLUTE, PRODUCT_CLASS_HINT};
use crate::model::{Classification, ContentClass, ElementSignals};

const AD_HINTS: &[&str] = &["ad-", "advert", "sponsored", "promo-banner", "dfp-", "gpt-ad"];
const CATEGORY_HINTS: &[&str] = &["category", "collection", "department", "taxonomy"];

/// Classify a candidate element given its gathered signals (spec §4.3).
/// Rules are evaluated in priority order and the first confident match
/// wins; nothing matching falls through to `Unknown`.
pub fn classify(el: ElementRef, signals: &ElementSignals) -> Classification {
    let classes = dom::classes(el);
    let class_str = classes.join(" ").to_lowercase();

    if AD_HINTS.iter().any(|h| class_str.contains(h)) {
        return Classification { class: ContentClass::Ad, confidence: 0.9 };
    }

    if FIXED_STICKY_ABSOLUTE.is_match(&class_str) && signals.price_count == 0 {
        return Classification { class: ContentClass::Ui, confidence: 0.85 };
    }

    if signals.has_product_link && signals.price_count >= 1 && signals.image_count >= 1 {
        return Classification { class: ContentClass::Product, confidence: 0.95 };
    }

    if PRODUCT_CLASS_HINT.is_match(&class_str) && signals.image_count >= 1 {
        let confidence = if signals.price_count >= 1 { 0.85 } else { 0.65 };
        return Classification { class: ContentClass::Product, confidence };
    }

    if CAROUSEL_SLIDER.is_match(&class_str) {
        return Classification { class: ContentClass::Banner, confidence: 0.7 };
    }

    if signals.width_ratio >= 0.8 && signals.aspect_ratio >= 3.0 {
        return Classification { class: ContentClass::Banner, confidence: 0.6 };
    }

    if CATEGORY_HINTS.iter().any(|h| class_str.contains(h))
        && signals.price_count == 0
        && signals.link_count >= 2
    {
        return Classification { class: ContentClass::Category, confidence: 0.6 };
    }

    Classification { class: ContentClass::Unknown, confidence: 0.2 }
}
