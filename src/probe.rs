//! C1 — DOM Probe. Builds/tests selectors and gathers candidate elements
//! using the five disjoint strategies plus the sixth sibling-group sweep
//! (spec §4.1).

use std::collections::{HashMap, HashSet};

use scraper::{ElementRef, Html, Selector};

use crate::dom::{self, DEFAULT_VIEWPORT};
use crate::glossary::{self, PRICE_REGEX, PRODUCT_URL_REGEX};
use crate::model::{BoundingBox, ElementSignals};

/// Class substrings recognized by strategy 3. Representative of the ~50
/// heuristics described in the spec rather than an exhaustive enumeration.
const PRODUCT_CLASS_SUBSTRINGS: &[&str] = &[
    "product-card",
    "product-tile",
    "productTile",
    "product-item",
    "productItem",
    "product-box",
    "productBox",
    "product-grid-item",
    "item-card",
    "itemCard",
    "catalog-item",
    "listing-item",
    "grid-item",
    "card-product",
    "goods-item",
    "sku-item",
    "plp-item",
    "search-result-item",
    "result-card",
    "tile-product",
];

#[derive(Debug, Clone)]
pub struct GatherOptions {
    pub max_candidates: usize,
    pub viewport: (f64, f64),
}

impl Default for GatherOptions {
    fn default() -> Self {
        Self { max_candidates: 500, viewport: DEFAULT_VIEWPORT }
    }
}

/// `testSelector(css)` — returns `(valid, count)`.
pub fn test_selector(doc: &Html, css: &str) -> (bool, usize) {
    match Selector::parse(css) {
        Ok(sel) => (true, doc.select(&sel).count()),
        Err(_) => (false, 0),
    }
}

/// Gather up to `opts.max_candidates` candidate elements using the five
/// disjoint strategies plus the sixth sibling-group sweep, deduplicated by
/// synthesized specific selector.
pub fn gather_candidates(doc: &Html, opts: &GatherOptions) -> Vec<ElementSignals> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();

    let mut push = |el: ElementRef, min_side: f64, max_width_ratio: f64| {
        if out.len() >= opts.max_candidates {
            return;
        }
        let bbox = dom::element_bbox(el);
        if bbox.width < min_side || bbox.height < min_side {
            return;
        }
        if bbox.width > max_width_ratio * opts.viewport.0 {
            return;
        }
        let selector = build_specific_selector(el);
        if !seen.insert(selector.clone()) {
            return;
        }
        out.push(signals_for(doc, el, &selector, opts.viewport));
    };

    // Strategy 1: semantic tags
    for sel_str in ["article", "[role=listitem]", "[itemtype*=Product]"] {
        if let Ok(sel) = Selector::parse(sel_str) {
            for el in doc.select(&sel) {
                push(el, 50.0, 0.9);
            }
        }
    }

    // Strategy 2: known product data attributes
    for sel_str in [
        "[data-product]",
        "[data-sku]",
        "[data-product-id]",
        "[data-item]",
        "[data-itemid]",
    ] {
        if let Ok(sel) = Selector::parse(sel_str) {
            for el in doc.select(&sel) {
                push(el, 50.0, 0.9);
            }
        }
    }

    // Strategy 3: class-substring heuristics
    for el in doc.select(&Selector::parse("*").unwrap()) {
        let classes = dom::classes(el);
        let matches = classes.iter().any(|c| {
            PRODUCT_CLASS_SUBSTRINGS
                .iter()
                .any(|needle| c.to_lowercase().contains(&needle.to_lowercase()))
        });
        if matches {
            push(el, 50.0, 0.9);
        }
    }

    // Strategy 4: direct children of grid/flex containers
    for el in doc.select(&Selector::parse("*").unwrap()) {
        if let Some(display) = dom::computed_display(el) {
            if display == "grid" || display == "flex" || display == "inline-flex" {
                for child in el.children().filter_map(ElementRef::wrap) {
                    push(child, 50.0, 0.9);
                }
            }
        }
    }

    // Strategy 5: img + price signature
    for el in doc.select(&Selector::parse("*").unwrap()) {
        if has_qualifying_image(el) && has_price_signature(el) {
            push(el, 80.0, 0.6);
        }
    }

    // Strategy 6: largest sibling group of >=3 image+link elements
    let mut groups: HashMap<String, Vec<ElementRef>> = HashMap::new();
    for el in doc.select(&Selector::parse("*").unwrap()) {
        let has_img = el.select(&Selector::parse("img").unwrap()).next().is_some();
        let has_link =
            el.value().name() == "a" || el.select(&Selector::parse("a").unwrap()).next().is_some();
        if has_img && has_link {
            if let Some(parent) = dom::parent_element(el) {
                let key = build_specific_selector(parent);
                groups.entry(key).or_default().push(el);
            }
        }
    }
    if let Some((_, largest)) = groups.iter().max_by_key(|(_, v)| v.len()) {
        if largest.len() >= 3 {
            for el in largest {
                push(*el, 80.0, 0.6);
            }
        }
    }

    out
}

fn has_qualifying_image(el: ElementRef) -> bool {
    el.select(&Selector::parse("img").unwrap()).any(|img| {
        let bbox = dom::element_bbox(img);
        bbox.width >= 50.0 && bbox.height >= 50.0
    }) || el.value().name() == "img" && {
        let bbox = dom::element_bbox(el);
        bbox.width >= 50.0 && bbox.height >= 50.0
    }
}

fn has_price_signature(el: ElementRef) -> bool {
    let text = dom::text_content(el);
    if PRICE_REGEX.is_match(&text) {
        return true;
    }
    el.select(&Selector::parse("*").unwrap()).any(|d| {
        dom::classes(d)
            .iter()
            .any(|c| c.to_lowercase().contains("price") || c.to_lowercase().contains("cost"))
    })
}

/// Build a path of at most five ancestors for `el` (spec §4.1 selector
/// synthesis).
pub fn build_specific_selector(el: ElementRef) -> String {
    let mut chain = Vec::new();
    let mut current = Some(el);
    let mut levels = 0;
    while let Some(node) = current {
        if levels >= 5 {
            break;
        }
        chain.push(selector_fragment(node));
        current = dom::parent_element(node);
        levels += 1;
    }
    chain.reverse();
    chain.join(" > ")
}

fn selector_fragment(el: ElementRef) -> String {
    let tag = el.value().name();

    if let Some(id) = el.value().attr("id") {
        if !id.starts_with(|c: char| c.is_ascii_digit()) && !id.is_empty() {
            return format!("#{id}");
        }
    }

    for attr in ["data-product", "data-sku", "data-product-id", "data-item", "data-itemid"] {
        if el.value().attr(attr).is_some() {
            return format!("{tag}[{attr}]");
        }
    }

    let good_classes: Vec<String> = dom::classes(el)
        .into_iter()
        .filter(|c| !glossary::is_state_or_utility_class(c) && !c.starts_with(|ch: char| ch.is_ascii_digit()))
        .take(2)
        .collect();
    if !good_classes.is_empty() {
        return format!("{tag}.{}", good_classes.join("."));
    }

    format!("{tag}:nth-of-type({})", nth_of_type(el))
}

fn nth_of_type(el: ElementRef) -> usize {
    let tag = el.value().name();
    let siblings = dom::sibling_elements(el);
    siblings
        .iter()
        .take_while(|s| s.id() != el.id())
        .filter(|s| s.value().name() == tag)
        .count()
        + 1
}

fn signals_for(doc: &Html, el: ElementRef, selector: &str, viewport: (f64, f64)) -> ElementSignals {
    let bbox: BoundingBox = dom::element_bbox(el);
    let parent = dom::parent_element(el);
    let parent_display = parent.and_then(dom::computed_display);
    let siblings = dom::sibling_elements(el);
    let sibling_count = siblings.len().saturating_sub(1);

    let img_sel = Selector::parse("img").unwrap();
    let link_sel = Selector::parse("a").unwrap();
    let heading_sel = Selector::parse("h1,h2,h3,h4,h5,h6").unwrap();

    let image_count = el.select(&img_sel).count();
    let link_count = el.select(&link_sel).count();
    let text = dom::trimmed_collapsed_text(el);
    let price_count = PRICE_REGEX.find_iter(&text).count();
    let has_title_heading = el.select(&heading_sel).next().is_some();

    let has_product_link = el
        .select(&link_sel)
        .any(|a| a.value().attr("href").map(|h| PRODUCT_URL_REGEX.is_match(h)).unwrap_or(false))
        || (el.value().name() == "a"
            && el.value().attr("href").map(|h| PRODUCT_URL_REGEX.is_match(h)).unwrap_or(false));

    let similar_sibling = siblings
        .iter()
        .filter(|s| s.id() != el.id())
        .any(|s| s.value().name() == el.value().name() && dom::classes(*s) == dom::classes(el));

    let _ = doc; // reserved for future cross-document lookups

    ElementSignals {
        tag: el.value().name().to_string(),
        selector: selector.to_string(),
        is_semantic_tag: matches!(el.value().name(), "article")
            || el.value().attr("role") == Some("listitem")
            || el.value().attr("itemtype").map(|v| v.contains("Product")).unwrap_or(false),
        has_product_attribute: ["data-product", "data-sku", "data-product-id", "data-item", "data-itemid"]
            .iter()
            .any(|a| el.value().attr(a).is_some()),
        is_schema_product: el.value().attr("itemtype").map(|v| v.contains("Product")).unwrap_or(false),
        nesting_depth: dom::nesting_depth(el),
        bbox,
        aspect_ratio: if bbox.height > 0.0 { bbox.width / bbox.height } else { 0.0 },
        width_ratio: if viewport.0 > 0.0 { bbox.width / viewport.0 } else { 0.0 },
        parent_is_grid: matches!(parent_display.as_deref(), Some("grid") | Some("flex") | Some("inline-flex")),
        sibling_count,
        has_similar_sibling: similar_sibling,
        image_count,
        text_length: text.len(),
        link_count,
        price_count,
        has_product_link,
        has_title_heading,
        parent_tag: parent.map(|p| p.value().name().to_string()).unwrap_or_default(),
        sibling_similarity: if similar_sibling { 1.0 } else { 0.0 },
    }
}
