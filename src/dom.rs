//! DOM access shared by C1-C4. The live `ChromeDriver` path and the offline
//! `FixtureDriver` path both ultimately hand the rest of the pipeline a
//! `scraper::Html` snapshot (the live driver obtains it by evaluating
//! `document.documentElement.outerHTML`); everything downstream of the
//! snapshot is pure and source-agnostic.
//!
//! Bounding boxes and computed `display` are not derivable from a bare HTML
//! string, so this module approximates them from inline `style` attributes
//! and a small set of well-known utility classes (`grid`, `flex`, `inline-
//! flex`). The live `ChromeDriver` instead reads real `getBoundingClientRect`
//! / `getComputedStyle` results and attaches them the same way via a
//! `data-rbscrape-box`/`data-rbscrape-display` attribute pair injected before
//! serialization, so both paths converge on the same `ElementBox` shape.

use scraper::{Element, ElementRef, Html, Selector};

use crate::model::BoundingBox;

pub const DEFAULT_VIEWPORT: (f64, f64) = (1440.0, 900.0);

/// Resolve the approximate bounding box of `el`. Honors
/// `data-rbscrape-box="x,y,w,h"` (set by the live driver) first, then an
/// inline `style` width/height, then falls back to a size derived from
/// whether the element looks image-bearing (large enough to pass the
/// ≥80×80 filters used by candidate sweeps).
pub fn element_bbox(el: ElementRef) -> BoundingBox {
    if let Some(raw) = el.value().attr("data-rbscrape-box") {
        let parts: Vec<f64> = raw.split(',').filter_map(|p| p.trim().parse().ok()).collect();
        if parts.len() == 4 {
            return BoundingBox {
                x: parts[0],
                y: parts[1],
                width: parts[2],
                height: parts[3],
            };
        }
    }

    if let Some(style) = el.value().attr("style") {
        let w = style_dimension(style, "width");
        let h = style_dimension(style, "height");
        if let (Some(w), Some(h)) = (w, h) {
            return BoundingBox { x: 0.0, y: 0.0, width: w, height: h };
        }
    }

    let has_image = el
        .select(&Selector::parse("img").unwrap())
        .next()
        .is_some();
    if has_image {
        BoundingBox { x: 0.0, y: 0.0, width: 240.0, height: 320.0 }
    } else {
        BoundingBox { x: 0.0, y: 0.0, width: 0.0, height: 0.0 }
    }
}

fn style_dimension(style: &str, prop: &str) -> Option<f64> {
    style.split(';').find_map(|decl| {
        let mut parts = decl.splitn(2, ':');
        let key = parts.next()?.trim();
        if key != prop {
            return None;
        }
        let value = parts.next()?.trim().trim_end_matches("px");
        value.parse::<f64>().ok()
    })
}

/// Approximate computed `display`. Honors `data-rbscrape-display` (live
/// driver), then inline `style`, then a `grid`/`flex`/`inline-flex` class
/// token (the common case on utility-CSS sites, and the only signal
/// available to a static-fixture test).
pub fn computed_display(el: ElementRef) -> Option<String> {
    if let Some(v) = el.value().attr("data-rbscrape-display") {
        return Some(v.to_string());
    }
    if let Some(style) = el.value().attr("style") {
        for decl in style.split(';') {
            let mut parts = decl.splitn(2, ':');
            if parts.next()?.trim() == "display" {
                return parts.next().map(|v| v.trim().to_string());
            }
        }
    }
    let classes: Vec<&str> = el.value().classes().collect();
    if classes.contains(&"grid") {
        Some("grid".to_string())
    } else if classes.iter().any(|c| *c == "flex" || *c == "inline-flex") {
        Some("flex".to_string())
    } else {
        None
    }
}

pub fn classes(el: ElementRef) -> Vec<String> {
    el.value().classes().map(|c| c.to_string()).collect()
}

pub fn text_content(el: ElementRef) -> String {
    el.text().collect::<Vec<_>>().join(" ")
}

pub fn trimmed_collapsed_text(el: ElementRef) -> String {
    let raw = text_content(el);
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn nesting_depth(el: ElementRef) -> usize {
    el.ancestors().count()
}

pub fn parent_element(el: ElementRef) -> Option<ElementRef> {
    el.parent_element()
}

pub fn sibling_elements(el: ElementRef) -> Vec<ElementRef> {
    match parent_element(el) {
        Some(parent) => parent.children().filter_map(ElementRef::wrap).collect(),
        None => Vec::new(),
    }
}

/// Parse a document, panicking never: malformed HTML is tolerated by
/// `scraper`/`html5ever` the way a browser tolerates it.
pub fn parse_document(html: &str) -> Html {
    Html::parse_document(html)
}

pub fn select_all<'a>(doc: &'a Html, selector: &str) -> Result<Vec<ElementRef<'a>>, String> {
    let parsed = Selector::parse(selector).map_err(|e| format!("{e:?}"))?;
    Ok(doc.select(&parsed).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bbox_from_style() {
        let doc = parse_document(r#"<div style="width:100px;height:120px"></div>"#);
        let el = select_all(&doc, "div").unwrap()[0];
        let bbox = element_bbox(el);
        assert_eq!(bbox.width, 100.0);
        assert_eq!(bbox.height, 120.0);
    }

    #[test]
    fn display_from_class() {
        let doc = parse_document(r#"<ul class="grid"><li></li></ul>"#);
        let el = select_all(&doc, "ul").unwrap()[0];
        assert_eq!(computed_display(el), Some("grid".to_string()));
    }
}
