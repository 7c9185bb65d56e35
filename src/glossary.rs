//! Constants and small pure helpers shared across components (spec GLOSSARY).

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    /// Currency-tagged numeric token, e.g. "£12.99", "19,99€", "1299 MAD".
    pub static ref PRICE_REGEX: Regex = Regex::new(
        r"(?i)[£$€¥₹]\s*\d+([,.]\d{2,3})?|\d+([,.]\d{2,3})?\s*[£$€¥₹MAD]"
    ).unwrap();

    /// Heuristic match for a product detail URL.
    pub static ref PRODUCT_URL_REGEX: Regex = Regex::new(
        r"(?i)/(p|product|products|item|items|dp|sku)[/-][\w-]+|/\d{4,}(?:[/?]|$)"
    ).unwrap();

    pub static ref STATE_UTILITY_CLASS: Regex =
        Regex::new(r"^(hover|active|focus|selected|ng-|js-|_|\d)").unwrap();

    pub static ref FIXED_STICKY_ABSOLUTE: Regex =
        Regex::new(r"(?i)\b(fixed|sticky|absolute)\b").unwrap();

    pub static ref CAROUSEL_SLIDER: Regex =
        Regex::new(r"(?i)\b(carousel|slider|swiper|slick)\b").unwrap();

    pub static ref PRODUCT_CLASS_HINT: Regex =
        Regex::new(r"(?i)product|item|card|tile|box|listing").unwrap();

    pub static ref LEFT_ARROW_GLYPH: Regex = Regex::new(r"[←‹«◀]").unwrap();
    pub static ref RIGHT_ARROW_GLYPH: Regex = Regex::new(r"[→›»▶]").unwrap();

    pub static ref PREV_WORD_ROOT: Regex =
        Regex::new(r"(?i)\b(prev|previous|zurück|back|anterior|précédent)\b").unwrap();
    pub static ref NEXT_WORD_ROOT: Regex =
        Regex::new(r"(?i)\b(next|weiter|suivant|siguiente|nächste|n[aä]chste)\b").unwrap();

    pub static ref DIGIT_RUN: Regex = Regex::new(r"\d+").unwrap();
}

/// Tailwind-style utility class prefixes filtered out of generic-selector
/// synthesis. Classes containing `[…]` (arbitrary values) are kept.
pub const TAILWIND_UTILITY_PREFIXES: &[&str] = &[
    "flex", "grid", "block", "inline", "hidden", "relative", "absolute", "fixed", "sticky", "w-",
    "h-", "min-", "max-", "p-", "m-", "px-", "py-", "mx-", "my-", "pt-", "pb-", "pl-", "pr-",
    "mt-", "mb-", "ml-", "mr-", "gap-", "space-", "text-", "font-", "bg-", "border-", "rounded",
    "shadow", "opacity-", "z-", "top-", "bottom-", "left-", "right-", "inset-", "items-",
    "justify-", "self-", "place-", "order-", "col-", "row-", "overflow", "cursor-", "pointer-",
    "select-", "resize", "whitespace-", "break-", "truncate", "leading-", "tracking-", "align-",
    "decoration-", "list-", "outline-", "ring-", "fill-", "stroke-", "sr-only", "transition",
    "duration-", "ease-", "delay-", "animate-", "hover:", "focus:", "active:", "disabled:",
    "group-", "peer-", "sm:", "md:", "lg:", "xl:", "2xl:", "dark:",
];

/// Is `class` a Tailwind-style utility class that should be filtered from
/// generic-selector synthesis? Arbitrary-value classes (`grid-cols-[...]`)
/// are always kept even if they share a utility prefix.
pub fn is_tailwind_utility(class: &str) -> bool {
    if class.contains('[') {
        return false;
    }
    TAILWIND_UTILITY_PREFIXES
        .iter()
        .any(|p| class == *p || class.starts_with(p))
}

/// Reject any class matching the state/utility filter used when building
/// candidate selector paths.
pub fn is_state_or_utility_class(class: &str) -> bool {
    STATE_UTILITY_CLASS.is_match(class)
}

/// Is `src` a placeholder image per the glossary definition?
pub fn is_placeholder_image(src: &str) -> bool {
    if src.is_empty() || src.starts_with("data:image") {
        return true;
    }
    let lower = src.to_lowercase();
    ["placeholder", "loading", "blank", "spacer", "1x1"]
        .iter()
        .any(|needle| lower.contains(needle))
}

/// Field-name dictionary for C8 auto-detect (role -> accepted JSON key names).
pub fn field_name_dictionary(role: &str) -> &'static [&'static str] {
    match role {
        "id" => &["id", "productId", "sku", "itemId", "variationId", "articleId"],
        "title" => &["title", "name", "productName", "displayName", "label", "headline"],
        "price" => &[
            "price",
            "currentPrice",
            "salePrice",
            "finalPrice",
            "displayPrice",
            "priceValue",
        ],
        "url" => &["url", "href", "link", "productUrl", "pdpUrl", "detailUrl", "canonicalUrl"],
        "image" => &["image", "imageUrl", "img", "thumbnail", "mainImage", "primaryImage", "pictureUrl"],
        _ => &[],
    }
}

/// Parse a raw price string into `(amount, currency)` using the
/// decimal/thousand heuristic from the glossary.
pub fn parse_price(raw: &str) -> Option<(f64, Option<String>)> {
    let currency = extract_currency(raw);
    let digits_and_seps: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == ',' || *c == '.')
        .collect();
    if digits_and_seps.is_empty() {
        return None;
    }

    let last_comma = digits_and_seps.rfind(',');
    let last_dot = digits_and_seps.rfind('.');

    let normalized = match (last_comma, last_dot) {
        (Some(c), Some(d)) if c > d => {
            // comma is decimal separator, dot is thousands
            digits_and_seps.replace('.', "").replace(',', ".")
        }
        (Some(c), Some(d)) if d > c => {
            // dot is decimal separator, comma is thousands
            digits_and_seps.replace(',', "")
        }
        (Some(_), None) => {
            // only comma present
            let after = digits_and_seps.rsplit(',').next().unwrap_or("");
            if after.len() == 3 {
                digits_and_seps.replace(',', "")
            } else {
                digits_and_seps.replace(',', ".")
            }
        }
        _ => digits_and_seps.replace(',', ""),
    };

    normalized.parse::<f64>().ok().map(|v| (v, currency))
}

fn extract_currency(raw: &str) -> Option<String> {
    let symbols = [
        ("£", "GBP"),
        ("$", "USD"),
        ("€", "EUR"),
        ("¥", "JPY"),
        ("₹", "INR"),
    ];
    for (symbol, code) in symbols {
        if raw.contains(symbol) {
            return Some(code.to_string());
        }
    }
    for code in ["USD", "EUR", "GBP", "MAD", "JPY", "INR", "CAD", "AUD"] {
        if raw.to_uppercase().contains(code) {
            return Some(code.to_string());
        }
    }
    None
}

/// Replace digit runs in a URL path with `*`, used to generalize an
/// observed API path into a reusable pattern (C8 auto-detect).
pub fn generalize_url_pattern(path: &str) -> String {
    DIGIT_RUN.replace_all(path, "*").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn price_regex_counts_non_overlapping_matches() {
        let text = "Was £19.99 now £12.99";
        assert_eq!(PRICE_REGEX.find_iter(text).count(), 2);
    }

    #[test]
    fn decimal_thousand_heuristic() {
        assert_eq!(parse_price("1,234.56").unwrap().0, 1234.56);
        assert_eq!(parse_price("1.234,56").unwrap().0, 1234.56);
        assert_eq!(parse_price("1,234").unwrap().0, 1234.0);
        assert_eq!(parse_price("12,99").unwrap().0, 12.99);
        assert_eq!(parse_price("£12.99").unwrap(), (12.99, Some("GBP".to_string())));
    }

    #[test]
    fn placeholder_detection() {
        assert!(is_placeholder_image(""));
        assert!(is_placeholder_image("data:image/gif;base64,ABC"));
        assert!(is_placeholder_image("https://cdn/loading-spinner.gif"));
        assert!(!is_placeholder_image("https://cdn/x.jpg"));
    }

    #[test]
    fn tailwind_utility_filter_keeps_arbitrary_values() {
        assert!(is_tailwind_utility("flex"));
        assert!(is_tailwind_utility("text-sm"));
        assert!(!is_tailwind_utility("grid-cols-[18rem_1fr]"));
        assert!(!is_tailwind_utility("product-card"));
    }

    #[test]
    fn url_pattern_generalization() {
        assert_eq!(generalize_url_pattern("/api/tile/1234"), "/api/tile/*");
    }
}
