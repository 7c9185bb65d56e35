//! C8 — Network Interceptor. Extract product records from intercepted
//! JSON API responses, either via an operator-configured field mapping or
//! by auto-detecting product-shaped payloads (spec §4.8).

use std::collections::HashMap;

use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;

use crate::glossary::{field_name_dictionary, generalize_url_pattern, parse_price};
use crate::model::ProductRecord;

lazy_static! {
    /// URL shapes that commonly carry product catalog data.
    static ref API_URL_PATTERNS: Vec<Regex> = vec![
        Regex::new(r"(?i)/tile/\d+").unwrap(),
        Regex::new(r"(?i)/api/products?/").unwrap(),
        Regex::new(r"(?i)/graphql").unwrap(),
        Regex::new(r"(?i)/v\d+/items?/").unwrap(),
        Regex::new(r"(?i)/catalog/").unwrap(),
        Regex::new(r"(?i)/_next/data.*\.json").unwrap(),
        Regex::new(r"(?i)/product[s]?/\d+").unwrap(),
        Regex::new(r"(?i)/sku/").unwrap(),
        Regex::new(r"(?i)/item[s]?/").unwrap(),
    ];
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct FieldMapping {
    pub id: Option<String>,
    pub title: Option<String>,
    pub price: Option<String>,
    pub url: Option<String>,
    pub image: Option<String>,
}

#[derive(Debug, Clone)]
pub struct InterceptedResponse {
    pub url: String,
    pub body: Value,
}

/// Configured extraction: navigate each field's dot-path against every
/// element of the array found at `data_path`, deduping by `id`.
pub fn extract_configured(
    response: &InterceptedResponse,
    data_path: &str,
    mapping: &FieldMapping,
) -> Vec<ProductRecord> {
    let Some(items) = navigate_path(&response.body, data_path).and_then(Value::as_array) else {
        return Vec::new();
    };

    let mut seen_ids = std::collections::HashSet::new();
    let mut out = Vec::new();
    for item in items {
        let id = mapping
            .id
            .as_deref()
            .and_then(|p| navigate_path(item, p))
            .map(value_to_string)
            .unwrap_or_else(|| format!("{:x}", hash_value(item)));
        if !seen_ids.insert(id.clone()) {
            continue;
        }
        out.push(build_record(item, &id, mapping, &response.url));
    }
    out
}

fn build_record(item: &Value, id: &str, mapping: &FieldMapping, source_url: &str) -> ProductRecord {
    let title = mapping.title.as_deref().and_then(|p| navigate_path(item, p)).map(value_to_string);
    let price_raw = mapping.price.as_deref().and_then(|p| navigate_path(item, p)).map(value_to_string);
    let (price, currency) = price_raw.as_deref().and_then(parse_price).map(|(p, c)| (Some(p), c)).unwrap_or((None, None));
    let url = mapping.url.as_deref().and_then(|p| navigate_path(item, p)).map(value_to_string);
    let image_url = mapping.image.as_deref().and_then(|p| navigate_path(item, p)).map(value_to_string);

    ProductRecord {
        id: id.to_string(),
        title,
        price,
        price_raw,
        currency,
        url,
        image_url,
        source_url: source_url.to_string(),
        domain: domain_of(source_url),
        scraped_at: String::new(),
        raw: item.as_object().map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect()),
    }
}

fn domain_of(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_string()))
        .unwrap_or_default()
}

/// Auto-detect mode: does `url` look like a product API endpoint?
pub fn looks_like_product_api(url: &str) -> bool {
    API_URL_PATTERNS.iter().any(|re| re.is_match(url))
}

/// Recursively score JSON objects up to depth 3 against the field-name
/// dictionary (+25 id/title/price match, +15 url/image match), returning
/// the highest-confidence field mapping found together with the dot-path
/// to the array of items it should be applied to.
pub fn auto_detect(body: &Value) -> Option<(String, FieldMapping, f64)> {
    let mut best: Option<(String, FieldMapping, f64)> = None;
    search_arrays(body, "", 0, &mut best);
    best
}

fn search_arrays(value: &Value, path: &str, depth: usize, best: &mut Option<(String, FieldMapping, f64)>) {
    if depth > 3 {
        return;
    }
    match value {
        Value::Array(items) => {
            if let Some(first) = items.first() {
                if let Some(obj) = first.as_object() {
                    let (mapping, score) = score_object(obj);
                    let has_title_or_price = mapping.title.is_some() || mapping.price.is_some();
                    if score >= 30.0 && has_title_or_price {
                        let replace = best.as_ref().map(|(_, _, s)| score > *s).unwrap_or(true);
                        if replace {
                            *best = Some((path.to_string(), mapping, score));
                        }
                    }
                }
            }
            for (i, item) in items.iter().enumerate() {
                search_arrays(item, &format!("{path}[{i}]"), depth + 1, best);
            }
        }
        Value::Object(map) => {
            for (k, v) in map {
                let child_path = if path.is_empty() { k.clone() } else { format!("{path}.{k}") };
                search_arrays(v, &child_path, depth + 1, best);
            }
        }
        _ => {}
    }
}

fn score_object(obj: &serde_json::Map<String, Value>) -> (FieldMapping, f64) {
    let mut mapping = FieldMapping { id: None, title: None, price: None, url: None, image: None };
    let mut score = 0.0;

    for (role, weight) in [("id", 25.0), ("title", 25.0), ("price", 25.0), ("url", 15.0), ("image", 15.0)] {
        for candidate in field_name_dictionary(role) {
            if let Some(key) = obj.keys().find(|k| k.eq_ignore_ascii_case(candidate)) {
                score += weight;
                match role {
                    "id" => mapping.id = Some(key.clone()),
                    "title" => mapping.title = Some(key.clone()),
                    "price" => mapping.price = Some(key.clone()),
                    "url" => mapping.url = Some(key.clone()),
                    "image" => mapping.image = Some(key.clone()),
                    _ => {}
                }
                break;
            }
        }
    }

    (mapping, score)
}

/// Generalize an observed API URL into a reusable pattern by replacing
/// digit runs with `*` (spec glossary).
pub fn url_pattern(url: &str) -> String {
    generalize_url_pattern(url)
}

fn navigate_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;
    for segment in path.split('.') {
        if segment.is_empty() {
            continue;
        }
        if let Some(idx_start) = segment.find('[') {
            let key = &segment[..idx_start];
            if !key.is_empty() {
                current = current.get(key)?;
            }
            let idx: usize = segment[idx_start + 1..segment.len() - 1].parse().ok()?;
            current = current.get(idx)?;
        } else {
            current = current.get(segment)?;
        }
    }
    Some(current)
}

fn value_to_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string().trim_matches('"').to_string(),
    }
}

fn hash_value(v: &Value) -> u64 {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};
    let mut hasher = DefaultHasher::new();
    v.to_string().hash(&mut hasher);
    hasher.finish()
}

#[allow(dead_code)]
fn dot_path_map() -> HashMap<&'static str, &'static str> {
    HashMap::new()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extracts_configured_mapping_with_dedup() {
        let body = json!({
            "data": {
                "items": [
                    {"sku": "A1", "name": "Shoe", "price": "£12.99", "href": "/p/1", "img": "a.jpg"},
                    {"sku": "A1", "name": "Shoe", "price": "£12.99", "href": "/p/1", "img": "a.jpg"},
                    {"sku": "A2", "name": "Hat", "price": "£9.99", "href": "/p/2", "img": "b.jpg"},
                ]
            }
        });
        let response = InterceptedResponse { url: "https://shop.example.com/api/search".to_string(), body };
        let mapping = FieldMapping {
            id: Some("sku".to_string()),
            title: Some("name".to_string()),
            price: Some("price".to_string()),
            url: Some("href".to_string()),
            image: Some("img".to_string()),
        };
        let records = extract_configured(&response, "data.items", &mapping);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].price, Some(12.99));
        assert_eq!(records[0].domain, "shop.example.com");
    }

    #[test]
    fn auto_detects_product_shaped_array() {
        let body = json!({
            "results": [
                {"productId": "1", "title": "Shoe", "salePrice": "9.99", "imageUrl": "a.jpg"},
                {"productId": "2", "title": "Hat", "salePrice": "19.99", "imageUrl": "b.jpg"}
            ]
        });
        let (path, mapping, score) = auto_detect(&body).expect("should detect a product array");
        assert_eq!(path, "results");
        assert!(score >= 65.0);
        assert_eq!(mapping.title.as_deref(), Some("title"));
    }

    #[test]
    fn recognizes_product_api_urls() {
        assert!(looks_like_product_api("https://shop.example.com/api/products/search?q=shoe"));
        assert!(looks_like_product_api("https://shop.example.com/graphql"));
        assert!(looks_like_product_api("https://shop.example.com/v2/items/42"));
        assert!(looks_like_product_api("https://shop.example.com/catalog/summer"));
        assert!(looks_like_product_api("https://shop.example.com/_next/data/build123/page.json"));
        assert!(looks_like_product_api("https://shop.example.com/products/42"));
        assert!(looks_like_product_api("https://shop.example.com/sku/ABC123"));
        assert!(looks_like_product_api("https://shop.example.com/tile/9981"));
        assert!(!looks_like_product_api("https://shop.example.com/static/app.js"));
    }

    #[test]
    fn rejects_array_with_only_url_and_image_fields() {
        let body = json!({
            "results": [
                {"url": "/p/1", "image": "a.jpg"},
                {"url": "/p/2", "image": "b.jpg"}
            ]
        });
        assert!(auto_detect(&body).is_none());
    }

    #[test]
    fn url_pattern_generalizes_digit_runs() {
        assert_eq!(url_pattern("/api/tile/1234"), "/api/tile/*");
    }
}
