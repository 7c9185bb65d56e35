//! Shared data model (spec §3). Signals, scores and fingerprints are produced
//! and discarded per detect cycle; only `RuleSet` and `ProductRecord` cross a
//! component boundary as something the caller is expected to keep.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Per-candidate signals gathered by the DOM Probe (C1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElementSignals {
    pub tag: String,
    pub selector: String,

    // structural
    pub is_semantic_tag: bool,
    pub has_product_attribute: bool,
    pub is_schema_product: bool,
    pub nesting_depth: usize,

    // visual
    pub bbox: BoundingBox,
    pub aspect_ratio: f64,
    pub width_ratio: f64, // width / viewport width
    pub parent_is_grid: bool,
    pub sibling_count: usize,
    pub has_similar_sibling: bool,

    // content
    pub image_count: usize,
    pub text_length: usize,
    pub link_count: usize,
    pub price_count: usize,
    pub has_product_link: bool,
    pub has_title_heading: bool,

    // context
    pub parent_tag: String,
    pub sibling_similarity: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl BoundingBox {
    pub fn area(&self) -> f64 {
        self.width * self.height
    }
}

/// Content classification (C3). `confidence` is bounded to `[0, 1]`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ContentClass {
    Product,
    Banner,
    Ad,
    Category,
    Ui,
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Classification {
    pub class: ContentClass,
    pub confidence: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
pub struct ScoreBreakdown {
    pub structural: f64,
    pub visual: f64,
    pub content: f64,
    pub context: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElementScore {
    pub selector: String,
    pub tag_name: String,
    pub total_score: f64,
    pub confidence: f64,
    pub breakdown: ScoreBreakdown,
    pub signals: ElementSignals,
    pub pattern_group: Option<u64>,
    pub pattern_group_size: Option<usize>,
}

/// Structural fingerprint (§3). Two elements with equal `hash` share a
/// pattern group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuralFingerprint {
    pub tag_path: Vec<String>,
    pub class_patterns: Vec<String>,
    pub nesting_depth: usize,
    pub child_structure_hash: u64,
    pub hash: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectedElement {
    pub specific_selector: String,
    pub generic_selector: String,
    pub bbox: BoundingBox,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DominantPattern {
    pub hash: u64,
    pub count: usize,
    pub sample_selector: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionResult {
    pub selected_element: Option<SelectedElement>,
    pub confidence: f64,
    pub fallback_recommended: bool,
    pub reason: Option<String>,
    pub all_candidates: Vec<ElementScore>,
    pub dominant_pattern: Option<DominantPattern>,
}

impl DetectionResult {
    pub fn no_candidates() -> Self {
        Self {
            selected_element: None,
            confidence: 0.0,
            fallback_recommended: true,
            reason: Some("no candidates gathered".to_string()),
            all_candidates: Vec::new(),
            dominant_pattern: None,
        }
    }
}

/// Offset style: whether consecutive pages increment a 1-based `page` number
/// or an item-count `offset`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OffsetStyle {
    #[default]
    Page,
    Offset,
}

/// `style` is not part of the persisted §6 schema's `offset` shape
/// (`{key, start, increment}`); it's derived from `key` when absent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OffsetPattern {
    pub key: String,
    pub start: i64,
    pub increment: i64,
    #[serde(default)]
    pub style: OffsetStyle,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PaginationDescriptor {
    NextClick {
        selector: String,
    },
    UrlOffset {
        selector: Option<String>,
        offset: OffsetPattern,
    },
    InfiniteScroll {
        scroll_positions: Vec<f64>,
    },
    Hybrid {
        click: Box<PaginationDescriptor>,
        scroll: Box<PaginationDescriptor>,
    },
    None,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "PascalCase")]
pub enum FieldRole {
    Title,
    Price,
    OriginalPrice,
    SalePrice,
    #[serde(rename = "URL")]
    Url,
    Image,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ExtractionType {
    Text,
    Href,
    Src,
    Attribute,
    InnerHtml,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldRule {
    pub role: FieldRole,
    pub selector: String,
    pub extraction_type: ExtractionType,
    pub attribute_name: Option<String>,
    pub priority: i32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScrollStrategy {
    Adaptive,
    Rapid,
    Fixed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LazyLoadConfig {
    #[serde(rename = "scrollStrategy", default = "default_scroll_strategy")]
    pub scroll_strategy: ScrollStrategy,
    #[serde(rename = "scrollDelay")]
    pub scroll_delay: Option<u64>,
    #[serde(rename = "maxScrollIterations")]
    pub max_scroll_iterations: Option<u32>,
    #[serde(rename = "stabilityTimeout")]
    pub stability_timeout: Option<u64>,
    #[serde(rename = "rapidScrollStep")]
    pub rapid_scroll_step: Option<u32>,
    #[serde(rename = "rapidScrollDelay")]
    pub rapid_scroll_delay: Option<u64>,
    #[serde(rename = "loadingIndicators", default)]
    pub loading_indicators: Vec<String>,
}

fn default_scroll_strategy() -> ScrollStrategy {
    ScrollStrategy::Adaptive
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaginationKind {
    NextPage,
    UrlPattern,
    InfiniteScroll,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaginationConfig {
    #[serde(rename = "type")]
    pub kind: PaginationKind,
    pub selector: Option<String>,
    pub pattern: Option<String>,
    pub offset: Option<OffsetPattern>,
    pub max_pages: Option<u32>,
    pub start_page: Option<u32>,
    #[serde(rename = "scrollPositions")]
    pub scroll_positions: Option<Vec<f64>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DismissAction {
    pub selector: String,
    pub timestamp: Option<i64>,
}

/// Persisted rule set (spec §6, stable JSON schema). `selectors` is a
/// role-keyed map where each role's value is either a single CSS string or
/// an ordered list (priority implied by array index); this is distinct from
/// §3's internal Extraction Rule Set shape, and `fields` is converted
/// to/from that wire shape by `selectors_schema` below.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleSet {
    pub name: String,
    pub url: Option<String>,
    pub country: Option<String>,
    pub competitor_type: Option<String>,
    #[serde(rename = "itemContainer")]
    pub item_container: Option<String>,
    #[serde(rename = "selectors", with = "selectors_schema")]
    pub fields: Vec<FieldRule>,
    pub pagination: Option<PaginationConfig>,
    pub dismiss_actions: Option<Vec<DismissAction>>,
    #[serde(rename = "lazyLoad")]
    pub lazy_load: Option<LazyLoadConfig>,
    #[serde(rename = "targetItems")]
    pub target_items: Option<u32>,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
}

/// (De)serializes `RuleSet.fields` against the persisted `selectors` shape:
/// `{ Title?: string|string[], Price?: string|string[], ... }`, with
/// priority implied by position in the array.
mod selectors_schema {
    use std::collections::HashMap;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    use super::{ExtractionType, FieldRole, FieldRule};

    #[derive(Serialize, Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    impl OneOrMany {
        fn into_vec(self) -> Vec<String> {
            match self {
                OneOrMany::One(s) => vec![s],
                OneOrMany::Many(v) => v,
            }
        }
    }

    fn default_extraction_type(role: FieldRole) -> ExtractionType {
        match role {
            FieldRole::Url => ExtractionType::Href,
            FieldRole::Image => ExtractionType::Src,
            _ => ExtractionType::Text,
        }
    }

    pub fn serialize<S: Serializer>(fields: &[FieldRule], serializer: S) -> Result<S::Ok, S::Error> {
        let mut grouped: HashMap<FieldRole, Vec<&FieldRule>> = HashMap::new();
        for f in fields {
            grouped.entry(f.role).or_default().push(f);
        }
        let mut map: HashMap<FieldRole, Vec<String>> = HashMap::new();
        for (role, mut rules) in grouped {
            rules.sort_by_key(|r| r.priority);
            map.insert(role, rules.into_iter().map(|r| r.selector.clone()).collect());
        }
        map.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<FieldRule>, D::Error> {
        let map: HashMap<FieldRole, OneOrMany> = HashMap::deserialize(deserializer)?;
        let mut out = Vec::new();
        for (role, selectors) in map {
            for (priority, selector) in selectors.into_vec().into_iter().enumerate() {
                out.push(FieldRule {
                    role,
                    selector,
                    extraction_type: default_extraction_type(role),
                    attribute_name: None,
                    priority: priority as i32,
                });
            }
        }
        Ok(out)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductRecord {
    pub id: String,
    pub title: Option<String>,
    pub price: Option<f64>,
    pub price_raw: Option<String>,
    pub currency: Option<String>,
    pub url: Option<String>,
    pub image_url: Option<String>,
    pub source_url: String,
    pub domain: String,
    pub scraped_at: String,
    pub raw: Option<HashMap<String, serde_json::Value>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rule_set_deserializes_the_persisted_schema_shape() {
        let payload = serde_json::json!({
            "name": "example-grid",
            "url": "https://shop.example.com/list",
            "itemContainer": "li.product-card",
            "selectors": {
                "Title": "h3",
                "Price": ["span.sale-price", "span.price"],
                "URL": "a",
                "Image": "img"
            },
            "pagination": {
                "type": "url_pattern",
                "offset": { "key": "o", "start": 0, "increment": 24 },
                "max_pages": 3,
                "scrollPositions": [0.0, 500.0]
            },
            "dismiss_actions": [{ "selector": ".cookie-accept" }],
            "lazyLoad": { "scrollStrategy": "adaptive", "maxScrollIterations": 10 },
            "targetItems": 50
        });

        let rule_set: RuleSet = serde_json::from_value(payload).expect("spec §6 shaped payload should deserialize");
        assert_eq!(rule_set.item_container.as_deref(), Some("li.product-card"));
        assert_eq!(rule_set.target_items, Some(50));

        let price_fields: Vec<&FieldRule> =
            rule_set.fields.iter().filter(|f| f.role == FieldRole::Price).collect();
        assert_eq!(price_fields.len(), 2);
        // priority implied by array index — ascending, first element wins.
        let mut sorted = price_fields.clone();
        sorted.sort_by_key(|f| f.priority);
        assert_eq!(sorted[0].selector, "span.sale-price");
        assert_eq!(sorted[1].selector, "span.price");

        let url_field = rule_set.fields.iter().find(|f| f.role == FieldRole::Url).unwrap();
        assert_eq!(url_field.extraction_type, ExtractionType::Href);

        let pagination = rule_set.pagination.expect("pagination should be present");
        assert_eq!(pagination.scroll_positions, Some(vec![0.0, 500.0]));
        assert_eq!(pagination.offset.unwrap().key, "o");
    }

    #[test]
    fn rule_set_round_trips_through_the_persisted_schema() {
        let original = RuleSet {
            name: "roundtrip".to_string(),
            url: None,
            country: None,
            competitor_type: None,
            item_container: Some(".card".to_string()),
            fields: vec![
                FieldRule { role: FieldRole::Title, selector: "h3".to_string(), extraction_type: ExtractionType::Text, attribute_name: None, priority: 0 },
                FieldRule { role: FieldRole::Url, selector: "a".to_string(), extraction_type: ExtractionType::Href, attribute_name: None, priority: 0 },
            ],
            pagination: None,
            dismiss_actions: None,
            lazy_load: None,
            target_items: None,
            created_at: None,
            updated_at: None,
        };
        let value = serde_json::to_value(&original).unwrap();
        assert!(value.get("selectors").is_some());
        let round_tripped: RuleSet = serde_json::from_value(value).unwrap();
        assert_eq!(round_tripped.fields.len(), 2);
    }
}
