//! C9 — Extraction Engine. Runs pre-actions, locates the product
//! container, drives lazy-load and pagination, and pulls `ProductRecord`s
//! out of each page using a `RuleSet`'s field rules (spec §4.9).

use std::collections::HashSet;

use scraper::{ElementRef, Selector};

use crate::detector::{self, DetectorOptions};
use crate::dom;
use crate::driver::Driver;
use crate::error::{RainbowError, Result};
use crate::glossary::parse_price;
use crate::lazyload::{self, ScrollDecision, ScrollState};
use crate::model::{ExtractionType, FieldRole, FieldRule, PaginationDescriptor, ProductRecord, RuleSet};
use crate::pagination;
use crate::popup::{self, ActionResult, ActionSurface, ScriptedAction};

/// Adapts any `Driver` to the narrower `ActionSurface` the popup handler
/// needs.
pub struct DriverActionSurface<'a>(pub &'a dyn Driver);

#[async_trait::async_trait]
impl<'a> ActionSurface for DriverActionSurface<'a> {
    async fn is_visible(&self, selector: &str) -> bool {
        self.0.is_visible(selector).await
    }
    async fn click(&self, selector: &str) -> Result<()> {
        self.0.click(selector).await
    }
    async fn type_text(&self, selector: &str, text: &str) -> Result<()> {
        self.0.type_text(selector, text).await
    }
    async fn select_option(&self, selector: &str, value: &str) -> Result<()> {
        self.0.select_option(selector, value).await
    }
    async fn scroll_into_view(&self, selector: Option<&str>) -> Result<()> {
        self.0.scroll_into_view(selector).await
    }
    async fn wait(&self, milliseconds: u64) {
        self.0.wait_for_timeout(milliseconds).await
    }
}

const DEFAULT_MAX_PAGES: u32 = 50;

/// Run the full extraction pipeline for `rule_set` over whatever page
/// `driver` currently has loaded, advancing pagination and dedupe-ing by
/// the composite `(url, title, price)` identity (spec §4.9).
pub async fn run(driver: &dyn Driver, rule_set: &RuleSet) -> Result<Vec<ProductRecord>> {
    run_dismiss_actions(driver, rule_set).await;

    let mut seen = HashSet::new();
    let mut records = Vec::new();
    let max_pages = rule_set
        .pagination
        .as_ref()
        .and_then(|p| p.max_pages)
        .unwrap_or(DEFAULT_MAX_PAGES);

    for page in 0..max_pages {
        prepare_lazy_load(driver, rule_set).await?;

        let html = driver.document_html().await?;
        let source_url = driver.current_url().await.unwrap_or_default();
        let page_records = extract_page(&html, rule_set, &source_url)?;

        let mut grew = false;
        for record in page_records {
            let key = canonical_identity(&record);
            if seen.insert(key) {
                grew = true;
                records.push(record);
            }
        }

        if let Some(target) = rule_set.target_items {
            if records.len() as u32 >= target {
                break;
            }
        }

        if page + 1 >= max_pages {
            break;
        }
        if !advance_pagination(driver, rule_set).await? {
            break;
        }
        if !grew {
            // No new items after advancing once more than expected means
            // the last page was reached even though a "next" control was
            // still technically present (e.g. a disabled-looking link the
            // discover step didn't filter out).
            let html_after = driver.document_html().await?;
            if html_after == html {
                break;
            }
        }
    }

    Ok(records)
}

async fn run_dismiss_actions(driver: &dyn Driver, rule_set: &RuleSet) {
    let Some(dismissals) = &rule_set.dismiss_actions else { return };
    let actions: Vec<ScriptedAction> =
        dismissals.iter().map(|d| ScriptedAction::Click { selector: d.selector.clone() }).collect();
    let surface = DriverActionSurface(driver);

    // Block any navigation away from the starting page for the duration of
    // the sequence (spec §4.10), released unconditionally once it's done.
    let starting_url = driver.current_url().await.unwrap_or_default();
    let guard_pattern = format!("!{starting_url}");
    let _ = driver.set_route_guard(&guard_pattern, true).await;
    let _: Vec<ActionResult> = popup::run_sequence(&surface, &actions).await;
    let _ = driver.set_route_guard(&guard_pattern, false).await;
}

async fn prepare_lazy_load(driver: &dyn Driver, rule_set: &RuleSet) -> Result<()> {
    let Some(config) = &rule_set.lazy_load else { return Ok(()) };

    let mut state = ScrollState::default();
    loop {
        let html = driver.document_html().await?;
        let item_count = rule_set
            .item_container
            .as_deref()
            .map(|sel| count_matches(&html, sel))
            .unwrap_or(0);
        let scroll_y = driver.scroll_y().await;

        driver.mouse_wheel(0.0, config.rapid_scroll_step.unwrap_or(800) as f64).await?;
        driver.wait_for_timeout(config.scroll_delay.unwrap_or(300)).await;

        match lazyload::next_decision(&mut state, config, item_count, scroll_y) {
            ScrollDecision::Continue => continue,
            ScrollDecision::Stop => break,
        }
    }

    let html = driver.document_html().await?;
    let eager_html = lazyload::force_eager_load(&html);
    let _ = eager_html; // live driver applies this via DOM mutation, not a reload
    Ok(())
}

fn count_matches(html: &str, selector: &str) -> usize {
    let doc = dom::parse_document(html);
    dom::select_all(&doc, selector).map(|v| v.len()).unwrap_or(0)
}

fn extract_page(html: &str, rule_set: &RuleSet, source_url: &str) -> Result<Vec<ProductRecord>> {
    let eager_html = lazyload::force_eager_load(html);
    let doc = dom::parse_document(&eager_html);

    let container_selector = match &rule_set.item_container {
        Some(sel) => sel.clone(),
        None => {
            let result = detector::detect(&doc, &DetectorOptions::default());
            let selected = result
                .selected_element
                .ok_or_else(|| RainbowError::ExtractionMiss("no product container detected".to_string()))?;
            selected.generic_selector
        }
    };

    let containers = dom::select_all(&doc, &container_selector)
        .map_err(RainbowError::InvalidSelector)?;
    if containers.is_empty() {
        return Err(RainbowError::ExtractionMiss(format!(
            "selector {container_selector} matched no elements"
        )));
    }

    let domain = url::Url::parse(source_url).ok().and_then(|u| u.host_str().map(str::to_string)).unwrap_or_default();

    let mut records = Vec::with_capacity(containers.len());
    for container in containers {
        records.push(extract_one(container, &rule_set.fields, source_url, &domain));
    }
    Ok(records)
}

fn extract_one(container: ElementRef, fields: &[FieldRule], source_url: &str, domain: &str) -> ProductRecord {
    let mut sorted_fields: Vec<&FieldRule> = fields.iter().collect();
    sorted_fields.sort_by_key(|f| f.priority);

    let mut title = None;
    let mut price_raw = None;
    let mut url_value = None;
    let mut image_url = None;

    for rule in &sorted_fields {
        let value = extract_field(container, rule);
        if value.is_none() {
            continue;
        }
        match rule.role {
            FieldRole::Title if title.is_none() => title = value,
            FieldRole::Price | FieldRole::SalePrice if price_raw.is_none() => price_raw = value,
            FieldRole::OriginalPrice => {}
            FieldRole::Url if url_value.is_none() => url_value = value,
            FieldRole::Image if image_url.is_none() => image_url = value,
            _ => {}
        }
    }

    let (price, currency) = price_raw.as_deref().and_then(parse_price).map(|(p, c)| (Some(p), c)).unwrap_or((None, None));

    let id = url_value
        .clone()
        .or_else(|| title.clone())
        .unwrap_or_else(|| dom::trimmed_collapsed_text(container));

    ProductRecord {
        id,
        title,
        price,
        price_raw,
        currency,
        url: url_value,
        image_url,
        source_url: source_url.to_string(),
        domain: domain.to_string(),
        scraped_at: String::new(),
        raw: None,
    }
}

/// Extract a single field from `container` per its `extraction_type`
/// (spec §4.9): text / href / src / attribute / innerHTML, plus the
/// `:parent-link` special selector that walks to the nearest ancestor
/// anchor instead of a descendant.
fn extract_field(container: ElementRef, rule: &FieldRule) -> Option<String> {
    let target = if rule.selector == ":parent-link" {
        nearest_ancestor_anchor(container)
    } else if rule.selector.is_empty() || rule.selector == ":self" {
        Some(container)
    } else {
        Selector::parse(&rule.selector).ok().and_then(|sel| container.select(&sel).next())
    }?;

    match rule.extraction_type {
        ExtractionType::Text => {
            let text = dom::trimmed_collapsed_text(target);
            if text.is_empty() { None } else { Some(text) }
        }
        ExtractionType::Href => target.value().attr("href").map(str::to_string),
        ExtractionType::Src => target.value().attr("src").map(str::to_string),
        ExtractionType::Attribute => rule
            .attribute_name
            .as_deref()
            .and_then(|name| target.value().attr(name))
            .map(str::to_string),
        ExtractionType::InnerHtml => Some(target.inner_html()),
    }
}

fn nearest_ancestor_anchor(el: ElementRef) -> Option<ElementRef> {
    let mut current = dom::parent_element(el);
    while let Some(node) = current {
        if node.value().name() == "a" {
            return Some(node);
        }
        current = dom::parent_element(node);
    }
    None
}

/// Dedup identity for a run (spec §4.9): the product URL canonicalized by
/// trimming its query string, else `title+domain`.
fn canonical_identity(record: &ProductRecord) -> String {
    if let Some(url) = &record.url {
        let trimmed = url.split('?').next().unwrap_or(url);
        return trimmed.to_string();
    }
    format!("{}+{}", record.title.clone().unwrap_or_default(), record.domain)
}

async fn advance_pagination(driver: &dyn Driver, rule_set: &RuleSet) -> Result<bool> {
    let Some(config) = &rule_set.pagination else { return Ok(false) };

    match config.kind {
        crate::model::PaginationKind::NextPage => {
            let Some(selector) = &config.selector else { return Ok(false) };
            if !driver.is_visible(selector).await {
                return Ok(false);
            }
            driver.click(selector).await?;
            driver.wait_for_timeout(300).await;
            Ok(true)
        }
        crate::model::PaginationKind::UrlPattern => {
            let Some(offset) = &config.offset else { return Ok(false) };
            let current = driver.current_url().await?;
            let current_value = current_offset_value(&current, &offset.key).unwrap_or(offset.start);
            let next_value = current_value + offset.increment;
            let next_url = replace_offset_value(&current, &offset.key, next_value);
            driver.goto(&next_url).await?;
            Ok(true)
        }
        crate::model::PaginationKind::InfiniteScroll => {
            driver.mouse_wheel(0.0, 1000.0).await?;
            driver.wait_for_timeout(300).await;
            Ok(true)
        }
    }
}

/// Read the current value of `key` from `url`'s query string, so each
/// pagination advance increments from where the driver actually is rather
/// than always recomputing the same second-page URL from the rule set's
/// static starting offset.
fn current_offset_value(url: &str, key: &str) -> Option<i64> {
    let pattern = format!("{key}=");
    let pos = url.find(&pattern)?;
    let start = pos + pattern.len();
    let end = url[start..].find(['&', '#']).map(|i| start + i).unwrap_or(url.len());
    url[start..end].parse().ok()
}

fn replace_offset_value(url: &str, key: &str, value: i64) -> String {
    let pattern = format!("{key}=");
    if let Some(pos) = url.find(&pattern) {
        let start = pos + pattern.len();
        let end = url[start..].find(['&', '#']).map(|i| start + i).unwrap_or(url.len());
        format!("{}{}{}", &url[..start], value, &url[end..])
    } else {
        let sep = if url.contains('?') { "&" } else { "?" };
        format!("{url}{sep}{key}={value}")
    }
}

/// Decide from a `PaginationDescriptor` what `PaginationKind` a persisted
/// `RuleSet` should carry (bridges C6's detection output into C9's
/// pagination config).
pub fn pagination_config_from_descriptor(
    descriptor: &PaginationDescriptor,
) -> Option<crate::model::PaginationConfig> {
    use crate::model::{PaginationConfig, PaginationKind};
    match descriptor {
        PaginationDescriptor::NextClick { selector } => Some(PaginationConfig {
            kind: PaginationKind::NextPage,
            selector: Some(selector.clone()),
            pattern: None,
            offset: None,
            max_pages: None,
            start_page: None,
            scroll_positions: None,
        }),
        PaginationDescriptor::UrlOffset { selector, offset } => Some(PaginationConfig {
            kind: PaginationKind::UrlPattern,
            selector: selector.clone(),
            pattern: None,
            offset: Some(offset.clone()),
            max_pages: None,
            start_page: None,
            scroll_positions: None,
        }),
        PaginationDescriptor::InfiniteScroll { scroll_positions } => Some(PaginationConfig {
            kind: PaginationKind::InfiniteScroll,
            selector: None,
            pattern: None,
            offset: None,
            max_pages: None,
            start_page: None,
            scroll_positions: Some(scroll_positions.clone()),
        }),
        PaginationDescriptor::Hybrid { click, .. } => pagination_config_from_descriptor(click),
        PaginationDescriptor::None => None,
    }
}

#[allow(dead_code)]
fn unused_pagination_discover_reexport() {
    let _ = pagination::discover;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::FixtureDriver;
    use crate::model::{ExtractionType, FieldRole, FieldRule};

    fn sample_rule_set() -> RuleSet {
        RuleSet {
            name: "test".to_string(),
            url: None,
            country: None,
            competitor_type: None,
            item_container: Some("li.product-card".to_string()),
            fields: vec![
                FieldRule {
                    role: FieldRole::Title,
                    selector: "h3".to_string(),
                    extraction_type: ExtractionType::Text,
                    attribute_name: None,
                    priority: 10,
                },
                FieldRule {
                    role: FieldRole::Price,
                    selector: "span.price".to_string(),
                    extraction_type: ExtractionType::Text,
                    attribute_name: None,
                    priority: 10,
                },
                FieldRule {
                    role: FieldRole::Url,
                    selector: "a".to_string(),
                    extraction_type: ExtractionType::Href,
                    attribute_name: None,
                    priority: 10,
                },
                FieldRule {
                    role: FieldRole::Image,
                    selector: "img".to_string(),
                    extraction_type: ExtractionType::Src,
                    attribute_name: None,
                    priority: 10,
                },
            ],
            pagination: None,
            dismiss_actions: None,
            lazy_load: None,
            target_items: None,
            created_at: None,
            updated_at: None,
        }
    }

    #[tokio::test]
    async fn extracts_records_from_a_single_page() {
        let html = r#"<ul class="grid">
            <li class="product-card"><img src="a.jpg"><h3>Shoe</h3><span class="price">£12.99</span><a href="/p/1">view</a></li>
            <li class="product-card"><img src="b.jpg"><h3>Hat</h3><span class="price">£9.99</span><a href="/p/2">view</a></li>
        </ul>"#;
        let driver = FixtureDriver::new(html, "https://shop.example.com/");
        let records = run(&driver, &sample_rule_set()).await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].price, Some(12.99));
        assert_eq!(records[0].url.as_deref(), Some("/p/1"));
    }

    #[tokio::test]
    async fn dedupes_across_pagination_advance() {
        let html = r#"<ul class="grid"><li class="product-card"><h3>Shoe</h3><span class="price">£12.99</span><a href="/p/1">view</a></li></ul>
            <a class="page-next" href="?page=2">Next</a>"#;
        let driver = FixtureDriver::new(html, "https://shop.example.com/?page=1");

        let mut rule_set = sample_rule_set();
        rule_set.pagination = Some(crate::model::PaginationConfig {
            kind: crate::model::PaginationKind::NextPage,
            selector: Some("a.page-next".to_string()),
            pattern: None,
            offset: None,
            max_pages: Some(2),
            start_page: None,
            scroll_positions: None,
        });

        let records = run(&driver, &rule_set).await.unwrap();
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn parent_link_selector_walks_to_ancestor_anchor() {
        let html = r#"<a href="/p/99"><div class="card"><h3>Name</h3></div></a>"#;
        let doc = dom::parse_document(html);
        let card = dom::select_all(&doc, "div.card").unwrap()[0];
        let rule = FieldRule {
            role: FieldRole::Url,
            selector: ":parent-link".to_string(),
            extraction_type: ExtractionType::Href,
            attribute_name: None,
            priority: 10,
        };
        assert_eq!(extract_field(card, &rule), Some("/p/99".to_string()));
    }
}
