//! C2 — Structural Analyzer. Fingerprints, pattern groups, and sibling
//! similarity (spec §4.2).

use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use scraper::ElementRef;

use crate::dom;
use crate::glossary::is_state_or_utility_class;
use crate::model::StructuralFingerprint;

const MAX_TAG_PATH: usize = 10;
const MAX_FINGERPRINT_CHILDREN: usize = 5;

/// Compute the structural fingerprint for `el` (spec §4.2): a tag path up to
/// ten ancestors, filtered class patterns, nesting depth and a hash over the
/// first five children's tag+class signature.
pub fn fingerprint(el: ElementRef) -> StructuralFingerprint {
    let mut tag_path = Vec::new();
    let mut current = Some(el);
    while let Some(node) = current {
        if tag_path.len() >= MAX_TAG_PATH {
            break;
        }
        tag_path.push(node.value().name().to_string());
        current = dom::parent_element(node);
    }

    let class_patterns: Vec<String> = dom::classes(el)
        .into_iter()
        .filter(|c| !is_state_or_utility_class(c))
        .collect();

    let nesting_depth = dom::nesting_depth(el);
    let child_structure_hash = child_structure_hash(el);

    let mut hasher = DefaultHasher::new();
    tag_path.hash(&mut hasher);
    class_patterns.hash(&mut hasher);
    nesting_depth.hash(&mut hasher);
    child_structure_hash.hash(&mut hasher);
    let hash = hasher.finish();

    StructuralFingerprint {
        tag_path,
        class_patterns,
        nesting_depth,
        child_structure_hash,
        hash,
    }
}

fn child_structure_hash(el: ElementRef) -> u64 {
    let mut hasher = DefaultHasher::new();
    for child in el.children().filter_map(ElementRef::wrap).take(MAX_FINGERPRINT_CHILDREN) {
        child.value().name().hash(&mut hasher);
        let classes: Vec<String> = dom::classes(child)
            .into_iter()
            .filter(|c| !is_state_or_utility_class(c))
            .collect();
        classes.hash(&mut hasher);
    }
    hasher.finish()
}

/// Group a set of fingerprints by hash, as `fingerprintHash -> [selector,...]`.
pub fn group_by_pattern<'a>(
    fingerprints: impl IntoIterator<Item = (&'a str, &'a StructuralFingerprint)>,
) -> HashMap<u64, Vec<String>> {
    let mut groups: HashMap<u64, Vec<String>> = HashMap::new();
    for (selector, fp) in fingerprints {
        groups.entry(fp.hash).or_default().push(selector.to_string());
    }
    groups
}

/// Pairwise structural similarity in `[0, 1]`: 40% tag-path edit similarity,
/// 30% Jaccard over filtered classes, 30% child-structure equality.
pub fn similarity(a: &StructuralFingerprint, b: &StructuralFingerprint) -> f64 {
    let tag_sim = tag_path_similarity(&a.tag_path, &b.tag_path);
    let class_sim = jaccard(&a.class_patterns, &b.class_patterns);
    let child_sim = if a.child_structure_hash == b.child_structure_hash { 1.0 } else { 0.0 };

    0.4 * tag_sim + 0.3 * class_sim + 0.3 * child_sim
}

fn tag_path_similarity(a: &[String], b: &[String]) -> f64 {
    let dist = edit_distance(a, b);
    let max_len = a.len().max(b.len());
    if max_len == 0 {
        1.0
    } else {
        1.0 - (dist as f64 / max_len as f64)
    }
}

fn edit_distance(a: &[String], b: &[String]) -> usize {
    let (n, m) = (a.len(), b.len());
    let mut dp = vec![vec![0usize; m + 1]; n + 1];
    for (i, row) in dp.iter_mut().enumerate() {
        row[0] = i;
    }
    for j in 0..=m {
        dp[0][j] = j;
    }
    for i in 1..=n {
        for j in 1..=m {
            if a[i - 1] == b[j - 1] {
                dp[i][j] = dp[i - 1][j - 1];
            } else {
                dp[i][j] = 1 + dp[i - 1][j].min(dp[i][j - 1]).min(dp[i - 1][j - 1]);
            }
        }
    }
    dp[n][m]
}

fn jaccard(a: &[String], b: &[String]) -> f64 {
    use std::collections::HashSet;
    let sa: HashSet<&String> = a.iter().collect();
    let sb: HashSet<&String> = b.iter().collect();
    if sa.is_empty() && sb.is_empty() {
        return 1.0;
    }
    let intersection = sa.intersection(&sb).count();
    let union = sa.union(&sb).count();
    if union == 0 {
        1.0
    } else {
        intersection as f64 / union as f64
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SiblingAnalysis {
    pub count: usize,
    pub similarity_score: f64,
    pub grid_likelihood: f64,
}

/// Analyze `el`'s siblings: count, average similarity score, and a
/// grid-likelihood bucket in `{0.3, 0.8, 1.0}` (spec §4.2).
pub fn analyze_siblings(el: ElementRef) -> SiblingAnalysis {
    let siblings: Vec<ElementRef> = dom::sibling_elements(el)
        .into_iter()
        .filter(|s| s.value().name() == el.value().name())
        .collect();

    let count = siblings.len().saturating_sub(1);
    if count == 0 {
        return SiblingAnalysis { count: 0, similarity_score: 0.0, grid_likelihood: 0.3 };
    }

    let target_fp = fingerprint(el);
    let scores: Vec<f64> = siblings
        .iter()
        .filter(|s| s.id() != el.id())
        .map(|s| similarity(&target_fp, &fingerprint(*s)))
        .collect();
    let avg = scores.iter().sum::<f64>() / scores.len() as f64;

    let parent_is_grid = dom::parent_element(el)
        .and_then(dom::computed_display)
        .map(|d| d == "grid" || d == "flex" || d == "inline-flex")
        .unwrap_or(false);

    let grid_likelihood = if parent_is_grid && avg >= 0.8 {
        1.0
    } else if avg >= 0.6 {
        0.8
    } else {
        0.3
    };

    SiblingAnalysis { count, similarity_score: avg, grid_likelihood }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::{parse_document, select_all};

    #[test]
    fn identical_siblings_score_high_similarity() {
        let html = r#"<ul class="grid">
            <li class="product-card"><img src="a.jpg"><span>A</span></li>
            <li class="product-card"><img src="b.jpg"><span>B</span></li>
            <li class="product-card"><img src="c.jpg"><span>C</span></li>
        </ul>"#;
        let doc = parse_document(html);
        let items = select_all(&doc, "li").unwrap();
        let a = fingerprint(items[0]);
        let b = fingerprint(items[1]);
        assert!(similarity(&a, &b) > 0.9);
    }

    #[test]
    fn dissimilar_siblings_score_low_similarity() {
        let html = r#"<div>
            <li class="product-card"><img src="a.jpg"><span>A</span></li>
            <p class="banner-ad">Ad copy entirely unrelated to products</p>
        </div>"#;
        let doc = parse_document(html);
        let li = select_all(&doc, "li").unwrap()[0];
        let p = select_all(&doc, "p").unwrap()[0];
        let a = fingerprint(li);
        let b = fingerprint(p);
        assert!(similarity(&a, &b) < 0.5);
    }

    #[test]
    fn grid_siblings_get_high_grid_likelihood() {
        let html = r#"<ul class="grid" style="display:grid">
            <li class="product-card"><img src="a.jpg"></li>
            <li class="product-card"><img src="b.jpg"></li>
            <li class="product-card"><img src="c.jpg"></li>
        </ul>"#;
        let doc = parse_document(html);
        let items = select_all(&doc, "li").unwrap();
        let analysis = analyze_siblings(items[0]);
        assert_eq!(analysis.count, 2);
        assert_eq!(analysis.grid_likelihood, 1.0);
    }
}
