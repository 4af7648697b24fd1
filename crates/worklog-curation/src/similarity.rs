use std::collections::HashSet;

/// The text of an item as the duplicate heuristic sees it.
#[derive(Debug, Clone, Default)]
pub struct Comparable {
    pub title: String,
    pub content: String,
    pub tags: Vec<String>,
}

impl Comparable {
    pub fn new(title: impl Into<String>, content: impl Into<String>, tags: Vec<String>) -> Self {
        Self {
            title: title.into(),
            content: content.into(),
            tags,
        }
    }
}

const TITLE_WEIGHT: f64 = 0.35;
const CONTENT_WEIGHT: f64 = 0.65;
const TAG_BONUS: f64 = 0.05;

fn tokens(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

fn jaccard<T: Eq + std::hash::Hash>(a: &HashSet<T>, b: &HashSet<T>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let shared = a.intersection(b).count();
    let union = a.len() + b.len() - shared;
    shared as f64 / union as f64
}

fn normalized_title(title: &str) -> String {
    title.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

/// Similarity in `[0, 1]`. Identical titles with near-identical content score
/// at least 0.9; items sharing nothing score 0.
pub fn similarity(a: &Comparable, b: &Comparable) -> f64 {
    let title = jaccard(&tokens(&a.title), &tokens(&b.title));
    let content = jaccard(&tokens(&a.content), &tokens(&b.content));
    let mut score = TITLE_WEIGHT * title + CONTENT_WEIGHT * content;

    let same_title = normalized_title(&a.title);
    if !same_title.is_empty() && same_title == normalized_title(&b.title) {
        score = score.max(0.5 + 0.5 * content);
    }

    let tags_a: HashSet<String> = a.tags.iter().map(|t| t.trim().to_lowercase()).collect();
    let tags_b: HashSet<String> = b.tags.iter().map(|t| t.trim().to_lowercase()).collect();
    score += TAG_BONUS * jaccard(&tags_a, &tags_b);

    score.clamp(0.0, 1.0)
}
