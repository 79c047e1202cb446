use crate::models::Prompt;

/// Narrows the candidate set by free-text query before scoring
pub trait PromptSearcher: Send + Sync {
    fn filter(&self, query: &str, prompts: Vec<Prompt>) -> Vec<Prompt>;
}

/// Trims, lower-cases and collapses whitespace; blank queries become `None`
pub fn normalize_query(query: Option<&str>) -> Option<String> {
    let normalized = query?
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ");

    if normalized.is_empty() {
        None
    } else {
        Some(normalized)
    }
}

/// Keeps prompts whose text fields contain every query term
#[derive(Debug, Default, Clone, Copy)]
pub struct KeywordSearcher;

impl KeywordSearcher {
    fn haystack(prompt: &Prompt) -> String {
        let mut text = String::with_capacity(prompt.title.len() + 64);
        text.push_str(&prompt.title);
        for part in [
            prompt.description.as_deref(),
            prompt.category.as_deref(),
            prompt.model.as_deref(),
        ]
        .into_iter()
        .flatten()
        {
            text.push(' ');
            text.push_str(part);
        }
        for tag in &prompt.tags {
            text.push(' ');
            text.push_str(tag);
        }
        text.to_lowercase()
    }
}

impl PromptSearcher for KeywordSearcher {
    fn filter(&self, query: &str, prompts: Vec<Prompt>) -> Vec<Prompt> {
        let terms: Vec<String> = query.split_whitespace().map(str::to_lowercase).collect();
        if terms.is_empty() {
            return prompts;
        }

        prompts
            .into_iter()
            .filter(|prompt| {
                let haystack = Self::haystack(prompt);
                terms.iter().all(|term| haystack.contains(term.as_str()))
            })
            .collect()
    }
}
