use serde::{Deserialize, Serialize};

/// A curated support article the reply generator can ground itself in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeDoc {
    pub id: String,
    pub title: String,
    pub content: String,
    pub category: String,
}

/// Small curated knowledge base, loaded from the config file. Relevance is
/// keyword overlap; no embeddings are kept in-process.
#[derive(Debug, Clone, Default)]
pub struct KnowledgeBase {
    docs: Vec<KnowledgeDoc>,
}

/// Words at or below this length carry no signal for matching.
const MIN_KEYWORD_LEN: usize = 4;

impl KnowledgeBase {
    pub fn new(docs: Vec<KnowledgeDoc>) -> Self {
        Self { docs }
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    /// Top-`k` documents by keyword overlap with `query`, most matches
    /// first (stable, so config order breaks ties). When nothing matches,
    /// falls back to the first two documents rather than returning an
    /// empty context.
    pub fn find_relevant(&self, query: &str, k: usize) -> Vec<&KnowledgeDoc> {
        let query = query.to_lowercase();
        let words: Vec<&str> = query
            .split_whitespace()
            .filter(|w| w.len() >= MIN_KEYWORD_LEN)
            .collect();

        let mut scored: Vec<(usize, &KnowledgeDoc)> = self
            .docs
            .iter()
            .filter_map(|doc| {
                let text = format!("{} {}", doc.title, doc.content).to_lowercase();
                let matches = words.iter().filter(|w| text.contains(**w)).count();
                (matches > 0).then_some((matches, doc))
            })
            .collect();

        if scored.is_empty() {
            return self.docs.iter().take(2).collect();
        }

        scored.sort_by(|a, b| b.0.cmp(&a.0));
        scored.into_iter().take(k).map(|(_, doc)| doc).collect()
    }

    /// Context block for the reply prompt.
    pub fn format_context(&self, query: &str, k: usize) -> String {
        self.find_relevant(query, k)
            .iter()
            .map(|doc| format!("**{}** ({}):\n{}", doc.title, doc.category, doc.content))
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}
