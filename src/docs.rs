//! Document lookup for DOCUMENTATION questions.
use anyhow::{Context, Result};
use std::collections::HashSet;
use std::fs;
use std::path::Path;

use crate::error::PipelineError;

/// Documents returned per question.
pub const MAX_RELATED_DOCS: usize = 3;

pub trait DocumentRetriever: Send + Sync {
    /// Passages related to the question, best first. Empty when nothing fits.
    fn related_docs(&self, question: &str) -> Result<Vec<String>, PipelineError>;
}

/// Retriever for deployments without a knowledge base.
pub struct NoDocuments;

impl DocumentRetriever for NoDocuments {
    fn related_docs(&self, _question: &str) -> Result<Vec<String>, PipelineError> {
        Ok(Vec::new())
    }
}

/// Paragraphs from the `.md` and `.txt` files of one directory, ranked by
/// word overlap with the question.
pub struct DirectoryDocuments {
    passages: Vec<Passage>,
}

struct Passage {
    text: String,
    words: HashSet<String>,
}

impl DirectoryDocuments {
    pub fn load(root: &Path) -> Result<Self> {
        let mut files = Vec::new();
        for entry in fs::read_dir(root).with_context(|| format!("read {}", root.display()))? {
            let path = entry.with_context(|| format!("read {}", root.display()))?.path();
            let is_doc = path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case("md") || ext.eq_ignore_ascii_case("txt"));
            if path.is_file() && is_doc {
                files.push(path);
            }
        }
        files.sort();

        let mut passages = Vec::new();
        for file in &files {
            let content =
                fs::read_to_string(file).with_context(|| format!("read {}", file.display()))?;
            passages.extend(split_paragraphs(&content).into_iter().map(|text| Passage {
                words: words(&text),
                text,
            }));
        }
        tracing::debug!(
            dir = %root.display(),
            files = files.len(),
            passages = passages.len(),
            "documents loaded"
        );
        Ok(Self { passages })
    }

    pub fn len(&self) -> usize {
        self.passages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passages.is_empty()
    }
}

impl DocumentRetriever for DirectoryDocuments {
    fn related_docs(&self, question: &str) -> Result<Vec<String>, PipelineError> {
        let query = words(question);
        let mut scored: Vec<(usize, usize)> = self
            .passages
            .iter()
            .enumerate()
            .map(|(idx, passage)| (passage.words.intersection(&query).count(), idx))
            .filter(|(score, _)| *score > 0)
            .collect();
        // Highest score first; earlier passages win ties.
        scored.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
        Ok(scored
            .into_iter()
            .take(MAX_RELATED_DOCS)
            .map(|(_, idx)| self.passages[idx].text.clone())
            .collect())
    }
}

fn split_paragraphs(content: &str) -> Vec<String> {
    let mut paragraphs = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    for line in content.lines() {
        if line.trim().is_empty() {
            if !current.is_empty() {
                paragraphs.push(current.join("\n"));
                current.clear();
            }
        } else {
            current.push(line.trim_end());
        }
    }
    if !current.is_empty() {
        paragraphs.push(current.join("\n"));
    }
    paragraphs
}

/// Lowercased words of three or more characters.
fn words(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|word| word.chars().count() >= 3)
        .map(str::to_lowercase)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ranks_paragraphs_by_overlap() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("policy.md"),
            "# Returns\nItems can be returned within 7 days.\n\nShipping is free over 500k.\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("payment.txt"),
            "We accept card and bank transfer payment.\n",
        )
        .unwrap();
        fs::write(dir.path().join("ignored.json"), "{\"returned\": true}").unwrap();

        let docs = DirectoryDocuments::load(dir.path()).unwrap();
        assert_eq!(docs.len(), 3);
        let related = docs.related_docs("Can items be returned?").unwrap();
        assert_eq!(related[0], "# Returns\nItems can be returned within 7 days.");
        assert_eq!(related.len(), 1);
        assert!(docs.related_docs("xyz").unwrap().is_empty());
    }

    #[test]
    fn test_missing_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(DirectoryDocuments::load(&dir.path().join("absent")).is_err());
    }

    #[test]
    fn test_no_documents_is_empty() {
        assert!(NoDocuments.related_docs("anything").unwrap().is_empty());
    }
}
