use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ForgeError;

/// Unique article identifier assigned by the curation collaborator.
pub type ArticleId = Uuid;

/// A curated threat-intelligence article handed to the pipeline.
///
/// `worth_analyzing` is the upstream binary classification; only articles
/// flagged `true` are eligible for a workflow run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Article {
    pub id: ArticleId,
    pub title: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub worth_analyzing: bool,
}

impl Article {
    pub fn new(title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            content: content.into(),
            url: None,
            source: None,
            published_at: None,
            worth_analyzing: true,
        }
    }

    /// Title and body joined the way every prompt and embedding sees them.
    pub fn full_text(&self) -> String {
        if self.title.is_empty() {
            self.content.clone()
        } else {
            format!("{}\n\n{}", self.title, self.content)
        }
    }

    /// Load an article from a JSON file.
    pub fn from_json_file(path: &Path) -> Result<Self, ForgeError> {
        let data = std::fs::read_to_string(path)?;
        let article: Article = serde_json::from_str(&data)?;
        if article.content.trim().is_empty() {
            return Err(ForgeError::Other(format!(
                "article {} in {} has no content",
                article.id,
                path.display()
            )));
        }
        Ok(article)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_text_joins_title_and_body() {
        let article = Article::new("APT report", "rundll32 was used");
        assert_eq!(article.full_text(), "APT report\n\nrundll32 was used");
    }

    #[test]
    fn worth_analyzing_defaults_to_false_when_missing() {
        let json = r#"{"id":"00000000-0000-0000-0000-000000000000","title":"t","content":"c"}"#;
        let article: Article = serde_json::from_str(json).unwrap();
        assert!(!article.worth_analyzing);
        assert!(article.url.is_none());
    }

    #[test]
    fn from_json_file_rejects_empty_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.json");
        std::fs::write(
            &path,
            r#"{"id":"00000000-0000-0000-0000-000000000001","title":"t","content":"   "}"#,
        )
        .unwrap();
        assert!(Article::from_json_file(&path).is_err());
    }
}
