//! Admission control: at most one active execution per article.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use ruleforge_core::{Article, ArticleId};
use tracing::debug;

use crate::error::AdmissionError;

/// Tracks which articles currently have a running execution.
#[derive(Debug, Clone, Default)]
pub struct AdmissionGuard {
    active: Arc<Mutex<HashSet<ArticleId>>>,
}

/// Held for the lifetime of one execution; releases the article on drop.
#[derive(Debug)]
pub struct AdmissionPermit {
    article_id: ArticleId,
    active: Arc<Mutex<HashSet<ArticleId>>>,
}

impl AdmissionGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit `article` or explain why not.
    pub fn admit(&self, article: &Article) -> Result<AdmissionPermit, AdmissionError> {
        if !article.worth_analyzing {
            return Err(AdmissionError::NotWorthAnalyzing(article.id));
        }
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if !active.insert(article.id) {
            return Err(AdmissionError::AlreadyActive(article.id));
        }
        debug!(article_id = %article.id, active = active.len(), "article admitted");
        Ok(AdmissionPermit {
            article_id: article.id,
            active: self.active.clone(),
        })
    }

    pub fn is_active(&self, article_id: &ArticleId) -> bool {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(article_id)
    }

    pub fn active_count(&self) -> usize {
        self.active.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

impl AdmissionPermit {
    pub fn article_id(&self) -> ArticleId {
        self.article_id
    }
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.article_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_articles_not_worth_analyzing() {
        let guard = AdmissionGuard::new();
        let mut article = Article::new("t", "c");
        article.worth_analyzing = false;
        assert_eq!(
            guard.admit(&article).unwrap_err(),
            AdmissionError::NotWorthAnalyzing(article.id)
        );
        assert_eq!(guard.active_count(), 0);
    }

    #[test]
    fn one_execution_per_article() {
        let guard = AdmissionGuard::new();
        let article = Article::new("t", "c");
        let permit = guard.admit(&article).unwrap();
        assert!(guard.is_active(&article.id));
        assert_eq!(
            guard.admit(&article).unwrap_err(),
            AdmissionError::AlreadyActive(article.id)
        );

        // Other articles are independent.
        let other = Article::new("u", "d");
        let _other_permit = guard.admit(&other).unwrap();

        drop(permit);
        assert!(!guard.is_active(&article.id));
        assert!(guard.admit(&article).is_ok());
    }
}
