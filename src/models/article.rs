//! Article models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use super::Generation;

/// A single article harvested from the aggregator page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Article {
    /// Headline text (never empty)
    pub title: String,

    /// Absolute link to the article
    pub link: Url,

    /// Source heading the article was listed under
    pub source_name: String,

    /// Screenshot location, if one was captured and uploaded
    #[serde(default)]
    pub screenshot_ref: Option<Url>,

    /// When the article was harvested
    pub scraped_at: DateTime<Utc>,
}

impl Article {
    pub fn new(title: impl Into<String>, link: Url, source_name: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            link,
            source_name: source_name.into(),
            screenshot_ref: None,
            scraped_at: Utc::now(),
        }
    }

    /// Builder method to set the screenshot reference.
    pub fn with_screenshot(mut self, screenshot_ref: Url) -> Self {
        self.screenshot_ref = Some(screenshot_ref);
        self
    }

    /// Whether the article satisfies the persistence invariant.
    pub fn is_valid(&self) -> bool {
        !self.title.trim().is_empty() && !self.link.cannot_be_a_base()
    }

    /// Drop the grouping key, keeping the served payload.
    pub fn into_entry(self) -> ArticleEntry {
        ArticleEntry {
            title: self.title,
            link: self.link,
            screenshot_ref: self.screenshot_ref,
            scraped_at: self.scraped_at,
        }
    }
}

/// Article as served to readers, without its source name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArticleEntry {
    pub title: String,
    pub link: Url,
    #[serde(default)]
    pub screenshot_ref: Option<Url>,
    pub scraped_at: DateTime<Utc>,
}

/// Persisted row: an article tagged with the generation that wrote it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArticleRecord {
    #[serde(flatten)]
    pub article: Article,

    pub generation: Generation,
}

impl ArticleRecord {
    pub fn new(article: Article, generation: Generation) -> Self {
        Self {
            article,
            generation,
        }
    }
}
