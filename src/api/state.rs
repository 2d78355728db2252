use std::sync::Arc;

use crate::read::ArticleService;

#[derive(Clone)]
pub struct AppState {
    pub articles: Arc<ArticleService>,
}

impl AppState {
    pub fn new(articles: ArticleService) -> Self {
        Self {
            articles: Arc::new(articles),
        }
    }
}
