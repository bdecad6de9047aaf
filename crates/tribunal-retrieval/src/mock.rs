//! In-memory retriever for tests.

use std::collections::HashMap;

use async_trait::async_trait;

use tribunal_core::model::{ContextFragment, Question};
use tribunal_core::traits::ContextRetriever;

/// A retriever serving fragments from an in-memory, scope-keyed store.
///
/// Fragments come back most relevant first, truncated to `k`. Scopes with no
/// material yield an empty list, matching the contract of the real index.
#[derive(Default)]
pub struct StaticRetriever {
    fragments: HashMap<String, Vec<ContextFragment>>,
}

impl StaticRetriever {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a fragment under the given scope.
    pub fn with_fragment(mut self, scope: &str, fragment: ContextFragment) -> Self {
        self.fragments
            .entry(scope.to_string())
            .or_default()
            .push(fragment);
        self
    }
}

#[async_trait]
impl ContextRetriever for StaticRetriever {
    async fn retrieve(
        &self,
        _question: &Question,
        scope: &str,
        k: usize,
    ) -> anyhow::Result<Vec<ContextFragment>> {
        let mut fragments = self.fragments.get(scope).cloned().unwrap_or_default();
        fragments.sort_by(|a, b| b.relevance.total_cmp(&a.relevance));
        fragments.truncate(k);
        Ok(fragments)
    }
}
