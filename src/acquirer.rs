//! Embedding acquisition: cache split, one batched provider call, merge.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::anyhow;
use tracing::{debug, info};

use crate::embedding_cache::EmbeddingCache;
use crate::embeddings::{EmbeddingProvider, EmbeddingVector};
use crate::error::MatchError;
use crate::normalizer::NormalizedText;

/// Resolves normalized texts to vectors, calling the provider for misses only.
pub struct EmbeddingAcquirer {
    provider: Arc<dyn EmbeddingProvider>,
    cache: Arc<EmbeddingCache>,
    timeout: Duration,
}

impl EmbeddingAcquirer {
    /// Wires a provider to a shared cache with a per-call timeout.
    pub fn new(
        provider: Arc<dyn EmbeddingProvider>,
        cache: Arc<EmbeddingCache>,
        timeout: Duration,
    ) -> Self {
        Self {
            provider,
            cache,
            timeout,
        }
    }

    /// Shared cache backing this acquirer.
    pub fn cache(&self) -> &Arc<EmbeddingCache> {
        &self.cache
    }

    /// Embeds distinct texts with exactly one provider call.
    ///
    /// The result has the same length and order as `texts`. Any provider
    /// failure or malformed answer fails the whole acquisition.
    pub async fn acquire(&self, texts: &[String]) -> Result<Vec<EmbeddingVector>, MatchError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let started = Instant::now();
        let vectors = tokio::time::timeout(self.timeout, self.provider.embed_batch(texts))
            .await
            .map_err(|_| {
                MatchError::EmbeddingProvider(anyhow!(
                    "embedding request timed out after {:?}",
                    self.timeout
                ))
            })?
            .map_err(MatchError::EmbeddingProvider)?;

        if vectors.len() != texts.len() {
            return Err(MatchError::EmbeddingProvider(anyhow!(
                "provider returned {} embeddings for {} inputs",
                vectors.len(),
                texts.len()
            )));
        }
        let expected = self.provider.dimensions();
        if let Some(bad) = vectors
            .iter()
            .find(|vector| !vector.is_empty() && vector.len() != expected)
        {
            return Err(MatchError::EmbeddingProvider(anyhow!(
                "provider returned a {}-dimensional embedding, expected {}",
                bad.len(),
                expected
            )));
        }

        info!(
            texts = texts.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "acquired embeddings"
        );
        Ok(vectors)
    }

    /// Produces one vector per slot; `None` slots and uncovered texts get the
    /// empty vector.
    ///
    /// Duplicate texts are embedded once. Freshly acquired, non-empty vectors
    /// are written back to the cache.
    pub async fn resolve(
        &self,
        slots: &[Option<NormalizedText>],
    ) -> Result<Vec<EmbeddingVector>, MatchError> {
        let mut distinct: Vec<&str> = Vec::new();
        let mut position: HashMap<&str, usize> = HashMap::new();
        for text in slots.iter().flatten() {
            position.entry(text.as_str()).or_insert_with(|| {
                distinct.push(text.as_str());
                distinct.len() - 1
            });
        }

        let mut resolved = self.cache.get_many(&distinct).await;
        let misses: Vec<usize> = resolved
            .iter()
            .enumerate()
            .filter_map(|(idx, slot)| slot.is_none().then_some(idx))
            .collect();
        debug!(
            distinct = distinct.len(),
            cache_hits = distinct.len() - misses.len(),
            cache_misses = misses.len(),
            "embedding cache split"
        );

        if !misses.is_empty() {
            let texts: Vec<String> = misses.iter().map(|&idx| distinct[idx].to_string()).collect();
            let acquired = self.acquire(&texts).await?;
            let fresh: Vec<(String, EmbeddingVector)> = texts
                .into_iter()
                .zip(acquired.iter())
                .filter(|(_, vector)| !vector.is_empty())
                .map(|(text, vector)| (text, vector.clone()))
                .collect();
            for (&idx, vector) in misses.iter().zip(acquired) {
                resolved[idx] = Some(vector);
            }
            self.cache.put_many(fresh).await;
        }

        Ok(slots
            .iter()
            .map(|slot| {
                slot.as_ref()
                    .and_then(|text| position.get(text.as_str()))
                    .and_then(|&idx| resolved[idx].clone())
                    .unwrap_or_default()
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding_cache::EvictionPolicy;
    use crate::normalizer::TextNormalizer;
    use anyhow::Result;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingProvider {
        calls: Mutex<Vec<Vec<String>>>,
        width: usize,
        drop_last: bool,
    }

    #[async_trait]
    impl EmbeddingProvider for RecordingProvider {
        async fn embed_batch(&self, inputs: &[String]) -> Result<Vec<EmbeddingVector>> {
            self.calls.lock().unwrap().push(inputs.to_vec());
            let mut out: Vec<EmbeddingVector> = inputs
                .iter()
                .map(|text| vec![text.len() as f32; self.width])
                .collect();
            if self.drop_last {
                out.pop();
            }
            Ok(out)
        }

        fn dimensions(&self) -> usize {
            2
        }
    }

    fn provider(width: usize) -> Arc<RecordingProvider> {
        Arc::new(RecordingProvider {
            width,
            ..Default::default()
        })
    }

    fn acquirer(provider: Arc<RecordingProvider>, cache: Arc<EmbeddingCache>) -> EmbeddingAcquirer {
        EmbeddingAcquirer::new(provider, cache, Duration::from_secs(5))
    }

    fn slots(raw: &[&str]) -> Vec<Option<NormalizedText>> {
        let normalizer = TextNormalizer::new("Match.");
        raw.iter().map(|r| normalizer.normalize(r, None)).collect()
    }

    #[tokio::test]
    async fn only_misses_reach_provider_in_one_call() {
        let provider = provider(2);
        let cache = Arc::new(EmbeddingCache::new(16, EvictionPolicy::Fifo));
        let warm = slots(&["tomat"]);
        cache
            .put(warm[0].clone().unwrap().into_string(), vec![9.0, 9.0])
            .await;

        let acquirer = acquirer(provider.clone(), cache.clone());
        let vectors = acquirer
            .resolve(&slots(&["Tomat", "agurk", "", "løg", "agurk "]))
            .await
            .expect("resolves");

        assert_eq!(vectors.len(), 5);
        assert_eq!(vectors[0], vec![9.0, 9.0]);
        assert!(vectors[2].is_empty());
        assert_eq!(vectors[1], vectors[4]);

        let calls = provider.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(
            calls[0],
            vec![
                "Match.\n\nIngredient: agurk".to_string(),
                "Match.\n\nIngredient: løg".to_string()
            ]
        );
        drop(calls);
        assert_eq!(cache.len().await, 3);
    }

    #[tokio::test]
    async fn warm_cache_skips_provider() {
        let provider = provider(2);
        let cache = Arc::new(EmbeddingCache::new(16, EvictionPolicy::Fifo));
        let acquirer = acquirer(provider.clone(), cache);
        acquirer.resolve(&slots(&["mel"])).await.expect("first");
        acquirer.resolve(&slots(&["mel"])).await.expect("second");
        assert_eq!(provider.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn all_blank_inputs_make_no_call() {
        let provider = provider(2);
        let acquirer = acquirer(provider.clone(), Arc::new(EmbeddingCache::disabled()));
        let vectors = acquirer.resolve(&slots(&["", "  "])).await.expect("ok");
        assert_eq!(vectors, vec![Vec::<f32>::new(), Vec::new()]);
        assert!(provider.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn short_response_fails_whole_batch() {
        let provider = Arc::new(RecordingProvider {
            width: 2,
            drop_last: true,
            ..Default::default()
        });
        let cache = Arc::new(EmbeddingCache::new(16, EvictionPolicy::Fifo));
        let acquirer = acquirer(provider, cache.clone());
        let err = acquirer
            .resolve(&slots(&["smør", "sukker"]))
            .await
            .expect_err("mismatch");
        assert_eq!(err.code(), "EMBEDDING_ERROR");
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn wrong_dimension_is_rejected() {
        let acquirer = acquirer(provider(3), Arc::new(EmbeddingCache::disabled()));
        let err = acquirer
            .acquire(&["x".to_string()])
            .await
            .expect_err("bad width");
        assert!(matches!(err, MatchError::EmbeddingProvider(_)));
    }

    #[tokio::test]
    async fn empty_vectors_are_not_cached() {
        let acquirer = acquirer(provider(0), Arc::new(EmbeddingCache::new(4, EvictionPolicy::Fifo)));
        let vectors = acquirer.resolve(&slots(&["vand"])).await.expect("ok");
        assert!(vectors[0].is_empty());
        assert!(acquirer.cache().is_empty().await);
    }
}
