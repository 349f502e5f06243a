//! Brute-force in-memory catalog.

use anyhow::Result;
use async_trait::async_trait;

use super::{Candidate, ProductRecord, ProductSummary, VectorStore};

/// Catalog held in memory and scanned exhaustively per query.
#[derive(Debug, Clone, Default)]
pub struct MemoryCatalog {
    products: Vec<ProductRecord>,
}

impl MemoryCatalog {
    /// Builds a catalog from records, keeping their order.
    pub fn new(products: Vec<ProductRecord>) -> Self {
        Self { products }
    }

    /// Appends a record.
    pub fn insert(&mut self, product: ProductRecord) {
        self.products.push(product);
    }

    /// Number of records, with or without embeddings.
    pub fn len(&self) -> usize {
        self.products.len()
    }

    /// Whether the catalog is empty.
    pub fn is_empty(&self) -> bool {
        self.products.is_empty()
    }

    fn nearest(&self, query: &[f32], top_k: usize, min_score: Option<f64>) -> Vec<Candidate> {
        let mut scored: Vec<(f64, &ProductRecord)> = self
            .products
            .iter()
            .filter_map(|product| {
                let embedding = product.embedding.as_deref()?;
                let score = cosine_similarity(query, embedding);
                min_score
                    .map_or(true, |threshold| score >= threshold)
                    .then_some((score, product))
            })
            .collect();
        // Stable sort: equal scores keep catalog order.
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored
            .into_iter()
            .take(top_k)
            .map(|(score, product)| Candidate {
                product_id: product.id.clone(),
                title: product.title.clone(),
                title_original: product.title_original.clone(),
                score,
            })
            .collect()
    }
}

#[async_trait]
impl VectorStore for MemoryCatalog {
    async fn nearest_batch(
        &self,
        queries: &[&[f32]],
        top_k: usize,
        min_score: Option<f64>,
    ) -> Result<Vec<Vec<Candidate>>> {
        for (position, query) in queries.iter().enumerate() {
            anyhow::ensure!(
                query.iter().all(|value| value.is_finite()),
                "query {} contains non-finite values",
                position
            );
        }
        Ok(queries
            .iter()
            .map(|query| self.nearest(query, top_k, min_score))
            .collect())
    }

    async fn sample_products(&self, limit: usize) -> Result<Vec<ProductSummary>> {
        Ok(self
            .products
            .iter()
            .take(limit)
            .map(|product| ProductSummary {
                id: product.id.clone(),
                title: product.title.clone(),
                has_embedding: product.embedding.is_some(),
            })
            .collect())
    }
}

/// Cosine similarity, 0.0 when either vector has zero norm or widths differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn product(id: &str, embedding: Option<Vec<f32>>) -> ProductRecord {
        ProductRecord {
            id: id.to_string(),
            title: Some(format!("Produkt {id}")),
            title_original: None,
            embedding,
        }
    }

    fn catalog() -> MemoryCatalog {
        MemoryCatalog::new(vec![
            product("a", Some(vec![1.0, 0.0])),
            product("b", Some(vec![0.6, 0.8])),
            product("c", None),
            product("d", Some(vec![0.0, 1.0])),
        ])
    }

    #[test]
    fn cosine_handles_degenerate_vectors() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]), 1.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
    }

    #[tokio::test]
    async fn ranks_by_similarity_and_skips_unembedded() {
        let results = catalog()
            .nearest_batch(&[&[1.0, 0.0]], 3, None)
            .await
            .expect("query");
        let ids: Vec<&str> = results[0].iter().map(|c| c.product_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "d"]);
        assert!((results[0][1].score - 0.6).abs() < 1e-6);
    }

    #[tokio::test]
    async fn min_score_excludes_weak_candidates() {
        let results = catalog()
            .nearest_batch(&[&[1.0, 0.0], &[0.0, 1.0]], 3, Some(0.7))
            .await
            .expect("query");
        assert_eq!(results[0].len(), 1);
        assert_eq!(results[1].len(), 2);
        assert_eq!(results[1][0].product_id, "d");
    }

    #[tokio::test]
    async fn non_finite_query_fails_batch() {
        let err = catalog()
            .nearest_batch(&[&[1.0, 0.0], &[f32::NAN, 0.0]], 1, None)
            .await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn sample_reports_embedding_presence() {
        let sample = catalog().sample_products(3).await.expect("sample");
        assert_eq!(sample.len(), 3);
        assert!(!sample[2].has_embedding);
    }
}
