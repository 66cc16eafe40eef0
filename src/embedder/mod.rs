//! Text-to-vector embedding for dashboard entries.
//!
//! The embedding model itself is an external concern; what this module
//! owns is batching and execution placement — in-process for a
//! GPU-backed implementation, a bounded `spawn_blocking` worker pool for
//! a CPU-bound one.

use anyhow::Result;
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::num::NonZeroUsize;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::debug;

#[async_trait]
pub trait TextEmbedder: Send + Sync {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Deterministic, dependency-free stand-in for a real embedding model.
/// Produces a unit-norm pseudo-embedding from a SHA-256 digest of the
/// input text. Used in tests and as the default when no real embedder is
/// configured; never used to judge real semantic similarity in
/// production.
pub struct NullEmbedder {
    dims: usize,
}

impl NullEmbedder {
    pub fn new(dims: usize) -> Self {
        Self { dims: dims.max(1) }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = Vec::with_capacity(self.dims);
        let mut counter: u32 = 0;
        while vector.len() < self.dims {
            let mut hasher = Sha256::new();
            hasher.update(text.as_bytes());
            hasher.update(counter.to_le_bytes());
            let digest = hasher.finalize();
            for byte in digest.iter() {
                if vector.len() == self.dims {
                    break;
                }
                // Map byte -> [-1, 1]
                vector.push((*byte as f32 / 127.5) - 1.0);
            }
            counter += 1;
        }
        normalize(&mut vector);
        vector
    }
}

#[async_trait]
impl TextEmbedder for NullEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

pub fn normalize(vector: &mut [f32]) {
    let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in vector.iter_mut() {
            *v /= norm;
        }
    }
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    dot.clamp(-1.0, 1.0)
}

/// Where embedding computation actually runs. `Gpu` batches submit to the
/// embedder as-is (assumed already running on an accelerator managed
/// elsewhere); `Cpu` spreads the batch across a blocking worker pool sized
/// to the available parallelism.
pub enum EmbedderExecution {
    Gpu { batch_size: usize },
    Cpu { batch_size: usize, workers: NonZeroUsize },
}

impl EmbedderExecution {
    pub fn cpu_default() -> Self {
        let workers = std::thread::available_parallelism().unwrap_or(NonZeroUsize::new(1).unwrap());
        Self::Cpu {
            batch_size: 128,
            workers,
        }
    }

    pub fn gpu_default() -> Self {
        Self::Gpu { batch_size: 64 }
    }
}

/// Runs `embedder` over `texts`, chunked per `execution`'s batch size, and
/// re-assembles the result in input order regardless of how the chunks
/// were scheduled.
///
/// `Gpu` batches are awaited in place, one after another, on the
/// assumption that the accelerator itself is the bottleneck. `Cpu` spreads
/// its chunks across a bounded pool of `spawn_blocking` tasks, gated by a
/// semaphore sized to `workers` — the same bounded-concurrency shape the
/// fetcher uses for its own per-day requests.
pub async fn embed_all(
    embedder: Arc<dyn TextEmbedder>,
    texts: Vec<String>,
    execution: &EmbedderExecution,
) -> Result<Vec<Vec<f32>>> {
    match execution {
        EmbedderExecution::Gpu { batch_size } => {
            let mut results = Vec::with_capacity(texts.len());
            for chunk in texts.chunks((*batch_size).max(1)) {
                debug!(size = chunk.len(), "embedding batch (gpu)");
                let embedded = embedder.embed_batch(chunk).await?;
                results.extend(embedded);
            }
            Ok(results)
        }
        EmbedderExecution::Cpu { batch_size, workers } => {
            let semaphore = Arc::new(Semaphore::new(workers.get()));
            let chunks: Vec<Vec<String>> = texts
                .chunks((*batch_size).max(1))
                .map(|c| c.to_vec())
                .collect();

            let mut tasks = Vec::with_capacity(chunks.len());
            for chunk in chunks {
                let permit = semaphore.clone().acquire_owned().await.expect("semaphore closed");
                let embedder = embedder.clone();
                tasks.push(tokio::task::spawn_blocking(move || {
                    let _permit = permit;
                    debug!(size = chunk.len(), "embedding batch (cpu worker)");
                    tokio::runtime::Handle::current().block_on(embedder.embed_batch(&chunk))
                }));
            }

            let mut results = Vec::with_capacity(texts.len());
            for task in tasks {
                let embedded = task.await.expect("embedding worker panicked")?;
                results.extend(embedded);
            }
            Ok(results)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn null_embedder_is_deterministic_and_unit_norm() {
        let embedder = NullEmbedder::new(32);
        let a = embedder.embed_batch(&["hello world".to_string()]).await.unwrap();
        let b = embedder.embed_batch(&["hello world".to_string()]).await.unwrap();
        assert_eq!(a, b);
        let norm: f32 = a[0].iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    #[tokio::test]
    async fn distinct_texts_produce_distinct_embeddings() {
        let embedder = NullEmbedder::new(32);
        let out = embedder
            .embed_batch(&["alpha".to_string(), "beta".to_string()])
            .await
            .unwrap();
        assert_ne!(out[0], out[1]);
    }

    #[test]
    fn cosine_similarity_of_identical_vectors_is_one() {
        let v = vec![0.6_f32, 0.8];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn embed_all_preserves_input_order_across_batches() {
        let embedder: Arc<dyn TextEmbedder> = Arc::new(NullEmbedder::new(16));
        let texts: Vec<String> = (0..10).map(|i| format!("text-{i}")).collect();
        let execution = EmbedderExecution::Cpu {
            batch_size: 3,
            workers: NonZeroUsize::new(2).unwrap(),
        };
        let embedded = embed_all(embedder.clone(), texts.clone(), &execution).await.unwrap();
        let direct = embedder.embed_batch(&texts).await.unwrap();
        assert_eq!(embedded, direct);
    }
}
