// turing-core/src/corpus/weighted.rs
//! One sentence from several channels at once.
//!
//! Channel chains are merged by weighted sum of their normalized transition
//! tables; the sentence length is bounded by the shortest and longest line
//! any contributing channel has seen.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use super::cache::CorpusCache;
use super::channel_corpus::Corpus;
use super::markov::MarkovChain;
use crate::error::GenerateError;

pub struct WeightedGenerator {
    cache: Arc<CorpusCache>,
}

impl WeightedGenerator {
    pub fn new(cache: Arc<CorpusCache>) -> Self {
        Self { cache }
    }

    pub async fn generate(
        &self,
        weights: &HashMap<String, f64>,
        chain_order: usize,
    ) -> Result<String, GenerateError> {
        // `ThreadRng` is not `Send` and would be held across the loads.
        let mut rng = StdRng::from_entropy();
        self.generate_with(weights, chain_order, &mut rng).await
    }

    pub async fn generate_with<R: Rng + ?Sized>(
        &self,
        weights: &HashMap<String, f64>,
        chain_order: usize,
        rng: &mut R,
    ) -> Result<String, GenerateError> {
        if weights.is_empty() {
            return Err(GenerateError::EmptyCorpus);
        }
        let mut usable: Vec<(&str, f64)> = weights
            .iter()
            .filter(|(_, w)| w.is_finite() && **w > 0.0)
            .map(|(c, w)| (c.as_str(), *w))
            .collect();
        usable.sort_by(|a, b| a.0.cmp(b.0));
        if usable.is_empty() {
            return Err(GenerateError::EmptyCorpus);
        }

        for (channel, _) in &usable {
            self.cache.ensure_loaded(channel).await?;
        }

        let names: Vec<&str> = usable.iter().map(|(c, _)| *c).collect();
        let weight_of = |name: &str| {
            usable
                .iter()
                .find(|(c, _)| *c == name)
                .map_or(0.0, |(_, w)| *w)
        };
        let attempts = self.cache.attempts();
        let order = chain_order.max(1);

        if order == self.cache.order() {
            return self
                .cache
                .with_corpora(&names, |found| {
                    let parts: Vec<(&Corpus, f64)> = found
                        .into_iter()
                        .map(|(name, corpus)| (corpus, weight_of(name)))
                        .collect();
                    sample_combined(&parts, rng, attempts)
                })
                .await;
        }

        // Different order than the cache keeps: copy the lines out and train
        // temporary chains without holding the lock.
        let copied: Vec<(Vec<String>, f64)> = self
            .cache
            .with_corpora(&names, |found| {
                found
                    .into_iter()
                    .filter(|(_, corpus)| !corpus.is_empty())
                    .map(|(name, corpus)| (corpus.raw_messages().to_vec(), weight_of(name)))
                    .collect()
            })
            .await;
        debug!(order, channels = copied.len(), "training temporary chains");
        let trained: Vec<(Corpus, f64)> = copied
            .into_iter()
            .map(|(lines, w)| (Corpus::from_messages(order, &lines), w))
            .collect();
        let parts: Vec<(&Corpus, f64)> = trained.iter().map(|(c, w)| (c, *w)).collect();
        sample_combined(&parts, rng, attempts)
    }
}

fn sample_combined<R: Rng + ?Sized>(
    parts: &[(&Corpus, f64)],
    rng: &mut R,
    attempts: usize,
) -> Result<String, GenerateError> {
    let mut bounds: Option<(usize, usize)> = None;
    let mut models: Vec<(&MarkovChain, f64)> = Vec::with_capacity(parts.len());
    for (corpus, weight) in parts {
        let Some((lo, hi)) = corpus.length_bounds() else {
            continue;
        };
        bounds = Some(match bounds {
            Some((min, max)) => (min.min(lo), max.max(hi)),
            None => (lo, hi),
        });
        models.push((corpus.model(), *weight));
    }
    let (Some((min, max)), Some(model)) = (bounds, MarkovChain::combine(&models)) else {
        return Err(GenerateError::EmptyCorpus);
    };
    model
        .sample(rng, min, max, attempts)
        .ok_or(GenerateError::Exhausted { attempts })
}
