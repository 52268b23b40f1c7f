// turing-core/src/corpus/channel_corpus.rs
use rand::Rng;
use std::collections::BTreeMap;

use super::markov::MarkovChain;
use super::normalize::{normalize, word_count};

/// Learned text for one channel: normalized lines, the chain trained on them,
/// and how often each sentence length (in words) occurred.
#[derive(Debug, Clone)]
pub struct Corpus {
    raw_messages: Vec<String>,
    model: MarkovChain,
    lengths: BTreeMap<usize, u32>,
}

impl Corpus {
    pub fn new(order: usize) -> Self {
        Self {
            raw_messages: Vec::new(),
            model: MarkovChain::new(order),
            lengths: BTreeMap::new(),
        }
    }

    /// Build from stored message contents in one pass.
    pub fn from_messages<I, S>(order: usize, messages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut corpus = Self::new(order);
        for m in messages {
            corpus.add(m.as_ref());
        }
        corpus
    }

    /// Normalize and learn one message. Returns `false` if nothing was left
    /// after normalization.
    pub fn add(&mut self, text: &str) -> bool {
        let line = normalize(text);
        if line.is_empty() {
            return false;
        }
        let words = word_count(&line);
        self.model.absorb(&line);
        *self.lengths.entry(words).or_insert(0) += 1;
        self.raw_messages.push(line);
        true
    }

    pub fn is_empty(&self) -> bool {
        self.raw_messages.is_empty()
    }

    pub fn len(&self) -> usize {
        self.raw_messages.len()
    }

    pub fn raw_messages(&self) -> &[String] {
        &self.raw_messages
    }

    pub fn model(&self) -> &MarkovChain {
        &self.model
    }

    pub fn lengths(&self) -> &BTreeMap<usize, u32> {
        &self.lengths
    }

    /// Shortest and longest learned sentence, in words.
    pub fn length_bounds(&self) -> Option<(usize, usize)> {
        let min = *self.lengths.keys().next()?;
        let max = *self.lengths.keys().next_back()?;
        Some((min, max))
    }

    pub fn generate<R: Rng + ?Sized>(&self, rng: &mut R, attempts: usize) -> Option<String> {
        let (min, max) = self.length_bounds()?;
        self.model.sample(rng, min, max, attempts)
    }
}
