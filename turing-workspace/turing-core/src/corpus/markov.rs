// turing-core/src/corpus/markov.rs
//! Word-level Markov chain over chat lines.
//!
//! Each line is one sentence. Transition weights are `f64` so chains from
//! several channels can be merged by weighted sum of their normalized tables.

use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;
use std::collections::HashMap;

/// Sentence boundaries. `<` and `>` never survive normalization, so these
/// cannot collide with a learned word.
const BEGIN: &str = "<s>";
const END: &str = "</s>";

type Table = HashMap<Vec<String>, Vec<(String, f64)>>;

#[derive(Debug, Clone, PartialEq)]
pub struct MarkovChain {
    order: usize,
    transitions: Table,
}

impl MarkovChain {
    /// Empty chain. `order` is the number of preceding words a transition
    /// is conditioned on; zero is treated as one.
    pub fn new(order: usize) -> Self {
        Self {
            order: order.max(1),
            transitions: HashMap::new(),
        }
    }

    pub fn train<'a>(order: usize, lines: impl IntoIterator<Item = &'a str>) -> Self {
        let mut chain = Self::new(order);
        for line in lines {
            chain.absorb(line);
        }
        chain
    }

    pub fn order(&self) -> usize {
        self.order
    }

    pub fn is_empty(&self) -> bool {
        self.transitions.is_empty()
    }

    /// Number of distinct states with at least one outgoing transition.
    pub fn state_count(&self) -> usize {
        self.transitions.len()
    }

    /// Fold one line into the chain. Blank lines are ignored.
    pub fn absorb(&mut self, line: &str) {
        let steps = self.steps(line);
        for (state, next) in steps {
            let entries = self.transitions.entry(state).or_default();
            match entries.iter_mut().find(|(w, _)| *w == next) {
                Some(entry) => entry.1 += 1.0,
                None => entries.push((next, 1.0)),
            }
        }
    }

    /// `(state, next)` pairs for one line, computed without touching `self`.
    fn steps(&self, line: &str) -> Vec<(Vec<String>, String)> {
        let words: Vec<&str> = line.split_whitespace().collect();
        if words.is_empty() {
            return Vec::new();
        }
        let mut padded: Vec<String> = vec![BEGIN.to_string(); self.order];
        padded.extend(words.iter().map(|w| w.to_string()));
        padded.push(END.to_string());
        padded
            .windows(self.order + 1)
            .map(|w| (w[..self.order].to_vec(), w[self.order].clone()))
            .collect()
    }

    /// Weighted sum of the normalized transition tables of `models`.
    ///
    /// Models with a non-positive or non-finite weight, or no transitions,
    /// are skipped. Returns `None` if nothing is left or the orders differ.
    pub fn combine(models: &[(&MarkovChain, f64)]) -> Option<MarkovChain> {
        let usable: Vec<(&MarkovChain, f64)> = models
            .iter()
            .copied()
            .filter(|(m, w)| w.is_finite() && *w > 0.0 && !m.is_empty())
            .collect();
        let order = usable.first()?.0.order;
        if usable.iter().any(|(m, _)| m.order != order) {
            return None;
        }

        let mut out = MarkovChain::new(order);
        for (model, weight) in usable {
            for (state, entries) in &model.transitions {
                let total: f64 = entries.iter().map(|(_, c)| c).sum();
                if total <= 0.0 {
                    continue;
                }
                let merged = out.transitions.entry(state.clone()).or_default();
                for (word, count) in entries {
                    let p = count / total * weight;
                    match merged.iter_mut().find(|(w, _)| w == word) {
                        Some(entry) => entry.1 += p,
                        None => merged.push((word.clone(), p)),
                    }
                }
            }
        }
        Some(out)
    }

    /// Random sentence of `min_words..=max_words` words, or `None` if no walk
    /// lands in range within `attempts` tries.
    pub fn sample<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        min_words: usize,
        max_words: usize,
        attempts: usize,
    ) -> Option<String> {
        if self.is_empty() || max_words == 0 || min_words > max_words {
            return None;
        }
        for _ in 0..attempts {
            if let Some(words) = self.walk(rng, max_words) {
                if !words.is_empty() && words.len() >= min_words {
                    return Some(words.join(" "));
                }
            }
        }
        None
    }

    /// One walk from the start state. `None` if it runs past `max_words` or
    /// reaches a state with no way out.
    fn walk<R: Rng + ?Sized>(&self, rng: &mut R, max_words: usize) -> Option<Vec<String>> {
        let mut state: Vec<String> = vec![BEGIN.to_string(); self.order];
        let mut words = Vec::new();
        loop {
            let next = self.pick(&state, rng)?;
            if next == END {
                return Some(words);
            }
            if words.len() == max_words {
                return None;
            }
            state.remove(0);
            state.push(next.to_string());
            words.push(next.to_string());
        }
    }

    fn pick<R: Rng + ?Sized>(&self, state: &[String], rng: &mut R) -> Option<&str> {
        let entries = self.transitions.get(state)?;
        let dist = WeightedIndex::new(entries.iter().map(|(_, w)| *w)).ok()?;
        Some(entries[dist.sample(rng)].0.as_str())
    }
}
