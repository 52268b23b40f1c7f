// turing-core/src/corpus/mod.rs
pub mod cache;
pub mod channel_corpus;
pub mod markov;
pub mod normalize;
pub mod weighted;

pub use cache::CorpusCache;
pub use channel_corpus::Corpus;
pub use markov::MarkovChain;
pub use normalize::normalize;
pub use weighted::WeightedGenerator;
