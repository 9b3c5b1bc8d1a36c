//! Matching of extracted data points to ESRS requirements.
//!
//! The default scorer is lexical and needs no model files. Building with the
//! `onnx` feature adds an embedding scorer backed by ONNX Runtime.

mod mapper;
mod scorer;

#[cfg(feature = "onnx")]
mod embedder;

pub use mapper::{Mapper, MappingDecision, MappingOutcome, MatchCandidate};
pub use scorer::{LexicalScorer, SimilarityScorer, cosine_sim, stems};

#[cfg(feature = "onnx")]
pub use embedder::{Embedder, EmbeddingScorer};
