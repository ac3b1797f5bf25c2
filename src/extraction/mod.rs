pub mod citations;
pub mod collaborator;
pub mod confidence;
pub mod deterministic;
pub mod orchestrator;
pub mod retry;

pub use collaborator::{EmbeddingProvider, Extractor, LlmCollaborators, Verifier};
pub use orchestrator::Orchestrator;

#[cfg(test)]
mod tests;
