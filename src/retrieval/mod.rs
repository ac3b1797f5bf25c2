pub mod dense;
pub mod expand;
pub mod fusion;
pub mod lexical;
pub mod segments;
pub mod text;

pub use fusion::{DenseInput, RetrievalRequest, retrieve_candidates};
pub use segments::{SegmentOptions, assemble_segments};
