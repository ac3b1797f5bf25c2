pub mod breaker;
pub mod parser;
pub mod pdf_lock;
pub mod slots;

pub use breaker::{BreakerMode, CircuitBreaker};
pub use parser::{DocumentParser, ParsedDocument, PlainTextExtractor, parse_blocking};
pub use pdf_lock::PdfResourceLock;
pub use slots::{ParseSlot, ParseSlots};
