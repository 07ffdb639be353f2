//! Turns a reply's analysis into a follow-up action. The router itself is
//! pure and trait-bounded: no database, no mailbox. The one exception is
//! `groq`, the concrete `Analyzer` implementation — the single HTTP
//! boundary this crate owns, since the classifier contract belongs next to
//! the trait it implements.

mod analyzer;
mod error;
mod groq;
mod phone;
mod router;

pub use analyzer::Analyzer;
pub use error::{AnalyzerError, Result};
pub use groq::GroqAnalyzer;
pub use phone::validate_e164;
pub use router::decide;

pub use fc_common::{Action, Analysis, Decision, Intent};
