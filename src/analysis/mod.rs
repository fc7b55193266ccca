//! Document analysis pipeline.
//!
//! - [`prompt`]: builds the system and user instructions
//! - [`schema`]: the [`DocumentAnalysis`] contract, its validator and the
//!   balanced-brace scanner for free-text replies
//! - [`requester`]: the [`Analyzer`] that calls the model and classifies
//!   failures

pub mod prompt;
pub mod requester;
pub mod schema;

pub use requester::{AnalysisError, Analyzer};
pub use schema::{DocumentAnalysis, ImportantTerm, ValidationError};
