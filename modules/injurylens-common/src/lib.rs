pub mod config;
pub mod error;
pub mod safety;
pub mod taxonomy;
pub mod template;
pub mod types;

pub use config::{AppConfig, FileConfig};
pub use error::{CallError, InjuryLensError};
pub use safety::{content_hash, scrub_pii};
pub use taxonomy::{normalize_label, Taxonomy};
pub use template::PromptTemplate;
pub use types::*;
