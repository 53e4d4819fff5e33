pub mod classifier;
pub mod crawl;
pub mod labeler;
pub mod matcher;
pub mod pipeline;
pub mod reddit;
pub mod resilience;
pub mod sink;
pub mod stats;
pub mod traits;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use classifier::{Classifier, ClassifierConfig, ClassifyRun};
pub use matcher::{MatchRun, Matcher, MatcherConfig};
pub use stats::{ClassifyStats, MatchStats, RunStats};
pub use traits::{ItemSource, LabelService, Page, RecordSink};
