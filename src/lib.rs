pub mod types;
pub mod error;

// パイプラインのモジュール
pub mod dataset;
pub mod ml;
pub mod model;
pub mod features;
pub mod cluster;

pub use error::{PipelineError, Result};
pub use types::{ClassVocabulary, ImageRecord, LabeledSplit};
