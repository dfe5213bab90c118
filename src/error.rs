//! パイプライン共通のエラー型

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to decode image {path:?}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("Failed to write image {path:?}: {source}")]
    Encode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("Directory does not exist: {0:?}")]
    MissingDirectory(PathBuf),
    #[error("Unknown class directory {name:?} under {root:?}")]
    UnknownClass { root: PathBuf, name: String },
    #[error("No images found under {0:?}")]
    EmptyCorpus(PathBuf),
    #[error("Invalid configuration: {0}")]
    Config(String),
    #[error("Model error: {0}")]
    Model(String),
    #[error("PCA needs at least {components} samples and features, got {samples} samples x {features} features")]
    InsufficientSamples {
        samples: usize,
        features: usize,
        components: usize,
    },
    #[error("Class label {label} is out of range for {num_classes} classes")]
    LabelOutOfRange { label: usize, num_classes: usize },
    #[error("Invalid cluster count {k} for {samples} samples")]
    InvalidClusterCount { k: usize, samples: usize },
    #[error(transparent)]
    Serialization(#[from] bincode::Error),
    #[error(transparent)]
    Csv(#[from] csv::Error),
}

impl PipelineError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PipelineError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn decode(path: impl Into<PathBuf>, source: image::ImageError) -> Self {
        PipelineError::Decode {
            path: path.into(),
            source,
        }
    }

    pub fn encode(path: impl Into<PathBuf>, source: image::ImageError) -> Self {
        PipelineError::Encode {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
