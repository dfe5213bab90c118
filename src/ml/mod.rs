pub mod evaluation;
pub mod inference;
pub mod ml_model;
pub mod training;

pub use evaluation::{evaluate, ConfusionMatrix};
pub use inference::{InferenceEngine, Prediction};
pub use ml_model::{normalize_image, ModelConfig, TumorClassifier, MIN_IMAGE_SIZE};
pub use training::{train_classifier, MriBatch, MriBatcher, MriDataset, MriItem, TrainedClassifier};
