pub mod cache;
pub mod extractor;
pub mod vgg;

pub use cache::FeatureTable;
pub use extractor::{extract_all, preprocess_vgg, FeatureExtractor, VggFeatureExtractor};
pub use vgg::{Vgg, VggConfig};
