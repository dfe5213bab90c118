pub mod loader;

pub use loader::{enumerate_image_paths, load_data, load_image, load_split};
