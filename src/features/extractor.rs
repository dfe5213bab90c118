//! 画像1枚ずつの特徴抽出

use burn::{
    module::Module,
    record::{FullPrecisionSettings, NamedMpkFileRecorder},
    tensor::{backend::Backend, Tensor},
};
use image::imageops::FilterType;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::dataset::load_image;
use crate::error::{PipelineError, Result};
use crate::features::cache::FeatureTable;
use crate::features::vgg::{Vgg, VggConfig};

/// ImageNet のチャネル平均（BGR 順、0-255 スケール）
pub const BGR_MEAN: [f32; 3] = [103.939, 116.779, 123.68];

/// 画像パスから固定長の特徴ベクトルを得る
pub trait FeatureExtractor {
    fn extract(&self, path: &Path) -> Result<Vec<f32>>;

    fn dimension(&self) -> usize;
}

/// VGG 入力形式へ変換
///
/// 最近傍でリサイズし、RGB -> BGR に並べ替えてチャネル平均を引く（スケーリングなし）。
/// 戻り値は (C, H, W) 順の平坦な配列。
pub fn preprocess_vgg(path: &Path, input_size: u32) -> Result<Vec<f32>> {
    let record = load_image(path, input_size, FilterType::Nearest)?;
    let img = record.image;
    let (width, height) = img.dimensions();

    let mut data = Vec::with_capacity(3 * (width * height) as usize);
    for (bgr_channel, mean) in BGR_MEAN.iter().enumerate() {
        let rgb_channel = 2 - bgr_channel;
        for y in 0..height {
            for x in 0..width {
                data.push(img.get_pixel(x, y)[rgb_channel] as f32 - mean);
            }
        }
    }
    Ok(data)
}

/// 学習済み VGG による特徴抽出器
pub struct VggFeatureExtractor<B: Backend> {
    model: Vgg<B>,
    config: VggConfig,
    device: B::Device,
}

impl<B: Backend> VggFeatureExtractor<B> {
    /// NamedMpk 形式の重みファイルから読み込む
    pub fn load(weights_path: &Path, config: VggConfig, device: B::Device) -> Result<Self> {
        config.check()?;
        if !weights_path.exists() {
            return Err(PipelineError::Model(format!(
                "重みファイルが見つかりません: {}",
                weights_path.display()
            )));
        }
        let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
        let model = config
            .init::<B>(&device)
            .load_file(PathBuf::from(weights_path), &recorder, &device)
            .map_err(|e| PipelineError::Model(format!("重みの読み込みエラー: {:?}", e)))?;

        info!("VGG の重みを読み込みました: {}", weights_path.display());
        Ok(Self::from_model(model, config, device))
    }

    pub fn from_model(model: Vgg<B>, config: VggConfig, device: B::Device) -> Self {
        Self {
            model,
            config,
            device,
        }
    }
}

impl<B: Backend> FeatureExtractor for VggFeatureExtractor<B> {
    fn extract(&self, path: &Path) -> Result<Vec<f32>> {
        let size = self.config.input_size;
        let data = preprocess_vgg(path, size as u32)?;
        let tensor =
            Tensor::<B, 1>::from_floats(data.as_slice(), &self.device).reshape([1, 3, size, size]);

        self.model
            .forward(tensor)
            .into_data()
            .convert::<f32>()
            .to_vec::<f32>()
            .map_err(|e| PipelineError::Model(format!("特徴量の取得エラー: {:?}", e)))
    }

    fn dimension(&self) -> usize {
        self.config.hidden_size
    }
}

/// 全画像の特徴量を1枚ずつ順番に抽出する
pub fn extract_all<E: FeatureExtractor>(
    extractor: &E,
    paths: &[PathBuf],
    log_every: usize,
) -> Result<FeatureTable> {
    let mut table = FeatureTable::default();
    let total = paths.len();
    let log_every = log_every.max(1);

    for (i, path) in paths.iter().enumerate() {
        let features = extractor.extract(path)?;
        if features.len() != extractor.dimension() {
            return Err(PipelineError::Model(format!(
                "特徴量の次元が不正です: {} (期待: {})",
                features.len(),
                extractor.dimension()
            )));
        }
        table.insert(path.clone(), features);

        if (i + 1) % log_every == 0 || i + 1 == total {
            info!("特徴抽出: {}/{}", i + 1, total);
        }
    }

    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::loader::tests::{temp_dir, write_corpus};
    use crate::dataset::enumerate_image_paths;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    fn small_extractor() -> VggFeatureExtractor<TestBackend> {
        let device = Default::default();
        let config = VggConfig::new()
            .with_block_channels(vec![4, 8])
            .with_block_depths(vec![1, 1])
            .with_hidden_size(16)
            .with_input_size(32);
        let model = config.init::<TestBackend>(&device);
        VggFeatureExtractor::from_model(model, config, device)
    }

    #[test]
    fn test_preprocess_bgr_mean_subtraction() {
        let dir = temp_dir("preprocess");
        let path = dir.join("px.png");
        image::RgbImage::from_pixel(3, 5, image::Rgb([200, 100, 50])).save(&path).unwrap();

        let data = preprocess_vgg(&path, 4).unwrap();
        assert_eq!(data.len(), 3 * 4 * 4);
        // B, G, R の順
        assert!((data[0] - (50.0 - 103.939)).abs() < 1e-3);
        assert!((data[16] - (100.0 - 116.779)).abs() < 1e-3);
        assert!((data[32] - (200.0 - 123.68)).abs() < 1e-3);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_extraction_is_deterministic() {
        let root = temp_dir("extract");
        write_corpus(&root, &[("glioma", 1)]);
        let path = enumerate_image_paths(&[root.as_path()]).unwrap().remove(0);

        let extractor = small_extractor();
        let first = extractor.extract(&path).unwrap();
        let second = extractor.extract(&path).unwrap();
        assert_eq!(first.len(), 16);
        assert_eq!(first, second);

        std::fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn test_extract_all_covers_every_path() {
        let root = temp_dir("extract_all");
        write_corpus(&root, &[("glioma", 2), ("notumor", 3)]);
        let paths = enumerate_image_paths(&[root.as_path()]).unwrap();

        let table = extract_all(&small_extractor(), &paths, 2).unwrap();
        assert_eq!(table.len(), 5);
        assert!(paths.iter().all(|p| table.get(p).map(|v| v.len()) == Some(16)));

        std::fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn test_missing_weights_fails() {
        let result = VggFeatureExtractor::<TestBackend>::load(
            Path::new("no/such/vgg16.mpk"),
            VggConfig::new(),
            Default::default(),
        );
        assert!(matches!(result, Err(PipelineError::Model(_))));
    }

    #[test]
    fn test_too_small_input_fails_before_loading() {
        let result = VggFeatureExtractor::<TestBackend>::load(
            Path::new("no/such/vgg16.mpk"),
            VggConfig::new().with_input_size(16),
            Default::default(),
        );
        match result {
            Err(PipelineError::Model(message)) => assert!(message.contains("16")),
            other => panic!("unexpected result: {:?}", other.err()),
        }
    }
}
