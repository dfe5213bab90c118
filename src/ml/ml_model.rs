//! 機械学習モデルの共通定義
//!
//! 脳腫瘍MRI分類用のCNNモデルと関連する設定を提供します。

use burn::{
    config::Config,
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        loss::CrossEntropyLossConfig,
        pool::{MaxPool2d, MaxPool2dConfig},
        Linear, LinearConfig, Relu,
    },
    tensor::{activation::softmax, backend::Backend, Int, Tensor},
    train::ClassificationOutput,
};
use image::RgbImage;

use crate::error::PipelineError;

/// 3段の畳み込み後に特徴マップが残る最小の入力サイズ
pub const MIN_IMAGE_SIZE: usize = 22;

/// モデル設定
#[derive(Config, Debug)]
pub struct ModelConfig {
    /// 分類クラス数
    pub num_classes: usize,
    /// 入力画像サイズ（正方形）
    #[config(default = 150)]
    pub image_size: usize,
    /// 全結合層の隠れ次元
    #[config(default = 128)]
    pub hidden_size: usize,
}

impl ModelConfig {
    /// 3段の Conv(3x3, padding無し) + MaxPool(2x2, stride 2) 後の特徴マップの一辺
    pub fn feature_map_size(&self) -> usize {
        let mut size = self.image_size;
        for _ in 0..3 {
            size = size.saturating_sub(2) / 2;
        }
        size
    }

    /// 構成が初期化可能か確認する
    pub fn check(&self) -> crate::error::Result<()> {
        if self.num_classes == 0 {
            return Err(PipelineError::Model("クラス数が0です".into()));
        }
        if self.image_size < MIN_IMAGE_SIZE {
            return Err(PipelineError::Model(format!(
                "入力サイズが小さすぎます: {} (最小{}x{}が必要)",
                self.image_size, MIN_IMAGE_SIZE, MIN_IMAGE_SIZE
            )));
        }
        Ok(())
    }

    /// モデルを初期化
    ///
    /// 事前に [`ModelConfig::check`] を通しておくこと。
    ///
    /// 150x150 入力の場合: 148 -> 74 -> 72 -> 36 -> 34 -> 17、Flatten後 64*17*17 = 18496
    pub fn init<B: Backend>(&self, device: &B::Device) -> TumorClassifier<B> {
        let feature_map_size = self.feature_map_size();
        assert!(
            feature_map_size > 0,
            "入力サイズが小さすぎます: {} (最小22x22が必要)",
            self.image_size
        );

        let d = 64 * feature_map_size * feature_map_size;
        tracing::debug!(
            "[Model] 入力 {}x{}, 特徴マップ 64x{}x{}, FC1: {} -> {}, FC2: {} -> {}",
            self.image_size,
            self.image_size,
            feature_map_size,
            feature_map_size,
            d,
            self.hidden_size,
            self.hidden_size,
            self.num_classes
        );

        let pool = || MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init();

        TumorClassifier {
            conv1: Conv2dConfig::new([3, 16], [3, 3]).init(device),
            pool1: pool(),
            conv2: Conv2dConfig::new([16, 32], [3, 3]).init(device),
            pool2: pool(),
            conv3: Conv2dConfig::new([32, 64], [3, 3]).init(device),
            pool3: pool(),
            fc1: LinearConfig::new(d, self.hidden_size).init(device),
            fc2: LinearConfig::new(self.hidden_size, self.num_classes).init(device),
            activation: Relu::new(),
        }
    }
}

/// 脳腫瘍MRI分類用CNNモデル
///
/// # アーキテクチャ
/// - {Conv 3x3 (no padding) + ReLU + MaxPool 2x2} x 3層 (16, 32, 64 チャネル)
/// - Flatten
/// - FC: d -> 128 + ReLU
/// - FC: 128 -> num_classes
/// - Softmax (確率が必要な場合のみ)
#[derive(Module, Debug)]
pub struct TumorClassifier<B: Backend> {
    conv1: Conv2d<B>, // 3 -> 16
    pool1: MaxPool2d,
    conv2: Conv2d<B>, // 16 -> 32
    pool2: MaxPool2d,
    conv3: Conv2d<B>, // 32 -> 64
    pool3: MaxPool2d,

    fc1: Linear<B>,
    fc2: Linear<B>,

    activation: Relu,
}

impl<B: Backend> TumorClassifier<B> {
    /// 順伝播
    ///
    /// - `images`: バッチ画像 [batch_size, 3, size, size]
    /// - 戻り値: クラスごとのロジット [batch_size, num_classes]
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let [batch_size, _, _, _] = images.dims();

        let x = self.pool1.forward(self.activation.forward(self.conv1.forward(images)));
        let x = self.pool2.forward(self.activation.forward(self.conv2.forward(x)));
        let x = self.pool3.forward(self.activation.forward(self.conv3.forward(x)));

        let [_, c, h, w] = x.dims();
        let x = x.reshape([batch_size, c * h * w]);

        let x = self.activation.forward(self.fc1.forward(x));
        self.fc2.forward(x)
    }

    /// クラス確率（softmax）
    pub fn probabilities(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        softmax(self.forward(images), 1)
    }

    /// 予測クラスID [batch_size]
    pub fn predict(&self, images: Tensor<B, 4>) -> Tensor<B, 1, Int> {
        let [batch_size, _, _, _] = images.dims();
        self.forward(images).argmax(1).reshape([batch_size])
    }

    /// 順伝播と損失計算（学習用）
    pub fn forward_classification(
        &self,
        images: Tensor<B, 4>,
        targets: Tensor<B, 1, Int>,
    ) -> ClassificationOutput<B> {
        let output = self.forward(images);
        let loss = CrossEntropyLossConfig::new()
            .init(&output.device())
            .forward(output.clone(), targets.clone());

        ClassificationOutput::new(loss, output, targets)
    }
}

/// RGB画像を [0, 1] に正規化し (C, H, W) の順で平坦化
pub fn normalize_image(img: &RgbImage) -> Vec<f32> {
    let (width, height) = img.dimensions();
    let mut data = Vec::with_capacity(3 * (width * height) as usize);

    for channel in 0..3 {
        for y in 0..height {
            for x in 0..width {
                data.push(img.get_pixel(x, y)[channel] as f32 / 255.0);
            }
        }
    }

    data
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_feature_map_size() {
        let config = ModelConfig::new(4);
        assert_eq!(config.image_size, 150);
        assert_eq!(config.feature_map_size(), 17);
        assert_eq!(ModelConfig::new(4).with_image_size(32).feature_map_size(), 2);
    }

    #[test]
    fn test_check_rejects_small_inputs() {
        assert!(ModelConfig::new(4).with_image_size(22).check().is_ok());
        assert!(matches!(
            ModelConfig::new(4).with_image_size(21).check(),
            Err(PipelineError::Model(_))
        ));
        assert!(ModelConfig::new(0).check().is_err());
    }

    #[test]
    fn test_forward_shapes() {
        let device = Default::default();
        let model = ModelConfig::new(4).with_image_size(32).init::<TestBackend>(&device);

        let images = Tensor::<TestBackend, 4>::zeros([3, 3, 32, 32], &device);
        assert_eq!(model.forward(images.clone()).dims(), [3, 4]);
        assert_eq!(model.predict(images.clone()).dims(), [3]);

        let probs = model.probabilities(images).into_data().convert::<f32>().to_vec::<f32>().unwrap();
        for row in probs.chunks(4) {
            let sum: f32 = row.iter().sum();
            assert!((sum - 1.0).abs() < 1e-4);
        }
    }

    #[test]
    fn test_normalize_image_layout() {
        let img = RgbImage::from_fn(2, 1, |x, _| image::Rgb([255, 0, if x == 0 { 51 } else { 102 }]));
        let data = normalize_image(&img);
        assert_eq!(data.len(), 6);
        // R plane, G plane, B plane
        assert_eq!(&data[0..2], &[1.0, 1.0]);
        assert_eq!(&data[2..4], &[0.0, 0.0]);
        assert!((data[4] - 0.2).abs() < 1e-6);
        assert!((data[5] - 0.4).abs() < 1e-6);
    }
}
