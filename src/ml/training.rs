//! 分類モデルの学習

use anyhow::{Context, Result};
use image::RgbImage;
use std::path::Path;
use tracing::{debug, info};

use burn::{
    data::{dataloader::batcher::Batcher, dataset::Dataset},
    module::Module,
    record::{BinBytesRecorder, FullPrecisionSettings, Recorder},
    tensor::{
        backend::{AutodiffBackend, Backend},
        Int, Tensor,
    },
    train::{ClassificationOutput, TrainOutput, TrainStep, ValidStep},
};

use crate::ml::{normalize_image, ModelConfig, TumorClassifier};
use crate::model::{ModelMetadata, TrainingSettings};
use crate::types::LabeledSplit;

/// メモリ上の学習データセット
pub struct MriDataset {
    split: LabeledSplit,
}

impl MriDataset {
    pub fn new(split: LabeledSplit) -> Self {
        Self { split }
    }
}

/// データセットアイテム
#[derive(Clone, Debug)]
pub struct MriItem {
    pub image: RgbImage,
    pub label: usize,
}

impl Dataset<MriItem> for MriDataset {
    fn get(&self, index: usize) -> Option<MriItem> {
        let image = self.split.images.get(index)?;
        let label = *self.split.labels.get(index)?;
        Some(MriItem {
            image: image.clone(),
            label,
        })
    }

    fn len(&self) -> usize {
        self.split.len()
    }
}

/// 画像列を [N, 3, H, W] のテンソルへ変換
///
/// 全画像が同じサイズであること。
pub fn images_to_tensor<B: Backend>(images: &[&RgbImage], device: &B::Device) -> Tensor<B, 4> {
    let batch_size = images.len();
    let (width, height) = images.first().map(|img| img.dimensions()).unwrap_or((0, 0));
    let mut all_pixels = Vec::with_capacity(batch_size * 3 * (width * height) as usize);
    for img in images {
        all_pixels.extend_from_slice(&normalize_image(img));
    }

    Tensor::<B, 1>::from_floats(all_pixels.as_slice(), device).reshape([
        batch_size,
        3,
        height as usize,
        width as usize,
    ])
}

/// バッチャー
#[derive(Clone, Default)]
pub struct MriBatcher;

/// バッチデータ
#[derive(Clone, Debug)]
pub struct MriBatch<B: Backend> {
    pub images: Tensor<B, 4>,
    pub targets: Tensor<B, 1, Int>,
}

impl<B: Backend> Batcher<B, MriItem, MriBatch<B>> for MriBatcher {
    fn batch(&self, items: Vec<MriItem>, device: &B::Device) -> MriBatch<B> {
        let images: Vec<&RgbImage> = items.iter().map(|item| &item.image).collect();
        let images = images_to_tensor::<B>(&images, device);

        let targets_vec: Vec<i64> = items.iter().map(|item| item.label as i64).collect();
        let targets = Tensor::<B, 1, Int>::from_ints(targets_vec.as_slice(), device);

        MriBatch { images, targets }
    }
}

/// TrainStep実装 (学習時の順伝播 + 逆伝播)
impl<B: AutodiffBackend> TrainStep<MriBatch<B>, ClassificationOutput<B>> for TumorClassifier<B> {
    fn step(&self, batch: MriBatch<B>) -> TrainOutput<ClassificationOutput<B>> {
        let item = self.forward_classification(batch.images, batch.targets);
        let grads = item.loss.backward();
        TrainOutput::new(self, grads, item)
    }
}

/// ValidStep実装 (検証時の順伝播のみ)
impl<B: Backend> ValidStep<MriBatch<B>, ClassificationOutput<B>> for TumorClassifier<B> {
    fn step(&self, batch: MriBatch<B>) -> ClassificationOutput<B> {
        self.forward_classification(batch.images, batch.targets)
    }
}

/// 学習結果
pub struct TrainedClassifier<B: Backend> {
    pub model: TumorClassifier<B>,
    pub metadata: ModelMetadata,
}

impl<B: Backend> TrainedClassifier<B> {
    /// 重みをバイナリにシリアライズ
    pub fn model_binary(&self) -> Result<Vec<u8>> {
        let recorder = BinBytesRecorder::<FullPrecisionSettings>::default();
        Recorder::<B>::record(&recorder, self.model.clone().into_record(), ())
            .map_err(|e| anyhow::anyhow!("モデル重みのシリアライズエラー: {:?}", e))
    }
}

/// モデル学習を実行
///
/// 学習データを固定シードでシャッフルし、末尾 `validation_split` を検証用に取り分けてから
/// 固定エポック数だけ学習する（早期終了なし）。
pub fn train_classifier<B: AutodiffBackend>(
    train_split: LabeledSplit,
    class_names: &[String],
    image_size: usize,
    settings: &TrainingSettings,
    artifact_dir: &Path,
    device: B::Device,
) -> Result<TrainedClassifier<B::InnerBackend>> {
    use burn::{
        data::dataloader::DataLoaderBuilder,
        optim::AdamConfig,
        train::{
            metric::{AccuracyMetric, LossMetric},
            LearnerBuilder, LearningStrategy,
        },
    };

    let shuffled = train_split.shuffle(settings.seed);
    let (train, valid) = shuffled.split_tail(settings.validation_split);
    if train.is_empty() || valid.is_empty() {
        anyhow::bail!(
            "学習データが少なすぎます: 学習 {} 枚 / 検証 {} 枚",
            train.len(),
            valid.len()
        );
    }

    info!("学習データ: {} 枚", train.len());
    info!("検証データ: {} 枚", valid.len());
    let train_samples = train.len();

    let model_config = ModelConfig::new(class_names.len()).with_image_size(image_size);
    model_config.check()?;
    info!(
        "モデル設定: {} クラス, 入力サイズ: {}x{}",
        model_config.num_classes, image_size, image_size
    );

    // 学習側のみエポックごとに並び替える
    let dataloader_train = DataLoaderBuilder::<B, _, _>::new(MriBatcher)
        .batch_size(settings.batch_size)
        .shuffle(settings.seed)
        .num_workers(settings.num_workers)
        .build(MriDataset::new(train));

    let dataloader_val = DataLoaderBuilder::<B::InnerBackend, _, _>::new(MriBatcher)
        .batch_size(settings.batch_size)
        .num_workers(settings.num_workers)
        .build(MriDataset::new(valid));

    let model = model_config.init::<B>(&device);
    debug!("総パラメータ数: {}", model.num_params());

    std::fs::create_dir_all(artifact_dir)
        .with_context(|| format!("Failed to create artifact directory: {:?}", artifact_dir))?;
    let artifact_dir_str = artifact_dir.to_string_lossy().to_string();

    info!(
        "学習を開始します... エポック数: {}, バッチサイズ: {}, 学習率: {}",
        settings.num_epochs, settings.batch_size, settings.learning_rate
    );

    let learner = LearnerBuilder::new(&artifact_dir_str)
        .metric_train_numeric(AccuracyMetric::new())
        .metric_valid_numeric(AccuracyMetric::new())
        .metric_train_numeric(LossMetric::new())
        .metric_valid_numeric(LossMetric::new())
        .learning_strategy(LearningStrategy::SingleDevice(device.clone()))
        .num_epochs(settings.num_epochs)
        .summary()
        .build(model, AdamConfig::new().init(), settings.learning_rate);

    let model_trained = learner.fit(dataloader_train, dataloader_val);
    info!("学習が完了しました");

    let metadata = ModelMetadata::new(
        class_names.to_vec(),
        image_size as u32,
        settings.num_epochs as u32,
        settings.batch_size as u32,
        settings.validation_split,
        train_samples,
    );

    Ok(TrainedClassifier {
        model: model_trained.model,
        metadata,
    })
}
