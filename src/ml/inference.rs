//! 保存済みモデルによる推論

use anyhow::{Context, Result};
use burn::{
    module::Module,
    record::{BinBytesRecorder, FullPrecisionSettings, Recorder},
    tensor::backend::Backend,
};
use image::imageops::FilterType;
use std::path::Path;

use crate::dataset::load_image;
use crate::ml::training::images_to_tensor;
use crate::ml::{ModelConfig, TumorClassifier};
use crate::model::{load_model_with_metadata, ModelMetadata};

/// 1枚分の分類結果
#[derive(Debug, Clone)]
pub struct Prediction {
    pub label: usize,
    pub class_name: String,
    pub probabilities: Vec<f32>,
}

/// 推論エンジン
pub struct InferenceEngine<B: Backend> {
    model: TumorClassifier<B>,
    metadata: ModelMetadata,
    device: B::Device,
}

impl<B: Backend> InferenceEngine<B> {
    /// モデルを読み込んで推論エンジンを初期化
    pub fn load<P: AsRef<Path>>(model_path: P, device: B::Device) -> Result<Self> {
        let (metadata, model_binary) = load_model_with_metadata(model_path.as_ref())
            .context("Failed to load classifier artifact")?;

        let model_config =
            ModelConfig::new(metadata.num_classes()).with_image_size(metadata.image_size as usize);
        model_config.check().context("Invalid classifier metadata")?;
        let model = model_config.init::<B>(&device);

        let recorder = BinBytesRecorder::<FullPrecisionSettings>::default();
        let record = Recorder::<B>::load(&recorder, model_binary, &device)
            .map_err(|e| anyhow::anyhow!("モデル重みの読み込みエラー: {:?}", e))?;

        Ok(Self::from_model(model.load_record(record), metadata, device))
    }

    pub fn from_model(model: TumorClassifier<B>, metadata: ModelMetadata, device: B::Device) -> Self {
        Self {
            model,
            metadata,
            device,
        }
    }

    /// 単一画像を分類
    pub fn classify_image<P: AsRef<Path>>(&self, image_path: P) -> Result<Prediction> {
        let record = load_image(image_path.as_ref(), self.metadata.image_size, FilterType::Triangle)?;
        let tensor = images_to_tensor::<B>(&[&record.image], &self.device);

        let probabilities = self
            .model
            .probabilities(tensor)
            .into_data()
            .convert::<f32>()
            .to_vec::<f32>()
            .map_err(|e| anyhow::anyhow!("推論結果の取得エラー: {:?}", e))?;

        let label = probabilities
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .ok_or_else(|| anyhow::anyhow!("空の推論結果"))?;

        let class_name = self
            .metadata
            .class_names
            .get(label)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("クラスインデックス {} は範囲外です", label))?;

        Ok(Prediction {
            label,
            class_name,
            probabilities,
        })
    }

    pub fn model(&self) -> &TumorClassifier<B> {
        &self.model
    }

    pub fn metadata(&self) -> &ModelMetadata {
        &self.metadata
    }
}
