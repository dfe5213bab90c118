//! 学習済み分類器のメタデータ
//!
//! tar.gz形式で重みと一緒に保存され、再読み込み時にモデル構成の復元に使います。

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::types::ClassVocabulary;

/// モデルメタデータ
///
/// tar.gz形式で保存される情報：
/// - metadata.json: このメタデータ（JSON形式）
/// - model.bin: モデルの重み（バイナリ）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelMetadata {
    /// クラス名（ラベルコード順）
    pub class_names: Vec<String>,

    /// モデル入力サイズ（正方形）
    pub image_size: u32,

    /// 学習エポック数
    pub num_epochs: u32,

    /// バッチサイズ
    pub batch_size: u32,

    /// 学習データから検証用に取り分けた割合
    pub validation_split: f64,

    /// 学習に使った枚数（検証用を除く）
    pub train_samples: usize,

    /// テストデータでの正解率（未評価なら None）
    #[serde(default)]
    pub test_accuracy: Option<f64>,

    /// モデルの学習時刻（ISO8601形式）
    pub trained_at: String,
}

impl ModelMetadata {
    pub fn new(
        class_names: Vec<String>,
        image_size: u32,
        num_epochs: u32,
        batch_size: u32,
        validation_split: f64,
        train_samples: usize,
    ) -> Self {
        let trained_at = chrono::Local::now().to_rfc3339();

        Self {
            class_names,
            image_size,
            num_epochs,
            batch_size,
            validation_split,
            train_samples,
            test_accuracy: None,
            trained_at,
        }
    }

    pub fn num_classes(&self) -> usize {
        self.class_names.len()
    }

    /// 学習時のクラス語彙（ラベル番号はモデル出力と一致する）
    pub fn vocabulary(&self) -> ClassVocabulary {
        ClassVocabulary::new(self.class_names.clone())
    }

    /// メタデータをJSON文字列に変換
    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize metadata to JSON")
    }

    /// JSON文字列からメタデータを生成
    pub fn from_json_string(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to deserialize metadata from JSON")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_round_trip() {
        let mut metadata = ModelMetadata::new(
            vec!["glioma".into(), "meningioma".into(), "notumor".into(), "pituitary".into()],
            150,
            20,
            128,
            0.2,
            4569,
        );
        metadata.test_accuracy = Some(0.91);

        let json = metadata.to_json_string().unwrap();
        let restored = ModelMetadata::from_json_string(&json).unwrap();
        assert_eq!(restored.class_names, metadata.class_names);
        assert_eq!(restored.num_classes(), 4);
        assert_eq!(restored.test_accuracy, Some(0.91));
        assert_eq!(restored.trained_at, metadata.trained_at);
    }

    #[test]
    fn test_vocabulary_follows_artifact_labels() {
        use crate::dataset::load_split;
        use crate::dataset::loader::tests::{temp_dir, write_corpus};
        use crate::model::DatasetSettings;

        let root = temp_dir("artifact_vocab");
        write_corpus(&root, &[("benign", 2), ("malignant", 3)]);
        let metadata = ModelMetadata::new(vec!["benign".into(), "malignant".into()], 24, 1, 4, 0.2, 8);

        let vocabulary = metadata.vocabulary();
        assert_eq!(vocabulary.names(), metadata.class_names.as_slice());
        let split = load_split(&root, &vocabulary, metadata.image_size).unwrap();
        assert_eq!(split.class_counts(metadata.num_classes()), vec![2, 3]);

        // 設定側の語彙では読めない
        let config_vocabulary = DatasetSettings::default().class_names;
        assert!(load_split(&root, &config_vocabulary, metadata.image_size).is_err());

        std::fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn test_missing_accuracy_defaults_to_none() {
        let json = r#"{
            "class_names": ["a", "b"],
            "image_size": 32,
            "num_epochs": 1,
            "batch_size": 4,
            "validation_split": 0.2,
            "train_samples": 10,
            "trained_at": "2024-01-01T00:00:00+00:00"
        }"#;
        let metadata = ModelMetadata::from_json_string(json).unwrap();
        assert!(metadata.test_accuracy.is_none());
    }
}
