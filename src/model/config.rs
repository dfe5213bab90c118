//! パイプライン設定管理モジュール
//!
//! データセットの場所や学習・クラスタリングのパラメータをJSON形式で保存・読み込みします。

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{PipelineError, Result};
use crate::features::VggConfig;
use crate::ml::MIN_IMAGE_SIZE;
use crate::types::ClassVocabulary;

/// 計算デバイスの種類
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum DeviceType {
    /// WGPU (GPU) バックエンド
    #[default]
    Wgpu,
    /// NdArray (CPU) バックエンド
    Cpu,
}

impl std::fmt::Display for DeviceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceType::Wgpu => write!(f, "WGPU (GPU)"),
            DeviceType::Cpu => write!(f, "CPU (NdArray)"),
        }
    }
}

/// データセット設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetSettings {
    /// 学習用ルートディレクトリ（クラス名のサブディレクトリを含む）
    pub training_dir: PathBuf,
    /// テスト用ルートディレクトリ
    pub testing_dir: PathBuf,
    /// クラス名（並び順がラベルコード）
    pub class_names: ClassVocabulary,
    /// 分類器の入力サイズ（正方形）
    pub image_size: u32,
}

impl Default for DatasetSettings {
    fn default() -> Self {
        Self {
            training_dir: PathBuf::from("data/tumor/Training"),
            testing_dir: PathBuf::from("data/tumor/Testing"),
            class_names: ClassVocabulary::default(),
            image_size: 150,
        }
    }
}

/// トレーニング設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingSettings {
    /// エポック数
    pub num_epochs: usize,
    /// バッチサイズ
    pub batch_size: usize,
    /// ワーカー数
    pub num_workers: usize,
    /// 学習率
    pub learning_rate: f64,
    /// 学習データのシャッフル用シード
    pub seed: u64,
    /// 学習データ末尾から検証用に取り分ける割合
    pub validation_split: f64,
}

impl Default for TrainingSettings {
    fn default() -> Self {
        Self {
            num_epochs: 20,
            batch_size: 128,
            num_workers: 1,
            learning_rate: 1e-3,
            seed: 25,
            validation_split: 0.2,
        }
    }
}

/// 特徴抽出設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureSettings {
    /// 学習済みVGG16の重み（NamedMpk形式）
    pub weights_path: PathBuf,
    /// 特徴抽出器の入力サイズ
    pub input_size: u32,
    /// 特徴量キャッシュのファイル名（model_dir 内）
    pub cache_file: String,
    /// 進捗ログの出力間隔（枚）
    pub log_every: usize,
}

impl Default for FeatureSettings {
    fn default() -> Self {
        Self {
            weights_path: PathBuf::from("models/vgg16.mpk"),
            input_size: 224,
            cache_file: "features.bin".to_string(),
            log_every: 100,
        }
    }
}

/// クラスタリング設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusteringSettings {
    /// PCAの主成分数
    pub n_components: usize,
    /// 最終クラスタ数 = 画像枚数 / この値
    pub images_per_cluster: usize,
    /// k-meansの最大反復回数
    pub max_iter: usize,
    /// 収束判定（重心移動量の二乗和）
    pub tolerance: f64,
    /// PCA・k-means用シード
    pub seed: u64,
    /// 画像グリッドを出力するクラスタID
    pub view_clusters: Vec<usize>,
    /// 1クラスタあたりの表示上限
    pub max_view_images: usize,
    /// グリッドの列数
    pub grid_columns: u32,
    /// サムネイルの一辺（ピクセル）
    pub thumbnail_size: u32,
}

impl Default for ClusteringSettings {
    fn default() -> Self {
        Self {
            n_components: 1000,
            images_per_cluster: 100,
            max_iter: 300,
            tolerance: 1e-4,
            seed: 22,
            view_clusters: vec![0, 1, 2, 3, 4],
            max_view_images: 30,
            grid_columns: 10,
            thumbnail_size: 128,
        }
    }
}

/// 出力先設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputSettings {
    /// 学習済みモデルと特徴量キャッシュの保存先
    pub model_dir: PathBuf,
    /// 混同行列・エルボー曲線・クラスタ画像の保存先
    pub report_dir: PathBuf,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            model_dir: PathBuf::from("models"),
            report_dir: PathBuf::from("reports"),
        }
    }
}

/// パイプライン設定
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// 計算デバイスの種類
    #[serde(default)]
    pub device_type: DeviceType,
    #[serde(default)]
    pub dataset: DatasetSettings,
    #[serde(default)]
    pub training: TrainingSettings,
    #[serde(default)]
    pub features: FeatureSettings,
    #[serde(default)]
    pub clustering: ClusteringSettings,
    #[serde(default)]
    pub output: OutputSettings,
}

impl PipelineConfig {
    /// 設定ファイルのデフォルトパス
    pub fn default_path() -> PathBuf {
        PathBuf::from("config.json")
    }

    /// 設定を読み込む
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: PipelineConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// 設定ファイルがあれば読み込み、無ければデフォルト設定を返す
    ///
    /// ファイルが存在して壊れている場合はエラーにする。
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            let config = Self::load(path)?;
            tracing::info!("設定ファイルを読み込みました: {}", path.display());
            Ok(config)
        } else {
            tracing::info!("設定ファイルが存在しません。デフォルト設定を使用します");
            Ok(Self::default())
        }
    }

    /// 設定を保存する
    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.dataset.class_names.is_empty() {
            return Err(PipelineError::Config("class_names must not be empty".into()));
        }
        if (self.dataset.image_size as usize) < MIN_IMAGE_SIZE {
            return Err(PipelineError::Config(format!(
                "dataset.image_size must be at least {MIN_IMAGE_SIZE}, got {}",
                self.dataset.image_size
            )));
        }
        let min_input_size = VggConfig::new().min_input_size();
        if (self.features.input_size as usize) < min_input_size {
            return Err(PipelineError::Config(format!(
                "features.input_size must be at least {min_input_size}, got {}",
                self.features.input_size
            )));
        }
        if self.training.batch_size == 0 || self.training.num_epochs == 0 {
            return Err(PipelineError::Config("batch_size and num_epochs must be positive".into()));
        }
        let split = self.training.validation_split;
        if !(split > 0.0 && split < 1.0) {
            return Err(PipelineError::Config(format!(
                "validation_split must be in (0, 1), got {split}"
            )));
        }
        if self.clustering.images_per_cluster == 0 {
            return Err(PipelineError::Config("images_per_cluster must be positive".into()));
        }
        if self.clustering.n_components == 0 {
            return Err(PipelineError::Config("n_components must be positive".into()));
        }
        if self.clustering.grid_columns == 0 || self.clustering.thumbnail_size == 0 {
            return Err(PipelineError::Config("grid_columns and thumbnail_size must be positive".into()));
        }
        Ok(())
    }

    /// 学習済み分類器の保存先
    pub fn classifier_path(&self) -> PathBuf {
        self.output.model_dir.join("classifier.tar.gz")
    }

    /// 特徴量キャッシュの保存先
    pub fn feature_cache_path(&self) -> PathBuf {
        self.output.model_dir.join(&self.features.cache_file)
    }

    /// 設定情報を表示
    pub fn display(&self) {
        println!("=== パイプライン設定 ===");
        println!("計算デバイス: {}", self.device_type);
        println!("\n--- データセット ---");
        println!("学習データ: {}", self.dataset.training_dir.display());
        println!("テストデータ: {}", self.dataset.testing_dir.display());
        println!("クラス: {}", self.dataset.class_names.names().join(", "));
        println!("入力サイズ: {}x{}", self.dataset.image_size, self.dataset.image_size);
        println!("\n--- トレーニング設定 ---");
        println!("エポック数: {}", self.training.num_epochs);
        println!("バッチサイズ: {}", self.training.batch_size);
        println!("学習率: {}", self.training.learning_rate);
        println!("検証割合: {}", self.training.validation_split);
        println!("シード: {}", self.training.seed);
        println!("\n--- 特徴抽出 ---");
        println!("重み: {}", self.features.weights_path.display());
        println!("入力サイズ: {}x{}", self.features.input_size, self.features.input_size);
        println!("\n--- クラスタリング ---");
        println!("主成分数: {}", self.clustering.n_components);
        println!("クラスタ数 = 画像枚数 / {}", self.clustering.images_per_cluster);
        println!("最大反復: {}", self.clustering.max_iter);
        println!("\n--- 出力 ---");
        println!("モデル: {}", self.output.model_dir.display());
        println!("レポート: {}", self.output.report_dir.display());
        println!("========================\n");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PipelineConfig::default();
        assert_eq!(config.device_type, DeviceType::Wgpu);
        assert_eq!(config.dataset.class_names.len(), 4);
        assert_eq!(config.dataset.image_size, 150);
        assert_eq!(config.training.num_epochs, 20);
        assert_eq!(config.training.batch_size, 128);
        assert_eq!(config.clustering.n_components, 1000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_serialize_deserialize() {
        let config = PipelineConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let deserialized: PipelineConfig = serde_json::from_str(&json).unwrap();

        assert_eq!(config.device_type, deserialized.device_type);
        assert_eq!(config.dataset.class_names, deserialized.dataset.class_names);
        assert_eq!(config.clustering.view_clusters, deserialized.clustering.view_clusters);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let json = r#"{ "device_type": "Cpu" }"#;
        let config: PipelineConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.device_type, DeviceType::Cpu);
        assert_eq!(config.training.seed, 25);
    }

    #[test]
    fn test_validate_rejects_bad_split() {
        let mut config = PipelineConfig::default();
        config.training.validation_split = 1.0;
        assert!(matches!(config.validate(), Err(PipelineError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_sizes_the_networks_cannot_take() {
        let mut config = PipelineConfig::default();
        config.dataset.image_size = 16;
        assert!(matches!(config.validate(), Err(PipelineError::Config(_))));
        config.dataset.image_size = 22;
        assert!(config.validate().is_ok());

        config.features.input_size = 16;
        assert!(matches!(config.validate(), Err(PipelineError::Config(_))));
        config.features.input_size = 32;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_empty_vocabulary() {
        let mut config = PipelineConfig::default();
        config.dataset.class_names = ClassVocabulary::new(vec![]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_device_type_display() {
        assert_eq!(format!("{}", DeviceType::Wgpu), "WGPU (GPU)");
        assert_eq!(format!("{}", DeviceType::Cpu), "CPU (NdArray)");
    }

    #[test]
    fn test_save_and_load() {
        let dir = std::env::temp_dir().join(format!("tumor_mri_config_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.json");

        let mut config = PipelineConfig::default();
        config.training.num_epochs = 3;
        config.save(&path).unwrap();

        let loaded = PipelineConfig::load_or_default(&path).unwrap();
        assert_eq!(loaded.training.num_epochs, 3);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_load_or_default_without_file() {
        let config = PipelineConfig::load_or_default("does/not/exist.json").unwrap();
        assert_eq!(config.training.num_epochs, 20);
    }
}
