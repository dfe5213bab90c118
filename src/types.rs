use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// 既定のクラス名（ラベルコード順）
pub const DEFAULT_CLASS_NAMES: [&str; 4] = ["glioma", "meningioma", "notumor", "pituitary"];

/// クラス名とラベルコードの固定対応表
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClassVocabulary {
    names: Vec<String>,
}

impl Default for ClassVocabulary {
    fn default() -> Self {
        Self::new(DEFAULT_CLASS_NAMES.iter().map(|s| s.to_string()).collect())
    }
}

impl ClassVocabulary {
    pub fn new(names: Vec<String>) -> Self {
        Self { names }
    }

    pub fn label_of(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    pub fn name_of(&self, label: usize) -> Option<&str> {
        self.names.get(label).map(String::as_str)
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// 読み込み済みの画像1枚
#[derive(Debug, Clone)]
pub struct ImageRecord {
    pub path: PathBuf,
    pub image: RgbImage,
    /// 教師なし側では None
    pub label: Option<usize>,
}

/// ラベル付き画像の集合（Training / Testing の一方）
#[derive(Debug, Clone, Default)]
pub struct LabeledSplit {
    pub images: Vec<RgbImage>,
    pub labels: Vec<usize>,
    pub paths: Vec<PathBuf>,
}

impl LabeledSplit {
    pub fn push(&mut self, record: ImageRecord, label: usize) {
        self.images.push(record.image);
        self.labels.push(label);
        self.paths.push(record.path);
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// 画像とラベルを同じ順序でシャッフル
    pub fn shuffle(self, seed: u64) -> Self {
        use rand::seq::SliceRandom;
        use rand::SeedableRng;

        let mut indices: Vec<usize> = (0..self.len()).collect();
        let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
        indices.shuffle(&mut rng);

        let mut images: Vec<Option<RgbImage>> = self.images.into_iter().map(Some).collect();
        let mut shuffled = LabeledSplit::default();
        for idx in indices {
            if let Some(image) = images[idx].take() {
                shuffled.images.push(image);
                shuffled.labels.push(self.labels[idx]);
                shuffled.paths.push(self.paths[idx].clone());
            }
        }
        shuffled
    }

    /// 末尾 `fraction` を検証用として切り出す
    ///
    /// 境界は `floor(total * (1 - fraction))`。端数は検証側に入る。
    pub fn split_tail(mut self, fraction: f64) -> (Self, Self) {
        let total = self.len();
        let keep = ((total as f64) * (1.0 - fraction)).floor() as usize;
        let keep = keep.min(total);

        let tail = LabeledSplit {
            images: self.images.split_off(keep),
            labels: self.labels.split_off(keep),
            paths: self.paths.split_off(keep),
        };
        (self, tail)
    }

    pub fn class_counts(&self, num_classes: usize) -> Vec<usize> {
        let mut counts = vec![0; num_classes];
        for &label in &self.labels {
            if label < num_classes {
                counts[label] += 1;
            }
        }
        counts
    }
}
