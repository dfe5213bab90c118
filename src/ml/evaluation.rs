//! テストデータでの評価（混同行列）

use burn::tensor::backend::Backend;
use image::{Rgb, RgbImage};
use std::path::Path;
use tracing::info;

use crate::error::{PipelineError, Result};
use crate::ml::training::images_to_tensor;
use crate::ml::TumorClassifier;
use crate::types::LabeledSplit;

/// 混同行列（行 = 正解クラス、列 = 予測クラス）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfusionMatrix {
    counts: Vec<Vec<usize>>,
}

impl ConfusionMatrix {
    pub fn new(num_classes: usize) -> Self {
        Self {
            counts: vec![vec![0; num_classes]; num_classes],
        }
    }

    /// 正解ラベル列と予測ラベル列から作成
    pub fn from_labels(num_classes: usize, actual: &[usize], predicted: &[usize]) -> Result<Self> {
        let mut matrix = Self::new(num_classes);
        for (&a, &p) in actual.iter().zip(predicted) {
            matrix.record(a, p)?;
        }
        Ok(matrix)
    }

    /// 1件を記録する。範囲外のラベルはエラー。
    pub fn record(&mut self, actual: usize, predicted: usize) -> Result<()> {
        let num_classes = self.num_classes();
        for label in [actual, predicted] {
            if label >= num_classes {
                return Err(PipelineError::LabelOutOfRange { label, num_classes });
            }
        }
        self.counts[actual][predicted] += 1;
        Ok(())
    }

    pub fn num_classes(&self) -> usize {
        self.counts.len()
    }

    pub fn get(&self, actual: usize, predicted: usize) -> usize {
        self.counts[actual][predicted]
    }

    pub fn rows(&self) -> &[Vec<usize>] {
        &self.counts
    }

    pub fn row_sums(&self) -> Vec<usize> {
        self.counts.iter().map(|row| row.iter().sum()).collect()
    }

    pub fn total(&self) -> usize {
        self.row_sums().iter().sum()
    }

    pub fn accuracy(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            return 0.0;
        }
        let correct: usize = (0..self.num_classes()).map(|i| self.counts[i][i]).sum();
        correct as f64 / total as f64
    }

    /// 表形式の文字列
    pub fn to_table(&self, class_names: &[String]) -> String {
        let width = class_names.iter().map(|n| n.len()).max().unwrap_or(0).max(6);
        let mut out = format!("{:>width$}", "");
        for name in class_names {
            out.push_str(&format!(" {:>width$}", name));
        }
        out.push('\n');
        for (i, row) in self.counts.iter().enumerate() {
            let name = class_names.get(i).map(String::as_str).unwrap_or("?");
            out.push_str(&format!("{:>width$}", name));
            for count in row {
                out.push_str(&format!(" {:>width$}", count));
            }
            out.push('\n');
        }
        out
    }

    /// CSVとして保存（1行目はヘッダー）
    pub fn write_csv(&self, path: &Path, class_names: &[String]) -> Result<()> {
        let mut writer = csv::Writer::from_path(path)?;
        let mut header = vec!["actual\\predicted".to_string()];
        header.extend(class_names.iter().cloned());
        writer.write_record(&header)?;

        for (i, row) in self.counts.iter().enumerate() {
            let mut record = vec![class_names.get(i).cloned().unwrap_or_else(|| i.to_string())];
            record.extend(row.iter().map(|c| c.to_string()));
            writer.write_record(&record)?;
        }
        writer.flush().map_err(|e| PipelineError::io(path, e))?;
        Ok(())
    }

    /// ヒートマップ画像を作成（行ごとに正規化、濃いほど件数が多い）
    pub fn render_heatmap(&self, cell_size: u32) -> RgbImage {
        let n = self.num_classes() as u32;
        let row_sums = self.row_sums();
        RgbImage::from_fn(n * cell_size, n * cell_size, |x, y| {
            let (row, col) = ((y / cell_size) as usize, (x / cell_size) as usize);
            let ratio = if row_sums[row] == 0 {
                0.0
            } else {
                self.counts[row][col] as f32 / row_sums[row] as f32
            };
            let shade = (255.0 * (1.0 - ratio)) as u8;
            Rgb([shade, shade, 255])
        })
    }
}

/// テストデータ全体を予測して混同行列を作る
pub fn evaluate<B: Backend>(
    model: &TumorClassifier<B>,
    test_split: &LabeledSplit,
    num_classes: usize,
    batch_size: usize,
    device: &B::Device,
) -> Result<ConfusionMatrix> {
    let mut matrix = ConfusionMatrix::new(num_classes);
    let batch_size = batch_size.max(1);

    for (chunk_idx, chunk) in test_split.images.chunks(batch_size).enumerate() {
        let images: Vec<&RgbImage> = chunk.iter().collect();
        let tensor = images_to_tensor::<B>(&images, device);
        let predicted = model
            .predict(tensor)
            .into_data()
            .convert::<i64>()
            .to_vec::<i64>()
            .map_err(|e| PipelineError::Model(format!("推論結果の取得エラー: {:?}", e)))?;

        let offset = chunk_idx * batch_size;
        for (i, p) in predicted.into_iter().enumerate() {
            matrix.record(test_split.labels[offset + i], p as usize)?;
        }
    }

    info!("テスト正解率: {:.2}%", matrix.accuracy() * 100.0);
    Ok(matrix)
}
