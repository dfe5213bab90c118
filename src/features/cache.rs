//! 画像パス -> 特徴ベクトル の対応表と、そのバイナリキャッシュ

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use crate::error::{PipelineError, Result};

/// パス順に並んだ特徴量テーブル
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureTable {
    entries: BTreeMap<PathBuf, Vec<f32>>,
}

impl FeatureTable {
    pub fn insert(&mut self, path: PathBuf, features: Vec<f32>) {
        self.entries.insert(path, features);
    }

    pub fn get(&self, path: &Path) -> Option<&Vec<f32>> {
        self.entries.get(path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn paths(&self) -> impl Iterator<Item = &PathBuf> {
        self.entries.keys()
    }

    /// 行 = 画像 の行列と、行に対応するパス列
    pub fn to_matrix(&self) -> Result<(Vec<PathBuf>, Array2<f64>)> {
        let dim = self.entries.values().next().map(Vec::len).unwrap_or(0);
        let mut paths = Vec::with_capacity(self.len());
        let mut flat = Vec::with_capacity(self.len() * dim);

        for (path, features) in &self.entries {
            if features.len() != dim {
                return Err(PipelineError::Model(format!(
                    "特徴量の次元が揃っていません: {} ({} != {})",
                    path.display(),
                    features.len(),
                    dim
                )));
            }
            paths.push(path.clone());
            flat.extend(features.iter().map(|&v| v as f64));
        }

        let matrix = Array2::from_shape_vec((paths.len(), dim), flat)
            .map_err(|e| PipelineError::Model(format!("行列の作成に失敗しました: {e}")))?;
        Ok((paths, matrix))
    }

    /// bincode で保存
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| PipelineError::io(parent, e))?;
            }
        }
        let file = File::create(path).map_err(|e| PipelineError::io(path, e))?;
        bincode::serialize_into(BufWriter::new(file), self)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| PipelineError::io(path, e))?;
        Ok(bincode::deserialize_from(BufReader::new(file))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_matrix_rows_follow_path_order() {
        let mut table = FeatureTable::default();
        table.insert(PathBuf::from("b.png"), vec![3.0, 4.0]);
        table.insert(PathBuf::from("a.png"), vec![1.0, 2.0]);

        let (paths, matrix) = table.to_matrix().unwrap();
        assert_eq!(paths, vec![PathBuf::from("a.png"), PathBuf::from("b.png")]);
        assert_eq!(matrix.shape(), &[2, 2]);
        assert_eq!(matrix[[0, 1]], 2.0);
        assert_eq!(matrix[[1, 0]], 3.0);
    }

    #[test]
    fn test_ragged_rows_fail() {
        let mut table = FeatureTable::default();
        table.insert(PathBuf::from("a.png"), vec![1.0, 2.0]);
        table.insert(PathBuf::from("b.png"), vec![1.0]);
        assert!(table.to_matrix().is_err());
    }

    #[test]
    fn test_save_and_load() {
        let dir = std::env::temp_dir().join(format!("tumor_mri_cache_{}", std::process::id()));
        let path = dir.join("features.bin");

        let mut table = FeatureTable::default();
        table.insert(PathBuf::from("x/1.jpg"), vec![0.5; 8]);
        table.insert(PathBuf::from("x/2.jpg"), vec![1.5; 8]);
        table.save(&path).unwrap();

        let loaded = FeatureTable::load(&path).unwrap();
        assert_eq!(loaded, table);

        std::fs::remove_dir_all(&dir).ok();
    }
}
