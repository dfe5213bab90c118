//! 特徴量 -> PCA -> k-means の一連の処理とレポート出力

use ndarray::Array2;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::cluster::kmeans::{inertia_sweep, KMeans, KMeansFit};
use crate::cluster::pca::Pca;
use crate::error::{PipelineError, Result};
use crate::features::FeatureTable;
use crate::model::ClusteringSettings;

/// クラスタID -> 所属画像パス
pub type ClusterGroups = BTreeMap<usize, Vec<PathBuf>>;

/// クラスタリング結果一式
#[derive(Debug, Clone)]
pub struct ClusteringReport {
    /// 行順の画像パス（ラベルと同じ並び）
    pub paths: Vec<PathBuf>,
    /// (k, inertia)
    pub elbow: Vec<(usize, f64)>,
    pub fit: KMeansFit,
    pub groups: ClusterGroups,
}

impl ClusteringReport {
    pub fn n_clusters(&self) -> usize {
        self.fit.n_clusters()
    }
}

#[derive(Serialize)]
struct ElbowRow {
    k: usize,
    inertia: f64,
}

#[derive(Serialize)]
struct AssignmentRow<'a> {
    path: &'a str,
    cluster: usize,
}

/// 最終クラスタ数（画像枚数を割るだけの目安）
pub fn heuristic_cluster_count(corpus_size: usize, images_per_cluster: usize) -> usize {
    corpus_size / images_per_cluster.max(1)
}

/// ラベル列からクラスタごとのパス一覧を作る
pub fn group_by_cluster(paths: &[PathBuf], labels: &[usize]) -> ClusterGroups {
    let mut groups = ClusterGroups::new();
    for (path, &label) in paths.iter().zip(labels) {
        groups.entry(label).or_default().push(path.clone());
    }
    groups
}

/// PCAで次元削減したあと、エルボー曲線用のスイープと最終クラスタリングを行う
pub fn run_clustering(table: &FeatureTable, settings: &ClusteringSettings) -> Result<ClusteringReport> {
    let (paths, matrix) = table.to_matrix()?;
    info!("クラスタリング対象: {} 枚 x {} 次元", matrix.nrows(), matrix.ncols());

    let pca = Pca::fit(&matrix, settings.n_components, settings.seed)?;
    let reduced: Array2<f64> = pca.transform(&matrix);
    info!("PCA 完了: {} 次元", reduced.ncols());

    let k = heuristic_cluster_count(paths.len(), settings.images_per_cluster);
    let base = KMeans::new(k)
        .with_max_iter(settings.max_iter)
        .with_tol(settings.tolerance)
        .with_seed(settings.seed);

    let elbow = inertia_sweep(&reduced, 2..k, &base)?;
    if !elbow.is_empty() {
        warn!(
            "最終クラスタ数 k={} は画像枚数/{} で決めており、エルボー曲線とは照合していません",
            k, settings.images_per_cluster
        );
    }

    let fit = base.fit(&reduced)?;
    info!("k-means 完了: k={}, inertia={:.4}, 反復 {}", k, fit.inertia, fit.n_iter);

    let groups = group_by_cluster(&paths, &fit.labels);
    Ok(ClusteringReport {
        paths,
        elbow,
        fit,
        groups,
    })
}

fn create_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| PipelineError::io(parent, e))?;
        }
    }
    Ok(())
}

/// エルボー曲線を CSV (k, inertia) で保存
pub fn write_elbow_csv(path: &Path, elbow: &[(usize, f64)]) -> Result<()> {
    create_parent(path)?;
    let mut writer = csv::Writer::from_path(path)?;
    for &(k, inertia) in elbow {
        writer.serialize(ElbowRow { k, inertia })?;
    }
    writer.flush().map_err(|e| PipelineError::io(path, e))?;
    Ok(())
}

/// 画像ごとの割り当てを CSV (path, cluster) で保存
pub fn write_assignments_csv(path: &Path, paths: &[PathBuf], labels: &[usize]) -> Result<()> {
    create_parent(path)?;
    let mut writer = csv::Writer::from_path(path)?;
    for (image_path, &cluster) in paths.iter().zip(labels) {
        let display = image_path.to_string_lossy();
        writer.serialize(AssignmentRow {
            path: &display,
            cluster,
        })?;
    }
    writer.flush().map_err(|e| PipelineError::io(path, e))?;
    Ok(())
}
