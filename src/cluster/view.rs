//! クラスタごとのサンプル画像グリッド

use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::cluster::pipeline::ClusterGroups;
use crate::error::{PipelineError, Result};
use crate::model::ClusteringSettings;

/// 表示対象として選んだ画像と、切り詰めた場合の通知
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterSample {
    pub files: Vec<PathBuf>,
    pub notice: Option<String>,
}

/// クラスタの先頭から最大 `max` 枚を選ぶ
pub fn select_cluster_samples(files: &[PathBuf], max: usize) -> ClusterSample {
    if files.len() > max {
        let notice = format!("Clipping cluster size from {} to {}", files.len(), max);
        info!("{}", notice);
        ClusterSample {
            files: files[..max].to_vec(),
            notice: Some(notice),
        }
    } else {
        ClusterSample {
            files: files.to_vec(),
            notice: None,
        }
    }
}

/// サムネイルを `columns` 列に並べた1枚の画像を作る
pub fn render_cluster_grid(files: &[PathBuf], columns: u32, thumbnail_size: u32) -> Result<RgbImage> {
    let columns = columns.max(1);
    let count = files.len() as u32;
    let rows = count.div_ceil(columns).max(1);
    let width = columns.min(count.max(1)) * thumbnail_size;
    let mut canvas = RgbImage::from_pixel(width, rows * thumbnail_size, Rgb([255, 255, 255]));

    for (i, path) in files.iter().enumerate() {
        let img = image::open(path).map_err(|e| PipelineError::decode(path, e))?;
        let thumb = img
            .resize_exact(thumbnail_size, thumbnail_size, FilterType::Triangle)
            .to_rgb8();
        let i = i as u32;
        let x = (i % columns) * thumbnail_size;
        let y = (i / columns) * thumbnail_size;
        imageops::replace(&mut canvas, &thumb, x as i64, y as i64);
    }

    Ok(canvas)
}

/// 指定クラスタのグリッドを `cluster_{id}.png` として保存する
///
/// 存在しないクラスタIDは警告を出して飛ばす。保存したファイルの一覧を返す。
pub fn write_cluster_views(
    groups: &ClusterGroups,
    settings: &ClusteringSettings,
    report_dir: &Path,
) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(report_dir).map_err(|e| PipelineError::io(report_dir, e))?;

    let mut written = Vec::new();
    for &cluster in &settings.view_clusters {
        let Some(members) = groups.get(&cluster) else {
            warn!("クラスタ {} は存在しません（k = {}）", cluster, groups.len());
            continue;
        };
        let sample = select_cluster_samples(members, settings.max_view_images);
        let grid = render_cluster_grid(&sample.files, settings.grid_columns, settings.thumbnail_size)?;

        let path = report_dir.join(format!("cluster_{cluster}.png"));
        grid.save(&path).map_err(|e| PipelineError::encode(&path, e))?;
        info!("クラスタ {} ({} 枚) -> {}", cluster, sample.files.len(), path.display());
        written.push(path);
    }
    Ok(written)
}
