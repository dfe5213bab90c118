//! MRI画像データセットの読み込み
//!
//! ルートディレクトリ直下のクラス名ディレクトリを走査し、RGBに変換・リサイズした画像を
//! ラベルと共にメモリ上へ読み込みます。コーパスは静的で信頼できる前提のため、
//! 読めないファイルや未知のクラス名があった時点で処理全体を失敗させます。

use image::imageops::FilterType;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::{PipelineError, Result};
use crate::model::DatasetSettings;
use crate::types::{ClassVocabulary, ImageRecord, LabeledSplit};

/// ディレクトリ内のエントリをソート済みで返す
fn sorted_entries(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(PipelineError::MissingDirectory(dir.to_path_buf()));
    }
    let mut entries = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(|e| PipelineError::io(dir, e))? {
        let entry = entry.map_err(|e| PipelineError::io(dir, e))?;
        entries.push(entry.path());
    }
    entries.sort();
    Ok(entries)
}

/// 画像を読み込み、RGBに変換して正方形にリサイズする
pub fn load_image(path: &Path, image_size: u32, filter: FilterType) -> Result<ImageRecord> {
    let img = image::open(path).map_err(|e| PipelineError::decode(path, e))?;
    let img = img.resize_exact(image_size, image_size, filter).to_rgb8();
    Ok(ImageRecord {
        path: path.to_path_buf(),
        image: img,
        label: None,
    })
}

/// 1つの分割（Training または Testing）を読み込む
pub fn load_split(root: &Path, vocabulary: &ClassVocabulary, image_size: u32) -> Result<LabeledSplit> {
    info!("データセットを読み込み中: {}", root.display());

    let mut split = LabeledSplit::default();
    for class_dir in sorted_entries(root)? {
        if !class_dir.is_dir() {
            continue;
        }
        let name = class_dir
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();
        let label = vocabulary.label_of(&name).ok_or_else(|| PipelineError::UnknownClass {
            root: root.to_path_buf(),
            name: name.clone(),
        })?;

        let files = sorted_entries(&class_dir)?;
        let before = split.len();
        for file in files.iter().filter(|p| p.is_file()) {
            let mut record = load_image(file, image_size, FilterType::Triangle)?;
            record.label = Some(label);
            split.push(record, label);
        }
        debug!("  クラス '{}' (ラベル {}): {} 枚", name, label, split.len() - before);
    }

    if split.is_empty() {
        return Err(PipelineError::EmptyCorpus(root.to_path_buf()));
    }

    info!("{} 枚読み込みました: {}", split.len(), root.display());
    Ok(split)
}

/// 学習用とテスト用の両方を読み込む
pub fn load_data(settings: &DatasetSettings) -> Result<(LabeledSplit, LabeledSplit)> {
    let train = load_split(&settings.training_dir, &settings.class_names, settings.image_size)?;
    let test = load_split(&settings.testing_dir, &settings.class_names, settings.image_size)?;
    Ok((train, test))
}

/// 各ルート配下の全クラスディレクトリ内のファイルパスを列挙する（ラベルは見ない）
pub fn enumerate_image_paths(roots: &[&Path]) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    for root in roots {
        for class_dir in sorted_entries(root)? {
            if !class_dir.is_dir() {
                continue;
            }
            paths.extend(sorted_entries(&class_dir)?.into_iter().filter(|p| p.is_file()));
        }
    }
    if paths.is_empty() {
        let root = roots.first().map(|p| p.to_path_buf()).unwrap_or_default();
        return Err(PipelineError::EmptyCorpus(root));
    }
    Ok(paths)
}
