//! モデルとメタデータの永続化
//!
//! Tar.gz形式でモデルとメタデータを1ファイルに統合して保存・読み込みします。
//!
//! ファイル構成（tar.gz内部）:
//! - metadata.json   - メタデータ（クラス名、入力サイズなど）
//! - model.bin       - モデルの重み（バイナリ）

use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tar::{Archive, Builder};

use crate::model::model_metadata::ModelMetadata;

const METADATA_ENTRY: &str = "metadata.json";
const MODEL_ENTRY: &str = "model.bin";

fn append_entry<W: std::io::Write>(builder: &mut Builder<W>, name: &str, bytes: &[u8]) -> Result<()> {
    let mut header = tar::Header::new_gnu();
    header.set_path(name)?;
    header.set_size(bytes.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder
        .append(&header, bytes)
        .with_context(|| format!("Failed to add {} to tar", name))
}

/// メタデータと共にモデルをTar.gz形式で保存
///
/// 親ディレクトリ（モデル出力ディレクトリ）が無ければ作成する。
pub fn save_model_with_metadata(
    output_path: &Path,
    metadata: &ModelMetadata,
    model_binary: &[u8],
) -> Result<()> {
    if let Some(parent) = output_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create model directory: {:?}", parent))?;
        }
    }

    let tar_gz_file = File::create(output_path)
        .with_context(|| format!("Failed to create tar.gz file: {:?}", output_path))?;

    let encoder = GzEncoder::new(tar_gz_file, Compression::default());
    let mut tar_builder = Builder::new(encoder);

    let json_str = metadata.to_json_string()?;
    append_entry(&mut tar_builder, METADATA_ENTRY, json_str.as_bytes())?;
    append_entry(&mut tar_builder, MODEL_ENTRY, model_binary)?;

    tar_builder
        .into_inner()
        .context("Failed to finalize tar archive")?
        .finish()
        .context("Failed to finalize gzip stream")?;

    Ok(())
}

/// 指定した名前のエントリだけを読み出す（全て揃った時点で打ち切る）
fn read_entries(tar_gz_path: &Path, wanted: &[&str]) -> Result<BTreeMap<String, Vec<u8>>> {
    let file = File::open(tar_gz_path)
        .with_context(|| format!("Failed to open classifier archive: {:?}", tar_gz_path))?;
    let mut archive = Archive::new(GzDecoder::new(file));

    let mut found = BTreeMap::new();
    for entry in archive.entries().context("Failed to list archive entries")? {
        let mut entry = entry?;
        let name = entry.path()?.to_string_lossy().into_owned();
        if !wanted.contains(&name.as_str()) {
            continue;
        }
        let mut bytes = Vec::new();
        entry
            .read_to_end(&mut bytes)
            .with_context(|| format!("Failed to read {} from archive", name))?;
        found.insert(name, bytes);
        if found.len() == wanted.len() {
            break;
        }
    }
    Ok(found)
}

fn take_entry(entries: &mut BTreeMap<String, Vec<u8>>, name: &str) -> Result<Vec<u8>> {
    entries
        .remove(name)
        .with_context(|| format!("{} not found in classifier archive", name))
}

fn parse_metadata(bytes: &[u8]) -> Result<ModelMetadata> {
    let json = std::str::from_utf8(bytes).context("metadata.json is not valid UTF-8")?;
    ModelMetadata::from_json_string(json)
}

/// 分類器アーカイブからメタデータだけを読む
pub fn load_metadata(tar_gz_path: &Path) -> Result<ModelMetadata> {
    let mut entries = read_entries(tar_gz_path, &[METADATA_ENTRY])?;
    parse_metadata(&take_entry(&mut entries, METADATA_ENTRY)?)
}

/// メタデータと重みを読む
pub fn load_model_with_metadata(tar_gz_path: &Path) -> Result<(ModelMetadata, Vec<u8>)> {
    let mut entries = read_entries(tar_gz_path, &[METADATA_ENTRY, MODEL_ENTRY])?;
    let metadata = parse_metadata(&take_entry(&mut entries, METADATA_ENTRY)?)?;
    let weights = take_entry(&mut entries, MODEL_ENTRY)?;
    Ok((metadata, weights))
}

/// メタデータをコンソールに表示
pub fn print_metadata_info(metadata: &ModelMetadata) {
    println!("\n=== モデルメタデータ ===");
    println!("クラス: {}", metadata.class_names.join(", "));
    println!("入力サイズ: {}x{}", metadata.image_size, metadata.image_size);
    println!("学習エポック数: {}", metadata.num_epochs);
    println!("バッチサイズ: {}", metadata.batch_size);
    println!("学習枚数: {}", metadata.train_samples);
    if let Some(accuracy) = metadata.test_accuracy {
        println!("テスト正解率: {:.2}%", accuracy * 100.0);
    }
    println!("学習日時: {}", metadata.trained_at);
    println!("========================");
}
