mod cli;

use anyhow::{Context, Result};
use burn::tensor::backend::{AutodiffBackend, Backend};
use burn_autodiff::Autodiff;
use burn_ndarray::{NdArray, NdArrayDevice};
use clap::Parser;
use std::path::Path;
use tracing::{info, warn};

use cli::{Args, Command};
use tumor_mri_lib::cluster::{run_clustering, write_assignments_csv, write_cluster_views, write_elbow_csv};
use tumor_mri_lib::dataset::{enumerate_image_paths, load_data, load_split};
use tumor_mri_lib::features::{extract_all, FeatureTable, VggConfig, VggFeatureExtractor};
use tumor_mri_lib::ml::{evaluate, train_classifier, ConfusionMatrix, InferenceEngine};
use tumor_mri_lib::model::{print_metadata_info, save_model_with_metadata, DeviceType, PipelineConfig};

/// ヒートマップの1セルの大きさ（ピクセル）
const HEATMAP_CELL_SIZE: u32 = 64;

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    if let Command::InitConfig { force } = args.command {
        return init_config(&args.config, force);
    }

    let mut config = PipelineConfig::load_or_default(&args.config)?;
    if let Some(device) = args.device {
        config.device_type = device.into();
    }

    match config.device_type {
        #[cfg(feature = "wgpu")]
        DeviceType::Wgpu => {
            info!("計算デバイス: {}", config.device_type);
            run::<Autodiff<burn_wgpu::Wgpu>>(&args.command, &config, burn_wgpu::WgpuDevice::default())
        }
        #[cfg(not(feature = "wgpu"))]
        DeviceType::Wgpu => {
            warn!("wgpu 機能が無効のため CPU (NdArray) で実行します");
            run::<Autodiff<NdArray<f32>>>(&args.command, &config, NdArrayDevice::Cpu)
        }
        DeviceType::Cpu => {
            info!("計算デバイス: {}", config.device_type);
            run::<Autodiff<NdArray<f32>>>(&args.command, &config, NdArrayDevice::Cpu)
        }
    }
}

fn init_config(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        anyhow::bail!("設定ファイルが既に存在します: {} (--force で上書き)", path.display());
    }
    PipelineConfig::default().save(path)?;
    println!("デフォルト設定を書き出しました: {}", path.display());
    Ok(())
}

fn run<B: AutodiffBackend>(command: &Command, config: &PipelineConfig, device: B::Device) -> Result<()> {
    match command {
        Command::Train => train::<B>(config, device),
        Command::Evaluate => {
            let engine = InferenceEngine::<B::InnerBackend>::load(config.classifier_path(), device.clone())?;
            let metadata = engine.metadata();
            print_metadata_info(metadata);
            // ラベル番号はモデルの出力順に合わせる
            let vocabulary = metadata.vocabulary();
            if vocabulary.names() != config.dataset.class_names.names() {
                warn!(
                    "設定のクラス名 {:?} とモデルのクラス名 {:?} が異なります。モデル側を使います",
                    config.dataset.class_names.names(),
                    vocabulary.names()
                );
            }
            let test = load_split(&config.dataset.testing_dir, &vocabulary, metadata.image_size)?;
            let matrix = evaluate(
                engine.model(),
                &test,
                metadata.num_classes(),
                config.training.batch_size,
                &device,
            )?;
            write_confusion_reports(config, vocabulary.names(), &matrix)
        }
        Command::Predict { image } => {
            let engine = InferenceEngine::<B::InnerBackend>::load(config.classifier_path(), device)?;
            let prediction = engine.classify_image(image)?;
            println!("{}: {}", image.display(), prediction.class_name);
            for (name, p) in engine.metadata().class_names.iter().zip(&prediction.probabilities) {
                println!("  {:<12} {:.4}", name, p);
            }
            Ok(())
        }
        Command::Extract => {
            let table = extract_features::<B::InnerBackend>(config, device)?;
            info!("特徴量 {} 件を保存しました", table.len());
            Ok(())
        }
        Command::Cluster => cluster::<B::InnerBackend>(config, device),
        Command::ShowConfig => {
            config.display();
            Ok(())
        }
        Command::InitConfig { .. } => unreachable!("init-config is handled before loading the config"),
    }
}

fn train<B: AutodiffBackend>(config: &PipelineConfig, device: B::Device) -> Result<()> {
    let (train, test) = load_data(&config.dataset)?;
    let class_names = config.dataset.class_names.names();
    info!("学習用クラス別枚数: {:?}", train.class_counts(class_names.len()));

    let artifact_dir = config.output.model_dir.join("training");
    let mut trained = train_classifier::<B>(
        train,
        class_names,
        config.dataset.image_size as usize,
        &config.training,
        &artifact_dir,
        device.clone(),
    )?;

    let matrix = evaluate(
        &trained.model,
        &test,
        class_names.len(),
        config.training.batch_size,
        &device,
    )?;
    trained.metadata.test_accuracy = Some(matrix.accuracy());

    let model_path = config.classifier_path();
    save_model_with_metadata(&model_path, &trained.metadata, &trained.model_binary()?)?;
    info!("モデルを保存しました: {}", model_path.display());
    print_metadata_info(&trained.metadata);

    write_confusion_reports(config, class_names, &matrix)
}

fn write_confusion_reports(config: &PipelineConfig, class_names: &[String], matrix: &ConfusionMatrix) -> Result<()> {
    println!("{}", matrix.to_table(class_names));
    println!("テスト精度: {:.2}%", matrix.accuracy() * 100.0);

    let report_dir = &config.output.report_dir;
    std::fs::create_dir_all(report_dir)
        .with_context(|| format!("Failed to create report directory: {:?}", report_dir))?;
    matrix.write_csv(&report_dir.join("confusion_matrix.csv"), class_names)?;

    let heatmap_path = report_dir.join("confusion_matrix.png");
    matrix
        .render_heatmap(HEATMAP_CELL_SIZE)
        .save(&heatmap_path)
        .with_context(|| format!("Failed to save heatmap: {:?}", heatmap_path))?;
    info!("混同行列を保存しました: {}", report_dir.display());
    Ok(())
}

fn extract_features<B: Backend>(config: &PipelineConfig, device: B::Device) -> Result<FeatureTable> {
    let roots = [config.dataset.training_dir.as_path(), config.dataset.testing_dir.as_path()];
    let paths = enumerate_image_paths(&roots)?;
    info!("特徴抽出対象: {} 枚", paths.len());

    let vgg_config = VggConfig::new().with_input_size(config.features.input_size as usize);
    let extractor = VggFeatureExtractor::<B>::load(&config.features.weights_path, vgg_config, device)?;
    let table = extract_all(&extractor, &paths, config.features.log_every)?;

    let cache_path = config.feature_cache_path();
    table.save(&cache_path)?;
    info!("特徴量キャッシュ: {}", cache_path.display());
    Ok(table)
}

fn cluster<B: Backend>(config: &PipelineConfig, device: B::Device) -> Result<()> {
    let cache_path = config.feature_cache_path();
    let table = if cache_path.exists() {
        info!("特徴量キャッシュを読み込みます: {}", cache_path.display());
        FeatureTable::load(&cache_path)?
    } else {
        warn!("特徴量キャッシュがありません。抽出から実行します");
        extract_features::<B>(config, device)?
    };

    let report = run_clustering(&table, &config.clustering)?;
    let report_dir = &config.output.report_dir;
    write_elbow_csv(&report_dir.join("elbow.csv"), &report.elbow)?;
    write_assignments_csv(&report_dir.join("assignments.csv"), &report.paths, &report.fit.labels)?;

    for (cluster, members) in &report.groups {
        info!("クラスタ {:>3}: {} 枚", cluster, members.len());
    }
    let written = write_cluster_views(&report.groups, &config.clustering, report_dir)?;
    info!("クラスタ画像 {} 枚を出力しました: {}", written.len(), report_dir.display());
    Ok(())
}

