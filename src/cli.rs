//! コマンドライン引数

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use tumor_mri_lib::model::{DeviceType, PipelineConfig};

/// 脳腫瘍MRI画像の分類と特徴量クラスタリング
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// 設定ファイル（無ければデフォルト設定）
    #[arg(long, global = true, value_name = "FILE", default_value_os_t = PipelineConfig::default_path())]
    pub config: PathBuf,

    /// 設定ファイルの計算デバイスを上書き
    #[arg(long, global = true, value_enum, value_name = "DEVICE")]
    pub device: Option<DeviceArg>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// 分類器を学習し、テストデータで評価して保存
    Train,
    /// 保存済み分類器をテストデータで評価
    Evaluate,
    /// 画像1枚を分類
    Predict {
        /// 入力画像
        #[arg(value_name = "IMAGE")]
        image: PathBuf,
    },
    /// 全画像の特徴量を抽出してキャッシュに保存
    Extract,
    /// 特徴量をクラスタリングしてレポートを出力
    Cluster,
    /// 現在の設定を表示
    ShowConfig,
    /// デフォルト設定をファイルに書き出す
    InitConfig {
        /// 既存ファイルを上書きする
        #[arg(long)]
        force: bool,
    },
}

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum DeviceArg {
    Wgpu,
    Cpu,
}

impl From<DeviceArg> for DeviceType {
    fn from(arg: DeviceArg) -> Self {
        match arg {
            DeviceArg::Wgpu => DeviceType::Wgpu,
            DeviceArg::Cpu => DeviceType::Cpu,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_predict_with_globals() {
        let args = Args::try_parse_from(["tumor_mri", "predict", "scan.jpg", "--device", "cpu", "--config", "c.json"])
            .unwrap();
        assert_eq!(args.config, PathBuf::from("c.json"));
        assert!(matches!(args.device, Some(DeviceArg::Cpu)));
        match args.command {
            Command::Predict { image } => assert_eq!(image, PathBuf::from("scan.jpg")),
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_default_config_path() {
        let args = Args::try_parse_from(["tumor_mri", "cluster"]).unwrap();
        assert_eq!(args.config, PathBuf::from("config.json"));
        assert!(args.device.is_none());
        assert!(matches!(args.command, Command::Cluster));
    }

    #[test]
    fn test_subcommand_names() {
        assert!(Args::try_parse_from(["tumor_mri", "show-config"]).is_ok());
        assert!(Args::try_parse_from(["tumor_mri", "init-config", "--force"]).is_ok());
        assert!(Args::try_parse_from(["tumor_mri", "predict"]).is_err());
    }
}
