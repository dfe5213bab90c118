//! 特徴抽出用 VGG16（最終分類層なし）
//!
//! 5ブロックの Conv 3x3 (same padding) + ReLU と MaxPool 2x2 の後、
//! fc1 / fc2 (+ReLU) を通した 4096 次元の出力をそのまま特徴ベクトルとして返します。

use burn::{
    config::Config,
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{MaxPool2d, MaxPool2dConfig},
        Linear, LinearConfig, PaddingConfig2d, Relu,
    },
    tensor::{backend::Backend, Tensor},
};

use crate::error::PipelineError;

/// VGG 構成
///
/// 既定値は VGG16 (224x224 入力、4096 次元出力)。
#[derive(Config, Debug)]
pub struct VggConfig {
    /// 各ブロックの出力チャネル数
    #[config(default = "vec![64, 128, 256, 512, 512]")]
    pub block_channels: Vec<usize>,
    /// 各ブロックの畳み込み層数
    #[config(default = "vec![2, 2, 3, 3, 3]")]
    pub block_depths: Vec<usize>,
    /// 全結合層の次元（= 特徴ベクトル長）
    #[config(default = 4096)]
    pub hidden_size: usize,
    /// 入力画像サイズ（正方形）
    #[config(default = 224)]
    pub input_size: usize,
}

impl VggConfig {
    /// 畳み込み部の出力マップの一辺
    pub fn feature_map_size(&self) -> usize {
        self.input_size >> self.block_channels.len()
    }

    /// ブロック数ぶん半分にしても1ピクセル以上残る最小の入力サイズ
    pub fn min_input_size(&self) -> usize {
        1 << self.block_channels.len()
    }

    /// 構成が初期化可能か確認する
    pub fn check(&self) -> crate::error::Result<()> {
        if self.block_channels.len() != self.block_depths.len() {
            return Err(PipelineError::Model(format!(
                "block_channels ({}) と block_depths ({}) の長さが一致しません",
                self.block_channels.len(),
                self.block_depths.len()
            )));
        }
        if self.input_size < self.min_input_size() {
            return Err(PipelineError::Model(format!(
                "入力サイズが小さすぎます: {} (最小{}x{}が必要)",
                self.input_size,
                self.min_input_size(),
                self.min_input_size()
            )));
        }
        Ok(())
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> Vgg<B> {
        assert_eq!(
            self.block_channels.len(),
            self.block_depths.len(),
            "block_channels と block_depths の長さが一致しません"
        );
        let map_size = self.feature_map_size();
        assert!(map_size > 0, "入力サイズが小さすぎます: {}", self.input_size);

        let mut blocks = Vec::with_capacity(self.block_channels.len());
        let mut in_channels = 3;
        for (&channels, &depth) in self.block_channels.iter().zip(&self.block_depths) {
            let mut convs = Vec::with_capacity(depth);
            for _ in 0..depth {
                convs.push(
                    Conv2dConfig::new([in_channels, channels], [3, 3])
                        .with_padding(PaddingConfig2d::Same)
                        .init(device),
                );
                in_channels = channels;
            }
            blocks.push(VggBlock {
                convs,
                pool: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
            });
        }

        let flattened = in_channels * map_size * map_size;
        Vgg {
            blocks,
            fc1: LinearConfig::new(flattened, self.hidden_size).init(device),
            fc2: LinearConfig::new(self.hidden_size, self.hidden_size).init(device),
            activation: Relu::new(),
        }
    }
}

#[derive(Module, Debug)]
pub struct VggBlock<B: Backend> {
    convs: Vec<Conv2d<B>>,
    pool: MaxPool2d,
}

#[derive(Module, Debug)]
pub struct Vgg<B: Backend> {
    blocks: Vec<VggBlock<B>>,
    fc1: Linear<B>,
    fc2: Linear<B>,
    activation: Relu,
}

impl<B: Backend> Vgg<B> {
    /// [batch, 3, size, size] -> [batch, hidden_size]（fc2 の ReLU 後）
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let [batch_size, _, _, _] = images.dims();

        let mut x = images;
        for block in &self.blocks {
            for conv in &block.convs {
                x = self.activation.forward(conv.forward(x));
            }
            x = block.pool.forward(x);
        }

        let [_, c, h, w] = x.dims();
        let x = x.reshape([batch_size, c * h * w]);

        let x = self.activation.forward(self.fc1.forward(x));
        self.activation.forward(self.fc2.forward(x))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_default_is_vgg16() {
        let config = VggConfig::new();
        assert_eq!(config.block_depths.iter().sum::<usize>(), 13);
        assert_eq!(config.feature_map_size(), 7);
        assert_eq!(config.hidden_size, 4096);
    }

    #[test]
    fn test_check_rejects_small_input() {
        assert_eq!(VggConfig::new().min_input_size(), 32);
        assert!(VggConfig::new().with_input_size(32).check().is_ok());
        assert!(matches!(
            VggConfig::new().with_input_size(16).check(),
            Err(PipelineError::Model(_))
        ));
        assert!(VggConfig::new().with_block_depths(vec![2, 2]).check().is_err());
    }

    #[test]
    fn test_small_variant_output_shape() {
        let device = Default::default();
        let config = VggConfig::new()
            .with_block_channels(vec![4, 8])
            .with_block_depths(vec![1, 2])
            .with_hidden_size(16)
            .with_input_size(32);
        let model = config.init::<TestBackend>(&device);

        let output = model.forward(Tensor::<TestBackend, 4>::ones([2, 3, 32, 32], &device));
        assert_eq!(output.dims(), [2, 16]);

        let values = output.into_data().convert::<f32>().to_vec::<f32>().unwrap();
        assert!(values.iter().all(|v| *v >= 0.0));
    }
}
