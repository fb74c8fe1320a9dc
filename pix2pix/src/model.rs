use anyhow::{Result, ensure};
use burn::{
    module::Module,
    nn::{
        BatchNorm, BatchNormConfig, PaddingConfig2d,
        conv::{Conv2d, Conv2dConfig, ConvTranspose2d, ConvTranspose2dConfig},
        pool::{MaxPool2d, MaxPool2dConfig},
    },
    tensor::{
        Tensor,
        activation::{leaky_relu, relu, tanh},
        backend::Backend,
    },
};

/// U-Net 编码器的下采样次数，输入边长必须能被 `2^4` 整除。
const UNET_DEPTH: u32 = 4;
/// PatchGAN 中 LeakyReLU 的负斜率。
const LEAKY_SLOPE: f64 = 0.2;

/// 两层 3x3 卷积（无偏置），每层后接 BatchNorm 与 ReLU。
///
/// 形状：`[N, in, H, W] -> [N, out, H, W]`。
#[derive(Module, Debug)]
pub struct DoubleConv<B: Backend> {
    conv1: Conv2d<B>,
    norm1: BatchNorm<B, 2>,
    conv2: Conv2d<B>,
    norm2: BatchNorm<B, 2>,
}

impl<B: Backend> DoubleConv<B> {
    pub fn new(device: &B::Device, in_channels: usize, out_channels: usize) -> Self {
        let conv = |channels: [usize; 2]| -> Conv2d<B> {
            Conv2dConfig::new(channels, [3, 3])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .with_bias(false)
                .init(device)
        };

        Self {
            conv1: conv([in_channels, out_channels]),
            norm1: BatchNormConfig::new(out_channels).init(device),
            conv2: conv([out_channels, out_channels]),
            norm2: BatchNormConfig::new(out_channels).init(device),
        }
    }

    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = relu(self.norm1.forward(self.conv1.forward(input)));
        relu(self.norm2.forward(self.conv2.forward(x)))
    }
}

/// Pix2Pix 生成器：四级编码/解码的 U-Net，跳连按通道拼接。
///
/// 以 `features = f`、输入 `3 x 128 x 512` 为例：
///
/// | 阶段        | 输出形状             |
/// |-------------|----------------------|
/// | encoder1    | `f x 128 x 512`      |
/// | encoder2    | `2f x 64 x 256`      |
/// | encoder3    | `4f x 32 x 128`      |
/// | encoder4    | `8f x 16 x 64`       |
/// | bottleneck  | `16f x 8 x 32`       |
/// | decoder4..1 | 逐级还原到 `f x 128 x 512` |
/// | final       | `out x 128 x 512`，经 `tanh` 落在 `[-1, 1]` |
#[derive(Module, Debug)]
pub struct UNetGenerator<B: Backend> {
    encoder1: DoubleConv<B>,
    encoder2: DoubleConv<B>,
    encoder3: DoubleConv<B>,
    encoder4: DoubleConv<B>,
    pool: MaxPool2d,
    bottleneck: DoubleConv<B>,
    upconv4: ConvTranspose2d<B>,
    decoder4: DoubleConv<B>,
    upconv3: ConvTranspose2d<B>,
    decoder3: DoubleConv<B>,
    upconv2: ConvTranspose2d<B>,
    decoder2: DoubleConv<B>,
    upconv1: ConvTranspose2d<B>,
    decoder1: DoubleConv<B>,
    final_conv: Conv2d<B>,
}

impl<B: Backend> UNetGenerator<B> {
    /// 创建生成器。
    ///
    /// # 参数
    /// - `device`: 设备（对 NdArray 后端即 CPU）。
    /// - `in_channels` / `out_channels`: 输入、输出通道数，RGB 均为 3。
    /// - `features`: 第一级特征通道数，此后每级翻倍。
    pub fn new(
        device: &B::Device,
        in_channels: usize,
        out_channels: usize,
        features: usize,
    ) -> Self {
        assert!(
            in_channels > 0 && out_channels > 0 && features > 0,
            "通道数必须为正：in={in_channels}，out={out_channels}，features={features}"
        );
        let f = features;
        let up = |from: usize, to: usize| -> ConvTranspose2d<B> {
            ConvTranspose2dConfig::new([from, to], [2, 2])
                .with_stride([2, 2])
                .init(device)
        };

        Self {
            encoder1: DoubleConv::new(device, in_channels, f),
            encoder2: DoubleConv::new(device, f, f * 2),
            encoder3: DoubleConv::new(device, f * 2, f * 4),
            encoder4: DoubleConv::new(device, f * 4, f * 8),
            pool: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
            bottleneck: DoubleConv::new(device, f * 8, f * 16),
            upconv4: up(f * 16, f * 8),
            decoder4: DoubleConv::new(device, f * 16, f * 8),
            upconv3: up(f * 8, f * 4),
            decoder3: DoubleConv::new(device, f * 8, f * 4),
            upconv2: up(f * 4, f * 2),
            decoder2: DoubleConv::new(device, f * 4, f * 2),
            upconv1: up(f * 2, f),
            decoder1: DoubleConv::new(device, f * 2, f),
            final_conv: Conv2dConfig::new([f, out_channels], [1, 1]).init(device),
        }
    }

    /// 检查输入尺寸能否完整经过四次 2 倍下采样。
    pub fn check_input(height: usize, width: usize) -> Result<()> {
        let step = 1usize << UNET_DEPTH;
        ensure!(
            height > 0 && width > 0 && height % step == 0 && width % step == 0,
            "U-Net 输入的高和宽必须是 {step} 的正整数倍，当前为 {height}x{width}"
        );
        Ok(())
    }

    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let enc1 = self.encoder1.forward(input);
        let enc2 = self.encoder2.forward(self.pool.forward(enc1.clone()));
        let enc3 = self.encoder3.forward(self.pool.forward(enc2.clone()));
        let enc4 = self.encoder4.forward(self.pool.forward(enc3.clone()));

        let x = self.bottleneck.forward(self.pool.forward(enc4.clone()));

        let x = self.decoder4.forward(skip(self.upconv4.forward(x), enc4));
        let x = self.decoder3.forward(skip(self.upconv3.forward(x), enc3));
        let x = self.decoder2.forward(skip(self.upconv2.forward(x), enc2));
        let x = self.decoder1.forward(skip(self.upconv1.forward(x), enc1));

        tanh(self.final_conv.forward(x))
    }
}

fn skip<B: Backend>(upsampled: Tensor<B, 4>, encoded: Tensor<B, 4>) -> Tensor<B, 4> {
    Tensor::cat(vec![upsampled, encoded], 1)
}

/// PatchGAN 判别器：对（输入，目标）图像对的局部块逐一打分。
///
/// 四层 `k=4, s=2, p=1` 卷积各将边长减半，最后一层 `k=4, s=1, p=1` 卷积输出单通道，
/// `128 x 512` 的输入得到 `7 x 31` 的分数图。
#[derive(Module, Debug)]
pub struct PatchGanDiscriminator<B: Backend> {
    conv1: Conv2d<B>,
    conv2: Conv2d<B>,
    norm2: BatchNorm<B, 2>,
    conv3: Conv2d<B>,
    norm3: BatchNorm<B, 2>,
    conv4: Conv2d<B>,
    norm4: BatchNorm<B, 2>,
    output: Conv2d<B>,
}

impl<B: Backend> PatchGanDiscriminator<B> {
    /// 创建判别器，`in_channels` 为单张图像的通道数（拼接后翻倍）。
    pub fn new(device: &B::Device, in_channels: usize, features: usize) -> Self {
        assert!(
            in_channels > 0 && features > 0,
            "通道数必须为正：in={in_channels}，features={features}"
        );
        let f = features;
        let down = |from: usize, to: usize| -> Conv2d<B> {
            Conv2dConfig::new([from, to], [4, 4])
                .with_stride([2, 2])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .init(device)
        };

        Self {
            conv1: down(in_channels * 2, f),
            conv2: down(f, f * 2),
            norm2: BatchNormConfig::new(f * 2).init(device),
            conv3: down(f * 2, f * 4),
            norm3: BatchNormConfig::new(f * 4).init(device),
            conv4: down(f * 4, f * 8),
            norm4: BatchNormConfig::new(f * 8).init(device),
            output: Conv2dConfig::new([f * 8, 1], [4, 4])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .init(device),
        }
    }

    /// 给定输入高宽时的分数图尺寸，输入过小时返回 `None`。
    pub fn output_size(height: usize, width: usize) -> Option<(usize, usize)> {
        Some((patch_extent(height)?, patch_extent(width)?))
    }

    /// `input` 与 `target` 形状须一致，沿通道维拼接后打分。
    pub fn forward(&self, input: Tensor<B, 4>, target: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = Tensor::cat(vec![input, target], 1);
        let x = leaky_relu(self.conv1.forward(x), LEAKY_SLOPE);
        let x = leaky_relu(self.norm2.forward(self.conv2.forward(x)), LEAKY_SLOPE);
        let x = leaky_relu(self.norm3.forward(self.conv3.forward(x)), LEAKY_SLOPE);
        let x = leaky_relu(self.norm4.forward(self.conv4.forward(x)), LEAKY_SLOPE);
        self.output.forward(x)
    }
}

/// 卷积输出边长 `(n + 2p - k) / s + 1`，要求 `n + 2p >= k`。
fn conv_extent(n: usize, kernel: usize, stride: usize, padding: usize) -> Option<usize> {
    let padded = n + 2 * padding;
    (padded >= kernel).then(|| (padded - kernel) / stride + 1)
}

fn patch_extent(n: usize) -> Option<usize> {
    let mut n = n;
    for _ in 0..4 {
        n = conv_extent(n, 4, 2, 1)?;
    }
    conv_extent(n, 4, 1, 1)
}
