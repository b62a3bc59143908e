//! FCN-8 decoder: upsample fc7 back to input resolution through pool4/pool3 skips.

use crate::vgg::{VggBackbone, VggConfig, VggTaps};
use crate::{ModelError, ModelResult};
use burn::config::Config;
use burn::module::Module;
use burn::nn::conv::{Conv2d, Conv2dConfig, ConvTranspose2d, ConvTranspose2dConfig};
use burn::tensor::activation::relu;
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

/// Transposed convolution whose output is exactly `input * stride` ("same" padding).
fn same_transpose<B: Backend>(
    channels: [usize; 2],
    kernel: usize,
    stride: usize,
    device: &B::Device,
) -> ConvTranspose2d<B> {
    let pad = (kernel - stride) / 2;
    ConvTranspose2dConfig::new(channels, [kernel, kernel])
        .with_stride([stride, stride])
        .with_padding([pad, pad])
        .init(device)
}

#[derive(Config, Debug)]
pub struct FcnDecoderConfig {
    pub layer3_channels: usize,
    pub layer4_channels: usize,
    pub layer7_channels: usize,
    pub num_classes: usize,
    /// Clamp the final logits at zero like the hidden decoder layers.
    #[config(default = false)]
    pub relu_on_logits: bool,
}

impl FcnDecoderConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> FcnDecoder<B> {
        FcnDecoder {
            layer_1_1: Conv2dConfig::new([self.layer7_channels, self.layer7_channels], [1, 1])
                .init(device),
            deconv_layer_1: same_transpose(
                [self.layer7_channels, self.layer4_channels],
                4,
                2,
                device,
            ),
            deconv_layer_2: same_transpose(
                [self.layer4_channels, self.layer3_channels],
                4,
                2,
                device,
            ),
            deconv_layer_3: same_transpose([self.layer3_channels, self.num_classes], 16, 8, device),
            relu_on_logits: self.relu_on_logits,
        }
    }
}

#[derive(Module, Debug)]
pub struct FcnDecoder<B: Backend> {
    layer_1_1: Conv2d<B>,
    deconv_layer_1: ConvTranspose2d<B>,
    deconv_layer_2: ConvTranspose2d<B>,
    deconv_layer_3: ConvTranspose2d<B>,
    relu_on_logits: bool,
}

impl<B: Backend> FcnDecoder<B> {
    /// Returns logits `[N, num_classes, 8 * H3, 8 * W3]`.
    pub fn forward(&self, taps: VggTaps<B>) -> Tensor<B, 4> {
        let layer_1_1 = relu(self.layer_1_1.forward(taps.layer7_out));

        let deconv_layer_1 = relu(self.deconv_layer_1.forward(layer_1_1));
        let skip_1 = deconv_layer_1.add(taps.layer4_out);

        let deconv_layer_2 = relu(self.deconv_layer_2.forward(skip_1));
        let skip_2 = deconv_layer_2.add(taps.layer3_out);

        let logits = self.deconv_layer_3.forward(skip_2);
        if self.relu_on_logits {
            relu(logits)
        } else {
            logits
        }
    }
}

#[derive(Config, Debug)]
pub struct Fcn8Config {
    #[config(default = 2)]
    pub num_classes: usize,
    #[config(default = "VggConfig::new()")]
    pub vgg: VggConfig,
    #[config(default = false)]
    pub relu_on_logits: bool,
}

impl Fcn8Config {
    pub fn validate(&self) -> ModelResult<()> {
        self.vgg.validate()?;
        if self.num_classes < 2 {
            return Err(ModelError::Config(format!(
                "need at least two classes, got {}",
                self.num_classes
            )));
        }
        Ok(())
    }

    /// Model with a randomly initialised backbone.
    pub fn init<B: Backend>(&self, device: &B::Device) -> Fcn8<B> {
        self.init_with_backbone(self.vgg.init(device), device)
    }

    /// Attach a fresh decoder to an existing (usually pretrained) backbone.
    pub fn init_with_backbone<B: Backend>(
        &self,
        backbone: VggBackbone<B>,
        device: &B::Device,
    ) -> Fcn8<B> {
        let (layer3_channels, layer4_channels, layer7_channels) = backbone.tap_channels();
        let decoder = FcnDecoderConfig::new(
            layer3_channels,
            layer4_channels,
            layer7_channels,
            self.num_classes,
        )
        .with_relu_on_logits(self.relu_on_logits)
        .init(device);
        Fcn8 {
            backbone,
            decoder,
            num_classes: self.num_classes,
        }
    }
}

#[derive(Module, Debug)]
pub struct Fcn8<B: Backend> {
    backbone: VggBackbone<B>,
    decoder: FcnDecoder<B>,
    num_classes: usize,
}

impl<B: Backend> Fcn8<B> {
    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    pub fn backbone(&self) -> &VggBackbone<B> {
        &self.backbone
    }

    pub fn forward_taps(&self, images: Tensor<B, 4>) -> VggTaps<B> {
        self.backbone.forward_taps(images)
    }

    /// `[N, 3, H, W]` in [0, 1] to logits `[N, num_classes, H, W]`.
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 4> {
        self.decoder.forward(self.backbone.forward_taps(images))
    }
}
