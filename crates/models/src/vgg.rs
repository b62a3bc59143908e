//! VGG16 encoder with named feature-map taps and pretrained-weight loading.

use crate::{ModelError, ModelResult};
use burn::config::Config;
use burn::module::{Module, Param};
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::pool::{MaxPool2d, MaxPool2dConfig};
use burn::nn::{Dropout, DropoutConfig, PaddingConfig2d};
use burn::record::{BinFileRecorder, FullPrecisionSettings, Recorder};
use burn::tensor::activation::relu;
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use burn_import::pytorch::{LoadArgs, PyTorchFileRecorder};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

pub const VGG_TAG: &str = "vgg16";
pub const IMAGE_INPUT: &str = "image_input";
pub const KEEP_PROB: &str = "keep_prob";
pub const LAYER3_OUT: &str = "layer3_out";
pub const LAYER4_OUT: &str = "layer4_out";
pub const LAYER7_OUT: &str = "layer7_out";

const BURN_WEIGHTS_FILE: &str = "vgg16.bin";
const TORCH_WEIGHTS_FILES: [&str; 2] = ["vgg16.pt", "vgg16.pth"];

const IMAGENET_MEAN: [[f32; 1]; 3] = [[0.485], [0.456], [0.406]];
const IMAGENET_STD: [[f32; 1]; 3] = [[0.229], [0.224], [0.225]];

/// torchvision `vgg16().features` indices -> `VggLayers` fields.
const TORCHVISION_KEY_REMAPS: &[(&str, &str)] = &[
    ("^features\\.0\\.(.*)", "conv1_1.$1"),
    ("^features\\.2\\.(.*)", "conv1_2.$1"),
    ("^features\\.5\\.(.*)", "conv2_1.$1"),
    ("^features\\.7\\.(.*)", "conv2_2.$1"),
    ("^features\\.10\\.(.*)", "conv3_1.$1"),
    ("^features\\.12\\.(.*)", "conv3_2.$1"),
    ("^features\\.14\\.(.*)", "conv3_3.$1"),
    ("^features\\.17\\.(.*)", "conv4_1.$1"),
    ("^features\\.19\\.(.*)", "conv4_2.$1"),
    ("^features\\.21\\.(.*)", "conv4_3.$1"),
    ("^features\\.24\\.(.*)", "conv5_1.$1"),
    ("^features\\.26\\.(.*)", "conv5_2.$1"),
    ("^features\\.28\\.(.*)", "conv5_3.$1"),
];

/// The first two classifier linears of a stock torchvision state dict.
const TORCHVISION_CLASSIFIER_REMAPS: &[(&str, &str)] = &[
    ("^classifier\\.0\\.(.*)", "fc6.$1"),
    ("^classifier\\.3\\.(.*)", "fc7.$1"),
];

#[derive(Config, Debug)]
pub struct VggConfig {
    /// Output channels of conv blocks 1-5.
    #[config(default = "[64, 128, 256, 512, 512]")]
    pub channels: [usize; 5],
    /// Channels of fc6/fc7 recast as convolutions.
    #[config(default = 4096)]
    pub fc_channels: usize,
    /// Kernel of fc6; must be odd for same padding.
    #[config(default = 7)]
    pub fc6_kernel: usize,
    /// Dropout keep probability after fc6 and fc7. Only active while training.
    #[config(default = 0.5)]
    pub keep_prob: f64,
    /// Apply ImageNet mean/std to inputs in [0, 1].
    #[config(default = true)]
    pub normalize_input: bool,
}

impl VggConfig {
    pub fn validate(&self) -> ModelResult<()> {
        if self.channels.iter().any(|c| *c == 0) || self.fc_channels == 0 {
            return Err(ModelError::Config("channel counts must be non-zero".into()));
        }
        if self.fc6_kernel % 2 == 0 {
            return Err(ModelError::Config(format!(
                "fc6 kernel {} must be odd",
                self.fc6_kernel
            )));
        }
        if !(self.keep_prob > 0.0 && self.keep_prob <= 1.0) {
            return Err(ModelError::Config(format!(
                "keep_prob {} must be in (0, 1]",
                self.keep_prob
            )));
        }
        Ok(())
    }

    /// `(name, [out, in, k, k])` for every convolution, in forward order.
    pub fn expected_shapes(&self) -> Vec<(&'static str, [usize; 4])> {
        let [c1, c2, c3, c4, c5] = self.channels;
        let fc = self.fc_channels;
        let k = self.fc6_kernel;
        vec![
            ("conv1_1", [c1, 3, 3, 3]),
            ("conv1_2", [c1, c1, 3, 3]),
            ("conv2_1", [c2, c1, 3, 3]),
            ("conv2_2", [c2, c2, 3, 3]),
            ("conv3_1", [c3, c2, 3, 3]),
            ("conv3_2", [c3, c3, 3, 3]),
            ("conv3_3", [c3, c3, 3, 3]),
            ("conv4_1", [c4, c3, 3, 3]),
            ("conv4_2", [c4, c4, 3, 3]),
            ("conv4_3", [c4, c4, 3, 3]),
            ("conv5_1", [c5, c4, 3, 3]),
            ("conv5_2", [c5, c5, 3, 3]),
            ("conv5_3", [c5, c5, 3, 3]),
            ("fc6", [fc, c5, k, k]),
            ("fc7", [fc, fc, 1, 1]),
        ]
    }

    pub fn init_layers<B: Backend>(&self, device: &B::Device) -> VggLayers<B> {
        let conv = |in_ch: usize, out_ch: usize, k: usize| {
            Conv2dConfig::new([in_ch, out_ch], [k, k])
                .with_padding(PaddingConfig2d::Same)
                .with_bias(true)
                .init(device)
        };
        let [c1, c2, c3, c4, c5] = self.channels;
        let fc = self.fc_channels;
        VggLayers {
            conv1_1: conv(3, c1, 3),
            conv1_2: conv(c1, c1, 3),
            conv2_1: conv(c1, c2, 3),
            conv2_2: conv(c2, c2, 3),
            conv3_1: conv(c2, c3, 3),
            conv3_2: conv(c3, c3, 3),
            conv3_3: conv(c3, c3, 3),
            conv4_1: conv(c3, c4, 3),
            conv4_2: conv(c4, c4, 3),
            conv4_3: conv(c4, c4, 3),
            conv5_1: conv(c4, c5, 3),
            conv5_2: conv(c5, c5, 3),
            conv5_3: conv(c5, c5, 3),
            fc6: conv(c5, fc, self.fc6_kernel),
            fc7: conv(fc, fc, 1),
        }
    }

    /// Randomly initialised backbone.
    pub fn init<B: Backend>(&self, device: &B::Device) -> VggBackbone<B> {
        VggBackbone::from_layers(self.init_layers(device), self)
    }
}

/// The trainable convolutions of VGG16; this is the unit that pretrained files hold.
#[derive(Module, Debug)]
pub struct VggLayers<B: Backend> {
    conv1_1: Conv2d<B>,
    conv1_2: Conv2d<B>,
    conv2_1: Conv2d<B>,
    conv2_2: Conv2d<B>,
    conv3_1: Conv2d<B>,
    conv3_2: Conv2d<B>,
    conv3_3: Conv2d<B>,
    conv4_1: Conv2d<B>,
    conv4_2: Conv2d<B>,
    conv4_3: Conv2d<B>,
    conv5_1: Conv2d<B>,
    conv5_2: Conv2d<B>,
    conv5_3: Conv2d<B>,
    fc6: Conv2d<B>,
    fc7: Conv2d<B>,
}

impl<B: Backend> VggLayers<B> {
    fn named(&self) -> [(&'static str, &Conv2d<B>); 15] {
        [
            ("conv1_1", &self.conv1_1),
            ("conv1_2", &self.conv1_2),
            ("conv2_1", &self.conv2_1),
            ("conv2_2", &self.conv2_2),
            ("conv3_1", &self.conv3_1),
            ("conv3_2", &self.conv3_2),
            ("conv3_3", &self.conv3_3),
            ("conv4_1", &self.conv4_1),
            ("conv4_2", &self.conv4_2),
            ("conv4_3", &self.conv4_3),
            ("conv5_1", &self.conv5_1),
            ("conv5_2", &self.conv5_2),
            ("conv5_3", &self.conv5_3),
            ("fc6", &self.fc6),
            ("fc7", &self.fc7),
        ]
    }

    /// Loaded records are not shape-checked by Burn, so compare every weight by name.
    pub fn check_shapes(&self, cfg: &VggConfig) -> ModelResult<()> {
        for ((name, conv), (_, expected)) in self.named().iter().zip(cfg.expected_shapes()) {
            let found = conv.weight.val().dims();
            if found != expected {
                return Err(ModelError::ShapeMismatch {
                    name: format!("{name}.weight"),
                    expected: expected.to_vec(),
                    found: found.to_vec(),
                });
            }
            if let Some(bias) = &conv.bias {
                let found = bias.val().dims();
                if found[0] != expected[0] {
                    return Err(ModelError::ShapeMismatch {
                        name: format!("{name}.bias"),
                        expected: vec![expected[0]],
                        found: found.to_vec(),
                    });
                }
            }
        }
        Ok(())
    }
}

/// A `nn.Linear` as torchvision stores it: weight `[out, in]`.
#[derive(Module, Debug)]
pub struct DenseWeights<B: Backend> {
    weight: Param<Tensor<B, 2>>,
    bias: Param<Tensor<B, 1>>,
}

/// Stock torchvision VGG16: the same convolutions, with fc6/fc7 still linear.
#[derive(Module, Debug)]
pub struct TorchvisionVgg<B: Backend> {
    conv1_1: Conv2d<B>,
    conv1_2: Conv2d<B>,
    conv2_1: Conv2d<B>,
    conv2_2: Conv2d<B>,
    conv3_1: Conv2d<B>,
    conv3_2: Conv2d<B>,
    conv3_3: Conv2d<B>,
    conv4_1: Conv2d<B>,
    conv4_2: Conv2d<B>,
    conv4_3: Conv2d<B>,
    conv5_1: Conv2d<B>,
    conv5_2: Conv2d<B>,
    conv5_3: Conv2d<B>,
    fc6: DenseWeights<B>,
    fc7: DenseWeights<B>,
}

impl<B: Backend> VggLayers<B> {
    /// Recast the torchvision classifier linears as fc6 (`k x k`) and fc7 (`1 x 1`) convolutions.
    pub fn from_torchvision(
        record: TorchvisionVggRecord<B>,
        cfg: &VggConfig,
        device: &B::Device,
    ) -> ModelResult<Self> {
        let base = cfg.init_layers::<B>(device);
        let c5 = cfg.channels[4];
        let fc = cfg.fc_channels;
        let k = cfg.fc6_kernel;
        Ok(Self {
            conv1_1: base.conv1_1.load_record(record.conv1_1),
            conv1_2: base.conv1_2.load_record(record.conv1_2),
            conv2_1: base.conv2_1.load_record(record.conv2_1),
            conv2_2: base.conv2_2.load_record(record.conv2_2),
            conv3_1: base.conv3_1.load_record(record.conv3_1),
            conv3_2: base.conv3_2.load_record(record.conv3_2),
            conv3_3: base.conv3_3.load_record(record.conv3_3),
            conv4_1: base.conv4_1.load_record(record.conv4_1),
            conv4_2: base.conv4_2.load_record(record.conv4_2),
            conv4_3: base.conv4_3.load_record(record.conv4_3),
            conv5_1: base.conv5_1.load_record(record.conv5_1),
            conv5_2: base.conv5_2.load_record(record.conv5_2),
            conv5_3: base.conv5_3.load_record(record.conv5_3),
            fc6: dense_into_conv(base.fc6, record.fc6, "fc6", [fc, c5, k, k])?,
            fc7: dense_into_conv(base.fc7, record.fc7, "fc7", [fc, fc, 1, 1])?,
        })
    }
}

fn dense_into_conv<B: Backend>(
    mut conv: Conv2d<B>,
    dense: DenseWeightsRecord<B>,
    name: &str,
    shape: [usize; 4],
) -> ModelResult<Conv2d<B>> {
    let weight = dense.weight.val();
    let [out, inputs] = weight.dims();
    let flat = shape[1] * shape[2] * shape[3];
    if out != shape[0] || inputs != flat {
        return Err(ModelError::ShapeMismatch {
            name: format!("{name}.weight"),
            expected: vec![shape[0], flat],
            found: vec![out, inputs],
        });
    }
    // Linear inputs flatten as (C, H, W), the same order as a conv kernel.
    conv.weight = Param::from_tensor(weight.reshape(shape));
    conv.bias = Some(Param::from_tensor(dense.bias.val()));
    Ok(conv)
}

/// Feature maps the decoder attaches to.
#[derive(Debug, Clone)]
pub struct VggTaps<B: Backend> {
    /// pool3, stride 8.
    pub layer3_out: Tensor<B, 4>,
    /// pool4, stride 16.
    pub layer4_out: Tensor<B, 4>,
    /// fc7, stride 32.
    pub layer7_out: Tensor<B, 4>,
}

impl<B: Backend> VggTaps<B> {
    /// Look a feature map up by its tensor name (`layer3_out`, `layer4_out:0`, ...).
    pub fn get(&self, name: &str) -> ModelResult<Tensor<B, 4>> {
        match name.parse::<VggTensor>()? {
            VggTensor::Layer3Out => Ok(self.layer3_out.clone()),
            VggTensor::Layer4Out => Ok(self.layer4_out.clone()),
            VggTensor::Layer7Out => Ok(self.layer7_out.clone()),
            other => Err(ModelError::NotAFeatureMap(other.name())),
        }
    }
}

/// Named tensors of the backbone graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VggTensor {
    ImageInput,
    KeepProb,
    Layer3Out,
    Layer4Out,
    Layer7Out,
}

impl VggTensor {
    pub const ALL: [VggTensor; 5] = [
        VggTensor::ImageInput,
        VggTensor::KeepProb,
        VggTensor::Layer3Out,
        VggTensor::Layer4Out,
        VggTensor::Layer7Out,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            VggTensor::ImageInput => IMAGE_INPUT,
            VggTensor::KeepProb => KEEP_PROB,
            VggTensor::Layer3Out => LAYER3_OUT,
            VggTensor::Layer4Out => LAYER4_OUT,
            VggTensor::Layer7Out => LAYER7_OUT,
        }
    }
}

impl fmt::Display for VggTensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for VggTensor {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let base = s.strip_suffix(":0").unwrap_or(s);
        VggTensor::ALL
            .into_iter()
            .find(|t| t.name() == base)
            .ok_or_else(|| ModelError::UnknownTensor(s.to_string()))
    }
}

#[derive(Module, Debug)]
pub struct VggBackbone<B: Backend> {
    layers: VggLayers<B>,
    pool: MaxPool2d,
    dropout: Dropout,
    keep_prob: f64,
    normalize_input: bool,
}

impl<B: Backend> VggBackbone<B> {
    pub fn from_layers(layers: VggLayers<B>, cfg: &VggConfig) -> Self {
        Self {
            layers,
            pool: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
            dropout: DropoutConfig::new(1.0 - cfg.keep_prob).init(),
            keep_prob: cfg.keep_prob,
            normalize_input: cfg.normalize_input,
        }
    }

    pub fn keep_prob(&self) -> f64 {
        self.keep_prob
    }

    pub fn layers(&self) -> &VggLayers<B> {
        &self.layers
    }

    /// Channel counts of `(layer3_out, layer4_out, layer7_out)`.
    pub fn tap_channels(&self) -> (usize, usize, usize) {
        let out = |conv: &Conv2d<B>| conv.weight.val().dims()[0];
        (
            out(&self.layers.conv3_3),
            out(&self.layers.conv4_3),
            out(&self.layers.fc7),
        )
    }

    /// Run `image_input` (`[N, 3, H, W]` in [0, 1]) through the encoder.
    pub fn forward_taps(&self, image_input: Tensor<B, 4>) -> VggTaps<B> {
        let l = &self.layers;
        let x = if self.normalize_input {
            normalize_imagenet(image_input)
        } else {
            image_input
        };

        // Block 1
        let x = relu(l.conv1_1.forward(x));
        let x = relu(l.conv1_2.forward(x));
        let x = self.pool.forward(x);

        // Block 2
        let x = relu(l.conv2_1.forward(x));
        let x = relu(l.conv2_2.forward(x));
        let x = self.pool.forward(x);

        // Block 3
        let x = relu(l.conv3_1.forward(x));
        let x = relu(l.conv3_2.forward(x));
        let x = relu(l.conv3_3.forward(x));
        let layer3_out = self.pool.forward(x);

        // Block 4
        let x = relu(l.conv4_1.forward(layer3_out.clone()));
        let x = relu(l.conv4_2.forward(x));
        let x = relu(l.conv4_3.forward(x));
        let layer4_out = self.pool.forward(x);

        // Block 5
        let x = relu(l.conv5_1.forward(layer4_out.clone()));
        let x = relu(l.conv5_2.forward(x));
        let x = relu(l.conv5_3.forward(x));
        let x = self.pool.forward(x);

        // fc6 / fc7
        let x = self.dropout.forward(relu(l.fc6.forward(x)));
        let layer7_out = self.dropout.forward(relu(l.fc7.forward(x)));

        VggTaps {
            layer3_out,
            layer4_out,
            layer7_out,
        }
    }

    /// Write the convolution weights as `<dir>/vgg16.bin`.
    pub fn save_weights(&self, dir: &Path) -> ModelResult<PathBuf> {
        std::fs::create_dir_all(dir).map_err(|e| ModelError::Save {
            path: dir.to_path_buf(),
            msg: e.to_string(),
        })?;
        let path = dir.join(BURN_WEIGHTS_FILE);
        self.layers
            .clone()
            .save_file(path.clone(), &BinFileRecorder::<FullPrecisionSettings>::new())
            .map_err(|e| ModelError::Save {
                path: path.clone(),
                msg: e.to_string(),
            })?;
        Ok(path)
    }
}

fn normalize_imagenet<B: Backend>(x: Tensor<B, 4>) -> Tensor<B, 4> {
    let device = x.device();
    let [batch, _, h, w] = x.dims();
    let mean = Tensor::<B, 2>::from_floats(IMAGENET_MEAN, &device)
        .reshape([1, 3, 1, 1])
        .expand([batch, 3, h, w]);
    let std = Tensor::<B, 2>::from_floats(IMAGENET_STD, &device)
        .reshape([1, 3, 1, 1])
        .expand([batch, 3, h, w]);
    x.sub(mean).div(std)
}

/// On-disk formats accepted for pretrained backbone weights.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VggWeightsFormat {
    /// `vgg16.bin`, written by `VggBackbone::save_weights`.
    Burn,
    /// `vgg16.pt` / `vgg16.pth` state dict with torchvision key names.
    PyTorch,
}

impl VggWeightsFormat {
    pub fn detect(dir: &Path) -> Option<(Self, PathBuf)> {
        let burn = dir.join(BURN_WEIGHTS_FILE);
        if burn.is_file() {
            return Some((VggWeightsFormat::Burn, burn));
        }
        TORCH_WEIGHTS_FILES
            .iter()
            .map(|name| dir.join(name))
            .find(|p| p.is_file())
            .map(|p| (VggWeightsFormat::PyTorch, p))
    }
}

/// Load the pretrained backbone from `vgg_path`.
///
/// The directory must hold `vgg16.bin` or a PyTorch `vgg16.pt(h)`; every
/// weight is looked up by name and its shape checked against `cfg`.
pub fn load_vgg<B: Backend>(
    vgg_path: &Path,
    cfg: &VggConfig,
    device: &B::Device,
) -> ModelResult<VggBackbone<B>> {
    cfg.validate()?;
    if !vgg_path.is_dir() {
        return Err(ModelError::WrongPath {
            tag: VGG_TAG,
            path: vgg_path.to_path_buf(),
        });
    }
    let (format, file) =
        VggWeightsFormat::detect(vgg_path).ok_or_else(|| ModelError::MissingWeights {
            dir: vgg_path.to_path_buf(),
            expected: std::iter::once(BURN_WEIGHTS_FILE)
                .chain(TORCH_WEIGHTS_FILES)
                .collect::<Vec<_>>()
                .join(", "),
        })?;

    let layers = match format {
        VggWeightsFormat::Burn => {
            let record: VggLayersRecord<B> = BinFileRecorder::<FullPrecisionSettings>::new()
                .load(file.clone(), device)
                .map_err(|e| ModelError::Record {
                    path: file.clone(),
                    msg: e.to_string(),
                })?;
            cfg.init_layers::<B>(device).load_record(record)
        }
        VggWeightsFormat::PyTorch => load_torch_layers::<B>(&file, cfg, device)?,
    };
    layers.check_shapes(cfg)?;
    log::info!(
        "loaded {VGG_TAG} weights ({:?}) from {}",
        format,
        file.display()
    );
    Ok(VggBackbone::from_layers(layers, cfg))
}

fn torch_load_args(file: &Path, extra: &[(&str, &str)]) -> LoadArgs {
    let mut args = LoadArgs::new(file.to_path_buf());
    for (pattern, replacement) in TORCHVISION_KEY_REMAPS.iter().chain(extra) {
        args = args.with_key_remap(pattern, replacement);
    }
    args
}

/// Try fc6/fc7 stored as convolutions first, then the stock classifier linears.
fn load_torch_layers<B: Backend>(
    file: &Path,
    cfg: &VggConfig,
    device: &B::Device,
) -> ModelResult<VggLayers<B>> {
    let recorder = PyTorchFileRecorder::<FullPrecisionSettings>::default();
    let as_conv: Result<VggLayersRecord<B>, _> = recorder.load(torch_load_args(file, &[]), device);
    let conv_err = match as_conv {
        Ok(record) => return Ok(cfg.init_layers::<B>(device).load_record(record)),
        Err(e) => e,
    };
    let as_linear: Result<TorchvisionVggRecord<B>, _> =
        recorder.load(torch_load_args(file, TORCHVISION_CLASSIFIER_REMAPS), device);
    match as_linear {
        Ok(record) => {
            log::info!(
                "{}: recasting classifier.0/classifier.3 as fc6/fc7 convolutions",
                file.display()
            );
            VggLayers::from_torchvision(record, cfg, device)
        }
        Err(e) => Err(ModelError::Record {
            path: file.to_path_buf(),
            msg: format!("conv fc6/fc7: {conv_err}; torchvision classifier: {e}"),
        }),
    }
}
