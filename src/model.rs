//! Convolutional digit classifier.
//!
//! The convolutional stages are declared once as a channel-width list, and
//! both the construction-time shape probe and the real forward pass walk the
//! same initialized blocks. The width of the first dense layer is always
//! measured, never hand-computed.

use crate::data::{HEIGHT, WIDTH};
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::loss::CrossEntropyLossConfig;
use burn::nn::pool::{MaxPool2d, MaxPool2dConfig};
use burn::nn::{Dropout, DropoutConfig, Linear, LinearConfig, PaddingConfig2d, Relu};
use burn::prelude::*;
use burn::train::ClassificationOutput;

/// One convolutional stage: same-padded convolution, non-linearity, then a
/// non-overlapping 2x2 max-pool halving the spatial extent.
#[derive(Module, Debug)]
pub struct ConvBlock<B: Backend> {
    pub conv: Conv2d<B>,
    pub activation: Relu,
    pub pool: MaxPool2d,
}

#[derive(Config, Debug)]
pub struct ConvBlockConfig {
    /// Input and output channel count.
    pub channels: [usize; 2],
    #[config(default = 3)]
    pub kernel_size: usize,
}

impl ConvBlockConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> ConvBlock<B> {
        ConvBlock {
            conv: Conv2dConfig::new(self.channels, [self.kernel_size; 2])
                .with_padding(PaddingConfig2d::Same)
                .init(device),
            activation: Relu::new(),
            pool: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
        }
    }
}

impl<B: Backend> ConvBlock<B> {
    /// # Shapes
    ///   - Input [batch, c_in, h, w]
    ///   - Output [batch, c_out, h / 2, w / 2]
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.conv.forward(x);
        let x = self.activation.forward(x);
        self.pool.forward(x)
    }
}

#[derive(Module, Debug)]
pub struct Cnn<B: Backend> {
    pub blocks: Vec<ConvBlock<B>>,
    pub dense: Vec<Linear<B>>,
    pub dropout: Dropout,
    pub activation: Relu,
    pub output: Linear<B>,
}

#[derive(Config, Debug)]
pub struct CnnConfig {
    /// Output channel width of each convolutional stage, applied in order
    /// to a single-channel input.
    #[config(default = "vec![64, 128, 256]")]
    pub conv_channels: Vec<usize>,

    #[config(default = 3)]
    pub kernel_size: usize,

    /// Width of each dense layer between the flattened convolutional
    /// features and the class logits. Each is followed by a non-linearity
    /// and dropout.
    #[config(default = "vec![1024, 512]")]
    pub hidden_sizes: Vec<usize>,

    /// Unit-dropping probability, active only while training.
    #[config(default = 0.3)]
    pub dropout: f64,

    #[config(default = 10)]
    pub num_classes: usize,
}

impl CnnConfig {
    /// Returns the initialized model.
    ///
    /// A zero-filled probe batch is pushed through the convolutional stages
    /// to measure the flattened feature width, so editing the kernel,
    /// padding, or channel constants cannot desynchronize the dense stack
    /// from the convolutional output.
    pub fn init<B: Backend>(&self, device: &B::Device) -> Cnn<B> {
        let mut blocks = Vec::with_capacity(self.conv_channels.len());
        let mut channels = 1;
        for &width in self.conv_channels.iter() {
            let block = ConvBlockConfig::new([channels, width])
                .with_kernel_size(self.kernel_size)
                .init(device);
            blocks.push(block);
            channels = width;
        }

        let mut probe = Tensor::<B, 4>::zeros([1, 1, HEIGHT, WIDTH], device);
        for block in blocks.iter() {
            probe = block.forward(probe);
        }
        let [_, c, h, w] = probe.dims();
        let mut in_features = c * h * w;

        let mut dense = Vec::with_capacity(self.hidden_sizes.len());
        for &width in self.hidden_sizes.iter() {
            dense.push(LinearConfig::new(in_features, width).init(device));
            in_features = width;
        }

        Cnn {
            blocks,
            dense,
            dropout: DropoutConfig::new(self.dropout).init(),
            activation: Relu::new(),
            output: LinearConfig::new(in_features, self.num_classes).init(device),
        }
    }
}

impl<B: Backend> Cnn<B> {
    /// Applies the convolutional stages only.
    ///
    /// # Shapes
    ///   - Input [batch, 1, HEIGHT, WIDTH]
    ///   - Output [batch, c_last, h_last, w_last]
    pub fn forward_features(&self, images: Tensor<B, 4>) -> Tensor<B, 4> {
        let mut x = images;
        for block in self.blocks.iter() {
            x = block.forward(x);
        }
        x
    }

    /// # Shapes
    ///   - Input [batch, 1, HEIGHT, WIDTH]
    ///   - Output [batch, num_classes] (raw logits; the loss applies the
    ///     normalization)
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let [batch_size, _, _, _] = images.dims();

        let x = self.forward_features(images);
        let mut x = x.flatten::<2>(1, 3);
        for dense in self.dense.iter() {
            x = dense.forward(x);
            x = self.activation.forward(x);
            x = self.dropout.forward(x);
        }

        let x = self.output.forward(x);
        let [_, num_classes] = self.output.weight.dims();
        debug_assert_eq!([batch_size, num_classes], x.dims());
        x
    }

    pub fn forward_classification(
        &self,
        images: Tensor<B, 4>,
        targets: Tensor<B, 1, Int>,
    ) -> ClassificationOutput<B> {
        let output = self.forward(images);
        let loss = CrossEntropyLossConfig::new()
            .init(&output.device())
            .forward(output.clone(), targets.clone());
        ClassificationOutput::new(loss, output, targets)
    }

    /// Flattened feature width seen by the first dense layer.
    pub fn feature_width(&self) -> usize {
        let weight = match self.dense.first() {
            Some(linear) => &linear.weight,
            None => &self.output.weight,
        };
        let [d_input, _] = weight.dims();
        d_input
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MainBackend, MainDevice};

    fn tiny_config() -> CnnConfig {
        CnnConfig::new()
            .with_conv_channels(vec![2, 3])
            .with_hidden_sizes(vec![8])
    }

    #[test]
    fn output_shape_is_batch_by_classes() {
        let device = <MainBackend as MainDevice>::main_device();
        let model = tiny_config().init::<MainBackend>(&device);

        for batch_size in [1, 2, 5] {
            let images = Tensor::zeros([batch_size, 1, HEIGHT, WIDTH], &device);
            assert_eq!([batch_size, 10], model.forward(images).dims());
        }
    }

    #[test]
    fn probe_width_matches_real_forward_pass() {
        let device = <MainBackend as MainDevice>::main_device();
        let model = tiny_config().init::<MainBackend>(&device);

        let features = model.forward_features(Tensor::zeros([4, 1, HEIGHT, WIDTH], &device));
        let [_, c, h, w] = features.dims();
        assert_eq!(c * h * w, model.feature_width());
    }

    #[test]
    fn default_config_spatial_reduction() {
        let device = <MainBackend as MainDevice>::main_device();
        let model = CnnConfig::new().init::<MainBackend>(&device);

        // 28 -> 14 -> 7 -> 3 under three 2x2 pools with same-padded convs
        let features = model.forward_features(Tensor::zeros([1, 1, HEIGHT, WIDTH], &device));
        assert_eq!([1, 256, 3, 3], features.dims());
        assert_eq!(256 * 3 * 3, model.feature_width());
    }

    #[test]
    fn classification_loss_is_finite() {
        let device = <MainBackend as MainDevice>::main_device();
        let model = tiny_config().init::<MainBackend>(&device);

        let images = Tensor::ones([2, 1, HEIGHT, WIDTH], &device);
        let targets = Tensor::from_data([0, 9], &device);
        let output = model.forward_classification(images, targets);
        let loss: f32 = output.loss.into_scalar().elem();
        assert!(loss.is_finite());
    }
}
