//! Residual 3D U-Net with optional spatial-attention gates and deep supervision

use burn::prelude::*;
use serde::{Deserialize, Serialize};

use crate::conv::{ConvLayer, ConvLayerConfig};
use crate::deep_supervision::{DeepSupervision, DeepSupervisionConfig};
use crate::error::BlockError;
use crate::layer::Layer;
use crate::res_block::{res_blocks, ResBlockKind, ResBlocks};
use crate::unet_block::{UnetBlock, UnetBlockConfig};

/// Attention U-Net configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttentionUnetConfig {
    /// Input channels (imaging modalities)
    pub in_channels: usize,
    /// Output logits (segmentation classes)
    pub out_channels: usize,
    /// Feature width per resolution level, shallowest first
    pub channels: Vec<usize>,
    /// Residual blocks per encoder level below the stem
    pub blocks_per_level: usize,
    #[serde(default)]
    pub block_kind: ResBlockKind,
    /// Gate each skip fusion with a dual-input spatial attention
    #[serde(default)]
    pub spatial_attention: bool,
    /// Add softmax heads on the intermediate decoder outputs
    #[serde(default)]
    pub deep_supervision: bool,
}

impl AttentionUnetConfig {
    pub fn new(in_channels: usize, out_channels: usize, channels: Vec<usize>) -> Self {
        Self {
            in_channels,
            out_channels,
            channels,
            blocks_per_level: 1,
            block_kind: ResBlockKind::Basic,
            spatial_attention: false,
            deep_supervision: false,
        }
    }

    /// Three levels of 8/16/32 features, attention gates and deep supervision
    pub fn small() -> Self {
        Self {
            in_channels: 1,
            out_channels: 2,
            channels: vec![8, 16, 32],
            blocks_per_level: 1,
            block_kind: ResBlockKind::Basic,
            spatial_attention: true,
            deep_supervision: true,
        }
    }

    pub fn with_blocks_per_level(mut self, blocks_per_level: usize) -> Self {
        self.blocks_per_level = blocks_per_level;
        self
    }

    pub fn with_block_kind(mut self, block_kind: ResBlockKind) -> Self {
        self.block_kind = block_kind;
        self
    }

    pub fn with_spatial_attention(mut self, spatial_attention: bool) -> Self {
        self.spatial_attention = spatial_attention;
        self
    }

    pub fn with_deep_supervision(mut self, deep_supervision: bool) -> Self {
        self.deep_supervision = deep_supervision;
        self
    }

    /// Number of resolution levels, stem included
    pub fn levels(&self) -> usize {
        self.channels.len()
    }

    fn validate(&self) -> Result<(), BlockError> {
        if self.channels.len() < 2 {
            return Err(BlockError::InvalidModel(format!(
                "need at least 2 levels, got {}",
                self.channels.len()
            )));
        }
        if self.in_channels == 0 || self.channels.contains(&0) {
            return Err(BlockError::InvalidModel(
                "channel counts must be non-zero".to_string(),
            ));
        }
        if self.out_channels == 0 {
            return Err(BlockError::InvalidModel(
                "need at least 1 output channel".to_string(),
            ));
        }
        Ok(())
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<AttentionUnet<B>, BlockError> {
        self.validate()?;

        let stem = ConvLayerConfig::new(self.in_channels, self.channels[0]).init(device);

        let encoder = self
            .channels
            .windows(2)
            .map(|pair| {
                res_blocks(
                    self.block_kind,
                    pair[0],
                    pair[1],
                    2,
                    self.blocks_per_level,
                    device,
                )
            })
            .collect::<Result<Vec<_>, _>>()?;

        // Decoder walks back up, one block per skip level
        let mut decoder = Vec::with_capacity(encoder.len());
        let mut up_channels = self.channels[self.channels.len() - 1];
        for &skip_channels in self.channels[..self.channels.len() - 1].iter().rev() {
            let config = UnetBlockConfig::new(up_channels, skip_channels)
                .with_spatial_attention(self.spatial_attention);
            up_channels = config.out_channels();
            decoder.push(config.init(device));
        }

        let supervision = if self.deep_supervision {
            decoder[..decoder.len() - 1]
                .iter()
                .map(|block: &UnetBlock<B>| {
                    DeepSupervisionConfig::new(block.out_channels(), self.out_channels).init(device)
                })
                .collect::<Result<Vec<_>, _>>()?
        } else {
            Vec::new()
        };

        let head = ConvLayerConfig::new(up_channels, self.out_channels)
            .with_kernel_size(1)
            .with_norm(None)
            .with_activation(None)
            .init(device);

        tracing::debug!(
            levels = self.levels(),
            decoder_blocks = decoder.len(),
            supervision_heads = supervision.len(),
            "built attention U-Net"
        );

        Ok(AttentionUnet {
            stem,
            encoder,
            decoder,
            supervision,
            head,
        })
    }
}

/// Output of [`AttentionUnet::forward_supervised`]
#[derive(Debug, Clone)]
pub struct UnetOutput<B: Backend> {
    /// Logits at input resolution
    pub logits: Tensor<B, 5>,
    /// Class probabilities from the intermediate decoder outputs, coarsest first
    pub deep: Vec<Tensor<B, 5>>,
}

/// Residual encoder, attention-gated decoder and 1x1 logits head
#[derive(Module, Debug)]
pub struct AttentionUnet<B: Backend> {
    pub stem: ConvLayer<B>,
    /// One residual chain per downsampling level
    pub encoder: Vec<ResBlocks<B>>,
    /// Decoder blocks, deepest first
    pub decoder: Vec<UnetBlock<B>>,
    /// Heads on every decoder output except the last
    pub supervision: Vec<DeepSupervision<B>>,
    pub head: ConvLayer<B>,
}

impl<B: Backend> AttentionUnet<B> {
    /// Forward pass returning logits at input resolution
    ///
    /// # Arguments
    ///
    /// * `x` - Input tensor `[batch, in_channels, depth, height, width]`
    pub fn forward(&self, x: Tensor<B, 5>) -> Tensor<B, 5> {
        self.run(x, false).logits
    }

    /// Forward pass that also returns the deep-supervision outputs
    pub fn forward_supervised(&self, x: Tensor<B, 5>) -> UnetOutput<B> {
        self.run(x, true)
    }

    fn run(&self, x: Tensor<B, 5>, supervised: bool) -> UnetOutput<B> {
        let mut skips = Vec::with_capacity(self.encoder.len());
        let mut x = self.stem.forward(x);
        for level in &self.encoder {
            skips.push(x.clone());
            x = level.forward(x);
        }

        let mut deep = Vec::new();
        for (i, (block, skip)) in self.decoder.iter().zip(skips.into_iter().rev()).enumerate() {
            x = block.forward(x, skip);
            if supervised {
                if let Some(head) = self.supervision.get(i) {
                    deep.push(head.forward(x.clone()));
                }
            }
        }

        UnetOutput {
            logits: self.head.forward(x),
            deep,
        }
    }

    pub fn in_channels(&self) -> usize {
        self.stem.in_channels()
    }

    pub fn out_channels(&self) -> usize {
        self.head.out_channels()
    }

    /// Total number of trainable parameters
    pub fn num_parameters(&self) -> usize {
        self.num_params()
    }
}

impl<B: Backend> Layer<B> for AttentionUnet<B> {
    type Input = Tensor<B, 5>;
    type Output = Tensor<B, 5>;

    fn apply(&self, input: Tensor<B, 5>) -> Tensor<B, 5> {
        self.forward(input)
    }

    fn first_layer(&self) -> Option<&ConvLayer<B>> {
        Some(&self.stem)
    }

    fn components(&self) -> Vec<&'static str> {
        let mut names = vec!["stem", "encoder", "decoder"];
        if !self.supervision.is_empty() {
            names.push("supervision");
        }
        names.push("head");
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::tensor::Distribution;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_rejects_invalid_configs() {
        let device = Default::default();
        let cases = [
            AttentionUnetConfig::new(1, 2, vec![8]),
            AttentionUnetConfig::new(1, 2, vec![8, 0]),
            AttentionUnetConfig::new(0, 2, vec![8, 16]),
            AttentionUnetConfig::new(1, 0, vec![8, 16]),
        ];
        for config in cases {
            let err = config.init::<TestBackend>(&device).unwrap_err();
            assert!(matches!(err, BlockError::InvalidModel(_)), "{config:?}: {err}");
        }
    }

    #[test]
    fn test_supervision_needs_two_classes() {
        let device = Default::default();
        let err = AttentionUnetConfig::new(1, 1, vec![4, 8, 16])
            .with_deep_supervision(true)
            .init::<TestBackend>(&device)
            .unwrap_err();
        assert_eq!(err, BlockError::TooFewClasses(1));
    }

    #[test]
    fn test_decoder_channel_bookkeeping() {
        let device = Default::default();
        let model = AttentionUnetConfig::small().init::<TestBackend>(&device).unwrap();

        assert_eq!(model.encoder.len(), 2);
        assert_eq!(model.decoder.len(), 2);
        assert_eq!(model.supervision.len(), 1);
        // 32 -> up 16 + skip 16 -> 16, then 16 -> up 8 + skip 8 -> 8
        assert_eq!(model.decoder[0].out_channels(), 16);
        assert_eq!(model.decoder[1].out_channels(), 8);
        assert_eq!(model.head.in_channels(), 8);
        assert!(model.decoder[0].attention.is_some());
    }

    #[test]
    fn test_forward_keeps_spatial_size() {
        let device = Default::default();
        let model = AttentionUnetConfig::small().init::<TestBackend>(&device).unwrap();
        let x = Tensor::<TestBackend, 5>::random(
            [1, 1, 8, 8, 8],
            Distribution::Normal(0.0, 1.0),
            &device,
        );

        let out = model.forward_supervised(x);
        assert_eq!(out.logits.dims(), [1, 2, 8, 8, 8]);
        assert_eq!(out.deep.len(), 1);
        assert_eq!(out.deep[0].dims(), [1, 2, 4, 4, 4]);
    }

    #[test]
    fn test_odd_input_size() {
        let device = Default::default();
        let model = AttentionUnetConfig::new(2, 3, vec![4, 8])
            .with_block_kind(ResBlockKind::Bottleneck)
            .init::<TestBackend>(&device)
            .unwrap();
        let x = Tensor::<TestBackend, 5>::random(
            [1, 2, 5, 6, 7],
            Distribution::Normal(0.0, 1.0),
            &device,
        );
        assert_eq!(model.forward(x).dims(), [1, 3, 5, 6, 7]);
    }

    #[test]
    fn test_config_json() {
        let config: AttentionUnetConfig = serde_json::from_str(
            r#"{"in_channels": 1, "out_channels": 3, "channels": [4, 8], "blocks_per_level": 2}"#,
        )
        .unwrap();
        assert_eq!(config.block_kind, ResBlockKind::Basic);
        assert!(!config.spatial_attention);
        assert!(!config.deep_supervision);

        let json = serde_json::to_string(&AttentionUnetConfig::small()).unwrap();
        let back: AttentionUnetConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, AttentionUnetConfig::small());
    }
}
