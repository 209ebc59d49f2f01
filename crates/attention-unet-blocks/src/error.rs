//! Construction and introspection errors

use thiserror::Error;

/// Error raised when a block is configured with invalid parameters
///
/// Shape mismatches between chained blocks are not checked here; they
/// surface from the tensor engine at forward time.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BlockError {
    #[error("Drop probability must be in [0, 1], got {0}")]
    InvalidDropProbability(f64),

    #[error("Squeeze ratio must be a positive finite number, got {0}")]
    InvalidSqueezeRatio(f64),

    #[error("No pooling or convolution path enabled in spatial attention")]
    NoAttentionInputs,

    #[error("Basic residual blocks only support groups=1 and base_width=64, got groups={groups}, base_width={base_width}")]
    UnsupportedGrouping { groups: usize, base_width: usize },

    #[error("Expected at least 2 output channels for a softmax head, got {0}")]
    TooFewClasses(usize),

    #[error("A residual chain needs at least one block")]
    EmptyChain,

    #[error("Invalid model configuration: {0}")]
    InvalidModel(String),

    #[error("Missing components on {module}: {missing:?}")]
    MissingComponents { module: String, missing: Vec<String> },

    #[error("Size of input and output are not equal: input {input:?}, output {output:?}")]
    SizeMismatch { input: [usize; 3], output: [usize; 3] },
}
