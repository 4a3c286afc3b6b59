pub mod backend;
pub mod cli;
pub mod data;
pub mod evaluation;
pub mod metrics;
pub mod model;
pub mod persist;
pub mod training;

pub mod prelude {
    pub use crate::data::{DigitBatch, DigitBatcher};
    pub use crate::model::{Cnn, CnnConfig, ConvBlock, ConvBlockConfig};
    pub use crate::training::{Session, TrainingConfig, ValidationErrorPolicy, ValidationSummary};
}
