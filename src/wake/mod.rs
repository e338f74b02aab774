//! Wake-word detection
//!
//! Model lifecycle, scoring strategies, and the continuous keyword spotter.

pub mod model;
pub mod spotter;
pub mod strategy;

pub use model::{JsonModelLoader, KeywordModel, ModelLoadState, ModelLoader, ModelRegistry, ModelSpec};
pub use spotter::{KeywordSpotter, SpotterOptions};
pub use strategy::{
    Detection, ScoredStrategy, StrategyFactory, StreamingRecognizer, TranscriptMatchStrategy,
    WakeStrategy,
};
