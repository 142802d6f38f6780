//! Feature engineering stages shared by training and scoring

pub mod augment;
pub mod base;
pub mod encoder;
pub mod normalizer;

pub use augment::{add_frequency_encodings, add_group_stats, GroupStatistic, UnsupervisedAugmenter};
pub use base::BaseFeatureBuilder;
pub use encoder::{apply_encoders, Encoded, Encoder, UnseenColumn};
pub use normalizer::normalize;
