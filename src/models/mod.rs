//! Tree learners, fold ensemble training and the persisted artifact

pub mod aggregator;
pub mod artifact;
pub mod ensemble;
pub mod evaluation;
pub mod learner;

pub use aggregator::FoldAggregator;
pub use artifact::{ArtifactMetadata, ModelArtifact};
pub use ensemble::{ensemble_predict, group_k_fold, EnsembleOutcome, EnsembleTrainer, TrainingData};
pub use learner::{BoostedTrees, BoostedTreesLearner, LabeledMatrix, LearnerParams, Predictor, TreeLearner};
