#![deny(dead_code)]
#![deny(unused_imports)]

//! Statistical building blocks used by the prediction pipeline: least squares,
//! GLM contrasts, false discovery rate control, hierarchical clustering and the
//! linear classifiers with their cross-validation machinery.

pub mod classifier;
pub mod estimate;
pub mod folds;
pub mod glm;
pub mod grid;
pub mod hclust;
pub mod logistic;
pub mod multitest;
pub mod svm;
