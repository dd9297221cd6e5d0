#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
pub mod confounds;
pub mod data;
pub mod hitmiss;
pub mod model;
pub mod pipeline;
pub mod selection;
pub mod subtypes;
pub mod two_level;
pub mod validation;

#[path = "../stats/mod.rs"]
pub mod stats;
