mod pipeline;
mod stage;

pub use pipeline::{Pipeline, StagePaths};
pub use stage::{Layout, Stage};
