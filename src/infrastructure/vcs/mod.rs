//! Version-control snapshots of passing artifacts

pub mod git;

pub use git::GitSnapshotter;
