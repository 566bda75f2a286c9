//! CLI command handling

pub mod manage;
pub mod output;
pub mod replay;

pub use manage::*;
pub use output::*;
pub use replay::*;
