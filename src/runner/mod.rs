pub mod dual_loop;

pub use dual_loop::{Runner, RunnerPaths};
