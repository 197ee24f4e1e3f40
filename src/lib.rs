//! Element-wise `C = A + B` kernel on a data-parallel device, and its benchmark

#[macro_use]
extern crate log;

pub mod bench;
pub mod compare;
pub mod config;
pub mod device;
pub mod error;
pub mod kernel;
pub mod launch;

pub use crate::bench::{run_benchmark, BenchReport, Timing};
pub use crate::compare::{allclose, Comparison};
pub use crate::config::{BenchConfig, Overrides};
pub use crate::device::{Device, DeviceBuffer};
pub use crate::kernel::{add2_kernel, launch_add2};
pub use crate::launch::{LaunchConfig, ThreadCtx, BLOCK_SIZE};
