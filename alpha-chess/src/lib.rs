#[cfg(feature = "torch")]
use tch::{Cuda, Device};

#[cfg(feature = "torch")]
#[macro_use]
extern crate lazy_static;

pub mod model;
pub mod repr;
pub mod search;

pub mod config;
pub mod coordinator;
pub mod error;
pub mod protocol;
pub mod worker;

pub mod example;
pub mod record;

#[cfg(feature = "torch")]
lazy_static! {
    static ref DEVICE: Device = Device::cuda_if_available();
}

/// Try initializing CUDA.
/// Returns whether CUDA is available.
#[cfg(feature = "torch")]
pub fn use_cuda() -> bool {
    tch::maybe_init_cuda();
    Cuda::is_available()
}
