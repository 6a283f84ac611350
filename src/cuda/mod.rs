//! CUDA backend (cust-based).
//!
//! The wrapper is built only with the `cuda` feature; the detection helpers
//! are always present and report no devices when the feature is off.

#[cfg(feature = "cuda")]
pub mod matched_filter_wrapper;

#[cfg(feature = "cuda")]
pub use matched_filter_wrapper::{CudaMatchedFilter, CudaMatchedFilterError};

/// Environment variable selecting the device used by `arch="cuda"`.
pub const DEVICE_ENV: &str = "FMF_CUDA_DEVICE";

/// Returns true if a CUDA device is available and the driver API can be initialized.
#[inline]
pub fn cuda_available() -> bool {
    cuda_device_count() > 0
}

/// Returns the number of CUDA devices available (0 on error or when disabled).
#[inline]
pub fn cuda_device_count() -> usize {
    #[cfg(feature = "cuda")]
    {
        use cust::{device::Device, prelude::CudaFlags};
        if cust::init(CudaFlags::empty()).is_err() {
            return 0;
        }
        Device::num_devices().map(|n| n as usize).unwrap_or(0)
    }

    #[cfg(not(feature = "cuda"))]
    {
        0
    }
}

/// Device ordinal from `FMF_CUDA_DEVICE`, 0 when unset or unparsable.
pub fn device_from_env() -> usize {
    std::env::var(DEVICE_ENV)
        .ok()
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(0)
}
