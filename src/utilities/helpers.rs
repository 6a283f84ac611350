use crate::utilities::enums::Kernel;
use ndarray::{ArrayView, Dimension};
use std::borrow::Cow;
use std::sync::OnceLock;

static BEST_KERNEL: OnceLock<Kernel> = OnceLock::new();

#[inline(always)]
pub fn detect_best_kernel() -> Kernel {
    *BEST_KERNEL.get_or_init(|| {
        if kernel_supported(Kernel::Avx2) {
            Kernel::Avx2
        } else {
            Kernel::Scalar
        }
    })
}

/// Whether the running CPU can execute `kernel`.
#[inline]
pub fn kernel_supported(kernel: Kernel) -> bool {
    match kernel {
        Kernel::Auto | Kernel::Scalar => true,
        Kernel::Avx2 => avx2_fma_detected(),
    }
}

#[cfg(target_arch = "x86_64")]
#[inline]
fn avx2_fma_detected() -> bool {
    std::arch::is_x86_feature_detected!("avx2") && std::arch::is_x86_feature_detected!("fma")
}

#[cfg(not(target_arch = "x86_64"))]
#[inline]
fn avx2_fma_detected() -> bool {
    false
}

/// Resolves `Auto` and demotes kernels the CPU cannot run to `Scalar`.
#[inline]
pub fn resolve_kernel(kernel: Kernel) -> Kernel {
    match kernel {
        Kernel::Auto => detect_best_kernel(),
        k if kernel_supported(k) => k,
        _ => Kernel::Scalar,
    }
}

/// Row-major contents of `view`, borrowed when already contiguous.
#[inline]
pub fn row_major<'a, T: Clone, D: Dimension>(view: &ArrayView<'a, T, D>) -> Cow<'a, [T]> {
    match view.to_slice() {
        Some(slice) => Cow::Borrowed(slice),
        None => Cow::Owned(view.iter().cloned().collect()),
    }
}
