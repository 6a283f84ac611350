#![allow(clippy::needless_range_loop)]
#![allow(clippy::too_many_arguments)]

pub mod cuda;
pub mod matched_filter;
pub mod utilities;

pub mod bindings {
    #[cfg(feature = "python")]
    pub mod python;
}

pub use matched_filter::{
    expected_output_shape, matched_filter, matched_filter_into_slice, matched_filter_with_kernel,
    matched_filter_with_sink, template_window_counts, window_count, MatchedFilterBuilder,
    MatchedFilterError, MatchedFilterInput, MatchedFilterOutput, MatchedFilterParams,
};
pub use utilities::arch_validation::{
    parse_arch, resolve_arch, ArchError, ArchSpec, AVAILABLE_BACKENDS, DEFAULT_ARCH,
};
pub use utilities::enums::{Arch, CheckZeros, Kernel};
pub use utilities::shape_validation::{Dims, ValidationError};
pub use utilities::zero_check::{ZeroRunPolicy, ZeroRunReport, DEFAULT_MAX_ZERO_FRACTION};
