use pyo3::prelude::*;
use pyo3::types::PyFrozenSet;

use crate::cuda::{cuda_available, cuda_device_count};
use crate::matched_filter::matched_filter_py;
use crate::utilities::arch_validation::available_archs;
use crate::utilities::enums::Arch;

#[pyfunction(name = "cuda_available")]
fn cuda_available_py() -> bool {
	cuda_available()
}

#[pyfunction(name = "cuda_device_count")]
fn cuda_device_count_py() -> usize {
	cuda_device_count()
}

#[pymodule]
fn fmf(m: &Bound<'_, PyModule>) -> PyResult<()> {
	m.add_function(wrap_pyfunction!(matched_filter_py, m)?)?;

	// Backend names compiled into this build, fixed at import time.
	let backends = PyFrozenSet::new(m.py(), available_archs().map(Arch::name))?;
	m.add("AVAILABLE_BACKENDS", backends)?;

	m.add_function(wrap_pyfunction!(cuda_available_py, m)?)?;
	m.add_function(wrap_pyfunction!(cuda_device_count_py, m)?)?;
	m.add("__version__", env!("CARGO_PKG_VERSION"))?;

	Ok(())
}
