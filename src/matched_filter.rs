//! # Matched Filter
//!
//! Weighted, moveout-aligned normalized cross-correlation of multichannel
//! templates against continuous multichannel data.
//!
//! For template `t` and window `w` (start sample `w * step`):
//!
//! `out[t, w] = Σ_ch weight[t, ch] * cc(template[t, ch], window(t, ch, w)) / Σ_ch weight[t, ch]`
//!
//! where `window(t, ch, w)` is `data[ch, w*step + moveout[t, ch]..][..n]`, `cc` is
//! the Pearson coefficient at a single lag and `ch` runs over every
//! (station, component) pair. Each template only covers the windows its own
//! moveouts allow; the rest of its row is 0.
//!
//! ## Parameters
//! - **arch**: backend name, case and surrounding whitespace ignored. Defaults to `"cpu"`.
//! - **check_zeros**: zero-run diagnostic mode. Defaults to [`CheckZeros::Disabled`].
//! - **max_zero_fraction**: fraction of exact zeros a row may hold before it
//!   is reported. Defaults to [`DEFAULT_MAX_ZERO_FRACTION`].
//!
//! ## Errors
//! - **Validation**: missing arguments, rank/shape/element-type mismatch, `step < 1`,
//!   negative moveouts, negative or non-finite weights.
//! - **Arch**: unknown backend name, or a known backend that is not compiled in.
//! - **Backend**: device or allocation failure inside an accelerator backend.
//!
//! ## Returns
//! - `Ok(MatchedFilterOutput)` holding a row-major `[n_templates, n_windows]` buffer.

#[cfg(feature = "cuda")]
use crate::cuda::{device_from_env, CudaMatchedFilter};
use crate::utilities::arch_validation::{resolve_arch, ArchError, DEFAULT_ARCH};
use crate::utilities::enums::{Arch, CheckZeros, Kernel};
use crate::utilities::helpers::{resolve_kernel, row_major};
use crate::utilities::shape_validation::{
    check_arguments, missing_arguments, validate_moveouts, validate_shapes, validate_step,
    validate_weights, validate_zero_fraction, Dims, ValidationError,
};
#[cfg(feature = "python")]
use crate::utilities::shape_validation::{
    check_element_kind, check_int32_range, check_positional_count, parse_check_zeros,
    ElementKind,
};
use crate::utilities::zero_check::{
    emit_zero_runs, scan_zero_runs, ZeroRunPolicy, DEFAULT_MAX_ZERO_FRACTION,
};
use aligned_vec::{AVec, CACHELINE_ALIGN};
#[cfg(target_arch = "x86_64")]
use core::arch::x86_64::*;
use ndarray::{Array2, ArrayView, ArrayViewD, Dimension, ShapeError};
#[cfg(feature = "python")]
use numpy::{
    IntoPyArray, PyArray2, PyArrayDescrMethods, PyReadonlyArrayDyn, PyUntypedArray,
    PyUntypedArrayMethods,
};
#[cfg(feature = "python")]
use pyo3::exceptions::{PyNotImplementedError, PyRuntimeError, PyTypeError, PyValueError};
#[cfg(feature = "python")]
use pyo3::prelude::*;
#[cfg(feature = "python")]
use pyo3::types::{PyDict, PyTuple};
use rayon::prelude::*;
use std::borrow::Cow;
use std::io::{self, Write};
use thiserror::Error;
use tracing::{debug, debug_span};

#[derive(Debug, Clone)]
pub struct MatchedFilterParams {
    pub arch: Option<String>,
    pub check_zeros: Option<CheckZeros>,
    pub max_zero_fraction: Option<f64>,
}

impl Default for MatchedFilterParams {
    fn default() -> Self {
        Self {
            arch: Some(DEFAULT_ARCH.to_string()),
            check_zeros: Some(CheckZeros::Disabled),
            max_zero_fraction: Some(DEFAULT_MAX_ZERO_FRACTION),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MatchedFilterInput<'a> {
    pub template: ArrayViewD<'a, f32>,
    pub moveouts: ArrayViewD<'a, i32>,
    pub weights: ArrayViewD<'a, f32>,
    pub data: ArrayViewD<'a, f32>,
    pub step: i64,
    pub params: MatchedFilterParams,
}

impl<'a> MatchedFilterInput<'a> {
    /// Views of any rank are accepted here; rank is checked when the filter runs.
    #[inline]
    pub fn from_views<D1: Dimension, D2: Dimension, D3: Dimension, D4: Dimension>(
        template: ArrayView<'a, f32, D1>,
        moveouts: ArrayView<'a, i32, D2>,
        weights: ArrayView<'a, f32, D3>,
        data: ArrayView<'a, f32, D4>,
        step: i64,
        params: MatchedFilterParams,
    ) -> Self {
        Self {
            template: template.into_dyn(),
            moveouts: moveouts.into_dyn(),
            weights: weights.into_dyn(),
            data: data.into_dyn(),
            step,
            params,
        }
    }
    #[inline]
    pub fn with_defaults<D1: Dimension, D2: Dimension, D3: Dimension, D4: Dimension>(
        template: ArrayView<'a, f32, D1>,
        moveouts: ArrayView<'a, i32, D2>,
        weights: ArrayView<'a, f32, D3>,
        data: ArrayView<'a, f32, D4>,
        step: i64,
    ) -> Self {
        Self::from_views(
            template,
            moveouts,
            weights,
            data,
            step,
            MatchedFilterParams::default(),
        )
    }
    #[inline]
    pub fn get_arch(&self) -> &str {
        self.params.arch.as_deref().unwrap_or(DEFAULT_ARCH)
    }
    #[inline]
    pub fn get_check_zeros(&self) -> CheckZeros {
        self.params.check_zeros.unwrap_or_default()
    }
    #[inline]
    pub fn get_max_zero_fraction(&self) -> f64 {
        self.params
            .max_zero_fraction
            .unwrap_or(DEFAULT_MAX_ZERO_FRACTION)
    }
}

#[derive(Debug, Clone)]
pub struct MatchedFilterOutput {
    pub values: Vec<f32>,
    pub rows: usize,
    pub cols: usize,
}

impl MatchedFilterOutput {
    #[inline]
    pub fn row(&self, t: usize) -> &[f32] {
        &self.values[t * self.cols..(t + 1) * self.cols]
    }
    #[inline]
    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }
    pub fn into_array(self) -> Result<Array2<f32>, ShapeError> {
        Array2::from_shape_vec((self.rows, self.cols), self.values)
    }
}

#[derive(Debug, Error)]
pub enum MatchedFilterError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Arch(#[from] ArchError),
    #[error("matched_filter: {arch} backend failed: {reason}")]
    Backend { arch: Arch, reason: String },
    #[error("matched_filter: output length mismatch: expected = {expected}, got = {got}")]
    OutputLengthMismatch { expected: usize, got: usize },
}

/// Every argument is optional here so that a missing one surfaces as an
/// arity error rather than a compile error.
#[derive(Clone, Debug, Default)]
pub struct MatchedFilterBuilder<'a> {
    template: Option<ArrayViewD<'a, f32>>,
    moveouts: Option<ArrayViewD<'a, i32>>,
    weights: Option<ArrayViewD<'a, f32>>,
    data: Option<ArrayViewD<'a, f32>>,
    step: Option<i64>,
    arch: Option<String>,
    check_zeros: Option<CheckZeros>,
    max_zero_fraction: Option<f64>,
    kernel: Kernel,
}

impl<'a> MatchedFilterBuilder<'a> {
    #[inline(always)]
    pub fn new() -> Self {
        Self::default()
    }
    #[inline(always)]
    pub fn template<D: Dimension>(mut self, v: ArrayView<'a, f32, D>) -> Self {
        self.template = Some(v.into_dyn());
        self
    }
    #[inline(always)]
    pub fn moveouts<D: Dimension>(mut self, v: ArrayView<'a, i32, D>) -> Self {
        self.moveouts = Some(v.into_dyn());
        self
    }
    #[inline(always)]
    pub fn weights<D: Dimension>(mut self, v: ArrayView<'a, f32, D>) -> Self {
        self.weights = Some(v.into_dyn());
        self
    }
    #[inline(always)]
    pub fn data<D: Dimension>(mut self, v: ArrayView<'a, f32, D>) -> Self {
        self.data = Some(v.into_dyn());
        self
    }
    #[inline(always)]
    pub fn step(mut self, step: i64) -> Self {
        self.step = Some(step);
        self
    }
    #[inline(always)]
    pub fn arch<S: Into<String>>(mut self, arch: S) -> Self {
        self.arch = Some(arch.into());
        self
    }
    #[inline(always)]
    pub fn check_zeros(mut self, mode: CheckZeros) -> Self {
        self.check_zeros = Some(mode);
        self
    }
    #[inline(always)]
    pub fn max_zero_fraction(mut self, fraction: f64) -> Self {
        self.max_zero_fraction = Some(fraction);
        self
    }
    #[inline(always)]
    pub fn kernel(mut self, k: Kernel) -> Self {
        self.kernel = k;
        self
    }
    #[inline(always)]
    pub fn apply(self) -> Result<MatchedFilterOutput, MatchedFilterError> {
        self.apply_with_sink(&mut io::stderr())
    }
    pub fn apply_with_sink<W: Write + ?Sized>(
        self,
        sink: &mut W,
    ) -> Result<MatchedFilterOutput, MatchedFilterError> {
        let present = [
            self.template.is_some(),
            self.moveouts.is_some(),
            self.weights.is_some(),
            self.data.is_some(),
            self.step.is_some(),
        ];
        check_arguments(&present)?;
        let params = MatchedFilterParams {
            arch: self.arch,
            check_zeros: self.check_zeros,
            max_zero_fraction: self.max_zero_fraction,
        };
        match (self.template, self.moveouts, self.weights, self.data, self.step) {
            (Some(template), Some(moveouts), Some(weights), Some(data), Some(step)) => {
                let input = MatchedFilterInput {
                    template,
                    moveouts,
                    weights,
                    data,
                    step,
                    params,
                };
                matched_filter_with_kernel(&input, self.kernel, sink)
            }
            _ => Err(ValidationError::MissingArguments {
                missing: missing_arguments(&present),
            }
            .into()),
        }
    }
}

/// Validated inputs, gathered into row-major slices.
struct Prepared<'a> {
    dims: Dims,
    step: usize,
    n_windows: usize,
    window_limits: Vec<usize>,
    template: Cow<'a, [f32]>,
    moveouts: Cow<'a, [i32]>,
    weights: Cow<'a, [f32]>,
    data: Cow<'a, [f32]>,
    check_zeros: CheckZeros,
    policy: ZeroRunPolicy,
}

fn prepare<'a>(input: &MatchedFilterInput<'a>) -> Result<Prepared<'a>, MatchedFilterError> {
    let dims = validate_shapes(
        input.template.shape(),
        input.moveouts.shape(),
        input.weights.shape(),
        input.data.shape(),
    )?;
    let step = validate_step(input.step)?;
    let max_zero_fraction = validate_zero_fraction(input.get_max_zero_fraction())?;

    let template = row_major(&input.template);
    let moveouts = row_major(&input.moveouts);
    let weights = row_major(&input.weights);
    let data = row_major(&input.data);
    validate_moveouts(&moveouts, &dims)?;
    validate_weights(&weights, &dims)?;

    let window_limits = template_window_counts(&dims, &moveouts, &weights, step);
    let n_windows = window_limits.iter().copied().max().unwrap_or(0);
    Ok(Prepared {
        dims,
        step,
        n_windows,
        window_limits,
        template,
        moveouts,
        weights,
        data,
        check_zeros: input.get_check_zeros(),
        policy: ZeroRunPolicy { max_zero_fraction },
    })
}

/// Feasible window count of each template.
///
/// A template is bounded by the largest moveout among its own channels with
/// non-zero weight. Zero-weight channels never limit the range.
pub fn template_window_counts(
    dims: &Dims,
    moveouts: &[i32],
    weights: &[f32],
    step: usize,
) -> Vec<usize> {
    let n_channels = dims.n_channels();
    if n_channels == 0 {
        return vec![0; dims.n_templates];
    }
    moveouts
        .chunks_exact(n_channels)
        .zip(weights.chunks_exact(n_channels))
        .map(|(mo, wt)| {
            let max_moveout = mo
                .iter()
                .zip(wt)
                .filter(|(_, w)| **w != 0.0)
                .map(|(m, _)| (*m).max(0) as usize)
                .max()
                .unwrap_or(0);
            windows_for_span(dims, max_moveout, step)
        })
        .collect()
}

/// Output column count: the widest feasible range over all templates.
///
/// Cells of a template past its own range are left at 0.
pub fn window_count(dims: &Dims, moveouts: &[i32], weights: &[f32], step: usize) -> usize {
    template_window_counts(dims, moveouts, weights, step)
        .into_iter()
        .max()
        .unwrap_or(0)
}

#[inline]
fn windows_for_span(dims: &Dims, max_moveout: usize, step: usize) -> usize {
    let span = dims.n_samples_template + max_moveout;
    if span > dims.n_samples_continuous || step == 0 {
        0
    } else {
        (dims.n_samples_continuous - span) / step + 1
    }
}

/// Output shape `(n_templates, n_windows)` without running any backend.
pub fn expected_output_shape(
    input: &MatchedFilterInput,
) -> Result<(usize, usize), MatchedFilterError> {
    let p = prepare(input)?;
    Ok((p.dims.n_templates, p.n_windows))
}

#[inline]
pub fn matched_filter(
    input: &MatchedFilterInput,
) -> Result<MatchedFilterOutput, MatchedFilterError> {
    matched_filter_with_kernel(input, Kernel::Auto, &mut io::stderr())
}

#[inline]
pub fn matched_filter_with_sink<W: Write + ?Sized>(
    input: &MatchedFilterInput,
    sink: &mut W,
) -> Result<MatchedFilterOutput, MatchedFilterError> {
    matched_filter_with_kernel(input, Kernel::Auto, sink)
}

pub fn matched_filter_with_kernel<W: Write + ?Sized>(
    input: &MatchedFilterInput,
    kernel: Kernel,
    sink: &mut W,
) -> Result<MatchedFilterOutput, MatchedFilterError> {
    let p = prepare(input)?;
    let arch = resolve_arch(input.get_arch())?;

    let span = debug_span!(
        "matched_filter",
        arch = %arch,
        n_templates = p.dims.n_templates,
        n_channels = p.dims.n_channels(),
        n_samples = p.dims.n_samples_template,
        n_windows = p.n_windows,
        step = p.step,
    );
    let _enter = span.enter();

    let rows = p.dims.n_templates;
    let cols = p.n_windows;
    let mut values = vec![0.0f32; rows * cols];
    dispatch(arch, &p, kernel, &mut values)?;

    let reports = scan_zero_runs(&values, rows, cols, p.check_zeros, &p.policy);
    for r in &reports {
        debug!(row = r.row, zeros = r.zeros, len = r.len, "zero run flagged");
    }
    emit_zero_runs(&reports, sink);

    Ok(MatchedFilterOutput { values, rows, cols })
}

/// Writes `[n_templates, n_windows]` into `dst`; no diagnostics are emitted.
pub fn matched_filter_into_slice(
    dst: &mut [f32],
    input: &MatchedFilterInput,
    kern: Kernel,
) -> Result<(usize, usize), MatchedFilterError> {
    let p = prepare(input)?;
    let arch = resolve_arch(input.get_arch())?;
    let expected = p.dims.n_templates * p.n_windows;
    if dst.len() != expected {
        return Err(MatchedFilterError::OutputLengthMismatch {
            expected,
            got: dst.len(),
        });
    }
    dispatch(arch, &p, kern, dst)?;
    Ok((p.dims.n_templates, p.n_windows))
}

fn dispatch(
    arch: Arch,
    p: &Prepared,
    kernel: Kernel,
    out: &mut [f32],
) -> Result<(), MatchedFilterError> {
    match arch {
        Arch::Cpu => {
            let chosen = resolve_kernel(kernel);
            debug!(?kernel, ?chosen, "cpu kernel selected");
            matched_filter_cpu(p, chosen, out);
            Ok(())
        }
        #[cfg(feature = "cuda")]
        Arch::Cuda => matched_filter_cuda(p, out),
        other => Err(ArchError::Unavailable(other).into()),
    }
}

#[cfg(feature = "cuda")]
fn matched_filter_cuda(p: &Prepared, out: &mut [f32]) -> Result<(), MatchedFilterError> {
    let backend_err = |reason: String| MatchedFilterError::Backend {
        arch: Arch::Cuda,
        reason,
    };
    let device_id = device_from_env();
    let cuda = CudaMatchedFilter::new(device_id).map_err(|e| backend_err(e.to_string()))?;
    cuda.matched_filter_into_host(
        &p.template,
        &p.moveouts,
        &p.weights,
        &p.data,
        &p.dims,
        p.step,
        &p.window_limits,
        p.n_windows,
        out,
    )
    .map_err(|e| backend_err(e.to_string()))
}

/// De-meaned templates with their norms, plus per-template weight sums.
struct TemplateBank {
    centered: AVec<f64>,
    norms: Vec<f64>,
    weight_sums: Vec<f64>,
}

impl TemplateBank {
    fn new(template: &[f32], weights: &[f32], dims: &Dims) -> Self {
        let nt = dims.n_samples_template;
        let mut centered = AVec::<f64>::with_capacity(CACHELINE_ALIGN, template.len());
        let mut norms = Vec::with_capacity(template.len() / nt);
        for channel in template.chunks_exact(nt) {
            let mean = channel.iter().map(|&v| v as f64).sum::<f64>() / nt as f64;
            let mut sq = 0.0f64;
            for &v in channel {
                let c = v as f64 - mean;
                sq += c * c;
                centered.push(c);
            }
            norms.push(sq.sqrt());
        }
        let weight_sums = weights
            .chunks_exact(dims.n_channels())
            .map(|row| row.iter().map(|&w| w as f64).sum())
            .collect();
        Self {
            centered,
            norms,
            weight_sums,
        }
    }
}

/// Pearson coefficient from one-pass sums over a window of length `n`.
///
/// `dot` is taken against the de-meaned template, so it already equals the
/// covariance numerator. Flat or all-zero windows give 0.
#[inline(always)]
pub(crate) fn channel_coefficient(dot: f64, sum: f64, sum_sq: f64, n: usize, norm: f64) -> f64 {
    if norm == 0.0 {
        return 0.0;
    }
    let var = sum_sq - sum * sum / n as f64;
    if var <= 4.0 * f64::EPSILON * sum_sq {
        return 0.0;
    }
    (dot / (norm * var.sqrt())).clamp(-1.0, 1.0)
}

#[inline(always)]
fn window_sums_scalar(tpl: &[f64], seg: &[f32]) -> (f64, f64, f64) {
    let mut dot = 0.0;
    let mut sum = 0.0;
    let mut sum_sq = 0.0;
    for (&t, &d) in tpl.iter().zip(seg) {
        let d = d as f64;
        dot += t * d;
        sum += d;
        sum_sq += d * d;
    }
    (dot, sum, sum_sq)
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2")]
#[inline]
unsafe fn hsum_pd(v: __m256d) -> f64 {
    let lo = _mm256_castpd256_pd128(v);
    let hi = _mm256_extractf128_pd(v, 1);
    let s = _mm_add_pd(lo, hi);
    let h = _mm_unpackhi_pd(s, s);
    _mm_cvtsd_f64(_mm_add_sd(s, h))
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2,fma")]
unsafe fn window_sums_avx2(tpl: &[f64], seg: &[f32]) -> (f64, f64, f64) {
    let n = seg.len().min(tpl.len());
    let lanes = n / 4 * 4;
    let tp = tpl.as_ptr();
    let sp = seg.as_ptr();

    let mut vdot = _mm256_setzero_pd();
    let mut vsum = _mm256_setzero_pd();
    let mut vsq = _mm256_setzero_pd();
    let mut k = 0;
    while k < lanes {
        let d = _mm256_cvtps_pd(_mm_loadu_ps(sp.add(k)));
        let t = _mm256_loadu_pd(tp.add(k));
        vdot = _mm256_fmadd_pd(t, d, vdot);
        vsum = _mm256_add_pd(vsum, d);
        vsq = _mm256_fmadd_pd(d, d, vsq);
        k += 4;
    }

    let mut dot = hsum_pd(vdot);
    let mut sum = hsum_pd(vsum);
    let mut sum_sq = hsum_pd(vsq);
    while k < n {
        let d = *sp.add(k) as f64;
        dot += *tp.add(k) * d;
        sum += d;
        sum_sq += d * d;
        k += 1;
    }
    (dot, sum, sum_sq)
}

#[inline(always)]
fn window_sums(tpl: &[f64], seg: &[f32], kernel: Kernel) -> (f64, f64, f64) {
    match kernel {
        // SAFETY: `resolve_kernel` only yields Avx2 when AVX2 and FMA were detected.
        #[cfg(target_arch = "x86_64")]
        Kernel::Avx2 => unsafe { window_sums_avx2(tpl, seg) },
        _ => window_sums_scalar(tpl, seg),
    }
}

#[inline(always)]
fn correlate_window(bank: &TemplateBank, p: &Prepared, t: usize, w: usize, kernel: Kernel) -> f32 {
    let n_channels = p.dims.n_channels();
    let nt = p.dims.n_samples_template;
    let nd = p.dims.n_samples_continuous;
    let start = w * p.step;

    let mut acc = 0.0f64;
    for ch in 0..n_channels {
        let idx = t * n_channels + ch;
        let weight = p.weights[idx];
        let norm = bank.norms[idx];
        if weight == 0.0 || norm == 0.0 {
            continue;
        }
        let off = ch * nd + start + p.moveouts[idx] as usize;
        let seg = &p.data[off..off + nt];
        let tpl = &bank.centered[idx * nt..(idx + 1) * nt];
        let (dot, sum, sum_sq) = window_sums(tpl, seg, kernel);
        acc += weight as f64 * channel_coefficient(dot, sum, sum_sq, nt, norm);
    }
    (acc / bank.weight_sums[t]) as f32
}

fn matched_filter_cpu(p: &Prepared, kernel: Kernel, out: &mut [f32]) {
    let cols = p.n_windows;
    if cols == 0 {
        return;
    }
    let bank = TemplateBank::new(&p.template, &p.weights, &p.dims);

    out.par_chunks_mut(cols).enumerate().for_each(|(t, row)| {
        if bank.weight_sums[t] == 0.0 {
            row.fill(0.0);
            return;
        }
        let (feasible, tail) = row.split_at_mut(p.window_limits[t].min(cols));
        tail.fill(0.0);
        feasible
            .par_iter_mut()
            .enumerate()
            .for_each(|(w, cell)| *cell = correlate_window(&bank, p, t, w, kernel));
    });
}

#[cfg(feature = "python")]
fn to_py_err(e: MatchedFilterError) -> PyErr {
    let msg = e.to_string();
    match e {
        MatchedFilterError::Validation(v)
            if v.is_arity() || matches!(v, ValidationError::InvalidElementType { .. }) =>
        {
            PyTypeError::new_err(msg)
        }
        MatchedFilterError::Validation(_) | MatchedFilterError::OutputLengthMismatch { .. } => {
            PyValueError::new_err(msg)
        }
        MatchedFilterError::Arch(ArchError::Unknown(_)) => PyNotImplementedError::new_err(msg),
        MatchedFilterError::Arch(ArchError::Unavailable(_))
        | MatchedFilterError::Backend { .. } => PyRuntimeError::new_err(msg),
    }
}

/// Any array-like as a numpy array of `T`, casting only after the element
/// kind has been accepted. Integer buffers are range-checked before narrowing.
#[cfg(feature = "python")]
fn extract_array<'py, T: numpy::Element>(
    np: &Bound<'py, PyModule>,
    field: &'static str,
    obj: &Bound<'py, PyAny>,
    expected: ElementKind,
    dtype: &str,
) -> PyResult<PyReadonlyArrayDyn<'py, T>> {
    let arr = np.call_method1("asarray", (obj,))?;
    let untyped = arr.downcast::<PyUntypedArray>()?;
    let found = ElementKind::from_numpy_kind(untyped.dtype().kind());
    check_element_kind(field, found, expected).map_err(|e| to_py_err(e.into()))?;
    if let Ok(ro) = arr.extract::<PyReadonlyArrayDyn<'py, T>>() {
        return Ok(ro);
    }
    if expected == ElementKind::Integer && untyped.len() > 0 {
        let min: i128 = untyped.call_method0("min")?.extract()?;
        let max: i128 = untyped.call_method0("max")?.extract()?;
        check_int32_range(field, min, max).map_err(|e| to_py_err(e.into()))?;
    }
    let kwargs = PyDict::new(arr.py());
    kwargs.set_item("casting", "same_kind")?;
    untyped
        .call_method("astype", (dtype,), Some(&kwargs))?
        .extract::<PyReadonlyArrayDyn<'py, T>>()
}

#[cfg(feature = "python")]
fn extract_check_zeros(value: Option<&Bound<'_, PyAny>>) -> Result<CheckZeros, ValidationError> {
    let Some(v) = value.filter(|v| !v.is_none()) else {
        return Ok(CheckZeros::Disabled);
    };
    // also covers numpy.bool_
    if let Ok(flag) = v.extract::<bool>() {
        return Ok(CheckZeros::from(flag));
    }
    match v.extract::<String>() {
        Ok(s) => parse_check_zeros(&s),
        Err(_) => Err(ValidationError::InvalidCheckZeros(
            v.repr().map(|r| r.to_string()).unwrap_or_default(),
        )),
    }
}

#[cfg(feature = "python")]
#[pyfunction(name = "matched_filter")]
#[pyo3(signature = (*args, arch="cpu", check_zeros=None))]
pub fn matched_filter_py<'py>(
    py: Python<'py>,
    args: &Bound<'py, PyTuple>,
    arch: &str,
    check_zeros: Option<&Bound<'py, PyAny>>,
) -> PyResult<Bound<'py, PyArray2<f32>>> {
    check_positional_count(args.len()).map_err(|e| to_py_err(e.into()))?;

    let np = py.import("numpy")?;
    let float_arg = |field: &'static str, idx: usize| -> PyResult<PyReadonlyArrayDyn<'py, f32>> {
        extract_array::<f32>(&np, field, &args.get_item(idx)?, ElementKind::Float, "float32")
    };
    let template = float_arg("template", 0)?;
    let moveouts =
        extract_array::<i32>(&np, "moveouts", &args.get_item(1)?, ElementKind::Integer, "int32")?;
    let weights = float_arg("weights", 2)?;
    let data = float_arg("data", 3)?;
    let step: i64 = args.get_item(4)?.extract()?;
    let mode = extract_check_zeros(check_zeros).map_err(|e| to_py_err(e.into()))?;

    let params = MatchedFilterParams {
        arch: Some(arch.to_string()),
        check_zeros: Some(mode),
        max_zero_fraction: None,
    };
    let input = MatchedFilterInput::from_views(
        template.as_array(),
        moveouts.as_array(),
        weights.as_array(),
        data.as_array(),
        step,
        params,
    );

    let (result, diagnostics) = py.allow_threads(|| {
        let mut sink = Vec::new();
        let result = matched_filter_with_sink(&input, &mut sink);
        (result, sink)
    });
    let output = result.map_err(to_py_err)?;

    if !diagnostics.is_empty() {
        let text = String::from_utf8_lossy(&diagnostics).into_owned();
        let _ = py
            .import("sys")
            .and_then(|sys| sys.getattr("stderr"))
            .and_then(|stderr| stderr.call_method1("write", (text,)));
    }

    let array = output
        .into_array()
        .map_err(|e| PyRuntimeError::new_err(e.to_string()))?;
    Ok(array.into_pyarray(py))
}
