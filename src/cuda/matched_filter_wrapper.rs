//! CUDA wrapper for the multichannel matched filter.
//!
//! - PTX load with DetermineTargetFromContext and O2, falling back to plainer JIT options
//! - Host side de-means templates and precomputes norms and weight sums in f64
//! - Each template row is computed up to its own feasible window count; the rest is 0
//! - VRAM estimate with ~64MB headroom; grid.y chunking to <= 65_535 templates

#![cfg(feature = "cuda")]

use crate::utilities::shape_validation::Dims;
use cust::context::Context;
use cust::device::Device;
use cust::function::{BlockSize, GridSize};
use cust::memory::{mem_get_info, CopyDestination, DeviceBuffer};
use cust::module::{Module, ModuleJitOption, OptLevel};
use cust::prelude::*;
use cust::stream::{Stream, StreamFlags};
use std::env;
use std::ffi::c_void;
use std::fmt;
use tracing::{debug, warn};

const MAX_GRID_Y: usize = 65_535;
const HEADROOM_BYTES: usize = 64 * 1024 * 1024;

#[derive(Debug)]
pub enum CudaMatchedFilterError {
    Cuda(String),
    InvalidInput(String),
}

impl fmt::Display for CudaMatchedFilterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CudaMatchedFilterError::Cuda(e) => write!(f, "CUDA error: {}", e),
            CudaMatchedFilterError::InvalidInput(e) => write!(f, "Invalid input: {}", e),
        }
    }
}

impl std::error::Error for CudaMatchedFilterError {}

impl From<cust::error::CudaError> for CudaMatchedFilterError {
    fn from(e: cust::error::CudaError) -> Self {
        CudaMatchedFilterError::Cuda(e.to_string())
    }
}

/// Host-side template statistics uploaded next to the raw buffers.
struct TemplateStats {
    centered: Vec<f32>,
    norms: Vec<f64>,
    weight_sums: Vec<f64>,
}

impl TemplateStats {
    fn compute(template: &[f32], weights: &[f32], dims: &Dims) -> Self {
        let nt = dims.n_samples_template;
        let mut centered = Vec::with_capacity(template.len());
        let mut norms = Vec::with_capacity(template.len() / nt);
        for channel in template.chunks_exact(nt) {
            let mean = channel.iter().map(|&v| v as f64).sum::<f64>() / nt as f64;
            let mut sq = 0.0f64;
            for &v in channel {
                let c = v as f64 - mean;
                sq += c * c;
                centered.push(c as f32);
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

pub struct CudaMatchedFilter {
    module: Module,
    stream: Stream,
    _context: Context,
    device_id: u32,
}

impl CudaMatchedFilter {
    pub fn new(device_id: usize) -> Result<Self, CudaMatchedFilterError> {
        cust::init(CudaFlags::empty())?;
        let device = Device::get_device(device_id as u32)?;
        let context = Context::new(device)?;

        let ptx: &str = include_str!(concat!(env!("OUT_DIR"), "/matched_filter_kernel.ptx"));
        let module = Module::from_ptx(
            ptx,
            &[
                ModuleJitOption::DetermineTargetFromContext,
                ModuleJitOption::OptLevel(OptLevel::O2),
            ],
        )
        .or_else(|_| Module::from_ptx(ptx, &[ModuleJitOption::DetermineTargetFromContext]))
        .or_else(|_| Module::from_ptx(ptx, &[]))?;

        let stream = Stream::new(StreamFlags::NON_BLOCKING, None)?;
        debug!(device_id, "matched_filter CUDA module loaded");

        Ok(Self {
            module,
            stream,
            _context: context,
            device_id: device_id as u32,
        })
    }

    #[inline]
    fn mem_check_enabled() -> bool {
        env::var("CUDA_MEM_CHECK")
            .map(|v| v != "0" && v.to_lowercase() != "false")
            .unwrap_or(true)
    }

    fn will_fit(required_bytes: usize, headroom_bytes: usize) -> bool {
        if !Self::mem_check_enabled() {
            return true;
        }
        match mem_get_info() {
            Ok((free, _)) => required_bytes.saturating_add(headroom_bytes) <= free,
            Err(_) => true,
        }
    }

    fn to_i32(name: &str, v: usize) -> Result<i32, CudaMatchedFilterError> {
        i32::try_from(v).map_err(|_| {
            CudaMatchedFilterError::InvalidInput(format!("{} = {} exceeds i32 range", name, v))
        })
    }

    fn check_lengths(
        template: &[f32],
        moveouts: &[i32],
        weights: &[f32],
        data: &[f32],
        dims: &Dims,
        window_limits: &[usize],
        n_windows: usize,
        out: &[f32],
    ) -> Result<(), CudaMatchedFilterError> {
        let table = dims.n_templates * dims.n_channels();
        let checks = [
            ("template", template.len(), table * dims.n_samples_template),
            ("moveouts", moveouts.len(), table),
            ("weights", weights.len(), table),
            ("data", data.len(), dims.n_channels() * dims.n_samples_continuous),
            ("window_limits", window_limits.len(), dims.n_templates),
            ("out", out.len(), dims.n_templates * n_windows),
        ];
        for (name, got, expected) in checks {
            if got != expected {
                return Err(CudaMatchedFilterError::InvalidInput(format!(
                    "{} length mismatch (expected {}, got {})",
                    name, expected, got
                )));
            }
        }
        if let Some(&limit) = window_limits.iter().find(|&&l| l > n_windows) {
            return Err(CudaMatchedFilterError::InvalidInput(format!(
                "window limit {} exceeds n_windows {}",
                limit, n_windows
            )));
        }
        Ok(())
    }

    /// Correlates every template against its feasible windows and copies the
    /// `[n_templates, n_windows]` result into `out`.
    pub fn matched_filter_into_host(
        &self,
        template: &[f32],
        moveouts: &[i32],
        weights: &[f32],
        data: &[f32],
        dims: &Dims,
        step: usize,
        window_limits: &[usize],
        n_windows: usize,
        out: &mut [f32],
    ) -> Result<(), CudaMatchedFilterError> {
        Self::check_lengths(
            template,
            moveouts,
            weights,
            data,
            dims,
            window_limits,
            n_windows,
            out,
        )?;
        if n_windows == 0 {
            return Ok(());
        }

        let stats = TemplateStats::compute(template, weights, dims);
        let limits = window_limits
            .iter()
            .map(|&l| Self::to_i32("window_limit", l))
            .collect::<Result<Vec<i32>, _>>()?;

        let f32_bytes = std::mem::size_of::<f32>();
        let f64_bytes = std::mem::size_of::<f64>();
        let required = stats.centered.len() * f32_bytes
            + stats.norms.len() * f64_bytes
            + moveouts.len() * std::mem::size_of::<i32>()
            + weights.len() * f32_bytes
            + stats.weight_sums.len() * f64_bytes
            + limits.len() * std::mem::size_of::<i32>()
            + data.len() * f32_bytes
            + out.len() * f32_bytes;
        if !Self::will_fit(required, HEADROOM_BYTES) {
            let need_mib = (required + HEADROOM_BYTES).div_ceil(1 << 20);
            warn!(device_id = self.device_id, need_mib, "insufficient VRAM for matched_filter");
            return Err(CudaMatchedFilterError::Cuda(format!(
                "insufficient VRAM (need ~{} MiB incl. headroom)",
                need_mib
            )));
        }

        let d_templates = DeviceBuffer::from_slice(&stats.centered)?;
        let d_norms = DeviceBuffer::from_slice(&stats.norms)?;
        let d_moveouts = DeviceBuffer::from_slice(moveouts)?;
        let d_weights = DeviceBuffer::from_slice(weights)?;
        let d_weight_sums = DeviceBuffer::from_slice(&stats.weight_sums)?;
        let d_limits = DeviceBuffer::from_slice(&limits)?;
        let d_data = DeviceBuffer::from_slice(data)?;
        let mut d_out: DeviceBuffer<f32> =
            unsafe { DeviceBuffer::uninitialized_async(out.len(), &self.stream) }?;

        self.launch(
            &d_templates,
            &d_norms,
            &d_moveouts,
            &d_weights,
            &d_weight_sums,
            &d_limits,
            &d_data,
            dims,
            step,
            n_windows,
            &mut d_out,
        )?;
        self.stream.synchronize()?;
        d_out.copy_to(out)?;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn launch(
        &self,
        d_templates: &DeviceBuffer<f32>,
        d_norms: &DeviceBuffer<f64>,
        d_moveouts: &DeviceBuffer<i32>,
        d_weights: &DeviceBuffer<f32>,
        d_weight_sums: &DeviceBuffer<f64>,
        d_limits: &DeviceBuffer<i32>,
        d_data: &DeviceBuffer<f32>,
        dims: &Dims,
        step: usize,
        n_windows: usize,
        d_out: &mut DeviceBuffer<f32>,
    ) -> Result<(), CudaMatchedFilterError> {
        let func = self.module.get_function("matched_filter_f32")?;

        let n_channels = dims.n_channels();
        let nt = dims.n_samples_template;
        let block_x: u32 = if n_windows >= 4096 { 256 } else { 128 };
        let grid_x = Self::to_i32("n_windows", n_windows.div_ceil(block_x as usize))? as u32;
        let block: BlockSize = (block_x, 1, 1).into();

        let mut n_channels_i = Self::to_i32("n_channels", n_channels)?;
        let mut nt_i = Self::to_i32("n_samples_template", nt)?;
        let mut nd_i = Self::to_i32("n_samples_data", dims.n_samples_continuous)?;
        let mut step_i = Self::to_i32("step", step)?;
        let mut n_windows_i = Self::to_i32("n_windows", n_windows)?;

        let f32_bytes = std::mem::size_of::<f32>() as u64;
        let f64_bytes = std::mem::size_of::<f64>() as u64;
        let i32_bytes = std::mem::size_of::<i32>() as u64;

        let mut launched = 0usize;
        while launched < dims.n_templates {
            let chunk = (dims.n_templates - launched).min(MAX_GRID_Y);
            let grid: GridSize = (grid_x.max(1), chunk as u32, 1).into();
            let table_off = (launched * n_channels) as u64;
            unsafe {
                let mut tpl = d_templates
                    .as_device_ptr()
                    .as_raw()
                    .saturating_add(table_off * nt as u64 * f32_bytes);
                let mut norms = d_norms
                    .as_device_ptr()
                    .as_raw()
                    .saturating_add(table_off * f64_bytes);
                let mut mo = d_moveouts
                    .as_device_ptr()
                    .as_raw()
                    .saturating_add(table_off * i32_bytes);
                let mut wts = d_weights
                    .as_device_ptr()
                    .as_raw()
                    .saturating_add(table_off * f32_bytes);
                let mut wsums = d_weight_sums
                    .as_device_ptr()
                    .as_raw()
                    .saturating_add(launched as u64 * f64_bytes);
                let mut limits = d_limits
                    .as_device_ptr()
                    .as_raw()
                    .saturating_add(launched as u64 * i32_bytes);
                let mut data = d_data.as_device_ptr().as_raw();
                let mut chunk_i = chunk as i32;
                let mut outp = d_out
                    .as_device_ptr()
                    .as_raw()
                    .saturating_add((launched * n_windows) as u64 * f32_bytes);
                let args: &mut [*mut c_void] = &mut [
                    &mut tpl as *mut _ as *mut c_void,
                    &mut norms as *mut _ as *mut c_void,
                    &mut mo as *mut _ as *mut c_void,
                    &mut wts as *mut _ as *mut c_void,
                    &mut wsums as *mut _ as *mut c_void,
                    &mut limits as *mut _ as *mut c_void,
                    &mut data as *mut _ as *mut c_void,
                    &mut chunk_i as *mut _ as *mut c_void,
                    &mut n_channels_i as *mut _ as *mut c_void,
                    &mut nt_i as *mut _ as *mut c_void,
                    &mut nd_i as *mut _ as *mut c_void,
                    &mut step_i as *mut _ as *mut c_void,
                    &mut n_windows_i as *mut _ as *mut c_void,
                    &mut outp as *mut _ as *mut c_void,
                ];
                self.stream.launch(&func, grid, block, 0, args)?;
            }
            launched += chunk;
        }
        debug!(
            templates = dims.n_templates,
            n_windows, block_x, "matched_filter_f32 launched"
        );
        Ok(())
    }
}
