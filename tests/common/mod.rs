//! Shared fixtures for the integration tests.
#![allow(dead_code)]

use ndarray::{Array3, Array4};

/// Compare two arrays with a tolerance
pub fn assert_array_close(actual: &[f32], expected: &[f32], rtol: f32, atol: f32, name: &str) {
    assert_eq!(
        actual.len(),
        expected.len(),
        "{}: Length mismatch: actual {} vs expected {}",
        name,
        actual.len(),
        expected.len()
    );

    for (i, (&a, &e)) in actual.iter().zip(expected.iter()).enumerate() {
        let diff = (a - e).abs();
        let tol = atol + rtol * e.abs();
        assert!(
            diff <= tol,
            "{}: Value mismatch at index {}: actual {} vs expected {} (diff: {}, tol: {})",
            name,
            i,
            a,
            e,
            diff,
            tol
        );
    }
}

/// Four all-zero buffers of shape 1x1x1x1 / 1x1x1.
pub struct ZeroData {
    pub template: Array4<f32>,
    pub moveouts: Array3<i32>,
    pub weights: Array3<f32>,
    pub data: Array3<f32>,
}

impl ZeroData {
    pub fn new() -> Self {
        Self {
            template: Array4::zeros((1, 1, 1, 1)),
            moveouts: Array3::zeros((1, 1, 1)),
            weights: Array3::zeros((1, 1, 1)),
            data: Array3::zeros((1, 1, 1)),
        }
    }
}

/// Synthetic station/component recordings: a few sinusoids plus deterministic noise.
pub fn synthetic_data(n_stations: usize, n_components: usize, n_samples: usize) -> Array3<f32> {
    Array3::from_shape_fn((n_stations, n_components, n_samples), |(s, c, k)| {
        let x = k as f32;
        let phase = (s * 7 + c * 3) as f32;
        (x * 0.031 + phase).sin() + 0.4 * (x * 0.177 - phase).cos() + 0.3 * hash_noise(s, c, k)
    })
}

/// Value in [-1, 1) from a position hash.
pub fn hash_noise(a: usize, b: usize, c: usize) -> f32 {
    let mut h = (a as u64)
        .wrapping_mul(0x9E37_79B9_7F4A_7C15)
        .wrapping_add((b as u64).wrapping_mul(0xC2B2_AE3D_27D4_EB4F))
        .wrapping_add((c as u64).wrapping_mul(0x1656_67B1_9E37_79F9));
    h ^= h >> 29;
    h = h.wrapping_mul(0xBF58_476D_1CE4_E5B9);
    h ^= h >> 32;
    ((h >> 40) as f32 / (1u64 << 24) as f32) * 2.0 - 1.0
}

/// Cuts templates out of `data` so that window `origin` is an exact match.
pub fn templates_from(
    data: &Array3<f32>,
    moveouts: &Array3<i32>,
    n_samples_template: usize,
    origin: usize,
) -> Array4<f32> {
    let (n_templates, n_stations, n_components) = moveouts.dim();
    Array4::from_shape_fn(
        (n_templates, n_stations, n_components, n_samples_template),
        |(t, s, c, k)| data[[s, c, origin + moveouts[[t, s, c]] as usize + k]],
    )
}

/// Textbook two-pass evaluation of the weighted mean Pearson coefficient.
///
/// Each template covers its own feasible windows; the rest of its row stays 0.
pub fn reference_matched_filter(
    template: &Array4<f32>,
    moveouts: &Array3<i32>,
    weights: &Array3<f32>,
    data: &Array3<f32>,
    step: usize,
) -> (usize, usize, Vec<f32>) {
    let (n_templates, n_stations, n_components, nt) = template.dim();
    let nd = data.dim().2;
    let limits: Vec<usize> = (0..n_templates)
        .map(|t| {
            let mut max_mo = 0usize;
            for s in 0..n_stations {
                for c in 0..n_components {
                    if weights[[t, s, c]] != 0.0 {
                        max_mo = max_mo.max(moveouts[[t, s, c]] as usize);
                    }
                }
            }
            if nt + max_mo > nd {
                0
            } else {
                (nd - nt - max_mo) / step + 1
            }
        })
        .collect();
    let n_windows = limits.iter().copied().max().unwrap_or(0);

    let mut out = vec![0.0f32; n_templates * n_windows];
    for t in 0..n_templates {
        let wsum: f64 = weights
            .slice(ndarray::s![t, .., ..])
            .iter()
            .map(|&w| w as f64)
            .sum();
        if wsum == 0.0 {
            continue;
        }
        for w in 0..limits[t] {
            let mut acc = 0.0f64;
            for s in 0..n_stations {
                for c in 0..n_components {
                    let weight = weights[[t, s, c]] as f64;
                    if weight == 0.0 {
                        continue;
                    }
                    let start = w * step + moveouts[[t, s, c]] as usize;
                    let x: Vec<f64> = (0..nt).map(|k| template[[t, s, c, k]] as f64).collect();
                    let y: Vec<f64> = (0..nt).map(|k| data[[s, c, start + k]] as f64).collect();
                    acc += weight * pearson(&x, &y);
                }
            }
            out[t * n_windows + w] = (acc / wsum) as f32;
        }
    }
    (n_templates, n_windows, out)
}

fn pearson(x: &[f64], y: &[f64]) -> f64 {
    let n = x.len() as f64;
    let mx = x.iter().sum::<f64>() / n;
    let my = y.iter().sum::<f64>() / n;
    let mut sxy = 0.0;
    let mut sxx = 0.0;
    let mut syy = 0.0;
    for (a, b) in x.iter().zip(y) {
        sxy += (a - mx) * (b - my);
        sxx += (a - mx) * (a - mx);
        syy += (b - my) * (b - my);
    }
    if sxx == 0.0 || syy <= 1e-12 * y.iter().map(|v| v * v).sum::<f64>() {
        return 0.0;
    }
    (sxy / (sxx.sqrt() * syy.sqrt())).clamp(-1.0, 1.0)
}
