//! Argument, shape and element-type checks run before any backend work.

use crate::utilities::enums::CheckZeros;
use thiserror::Error;

/// Positional arguments of the entry point, in call order.
pub const REQUIRED_ARGUMENTS: [&str; 5] = ["template", "moveouts", "weights", "data", "step"];

const TEMPLATE_AXES: [&str; 4] = ["n_templates", "n_stations", "n_components", "n_samples"];
const TABLE_AXES: [&str; 3] = ["n_templates", "n_stations", "n_components"];
const DATA_AXES: [&str; 3] = ["n_stations", "n_components", "n_samples"];

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    #[error(
        "matched_filter: missing {} required positional argument(s): {}",
        .missing.len(),
        quote_all(.missing)
    )]
    MissingArguments { missing: Vec<&'static str> },
    #[error("matched_filter: takes {expected} positional arguments but {given} were given")]
    TooManyArguments { expected: usize, given: usize },
    #[error("matched_filter: '{field}' must have {expected} dimensions, got {got}")]
    InvalidRank {
        field: &'static str,
        expected: usize,
        got: usize,
    },
    #[error("matched_filter: '{field}' is empty (axis {axis} '{name}' has length 0)")]
    EmptyInput {
        field: &'static str,
        axis: usize,
        name: &'static str,
    },
    #[error(
        "matched_filter: '{field}' axis {axis} ('{name}') has length {got}, expected {expected} to match 'template'"
    )]
    DimensionMismatch {
        field: &'static str,
        axis: usize,
        name: &'static str,
        expected: usize,
        got: usize,
    },
    #[error("matched_filter: '{field}' must have {expected} elements, got {found}")]
    InvalidElementType {
        field: &'static str,
        expected: ElementKind,
        found: ElementKind,
    },
    #[error("matched_filter: '{field}' value {value} does not fit in int32")]
    IntegerOutOfRange { field: &'static str, value: i128 },
    #[error("matched_filter: 'step' must be a positive integer, got {step}")]
    InvalidStep { step: i64 },
    #[error(
        "matched_filter: 'moveouts' must be non-negative, got {value} at [{template}, {station}, {component}]"
    )]
    NegativeMoveout {
        template: usize,
        station: usize,
        component: usize,
        value: i32,
    },
    #[error(
        "matched_filter: 'weights' must be finite and non-negative, got {value} at [{template}, {station}, {component}]"
    )]
    InvalidWeight {
        template: usize,
        station: usize,
        component: usize,
        value: f32,
    },
    #[error("matched_filter: Unknown 'check_zeros': {0} (expected a bool, 'first' or 'all')")]
    InvalidCheckZeros(String),
    #[error("matched_filter: zero fraction threshold must be in [0, 1), got {0}")]
    InvalidZeroFraction(f64),
}

impl ValidationError {
    /// Wrong number of positional arguments, as opposed to bad contents.
    #[inline]
    pub fn is_arity(&self) -> bool {
        matches!(
            self,
            ValidationError::MissingArguments { .. } | ValidationError::TooManyArguments { .. }
        )
    }
}

fn quote_all(names: &[&'static str]) -> String {
    names
        .iter()
        .map(|n| format!("'{}'", n))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Coarse element classification, independent of width.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ElementKind {
    Float,
    Integer,
    Other(char),
}

impl ElementKind {
    /// Maps a numpy `dtype.kind` code.
    #[inline]
    pub fn from_numpy_kind(kind: u8) -> Self {
        match kind {
            b'f' => ElementKind::Float,
            b'i' | b'u' => ElementKind::Integer,
            other => ElementKind::Other(other as char),
        }
    }
}

impl std::fmt::Display for ElementKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ElementKind::Float => f.write_str("floating-point"),
            ElementKind::Integer => f.write_str("integer"),
            ElementKind::Other(code) => write!(f, "dtype kind '{}'", code),
        }
    }
}

/// Dimensions shared by all four buffers once they agree.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Dims {
    pub n_templates: usize,
    pub n_stations: usize,
    pub n_components: usize,
    pub n_samples_template: usize,
    pub n_samples_continuous: usize,
}

impl Dims {
    #[inline(always)]
    pub fn n_channels(&self) -> usize {
        self.n_stations * self.n_components
    }
}

/// `present[i]` tells whether the i-th positional argument was supplied.
pub fn check_arguments(present: &[bool]) -> Result<(), ValidationError> {
    if present.len() > REQUIRED_ARGUMENTS.len() {
        return Err(ValidationError::TooManyArguments {
            expected: REQUIRED_ARGUMENTS.len(),
            given: present.len(),
        });
    }
    let missing = missing_arguments(present);
    if missing.is_empty() {
        Ok(())
    } else {
        Err(ValidationError::MissingArguments { missing })
    }
}

/// Names of the required arguments absent from `present`, in call order.
pub fn missing_arguments(present: &[bool]) -> Vec<&'static str> {
    REQUIRED_ARGUMENTS
        .iter()
        .enumerate()
        .filter(|(i, _)| !present.get(*i).copied().unwrap_or(false))
        .map(|(_, name)| *name)
        .collect()
}

/// Arity check for a purely positional call with `given` arguments.
#[inline]
pub fn check_positional_count(given: usize) -> Result<(), ValidationError> {
    let present: Vec<bool> = (0..given).map(|_| true).collect();
    check_arguments(&present)
}

/// Rejects integer buffers whose extremes would wrap when narrowed to `i32`.
pub fn check_int32_range(field: &'static str, min: i128, max: i128) -> Result<(), ValidationError> {
    let range = i128::from(i32::MIN)..=i128::from(i32::MAX);
    match [min, max].into_iter().find(|v| !range.contains(v)) {
        Some(value) => Err(ValidationError::IntegerOutOfRange { field, value }),
        None => Ok(()),
    }
}

#[inline]
pub fn check_element_kind(
    field: &'static str,
    found: ElementKind,
    expected: ElementKind,
) -> Result<(), ValidationError> {
    if found == expected {
        Ok(())
    } else {
        Err(ValidationError::InvalidElementType {
            field,
            expected,
            found,
        })
    }
}

#[inline]
pub fn validate_step(step: i64) -> Result<usize, ValidationError> {
    if step < 1 {
        return Err(ValidationError::InvalidStep { step });
    }
    usize::try_from(step).map_err(|_| ValidationError::InvalidStep { step })
}

fn check_rank(
    field: &'static str,
    shape: &[usize],
    expected: usize,
) -> Result<(), ValidationError> {
    if shape.len() != expected {
        return Err(ValidationError::InvalidRank {
            field,
            expected,
            got: shape.len(),
        });
    }
    Ok(())
}

fn check_non_empty(
    field: &'static str,
    shape: &[usize],
    names: &[&'static str],
) -> Result<(), ValidationError> {
    match shape.iter().position(|&n| n == 0) {
        Some(axis) => Err(ValidationError::EmptyInput {
            field,
            axis,
            name: names[axis],
        }),
        None => Ok(()),
    }
}

fn check_axes(
    field: &'static str,
    shape: &[usize],
    expected: &[usize],
    names: &[&'static str],
) -> Result<(), ValidationError> {
    for (axis, (&got, &want)) in shape.iter().zip(expected).enumerate() {
        if got != want {
            return Err(ValidationError::DimensionMismatch {
                field,
                axis,
                name: names[axis],
                expected: want,
                got,
            });
        }
    }
    Ok(())
}

/// Rank, emptiness and cross-buffer agreement of the four input shapes.
pub fn validate_shapes(
    template: &[usize],
    moveouts: &[usize],
    weights: &[usize],
    data: &[usize],
) -> Result<Dims, ValidationError> {
    check_rank("template", template, 4)?;
    check_rank("moveouts", moveouts, 3)?;
    check_rank("weights", weights, 3)?;
    check_rank("data", data, 3)?;

    check_non_empty("template", template, &TEMPLATE_AXES)?;
    check_non_empty("moveouts", moveouts, &TABLE_AXES)?;
    check_non_empty("weights", weights, &TABLE_AXES)?;
    check_non_empty("data", data, &DATA_AXES)?;

    check_axes("moveouts", moveouts, &template[..3], &TABLE_AXES)?;
    check_axes("weights", weights, &template[..3], &TABLE_AXES)?;
    check_axes("data", &data[..2], &template[1..3], &DATA_AXES)?;

    Ok(Dims {
        n_templates: template[0],
        n_stations: template[1],
        n_components: template[2],
        n_samples_template: template[3],
        n_samples_continuous: data[2],
    })
}

#[inline]
fn unravel(flat: usize, dims: &Dims) -> (usize, usize, usize) {
    let per_template = dims.n_channels();
    let t = flat / per_template;
    let rem = flat % per_template;
    (t, rem / dims.n_components, rem % dims.n_components)
}

/// `moveouts` in row-major `[n_templates, n_stations, n_components]` order.
pub fn validate_moveouts(moveouts: &[i32], dims: &Dims) -> Result<(), ValidationError> {
    match moveouts.iter().position(|&m| m < 0) {
        Some(flat) => {
            let (template, station, component) = unravel(flat, dims);
            Err(ValidationError::NegativeMoveout {
                template,
                station,
                component,
                value: moveouts[flat],
            })
        }
        None => Ok(()),
    }
}

/// `weights` in row-major `[n_templates, n_stations, n_components]` order.
pub fn validate_weights(weights: &[f32], dims: &Dims) -> Result<(), ValidationError> {
    match weights.iter().position(|&w| !w.is_finite() || w < 0.0) {
        Some(flat) => {
            let (template, station, component) = unravel(flat, dims);
            Err(ValidationError::InvalidWeight {
                template,
                station,
                component,
                value: weights[flat],
            })
        }
        None => Ok(()),
    }
}

/// String spelling of the diagnostic mode; case is significant.
#[inline]
pub fn parse_check_zeros(value: &str) -> Result<CheckZeros, ValidationError> {
    CheckZeros::parse(value).ok_or_else(|| ValidationError::InvalidCheckZeros(value.to_string()))
}

#[inline]
pub fn validate_zero_fraction(fraction: f64) -> Result<f64, ValidationError> {
    if fraction.is_finite() && (0.0..1.0).contains(&fraction) {
        Ok(fraction)
    } else {
        Err(ValidationError::InvalidZeroFraction(fraction))
    }
}
