//! Backend selection from the caller's `arch` string.
//!
//! Normalization (trim + ASCII lowercase) is a pure step that yields either a
//! known [`Arch`] or [`ArchSpec::Unknown`] carrying the raw input, so the
//! unknown/unavailable distinction never depends on message text.

use crate::utilities::enums::Arch;
use thiserror::Error;

/// Backend names compiled into this build.
#[cfg(feature = "cuda")]
pub const AVAILABLE_BACKENDS: &[&str] = &["cpu", "cuda"];
#[cfg(not(feature = "cuda"))]
pub const AVAILABLE_BACKENDS: &[&str] = &["cpu"];

pub const DEFAULT_ARCH: &str = "cpu";

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ArchSpec {
    Known(Arch),
    Unknown(String),
}

#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ArchError {
    #[error("Unknown 'arch': {0}")]
    Unknown(String),
    #[error("not compiled with {} backend", .0.display_name())]
    Unavailable(Arch),
}

#[inline]
pub fn parse_arch(raw: &str) -> ArchSpec {
    let normalized = raw.trim().to_ascii_lowercase();
    Arch::ALL
        .into_iter()
        .find(|arch| arch.name() == normalized)
        .map_or_else(|| ArchSpec::Unknown(raw.to_string()), ArchSpec::Known)
}

pub fn resolve_arch(raw: &str) -> Result<Arch, ArchError> {
    match parse_arch(raw) {
        ArchSpec::Known(arch) if arch.is_compiled() => Ok(arch),
        ArchSpec::Known(arch) => Err(ArchError::Unavailable(arch)),
        ArchSpec::Unknown(raw) => Err(ArchError::Unknown(raw)),
    }
}

#[inline]
pub fn available_archs() -> impl Iterator<Item = Arch> {
    Arch::ALL.into_iter().filter(|arch| arch.is_compiled())
}
