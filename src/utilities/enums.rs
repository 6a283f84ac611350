use std::fmt;

/// Inner-loop variant used by the CPU backend.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Kernel {
	Auto,
	Scalar,
	Avx2,
}

impl Default for Kernel {
	fn default() -> Self {
		Kernel::Auto
	}
}

/// Every backend name the resolver recognizes, compiled in or not.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Arch {
	Cpu,
	Cuda,
	Sycl,
}

impl Arch {
	pub const ALL: [Arch; 3] = [Arch::Cpu, Arch::Cuda, Arch::Sycl];

	#[inline(always)]
	pub const fn name(self) -> &'static str {
		match self {
			Arch::Cpu => "cpu",
			Arch::Cuda => "cuda",
			Arch::Sycl => "sycl",
		}
	}

	/// Spelling used in "not compiled with ... backend" messages.
	#[inline(always)]
	pub const fn display_name(self) -> &'static str {
		match self {
			Arch::Cpu => "CPU",
			Arch::Cuda => "CUDA",
			Arch::Sycl => "SYCL",
		}
	}

	#[inline(always)]
	pub const fn is_compiled(self) -> bool {
		match self {
			Arch::Cpu => true,
			Arch::Cuda => cfg!(feature = "cuda"),
			Arch::Sycl => false,
		}
	}
}

impl fmt::Display for Arch {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.name())
	}
}

/// Which output rows the zero-run diagnostic inspects.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum CheckZeros {
	#[default]
	Disabled,
	First,
	All,
}

impl CheckZeros {
	/// Exact-case parse of the string spellings; `None` for anything else.
	#[inline]
	pub fn parse(value: &str) -> Option<Self> {
		match value {
			"first" => Some(CheckZeros::First),
			"all" => Some(CheckZeros::All),
			_ => None,
		}
	}

	#[inline(always)]
	pub const fn is_enabled(self) -> bool {
		!matches!(self, CheckZeros::Disabled)
	}
}

impl From<bool> for CheckZeros {
	#[inline]
	fn from(enabled: bool) -> Self {
		if enabled {
			CheckZeros::All
		} else {
			CheckZeros::Disabled
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_arch_names_round_trip_display() {
		for arch in Arch::ALL {
			assert_eq!(arch.to_string(), arch.name());
			assert_eq!(arch.display_name().to_ascii_lowercase(), arch.name());
		}
	}

	#[test]
	fn test_cpu_always_compiled_sycl_never() {
		assert!(Arch::Cpu.is_compiled());
		assert!(!Arch::Sycl.is_compiled());
		assert_eq!(Arch::Cuda.is_compiled(), cfg!(feature = "cuda"));
	}

	#[test]
	fn test_check_zeros_parse_is_case_sensitive() {
		assert_eq!(CheckZeros::parse("first"), Some(CheckZeros::First));
		assert_eq!(CheckZeros::parse("all"), Some(CheckZeros::All));
		assert_eq!(CheckZeros::parse("First"), None);
		assert_eq!(CheckZeros::parse(" all"), None);
		assert_eq!(CheckZeros::parse(""), None);
	}

	#[test]
	fn test_check_zeros_from_bool() {
		assert_eq!(CheckZeros::from(true), CheckZeros::All);
		assert_eq!(CheckZeros::from(false), CheckZeros::Disabled);
		assert!(!CheckZeros::default().is_enabled());
	}
}
