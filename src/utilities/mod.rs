pub mod arch_validation;
pub mod enums;
pub mod helpers;
pub mod shape_validation;
pub mod zero_check;
