pub mod opportunity;
pub mod signal;
pub mod types;
