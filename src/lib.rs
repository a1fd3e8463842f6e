#![warn(clippy::pedantic)]
// Noisy doc/signature lints: would require annotating every pub function
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::must_use_candidate)]
// Style preference: keeping format!("{}", x) over format!("{x}") for readability with complex exprs
#![allow(clippy::uninlined_format_args)]
// Token counts, sizes and durations cross integer widths at the API boundary
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_wrap)]
// The invocation loop is naturally long; splitting it would be artificial
#![allow(clippy::too_many_lines)]
// Tool modules follow the foo::FooTool pattern
#![allow(clippy::module_name_repetitions)]

pub mod agent;
pub mod bus;
pub mod cli;
pub mod config;
pub mod errors;
pub mod providers;
pub(crate) mod utils;

/// Re-exports for fuzz targets. Not part of the public API.
#[doc(hidden)]
pub mod fuzz_api {
    pub use crate::agent::delegation::extract_delegation;
    pub use crate::agent::parsers::repair::repair_json;
    pub use crate::agent::parsers::{BlockType, extract_blocks, parse_function_calls};
}

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
