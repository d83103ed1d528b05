//! CLI command implementations.

pub(crate) mod check;
pub(crate) mod plan;
pub(crate) mod run;
