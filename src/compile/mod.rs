//! Build-time rule compilation: ordered-slice writer and the Clash YAML
//! front end. The output format is what [`crate::Ruleset`] consumes; the
//! `k2route-gen` binary wraps this module for the command line.

mod clash;
mod writer;

pub use clash::ClashCompiler;
pub use writer::RulesetWriter;
