// sdfc — static dataflow scheduling and code-generation engine
//
// Library root. Engine phases are added as modules here.

pub mod codegen;
pub mod desc;
pub mod diag;
pub mod director;
pub mod model;
pub mod pass;
pub mod pipeline;
pub mod registry;
pub mod resolve;
pub mod schedule;
