#[macro_use]
extern crate tracing;

#[macro_use]
mod mac;

pub mod buf;
pub mod cnf;
pub mod dataflow;
pub mod err;
pub mod frame;
pub mod interp;
pub mod ir;
pub mod rel;
pub mod runtime;
pub mod session;
