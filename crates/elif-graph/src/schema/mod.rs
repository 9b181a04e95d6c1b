//! Schema Module - Field grammar, entity graph and derived edges

pub mod edges;
pub mod graph;
pub mod parser;

pub use edges::*;
pub use graph::*;
pub use parser::*;
