//! Stream reassembly: incremental upstream deltas into complete messages.

mod reassembler;

pub use reassembler::Reassembler;
