//! x86-64 target backend: instruction selection, register allocation,
//! encoding, unwind info, and the code holder that glues them together
//! (spec.md §4.6-§4.10).

pub mod abi;
pub mod encode;
pub mod holder;
pub mod machine;
pub mod regalloc;
pub mod registers;
pub mod select;
pub mod unwind;
