//! The JIT runtime: executable memory, OS unwind registration, and symbol
//! tables for compiled `IRContext`s (spec.md §4.11, component M). Ported
//! from `JITRuntime`/`NativeSymbolResolver`.

mod memory;
mod runtime;
mod symbols;

pub use runtime::{JITRuntime, JitStackFrame};
