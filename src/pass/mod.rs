//! IR-to-IR transformation passes run before instruction selection.

pub mod stack2reg;
