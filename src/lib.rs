//! Toolchain for a small stack-based virtual machine.
//!
//! Provides the shared instruction table plus the three front-ends built on
//! top of it: a two-pass assembler, a label-synthesizing disassembler and a
//! fetch-decode-execute interpreter.

pub mod machine;
pub mod utils;
