//! Static checks for ISA stability.
//!
//! These tests pin the instruction table (opcodes, flags, operand widths)
//! so that any accidental change to the binary format fails loudly. Images
//! written by one build must decode identically in every other.
