//! Binary image decoder that reconstructs labeled assembly text.
//!
//! Works in a single pass over the image: every decoded instruction is
//! buffered together with its byte length, and jump targets are turned into
//! synthesized labels (`L0`, `L1`, ... in first-reference order). The flush
//! then walks the buffer once, interleaving label definitions with the
//! decoded lines at their byte offsets.
//!
//! The emitted text parses back through the assembler into the exact same
//! image, labels aside.

use crate::machine::errors::MachineError;
use crate::machine::isa::{
    IMM_OPERAND_WIDTH, JUMP_OPERAND_WIDTH, OperandKind, Operation, REG_FLAG, RAM_FLAG, Register,
    flag_bits, operand_width,
};
use std::collections::HashMap;
use std::fmt::Write as _;
use std::fs;
use std::path::Path;

/// Synthesized jump-target names, keyed by byte offset.
///
/// A name is created the first time a jump references an offset; names are
/// numbered in creation order.
struct LabelCatalog {
    names: HashMap<usize, String>,
}

impl LabelCatalog {
    fn new() -> Self {
        Self {
            names: HashMap::new(),
        }
    }

    /// Returns the label name for `offset`, creating `Ln` on first use.
    fn reference(&mut self, offset: usize) -> &str {
        let next = self.names.len();
        self.names
            .entry(offset)
            .or_insert_with(|| format!("L{next}"))
    }

    /// Removes and returns the label at `offset`, if one was referenced.
    fn take(&mut self, offset: usize) -> Option<String> {
        self.names.remove(&offset)
    }

    /// Returns the lowest-offset label still unplaced after a flush.
    fn leftover(&self) -> Option<(usize, &str)> {
        self.names
            .iter()
            .min_by_key(|(offset, _)| **offset)
            .map(|(offset, name)| (*offset, name.as_str()))
    }
}

/// One decoded instruction: rendered text plus its encoded byte length.
struct DecodedLine {
    text: String,
    width: usize,
}

fn read_array<const N: usize>(image: &[u8], offset: usize) -> Result<[u8; N], MachineError> {
    match image.get(offset..offset + N) {
        Some(bytes) => {
            let mut out = [0u8; N];
            out.copy_from_slice(bytes);
            Ok(out)
        }
        None => Err(MachineError::UnexpectedEndOfImage {
            offset,
            requested: N,
        }),
    }
}

/// Disassembles a binary image into labeled assembly text.
pub fn disassemble_image(image: &[u8]) -> Result<String, MachineError> {
    let mut lines: Vec<DecodedLine> = Vec::new();
    let mut catalog = LabelCatalog::new();
    let mut offset = 0usize;

    while offset < image.len() {
        let opcode = image[offset];
        let op = Operation::try_from(opcode)
            .map_err(|_| MachineError::InvalidOpcode { opcode, offset })?;
        let flags = flag_bits(opcode);
        let Some(width) = operand_width(op, flags) else {
            return Err(MachineError::InvalidOpcode { opcode, offset });
        };

        let operand_offset = offset + 1;
        let mut text = String::from(op.mnemonic());

        if flags & REG_FLAG != 0 {
            let reg = Register::try_from(read_array::<1>(image, operand_offset)?[0])?;
            if flags & RAM_FLAG != 0 {
                let _ = write!(text, " [{}]", reg.name());
            } else {
                let _ = write!(text, " {}", reg.name());
            }
        } else if op.kind() == OperandKind::Jump {
            let delta = i32::from_le_bytes(read_array::<4>(image, operand_offset)?);
            let after = (operand_offset + JUMP_OPERAND_WIDTH) as i64;
            let target = after + i64::from(delta) - JUMP_OPERAND_WIDTH as i64;
            if target < 0 || target > image.len() as i64 {
                return Err(MachineError::LabelTargetOutOfImage { target });
            }
            let name = catalog.reference(target as usize);
            let _ = write!(text, " {name}");
        } else if width == IMM_OPERAND_WIDTH {
            let value = f64::from_le_bytes(read_array::<8>(image, operand_offset)?);
            if !value.is_finite() {
                return Err(MachineError::NonFiniteImmediate {
                    offset: operand_offset,
                });
            }
            if flags & RAM_FLAG != 0 {
                let _ = write!(text, " [{value}]");
            } else {
                let _ = write!(text, " {value}");
            }
        }

        lines.push(DecodedLine {
            text,
            width: 1 + width,
        });
        offset += 1 + width;
    }

    // Flush: interleave label definitions with the buffered lines.
    let mut out = String::new();
    let mut position = 0usize;
    for line in &lines {
        if let Some(name) = catalog.take(position) {
            let _ = writeln!(out, "{name}:");
        }
        let _ = writeln!(out, "{}", line.text);
        position += line.width;
    }
    // A target one past the last instruction is legal.
    if let Some(name) = catalog.take(position) {
        let _ = writeln!(out, "{name}:");
    }
    if let Some((offset, name)) = catalog.leftover() {
        return Err(MachineError::MisplacedLabel {
            name: name.to_string(),
            offset,
        });
    }

    Ok(out)
}

/// Disassembles `input` and writes the recovered source to `output`.
///
/// Returns the size of the written text in bytes.
pub fn disassemble_file(input: &Path, output: &Path) -> Result<usize, MachineError> {
    let image = fs::read(input).map_err(|e| MachineError::io(input, e))?;
    let text = disassemble_image(&image)?;
    fs::write(output, &text).map_err(|e| MachineError::io(output, e))?;
    Ok(text.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::assembler::assemble_source;
    use crate::machine::errors::ErrorKind;

    fn disassemble(image: &[u8]) -> String {
        disassemble_image(image).expect("disassembly failed")
    }

    fn image_of(source: &str) -> Vec<u8> {
        assemble_source(source).expect("assembly failed")
    }

    // ==================== Rendering ====================

    #[test]
    fn nullary_operations_render_one_per_line() {
        assert_eq!(disassemble(&[0x00]), "HLT\n");
        assert_eq!(disassemble(&image_of("IN\nOUT\nADD\nHLT")), "IN\nOUT\nADD\nHLT\n");
    }

    #[test]
    fn immediates_render_in_shortest_form() {
        assert_eq!(disassemble(&image_of("PUSH 2\nHLT")), "PUSH 2\nHLT\n");
        assert_eq!(disassemble(&image_of("PUSH 2.5\nHLT")), "PUSH 2.5\nHLT\n");
        assert_eq!(disassemble(&image_of("PUSH -0.125\nHLT")), "PUSH -0.125\nHLT\n");
    }

    #[test]
    fn register_operands_render_by_name() {
        assert_eq!(disassemble(&image_of("PUSH AX\nHLT")), "PUSH AX\nHLT\n");
        assert_eq!(disassemble(&image_of("POP DX\nHLT")), "POP DX\nHLT\n");
    }

    #[test]
    fn ram_operands_render_bracketed() {
        assert_eq!(disassemble(&image_of("PUSH [7]\nHLT")), "PUSH [7]\nHLT\n");
        assert_eq!(disassemble(&image_of("POP [BX]\nHLT")), "POP [BX]\nHLT\n");
    }

    // ==================== Label synthesis ====================

    #[test]
    fn forward_jump_synthesizes_a_label() {
        let image = image_of("JMP end\nHLT\nend:\nHLT");
        assert_eq!(disassemble(&image), "JMP L0\nHLT\nL0:\nHLT\n");
    }

    #[test]
    fn backward_jump_synthesizes_a_label() {
        let image = image_of("start:\nIN\nOUT\nJMP start\nHLT");
        assert_eq!(disassemble(&image), "L0:\nIN\nOUT\nJMP L0\nHLT\n");
    }

    #[test]
    fn labels_are_numbered_in_reference_order() {
        let image = image_of("JMP second\nfirst:\nHLT\nsecond:\nJMP first\nHLT");
        assert_eq!(
            disassemble(&image),
            "JMP L0\nL1:\nHLT\nL0:\nJMP L1\nHLT\n"
        );
    }

    #[test]
    fn shared_target_reuses_one_label() {
        let image = image_of("loop:\nDUP\nJMPE loop\nJMP loop\nHLT");
        let text = disassemble(&image);
        assert_eq!(text.matches("L0:").count(), 1);
        assert!(!text.contains("L1"));
    }

    #[test]
    fn target_one_past_the_image_gets_a_trailing_label() {
        // JMP to offset 6 == image length.
        let image = [0x10, 5, 0, 0, 0, 0x00];
        assert_eq!(disassemble(&image), "JMP L0\nHLT\nL0:\n");
    }

    // ==================== Round trips ====================

    #[test]
    fn reassembling_disassembly_reproduces_the_image() {
        let sources = [
            "PUSH 2\nPUSH 3\nADD\nOUT\nHLT",
            "start:\nIN\nOUT\nJMP start\nHLT",
            "PUSH [0]\nPOP [AX]\nPUSH BX\nPOP CX\nHLT",
            "CALL f\nHLT\nf:\nPUSH 1\nRET",
            "a:\nPUSH 1\nPUSH 2\nJMPLE a\nJMPG a\nHLT",
        ];
        for source in sources {
            let image = image_of(source);
            let recovered = disassemble(&image);
            assert_eq!(image_of(&recovered), image, "round trip of {source:?}");
        }
    }

    // ==================== Errors ====================

    #[test]
    fn unknown_opcode_is_rejected_with_offset() {
        let err = disassemble_image(&[0x00, 0xFF]).expect_err("expected error");
        assert_eq!(err.kind(), ErrorKind::InvalidOperation);
        assert!(matches!(
            err,
            MachineError::InvalidOpcode {
                opcode: 0xFF,
                offset: 1
            }
        ));
    }

    #[test]
    fn flagged_jump_opcode_is_rejected() {
        let err = disassemble_image(&[0x10 | 0x80, 0]).expect_err("expected error");
        assert_eq!(err.kind(), ErrorKind::InvalidOperation);
    }

    #[test]
    fn truncated_operand_is_rejected() {
        let err = disassemble_image(&[0x05, 1, 2]).expect_err("expected error");
        assert!(matches!(err, MachineError::UnexpectedEndOfImage { .. }));
    }

    #[test]
    fn register_index_out_of_range_is_rejected() {
        let err = disassemble_image(&[0x85, 5]).expect_err("expected error");
        assert_eq!(err.kind(), ErrorKind::InvalidRegister);
    }

    #[test]
    fn non_finite_immediate_is_rejected() {
        let mut image = vec![0x05];
        image.extend_from_slice(&f64::NAN.to_le_bytes());
        let err = disassemble_image(&image).expect_err("expected error");
        assert!(matches!(
            err,
            MachineError::NonFiniteImmediate { offset: 1 }
        ));
    }

    #[test]
    fn target_outside_the_image_is_rejected() {
        let err = disassemble_image(&[0x10, 100, 0, 0, 0, 0x00]).expect_err("expected error");
        assert_eq!(err.kind(), ErrorKind::InvalidLabel);

        let err = disassemble_image(&[0x10, 0xF6, 0xFF, 0xFF, 0xFF, 0x00]).expect_err("negative");
        assert!(matches!(err, MachineError::LabelTargetOutOfImage { .. }));
    }

    #[test]
    fn target_inside_an_instruction_is_rejected() {
        // JMP to offset 2, which is inside the jump's own delta bytes.
        let err = disassemble_image(&[0x10, 1, 0, 0, 0, 0x00]).expect_err("expected error");
        assert_eq!(err.kind(), ErrorKind::InvalidLabel);
        assert!(matches!(
            err,
            MachineError::MisplacedLabel { offset: 2, .. }
        ));
    }
}
