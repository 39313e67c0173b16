//! Assembly language parser and image builder.
//!
//! Converts human-readable assembly source into a binary image in two
//! passes: the first tokenizes every line, classifies operands and records
//! label offsets; the second emits bytes with all label references resolved.
//!
//! # Syntax
//!
//! ```text
//! IN
//! POP AX
//! loop:
//! PUSH AX
//! PUSH [7]
//! ADD
//! POP [7]
//! JMP loop
//! HLT
//! ```
//!
//! - One statement per line; lines are at most [`MAX_LINE_LENGTH`] bytes
//! - Mnemonics and register names are uppercase and case-sensitive
//! - A label definition is `name:` on its own line
//! - Operands are a numeric literal, a register, or either wrapped in
//!   brackets for the RAM forms; jump operands name a label
//! - Numeric literals use the standard decimal float syntax; non-finite
//!   values are rejected; comments are not supported

use crate::machine::errors::MachineError;
use crate::machine::isa::{
    IMM_OPERAND_WIDTH, JUMP_OPERAND_WIDTH, OperandKind, Operation, RAM_FLAG, REG_FLAG,
    REG_OPERAND_WIDTH, Register,
};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// Longest accepted source line, in bytes.
pub const MAX_LINE_LENGTH: usize = 256;

const LABEL_SUFFIX: char = ':';

/// Label definitions collected by the sizing pass.
///
/// Maps each label name to the byte offset of the instruction that follows
/// its definition. One table lives per assembly run.
struct LabelTable {
    offsets: HashMap<String, usize>,
}

impl LabelTable {
    fn new() -> Self {
        Self {
            offsets: HashMap::new(),
        }
    }

    /// Records `name` at `offset`; a second definition is an error.
    fn define(&mut self, name: &str, offset: usize) -> Result<(), MachineError> {
        if self.offsets.contains_key(name) {
            return Err(MachineError::DuplicateLabel {
                name: name.to_string(),
            });
        }
        self.offsets.insert(name.to_string(), offset);
        Ok(())
    }

    /// Resolves `name` to the byte offset it was defined at.
    fn resolve(&self, name: &str) -> Result<usize, MachineError> {
        self.offsets
            .get(name)
            .copied()
            .ok_or_else(|| MachineError::UndefinedLabel {
                name: name.to_string(),
            })
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.offsets.len()
    }
}

/// Classified operand token of one source line.
#[derive(Debug, Clone, PartialEq)]
enum OperandToken<'a> {
    None,
    Imm(f64),
    Reg(Register),
    RamImm(f64),
    RamReg(Register),
    Label(&'a str),
}

impl OperandToken<'_> {
    /// Returns the opcode flag bits this operand form selects.
    fn flags(&self) -> u8 {
        match self {
            OperandToken::None | OperandToken::Imm(_) | OperandToken::Label(_) => 0,
            OperandToken::Reg(_) => REG_FLAG,
            OperandToken::RamImm(_) => RAM_FLAG,
            OperandToken::RamReg(_) => RAM_FLAG | REG_FLAG,
        }
    }

    /// Returns the encoded operand width in bytes.
    fn width(&self) -> usize {
        match self {
            OperandToken::None => 0,
            OperandToken::Reg(_) | OperandToken::RamReg(_) => REG_OPERAND_WIDTH,
            OperandToken::Imm(_) | OperandToken::RamImm(_) => IMM_OPERAND_WIDTH,
            OperandToken::Label(_) => JUMP_OPERAND_WIDTH,
        }
    }
}

/// One instruction line surviving the sizing pass.
struct ParsedLine<'a> {
    /// 1-based source line number, for diagnostics.
    line_no: usize,
    op: Operation,
    operand: OperandToken<'a>,
    /// Byte offset of the opcode in the emitted image.
    offset: usize,
}

impl ParsedLine<'_> {
    /// Encodes this instruction, resolving label references against `labels`.
    fn emit(&self, labels: &LabelTable, image: &mut Vec<u8>) -> Result<(), MachineError> {
        image.push(self.op as u8 | self.operand.flags());
        match &self.operand {
            OperandToken::None => {}
            OperandToken::Reg(reg) | OperandToken::RamReg(reg) => image.push(reg.index()),
            OperandToken::Imm(value) | OperandToken::RamImm(value) => {
                image.extend_from_slice(&value.to_le_bytes());
            }
            OperandToken::Label(name) => {
                let target = labels
                    .resolve(name)
                    .map_err(|e| e.at_line(self.line_no))?;
                // Deltas are relative to the byte right after the opcode.
                let wide = target as i64 - (self.offset as i64 + 1);
                let delta = i32::try_from(wide)
                    .map_err(|_| MachineError::JumpOutOfBounds { target: wide })?;
                image.extend_from_slice(&delta.to_le_bytes());
            }
        }
        Ok(())
    }
}

/// Returns true for a whole line of the form `name:` with no whitespace.
fn is_label_definition(line: &str) -> bool {
    line.len() > 1 && line.ends_with(LABEL_SUFFIX) && !line.contains(char::is_whitespace)
}

/// Extracts the label name: everything before the first `:`.
fn label_name(line: &str) -> &str {
    match line.find(LABEL_SUFFIX) {
        Some(position) => &line[..position],
        None => line,
    }
}

/// Classifies a value operand: register, numeric literal, or the bracketed
/// RAM form of either.
fn classify_value(token: &str) -> Result<OperandToken<'_>, MachineError> {
    if let Some(inner) = token.strip_prefix('[').and_then(|rest| rest.strip_suffix(']')) {
        if let Some(reg) = Register::from_name(inner) {
            return Ok(OperandToken::RamReg(reg));
        }
        return match inner.parse::<f64>() {
            Ok(value) if value.is_finite() => Ok(OperandToken::RamImm(value)),
            Ok(_) => Err(MachineError::InvalidOperand {
                token: token.to_string(),
            }),
            Err(_) => Err(MachineError::UnknownRegister {
                name: inner.to_string(),
            }),
        };
    }
    if let Some(reg) = Register::from_name(token) {
        return Ok(OperandToken::Reg(reg));
    }
    match token.parse::<f64>() {
        Ok(value) if value.is_finite() => Ok(OperandToken::Imm(value)),
        _ => Err(MachineError::InvalidOperand {
            token: token.to_string(),
        }),
    }
}

/// Classifies the operand token (if any) against what `op` accepts.
fn classify_operand<'a>(
    op: Operation,
    token: Option<&'a str>,
) -> Result<OperandToken<'a>, MachineError> {
    let kind = op.kind();
    let Some(token) = token else {
        return match kind {
            OperandKind::Nullary | OperandKind::Sink => Ok(OperandToken::None),
            OperandKind::Source | OperandKind::Jump => Err(MachineError::MissingOperand {
                mnemonic: op.mnemonic(),
            }),
        };
    };
    match kind {
        OperandKind::Nullary => Err(MachineError::UnexpectedOperand {
            mnemonic: op.mnemonic(),
            token: token.to_string(),
        }),
        OperandKind::Jump => Ok(OperandToken::Label(token)),
        OperandKind::Source | OperandKind::Sink => {
            let operand = classify_value(token)?;
            if kind == OperandKind::Sink && matches!(operand, OperandToken::Imm(_)) {
                // A sink can name a destination, not a literal.
                return Err(MachineError::UnexpectedOperand {
                    mnemonic: op.mnemonic(),
                    token: token.to_string(),
                });
            }
            Ok(operand)
        }
    }
}

/// Assembles a full source string into a binary image.
///
/// Pass 1 tokenizes every line, classifies operands (which fixes each
/// instruction's encoded size) and records label definitions at their byte
/// offsets. Pass 2 walks the parsed lines again and emits bytes, resolving
/// every jump operand against the now-complete label table.
pub fn assemble_source(source: &str) -> Result<Vec<u8>, MachineError> {
    let mut labels = LabelTable::new();
    let mut parsed: Vec<ParsedLine<'_>> = Vec::new();
    let mut offset = 0usize;
    // Most recent label with no instruction after it yet.
    let mut dangling: Option<(&str, usize)> = None;

    for (index, raw) in source.lines().enumerate() {
        let line_no = index + 1;
        if raw.len() > MAX_LINE_LENGTH {
            return Err(MachineError::LineTooLong {
                length: raw.len(),
                limit: MAX_LINE_LENGTH,
            }
            .at_line(line_no));
        }
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }

        if is_label_definition(line) {
            let name = label_name(line);
            if name.is_empty() {
                return Err(MachineError::InvalidLabelName {
                    token: line.to_string(),
                }
                .at_line(line_no));
            }
            labels.define(name, offset).map_err(|e| e.at_line(line_no))?;
            dangling = Some((name, line_no));
            continue;
        }
        dangling = None;

        let mut tokens = line.split_whitespace();
        let Some(mnemonic) = tokens.next() else {
            continue;
        };
        let operand = tokens.next();
        if let Some(extra) = tokens.next() {
            return Err(MachineError::UnexpectedToken {
                token: extra.to_string(),
            }
            .at_line(line_no));
        }

        let op = Operation::from_mnemonic(mnemonic).ok_or_else(|| {
            MachineError::UnknownOperation {
                name: mnemonic.to_string(),
            }
            .at_line(line_no)
        })?;
        let operand = classify_operand(op, operand).map_err(|e| e.at_line(line_no))?;
        let width = 1 + operand.width();
        parsed.push(ParsedLine {
            line_no,
            op,
            operand,
            offset,
        });
        offset += width;
    }

    if let Some((name, line_no)) = dangling {
        return Err(MachineError::DanglingLabel {
            name: name.to_string(),
        }
        .at_line(line_no));
    }

    let mut image = Vec::with_capacity(offset);
    for line in &parsed {
        line.emit(&labels, &mut image)?;
    }
    Ok(image)
}

/// Assembles `input` and writes the binary image to `output`.
///
/// The image is built fully in memory; the output file is only written once
/// assembly has succeeded, so a failed run leaves no partial image behind.
/// Returns the image size in bytes.
pub fn assemble_file(input: &Path, output: &Path) -> Result<usize, MachineError> {
    let source = fs::read_to_string(input).map_err(|e| MachineError::io(input, e))?;
    let image = assemble_source(&source)?;
    fs::write(output, &image).map_err(|e| MachineError::io(output, e))?;
    Ok(image.len())
}
