//! Core stack-machine interpreter.
//!
//! Executes a binary image over an operand stack of 64-bit floats, a call
//! stack of 32-bit return addresses, four scalar registers and a linear RAM.
//! Instructions run in address order until `HLT` or the first error; there
//! is no recovery and no rollback.
//!
//! # Architecture
//!
//! - **Operand stack**: grows with `PUSH`/`IN`/`DUP`, shrinks with
//!   `POP`/`OUT` and the arithmetic operations
//! - **Registers**: `AX`..`DX`, zero-initialized
//! - **RAM**: [`RAM_SIZE`] float cells with an artificial per-access
//!   latency (see [`MachineConfig`])
//! - **Control flow**: relative jumps; `CALL` pushes the return address on a
//!   separate call stack which `RET` pops
//!
//! I/O is injected: the machine reads `IN` values from any [`BufRead`] and
//! writes `OUT` lines to any [`Write`], so tests can drive it with memory
//! buffers while the CLI wires it to stdin/stdout.

mod ram;
mod registers;

use crate::machine::errors::MachineError;
use crate::machine::isa::{
    IMM_OPERAND_WIDTH, JUMP_OPERAND_WIDTH, Operand, OperandKind, Operation, REG_FLAG, RAM_FLAG,
    Register, flag_bits, operand_width,
};
use ram::Ram;
use registers::Registers;
use std::fs;
use std::io::{BufRead, StdinLock, Stdout, Write, stdin, stdout};
use std::path::Path;
use std::time::Duration;

pub use ram::RAM_SIZE;

/// Default artificial latency applied to every RAM access.
pub const RAM_ACCESS_DELAY: Duration = Duration::from_millis(10);

/// Values within this distance compare as equal in `JMPE`/`JMPNE`.
const EQUALITY_EPSILON: f64 = 1e-9;

/// Interactive prompt printed before each `IN` read.
const INPUT_PROMPT: &str = "> ";

/// Tunable execution parameters.
#[derive(Clone, Copy, Debug)]
pub struct MachineConfig {
    /// Latency added to every RAM load and store.
    pub ram_access_delay: Duration,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            ram_access_delay: RAM_ACCESS_DELAY,
        }
    }
}

/// Outcome of one executed instruction.
enum Flow {
    Continue,
    Halt,
}

/// Stack-machine interpreter over a loaded binary image.
///
/// Owns the image and all execution state for the duration of one `run`.
pub struct StackMachine<R, W> {
    image: Vec<u8>,
    /// Instruction pointer: byte offset of the next fetch.
    ip: usize,
    stack: Vec<f64>,
    call_stack: Vec<u32>,
    registers: Registers,
    ram: Ram,
    input: R,
    output: W,
}

impl StackMachine<StdinLock<'static>, Stdout> {
    /// Loads an image from disk and wires the machine to stdin/stdout.
    pub fn from_file(path: &Path, config: MachineConfig) -> Result<Self, MachineError> {
        let image = fs::read(path).map_err(|e| MachineError::io(path, e))?;
        Ok(Self::with_io(image, config, stdin().lock(), stdout()))
    }
}

impl<R: BufRead, W: Write> StackMachine<R, W> {
    /// Creates a machine over `image` with explicit I/O endpoints.
    pub fn with_io(image: Vec<u8>, config: MachineConfig, input: R, output: W) -> Self {
        Self {
            image,
            ip: 0,
            stack: Vec::new(),
            call_stack: Vec::new(),
            registers: Registers::new(),
            ram: Ram::new(config.ram_access_delay),
            input,
            output,
        }
    }

    /// Executes the loaded image until `HLT` or the first error.
    pub fn run(&mut self) -> Result<(), MachineError> {
        loop {
            let offset = self.ip;
            let opcode = self.read_u8()?;
            let op = Operation::try_from(opcode)
                .map_err(|_| MachineError::InvalidOpcode { opcode, offset })?;
            let operand = self.read_operand(op, opcode, offset)?;
            match self.exec(op, operand)? {
                Flow::Continue => {}
                Flow::Halt => return Ok(()),
            }
        }
    }

    /// Reads and validates the operand bytes for `op`.
    ///
    /// Afterwards the instruction pointer sits on the next instruction.
    fn read_operand(
        &mut self,
        op: Operation,
        opcode: u8,
        offset: usize,
    ) -> Result<Operand, MachineError> {
        let flags = flag_bits(opcode);
        let Some(width) = operand_width(op, flags) else {
            return Err(MachineError::InvalidOpcode { opcode, offset });
        };
        if flags & REG_FLAG != 0 {
            let reg = Register::try_from(self.read_u8()?)?;
            return Ok(if flags & RAM_FLAG != 0 {
                Operand::RamReg(reg)
            } else {
                Operand::Reg(reg)
            });
        }
        if op.kind() == OperandKind::Jump {
            let bytes = self.read_array::<JUMP_OPERAND_WIDTH>()?;
            return Ok(Operand::Jump(i32::from_le_bytes(bytes)));
        }
        if width == IMM_OPERAND_WIDTH {
            let operand_offset = self.ip;
            let value = f64::from_le_bytes(self.read_array::<IMM_OPERAND_WIDTH>()?);
            if !value.is_finite() {
                return Err(MachineError::NonFiniteImmediate {
                    offset: operand_offset,
                });
            }
            return Ok(if flags & RAM_FLAG != 0 {
                Operand::RamImm(value)
            } else {
                Operand::Imm(value)
            });
        }
        Ok(Operand::None)
    }

    /// Executes one decoded instruction.
    fn exec(&mut self, op: Operation, operand: Operand) -> Result<Flow, MachineError> {
        self.check_depth(op)?;
        match op {
            Operation::Hlt => return Ok(Flow::Halt),
            Operation::In => self.op_in()?,
            Operation::Out => self.op_out()?,
            Operation::Pop => self.op_pop(operand)?,
            Operation::Push => self.op_push(operand)?,
            Operation::Add | Operation::Sub | Operation::Mul | Operation::Div => {
                self.op_arith(op);
            }
            Operation::Sqrt => {
                let x = self.pop();
                self.stack.push(x.sqrt());
            }
            Operation::Dup => {
                let top = self.pop();
                self.stack.push(top);
                self.stack.push(top);
            }
            Operation::Jmp
            | Operation::Jmpe
            | Operation::Jmpne
            | Operation::Jmpl
            | Operation::Jmple
            | Operation::Jmpg
            | Operation::Jmpge
            | Operation::Call => self.op_jump(op, operand)?,
            Operation::Ret => self.op_ret()?,
        }
        Ok(Flow::Continue)
    }

    /// Verifies the operand stack holds what `op` is about to consume.
    fn check_depth(&self, op: Operation) -> Result<(), MachineError> {
        let required = op.stack_demand();
        if self.stack.len() < required {
            return Err(MachineError::StackUnderflow {
                mnemonic: op.mnemonic(),
                required,
                depth: self.stack.len(),
            });
        }
        Ok(())
    }

    /// Pops the operand stack. Depth is pre-checked in [`Self::check_depth`].
    fn pop(&mut self) -> f64 {
        self.stack.pop().unwrap_or_default()
    }

    fn op_in(&mut self) -> Result<(), MachineError> {
        write!(self.output, "{INPUT_PROMPT}").map_err(output_error)?;
        self.output.flush().map_err(output_error)?;
        let token = self.next_token()?;
        let value: f64 = token
            .parse()
            .map_err(|_| MachineError::InvalidInput {
                token: token.clone(),
            })?;
        if !value.is_finite() {
            return Err(MachineError::InvalidInput { token });
        }
        self.stack.push(value);
        Ok(())
    }

    fn op_out(&mut self) -> Result<(), MachineError> {
        let value = self.pop();
        writeln!(self.output, "{value}").map_err(output_error)?;
        Ok(())
    }

    fn op_pop(&mut self, operand: Operand) -> Result<(), MachineError> {
        let value = self.pop();
        match operand {
            Operand::None => {}
            Operand::Reg(reg) => self.registers.set(reg, value),
            Operand::RamImm(address) => self.ram.store(address, value)?,
            Operand::RamReg(reg) => {
                let address = self.registers.get(reg);
                self.ram.store(address, value)?;
            }
            // POP never decodes an immediate or a delta.
            Operand::Imm(_) | Operand::Jump(_) => {}
        }
        Ok(())
    }

    fn op_push(&mut self, operand: Operand) -> Result<(), MachineError> {
        let value = match operand {
            Operand::Imm(value) => value,
            Operand::Reg(reg) => self.registers.get(reg),
            Operand::RamImm(address) => self.ram.load(address)?,
            Operand::RamReg(reg) => self.ram.load(self.registers.get(reg))?,
            // PUSH always decodes an operand.
            Operand::None | Operand::Jump(_) => return Ok(()),
        };
        self.stack.push(value);
        Ok(())
    }

    fn op_arith(&mut self, op: Operation) {
        let rhs = self.pop();
        let lhs = self.pop();
        let result = match op {
            Operation::Add => lhs + rhs,
            Operation::Sub => lhs - rhs,
            Operation::Mul => lhs * rhs,
            _ => lhs / rhs,
        };
        self.stack.push(result);
    }

    fn op_jump(&mut self, op: Operation, operand: Operand) -> Result<(), MachineError> {
        let Operand::Jump(delta) = operand else {
            // Jumps always decode a delta.
            return Ok(());
        };
        let taken = match op {
            Operation::Jmp | Operation::Call => true,
            _ => {
                let rhs = self.pop();
                let lhs = self.pop();
                match op {
                    Operation::Jmpe => (lhs - rhs).abs() < EQUALITY_EPSILON,
                    Operation::Jmpne => (lhs - rhs).abs() >= EQUALITY_EPSILON,
                    Operation::Jmpl => lhs < rhs,
                    Operation::Jmple => lhs <= rhs,
                    Operation::Jmpg => lhs > rhs,
                    _ => lhs >= rhs,
                }
            }
        };
        if !taken {
            return Ok(());
        }
        if op == Operation::Call {
            self.call_stack.push(self.ip as u32);
        }
        // The delta is relative to the byte after the opcode; `ip` has
        // already moved past the whole instruction.
        let target = self.ip as i64 + i64::from(delta) - JUMP_OPERAND_WIDTH as i64;
        if target < 0 || target >= self.image.len() as i64 {
            return Err(MachineError::JumpOutOfBounds { target });
        }
        self.ip = target as usize;
        Ok(())
    }

    fn op_ret(&mut self) -> Result<(), MachineError> {
        let Some(address) = self.call_stack.pop() else {
            return Err(MachineError::CallStackUnderflow);
        };
        self.ip = address as usize;
        Ok(())
    }

    /// Reads one byte at the instruction pointer and advances it.
    fn read_u8(&mut self) -> Result<u8, MachineError> {
        let byte = *self
            .image
            .get(self.ip)
            .ok_or(MachineError::UnexpectedEndOfImage {
                offset: self.ip,
                requested: 1,
            })?;
        self.ip += 1;
        Ok(byte)
    }

    /// Reads `N` bytes at the instruction pointer and advances it.
    fn read_array<const N: usize>(&mut self) -> Result<[u8; N], MachineError> {
        let bytes = self.image.get(self.ip..self.ip + N).ok_or(
            MachineError::UnexpectedEndOfImage {
                offset: self.ip,
                requested: N,
            },
        )?;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        self.ip += N;
        Ok(out)
    }

    /// Reads the next whitespace-delimited token from the input stream.
    fn next_token(&mut self) -> Result<String, MachineError> {
        let mut token: Vec<u8> = Vec::new();
        loop {
            let buf = self.input.fill_buf().map_err(input_error)?;
            if buf.is_empty() {
                break;
            }
            let mut consumed = 0;
            let mut done = false;
            for &byte in buf {
                consumed += 1;
                if byte.is_ascii_whitespace() {
                    if !token.is_empty() {
                        done = true;
                        break;
                    }
                } else {
                    token.push(byte);
                }
            }
            self.input.consume(consumed);
            if done {
                break;
            }
        }
        if token.is_empty() {
            return Err(MachineError::InputExhausted);
        }
        String::from_utf8(token).map_err(|e| MachineError::InvalidInput {
            token: String::from_utf8_lossy(e.as_bytes()).into_owned(),
        })
    }
}

fn input_error(err: std::io::Error) -> MachineError {
    MachineError::IoError {
        path: "<input>".to_string(),
        reason: err.to_string(),
    }
}

fn output_error(err: std::io::Error) -> MachineError {
    MachineError::IoError {
        path: "<output>".to_string(),
        reason: err.to_string(),
    }
}
