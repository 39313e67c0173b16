use stack_machine_derive::Error;

/// Stable error categories, surfaced by the CLI as process exit codes.
///
/// Every [`MachineError`] variant collapses onto exactly one of these.
#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    /// Unknown mnemonic or opcode, malformed instruction, out-of-bounds
    /// jump, non-finite value where a finite one is required.
    InvalidOperation = 1,
    /// Register name or encoded register index outside `AX..DX`.
    InvalidRegister = 2,
    /// Operand or call stack too shallow for the operation.
    StackUnderflow = 3,
    /// Undefined, duplicated, dangling or misplaced label.
    InvalidLabel = 4,
    /// Input unreadable or output unwritable.
    InvalidFile = 5,
    /// RAM address outside the addressable range.
    InvalidRamAddress = 6,
}

impl ErrorKind {
    /// Returns the process exit code for this category.
    pub const fn exit_code(self) -> i32 {
        self as i32
    }
}

/// Errors that can occur during assembly, disassembly or execution.
#[derive(Debug, Error)]
pub enum MachineError {
    /// Opcode byte whose base bits name no operation, or whose flag bits
    /// form no valid encoding.
    #[error("invalid opcode {opcode:#04x} at offset {offset}")]
    InvalidOpcode { opcode: u8, offset: usize },
    /// Unrecognized mnemonic in assembly source.
    #[error("unknown operation: {name}")]
    UnknownOperation { name: String },
    /// Operation requires an operand but none was written.
    #[error("operation {mnemonic} requires an operand")]
    MissingOperand { mnemonic: &'static str },
    /// Operand written for an operation (or operand form) that takes none.
    #[error("operation {mnemonic} does not take operand {token}")]
    UnexpectedOperand { mnemonic: &'static str, token: String },
    /// More tokens on a line than `mnemonic operand`.
    #[error("unexpected trailing token: {token}")]
    UnexpectedToken { token: String },
    /// Operand token that is neither a register nor a finite numeric literal.
    #[error("invalid operand: {token}")]
    InvalidOperand { token: String },
    /// Bracketed operand naming no register.
    #[error("unknown register: {name}")]
    UnknownRegister { name: String },
    /// Encoded register index outside the register file.
    #[error("register index {index} out of range")]
    InvalidRegisterIndex { index: u8 },
    /// NaN or infinite immediate read from an image.
    #[error("non-finite immediate at offset {offset}")]
    NonFiniteImmediate { offset: usize },
    /// Source line longer than the reader's line buffer.
    #[error("line is {length} bytes, limit is {limit}")]
    LineTooLong { length: usize, limit: usize },
    /// Label definition with an empty name.
    #[error("invalid label definition: {token}")]
    InvalidLabelName { token: String },
    /// Label defined more than once.
    #[error("duplicate label: {name}")]
    DuplicateLabel { name: String },
    /// Jump to a label that is never defined.
    #[error("undefined label: {name}")]
    UndefinedLabel { name: String },
    /// Label at end of source with no operation after it.
    #[error("label {name} has no following operation")]
    DanglingLabel { name: String },
    /// Encoded jump whose target lies outside the image.
    #[error("jump references offset {target} outside the image")]
    LabelTargetOutOfImage { target: i64 },
    /// Synthesized label whose offset does not start an instruction.
    #[error("label {name} at offset {offset} does not start an instruction")]
    MisplacedLabel { name: String, offset: usize },
    /// Image ended in the middle of an instruction, or execution ran past
    /// the last instruction without reaching HLT.
    #[error("unexpected end of image at offset {offset} (needed {requested} more bytes)")]
    UnexpectedEndOfImage { offset: usize, requested: usize },
    /// Taken jump whose destination is outside the image.
    #[error("jump target {target} is outside the image")]
    JumpOutOfBounds { target: i64 },
    /// Operand stack too shallow for the operation.
    #[error("stack underflow in {mnemonic}: needs {required} values, found {depth}")]
    StackUnderflow {
        mnemonic: &'static str,
        required: usize,
        depth: usize,
    },
    /// RET with an empty call stack.
    #[error("RET without a matching CALL")]
    CallStackUnderflow,
    /// RAM address outside `[0, RAM_SIZE)`.
    #[error("RAM address {address} outside addressable memory")]
    RamAddressOutOfRange { address: f64 },
    /// IN reached end of input.
    #[error("input exhausted while reading a value")]
    InputExhausted,
    /// IN read a token that is not a finite decimal value.
    #[error("cannot read a value from input: {token}")]
    InvalidInput { token: String },
    /// File could not be read or written.
    #[error("{path}: {reason}")]
    IoError { path: String, reason: String },
    /// Error wrapped with its 1-based source line number.
    #[error("line {line}: {source}")]
    Source {
        line: usize,
        source: Box<MachineError>,
    },
}

impl MachineError {
    /// Returns the stable category this error belongs to.
    pub fn kind(&self) -> ErrorKind {
        match self {
            MachineError::InvalidOpcode { .. }
            | MachineError::UnknownOperation { .. }
            | MachineError::MissingOperand { .. }
            | MachineError::UnexpectedOperand { .. }
            | MachineError::UnexpectedToken { .. }
            | MachineError::InvalidOperand { .. }
            | MachineError::NonFiniteImmediate { .. }
            | MachineError::LineTooLong { .. }
            | MachineError::UnexpectedEndOfImage { .. }
            | MachineError::JumpOutOfBounds { .. }
            | MachineError::InputExhausted
            | MachineError::InvalidInput { .. } => ErrorKind::InvalidOperation,
            MachineError::UnknownRegister { .. }
            | MachineError::InvalidRegisterIndex { .. } => ErrorKind::InvalidRegister,
            MachineError::StackUnderflow { .. } | MachineError::CallStackUnderflow => {
                ErrorKind::StackUnderflow
            }
            MachineError::InvalidLabelName { .. }
            | MachineError::DuplicateLabel { .. }
            | MachineError::UndefinedLabel { .. }
            | MachineError::DanglingLabel { .. }
            | MachineError::LabelTargetOutOfImage { .. }
            | MachineError::MisplacedLabel { .. } => ErrorKind::InvalidLabel,
            MachineError::IoError { .. } => ErrorKind::InvalidFile,
            MachineError::RamAddressOutOfRange { .. } => ErrorKind::InvalidRamAddress,
            MachineError::Source { source, .. } => source.kind(),
        }
    }

    /// Builds an [`MachineError::IoError`] from a path and an I/O failure.
    pub(crate) fn io(path: &std::path::Path, err: std::io::Error) -> Self {
        MachineError::IoError {
            path: path.display().to_string(),
            reason: err.to_string(),
        }
    }

    /// Attaches a 1-based source line number, unless one is already present.
    pub(crate) fn at_line(self, line: usize) -> Self {
        match self {
            MachineError::Source { .. } => self,
            other => MachineError::Source {
                line,
                source: Box::new(other),
            },
        }
    }
}
