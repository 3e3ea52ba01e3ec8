use std::fmt;

use crate::Word;

pub type VmResult<T> = Result<T, RuntimeError>;

/// The two heap regions, used to say which one an error refers to.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Arena {
    Byte,
    Word,
}

/// Every fatal condition the machine can hit.
///
/// Soft conditions (unknown opcodes, unresolved natives, cast mismatches)
/// are logged and never become a `RuntimeError`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    /// A tagged value was built from an integer outside its bound.
    OutOfRange { value: i64, min: i64, max: i64 },
    /// Byte and method blobs must be 1..=255 bytes long.
    BlobLength { len: usize },
    ArrayLength { len: i64, max: usize },
    ArenaExhausted { arena: Arena, requested: usize },
    BadAddress { address: u32, arena: Arena },
    RowIndex { index: i64, length: usize },
    LocalIndex(usize),
    UninitializedLocal(usize),
    /// Local slot 0 of the entry method was read before any argument was stored there.
    MissingInput,
    UnsupportedArity { params: u8 },
    ArityMismatch { expected: u8, got: usize },
    StackUnderflow,
    StackOverflow { depth: usize },
    CallStackUnderflow,
    TypeError { expected: &'static str, got: Word },
    NegativeDivision,
    InvalidJump { target: i64 },
    ParseInt(String),
    ConstantPoolFull,
    ClassNotFound(String),
    NoFrame,
    Output(String),
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfRange { value, min, max } => {
                write!(f, "{value} is out of range {min}..={max}")
            }
            Self::BlobLength { len } => {
                write!(f, "blob of {len} bytes does not fit in 1..=255")
            }
            Self::ArrayLength { len, max } => {
                write!(f, "array length {len} is outside 0..={max}")
            }
            Self::ArenaExhausted { arena, requested } => {
                write!(f, "{arena:?} arena exhausted allocating {requested}")
            }
            Self::BadAddress { address, arena } => {
                write!(f, "address {address} is not inside the {arena:?} arena")
            }
            Self::RowIndex { index, length } => {
                write!(f, "index {index} out of bounds for row of length {length}")
            }
            Self::LocalIndex(index) => {
                write!(f, "local variable {index} requested, only 0..=7 exist")
            }
            Self::UninitializedLocal(index) => {
                write!(f, "local variable {index} read before it was stored")
            }
            Self::MissingInput => {
                write!(f, "missing input from user which should be in local 0")
            }
            Self::UnsupportedArity { params } => {
                write!(f, "method takes {params} parameters, at most 3 are supported")
            }
            Self::ArityMismatch { expected, got } => {
                write!(f, "method expects {expected} parameters but {got} were passed")
            }
            Self::StackUnderflow => write!(f, "operand stack underflow"),
            Self::StackOverflow { depth } => {
                write!(f, "call stack overflow at depth {depth}")
            }
            Self::CallStackUnderflow => {
                write!(f, "value return from the outermost frame")
            }
            Self::TypeError { expected, got } => {
                write!(f, "expected {expected}, got {got}")
            }
            Self::NegativeDivision => {
                write!(f, "division with a negative operand")
            }
            Self::InvalidJump { target } => {
                write!(f, "jump target {target} is outside the method")
            }
            Self::ParseInt(text) => write!(f, "cannot parse {text:?} as an integer"),
            Self::ConstantPoolFull => write!(f, "class constant pool is full"),
            Self::ClassNotFound(name) => write!(f, "class {name} not found"),
            Self::NoFrame => write!(f, "engine has no current frame"),
            Self::Output(message) => write!(f, "writing program output failed: {message}"),
        }
    }
}

impl std::error::Error for RuntimeError {}

impl From<std::io::Error> for RuntimeError {
    fn from(value: std::io::Error) -> Self {
        Self::Output(value.to_string())
    }
}
