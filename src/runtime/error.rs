use thiserror::Error;

pub type RuntimeResult<T> = Result<T, RuntimeError>;

#[derive(Clone, Debug, Error, PartialEq)]
pub enum RuntimeError {
    #[error("send on closed channel")]
    SendOnClosed,
    #[error("close of closed channel")]
    CloseOfClosed,
    #[error("close of nil channel")]
    CloseOfNil,
    #[error("{op} on nil channel blocks forever")]
    NilChannel { op: &'static str },
    #[error("index out of range [{index}] with length {len}")]
    IndexOutOfRange { index: i64, len: usize },
    #[error("slice bounds out of range [{low}:{high}] with capacity {cap}")]
    SliceOutOfRange { low: i64, high: i64, cap: usize },
    #[error("integer divide by zero")]
    DivideByZero,
    #[error("assignment to entry in nil map")]
    NilMap,
    #[error("call of nil function")]
    NilFunc,
    #[error("interface conversion: {found} is not {expected}")]
    TypeAssertion { found: String, expected: String },
    #[error("panic: {message}")]
    Panic { message: String },
    #[error("execution exceeded the limit of {limit} steps")]
    StepLimit { limit: u64 },
    #[error("unknown function `{name}`")]
    UnknownFunction { name: String },
    #[error("function `{name}` expected {expected} arguments but received {received}")]
    ArityMismatch {
        name: String,
        expected: usize,
        received: usize,
    },
    #[error("{package}.{name}: {message}")]
    Native {
        package: String,
        name: String,
        message: String,
    },
    #[error("{op} does not produce valid UTF-8")]
    InvalidUtf8 { op: &'static str },
    #[error("type mismatch: {message}")]
    TypeMismatch { message: String },
}

impl RuntimeError {
    pub fn mismatch(message: impl Into<String>) -> Self {
        RuntimeError::TypeMismatch {
            message: message.into(),
        }
    }

    pub fn panic(message: impl Into<String>) -> Self {
        RuntimeError::Panic {
            message: message.into(),
        }
    }
}
