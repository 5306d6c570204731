pub mod channel;
pub mod config;
pub mod environment;
pub mod error;
pub mod imports;
pub mod interpreter;
pub mod value;

pub use interpreter::{Interpreter, LoadError};
