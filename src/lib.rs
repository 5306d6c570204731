pub mod diagnostics;
pub mod language;
pub mod runtime;

pub use runtime::{Interpreter, LoadError};
