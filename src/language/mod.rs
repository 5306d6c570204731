pub mod ast;
pub mod compiler;
pub mod errors;
pub mod span;
pub mod types;
