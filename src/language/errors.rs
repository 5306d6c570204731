use crate::language::span::Span;
use miette::{Diagnostic, SourceSpan};
use std::fmt;
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct CompileError {
    pub message: String,
    pub span: Span,
    pub help: Option<String>,
    /// Rendering of the offending syntax node, when one is available.
    pub node: Option<String>,
}

impl CompileError {
    pub fn new(message: impl Into<String>, span: Span) -> Self {
        Self {
            message: message.into(),
            span,
            help: None,
            node: None,
        }
    }

    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }

    pub fn with_node(mut self, node: impl fmt::Display) -> Self {
        self.node = Some(node.to_string());
        self
    }

    pub fn to_source_span(&self) -> SourceSpan {
        self.span.into()
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CompileError {}

#[derive(Clone, Debug, Default, Error, Diagnostic)]
#[error("{}", summarize(.errors))]
#[diagnostic(code(gofast::compile))]
pub struct CompileErrors {
    pub errors: Vec<CompileError>,
}

fn summarize(errors: &[CompileError]) -> String {
    match errors {
        [] => "no errors".to_string(),
        [only] => only.message.clone(),
        [first, rest @ ..] => format!("{} (and {} more errors)", first.message, rest.len()),
    }
}

impl CompileErrors {
    pub fn new(errors: Vec<CompileError>) -> Self {
        Self { errors }
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn push(&mut self, error: CompileError) {
        self.errors.push(error);
    }

    pub fn messages(&self) -> Vec<&str> {
        self.errors.iter().map(|err| err.message.as_str()).collect()
    }

    pub fn into_result(self) -> Result<(), CompileErrors> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl From<CompileError> for CompileErrors {
    fn from(error: CompileError) -> Self {
        Self {
            errors: vec![error],
        }
    }
}
