use crate::language::errors::{CompileError, CompileErrors};
use crate::runtime::error::RuntimeError;
use miette::{Diagnostic, GraphicalReportHandler, GraphicalTheme, NamedSource, SourceSpan};
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
#[error("{message}")]
#[diagnostic(code(gofast::compile))]
pub struct CompileDiagnostic {
    #[source_code]
    src: NamedSource,
    #[label("{label}")]
    span: SourceSpan,
    #[help]
    help: Option<String>,
    message: String,
    label: String,
}

impl CompileDiagnostic {
    pub fn from_error(src: NamedSource, err: &CompileError) -> Self {
        Self {
            src,
            span: err.to_source_span(),
            help: err.help.clone(),
            message: err.message.clone(),
            label: err.node.clone().unwrap_or_else(|| "here".to_string()),
        }
    }
}

/// Renders every error against `source` as plain text, one report per error.
pub fn render_compile_errors(name: &str, source: &str, errors: &CompileErrors) -> String {
    let handler = GraphicalReportHandler::new_themed(GraphicalTheme::unicode_nocolor());
    let mut out = String::new();
    for err in &errors.errors {
        let diagnostic = CompileDiagnostic::from_error(NamedSource::new(name, source.to_string()), err);
        if handler.render_report(&mut out, &diagnostic).is_err() {
            out.push_str(&err.message);
        }
        out.push('\n');
    }
    out
}

pub fn emit_compile_errors(name: &str, source: &str, errors: &CompileErrors) {
    eprint!("{}", render_compile_errors(name, source, errors));
}

pub fn report_runtime_error(error: &RuntimeError) {
    eprintln!("Runtime error: {}", error);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::language::span::Span;

    #[test]
    fn renders_message_and_help() {
        let source = "package main\nfunc f() { <-x }\n";
        let errors = CompileErrors::new(vec![CompileError::new(
            "invalid operation: <-x (expecting channel, found int)",
            Span::new(24, 27),
        )
        .with_help("only channels can be received from")]);
        let rendered = render_compile_errors("main.go", source, &errors);
        assert!(rendered.contains("expecting channel, found int"));
        assert!(rendered.contains("only channels can be received from"));
        assert!(rendered.contains("main.go"));
    }
}
