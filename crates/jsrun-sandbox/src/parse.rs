//! Parsing front-end: `oxc_parser` lowered into the crate's closed AST.
//!
//! Sources are parsed as classic scripts (not modules), matching how the
//! generated program is later compiled by V8.

use oxc_allocator::Allocator;
use oxc_ast::ast as js;
use oxc_parser::{ParseOptions, Parser};
use oxc_span::{GetSpan, SourceType, Span};

use crate::ast::{
    CallExpression, CatchClause, Declaration, Expression, Program, Statement, StatementKind,
    TryStatement, VariableDeclaration, VariableDeclarator, VariableKind,
};
use crate::error::SyntaxDiagnostic;

/// A parser for the grammar shared by the validator and the instrumenter.
///
/// Regular expression literal bodies are checked as well, since V8 refuses
/// to compile a script containing an invalid one.
pub(crate) fn script_parser<'a>(allocator: &'a Allocator, source: &'a str) -> Parser<'a> {
    Parser::new(allocator, source, SourceType::default().with_script(true)).with_options(
        ParseOptions {
            parse_regular_expression: true,
            ..ParseOptions::default()
        },
    )
}

/// Parse `source` into an owned [`Program`].
///
/// Fails with the first parser diagnostic. Early errors that only semantic
/// analysis detects are the validator's job, see [`crate::validator::validate`].
pub fn parse(source: &str) -> Result<Program, SyntaxDiagnostic> {
    let allocator = Allocator::default();
    let ret = script_parser(&allocator, source).parse();
    let lines = LineIndex::new(source);

    if ret.panicked {
        return Err(SyntaxDiagnostic::unlocated("parser panicked on malformed input"));
    }
    let first = first_diagnostic(
        source,
        &lines,
        ret.errors.iter().map(|e| {
            (
                e.message.to_string(),
                e.labels
                    .as_ref()
                    .and_then(|labels| labels.first())
                    .map(|label| label.offset()),
            )
        }),
    );
    if let Some(diagnostic) = first {
        return Err(diagnostic);
    }

    let lowering = Lowering {
        source,
        lines: &lines,
    };
    Ok(lowering.program(&ret.program))
}

/// Pick the diagnostic with the lowest source offset and locate it.
///
/// Diagnostics without a location sort after located ones.
pub(crate) fn first_diagnostic(
    source: &str,
    lines: &LineIndex,
    errors: impl IntoIterator<Item = (String, Option<usize>)>,
) -> Option<SyntaxDiagnostic> {
    let (message, offset) = errors
        .into_iter()
        .min_by_key(|(_, offset)| offset.unwrap_or(usize::MAX))?;
    Some(match offset {
        Some(offset) => {
            let (line, column) = lines.line_column(source, offset);
            SyntaxDiagnostic::at(message, line, column)
        }
        None => SyntaxDiagnostic::unlocated(message),
    })
}

/// Byte offset to line/column mapping for one source text.
///
/// Recognises every ECMAScript line terminator; `\r\n` counts as one.
#[derive(Debug, Clone)]
pub(crate) struct LineIndex {
    line_starts: Vec<usize>,
}

impl LineIndex {
    pub(crate) fn new(source: &str) -> Self {
        let mut line_starts = vec![0];
        let mut chars = source.char_indices().peekable();
        while let Some((offset, ch)) = chars.next() {
            match ch {
                '\r' => {
                    if matches!(chars.peek(), Some((_, '\n'))) {
                        chars.next();
                        line_starts.push(offset + 2);
                    } else {
                        line_starts.push(offset + 1);
                    }
                }
                '\n' => line_starts.push(offset + 1),
                '\u{2028}' | '\u{2029}' => line_starts.push(offset + ch.len_utf8()),
                _ => {}
            }
        }
        Self { line_starts }
    }

    /// 1-based line containing `offset`.
    pub(crate) fn line(&self, offset: usize) -> u32 {
        let line = self.line_starts.partition_point(|&start| start <= offset);
        u32::try_from(line).unwrap_or(u32::MAX)
    }

    /// 1-based line and 1-based column (in characters) of `offset`.
    pub(crate) fn line_column(&self, source: &str, offset: usize) -> (u32, u32) {
        let line = self.line(offset);
        let start = self.line_starts[(line as usize).saturating_sub(1)];
        let column = source
            .get(start..offset.min(source.len()))
            .map_or(0, |prefix| prefix.chars().count());
        (line, u32::try_from(column + 1).unwrap_or(u32::MAX))
    }
}

/// Converts the parser's arena AST into owned nodes.
struct Lowering<'s> {
    source: &'s str,
    lines: &'s LineIndex,
}

impl Lowering<'_> {
    fn text(&self, span: Span) -> String {
        self.source
            .get(span.start as usize..span.end as usize)
            .unwrap_or_default()
            .to_string()
    }

    fn line(&self, span: Span) -> Option<u32> {
        Some(self.lines.line(span.start as usize))
    }

    fn program(&self, program: &js::Program<'_>) -> Program {
        Program {
            directives: program.directives.iter().map(|d| self.text(d.span)).collect(),
            body: self.body(&program.body),
        }
    }

    fn body(&self, statements: &[js::Statement<'_>]) -> Vec<Statement> {
        statements.iter().map(|s| self.statement(s)).collect()
    }

    fn statement(&self, stmt: &js::Statement<'_>) -> Statement {
        let span = stmt.span();
        let kind = match stmt {
            js::Statement::ExpressionStatement(es) => {
                StatementKind::Expression(self.expression(&es.expression))
            }
            js::Statement::VariableDeclaration(decl) => self.variable_declaration(decl),
            js::Statement::FunctionDeclaration(func) => {
                StatementKind::FunctionDeclaration(Declaration {
                    name: func.id.as_ref().map(|id| id.name.to_string()),
                    source: self.text(span),
                })
            }
            js::Statement::ClassDeclaration(class) => StatementKind::ClassDeclaration(Declaration {
                name: class.id.as_ref().map(|id| id.name.to_string()),
                source: self.text(span),
            }),
            js::Statement::ReturnStatement(ret) => {
                StatementKind::Return(ret.argument.as_ref().map(|e| self.expression(e)))
            }
            js::Statement::ThrowStatement(throw) => {
                StatementKind::Throw(self.expression(&throw.argument))
            }
            js::Statement::BlockStatement(block) => StatementKind::Block(self.body(&block.body)),
            js::Statement::TryStatement(try_stmt) => StatementKind::Try(TryStatement {
                block: self.body(&try_stmt.block.body),
                handler: try_stmt.handler.as_ref().map(|handler| CatchClause {
                    param: handler
                        .param
                        .as_ref()
                        .map(|param| self.text(param.pattern.span())),
                    body: self.body(&handler.body.body),
                }),
                finalizer: try_stmt
                    .finalizer
                    .as_ref()
                    .map(|finalizer| self.body(&finalizer.body)),
            }),
            _ => StatementKind::Opaque(self.text(span)),
        };
        Statement::new(kind, self.line(span))
    }

    fn variable_declaration(&self, decl: &js::VariableDeclaration<'_>) -> StatementKind {
        let kind = match decl.kind {
            js::VariableDeclarationKind::Var => VariableKind::Var,
            js::VariableDeclarationKind::Let => VariableKind::Let,
            js::VariableDeclarationKind::Const => VariableKind::Const,
            // `using` bindings have disposal semantics; keep them as written.
            _ => return StatementKind::Opaque(self.text(decl.span)),
        };
        StatementKind::VariableDeclaration(VariableDeclaration {
            kind,
            declarators: decl
                .declarations
                .iter()
                .map(|d| VariableDeclarator {
                    target: self.text(d.id.span()),
                    init: d.init.as_ref().map(|e| self.expression(e)),
                })
                .collect(),
        })
    }

    fn expression(&self, expr: &js::Expression<'_>) -> Expression {
        match expr {
            js::Expression::Identifier(ident) => Expression::Identifier(ident.name.to_string()),
            js::Expression::CallExpression(call) if !call.optional => {
                Expression::Call(CallExpression {
                    callee: Box::new(self.expression(&call.callee)),
                    arguments: call
                        .arguments
                        .iter()
                        .map(|arg| match arg.as_expression() {
                            Some(e) => self.expression(e),
                            None => Expression::Opaque(self.text(arg.span())),
                        })
                        .collect(),
                })
            }
            js::Expression::FunctionExpression(_) | js::Expression::ArrowFunctionExpression(_) => {
                Expression::Function(self.text(expr.span()))
            }
            _ => Expression::Opaque(self.text(expr.span())),
        }
    }
}
