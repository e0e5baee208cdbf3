//! Line attribution for runtime errors.
//!
//! Each eligible top-level statement is wrapped in a `try`/`catch` that
//! re-throws with a `Runtime Error at line N: ` prefix, where `N` is the
//! statement's line in the submitted source. Declarations stay unwrapped so
//! their bindings remain visible to the rest of the program.

use tracing::{debug, warn};

use crate::ast::{
    Expression, Fold, InstrumentedStatement, Program, Statement, StatementKind, TryStatement,
};
use crate::codegen::generate_statement;
use crate::parse::parse;

/// Timer registrations are left unwrapped so the registration itself never
/// gets a line prefix.
const UNWRAPPED_CALLEES: &[&str] = &["setTimeout", "setInterval"];

/// Wrap every eligible top-level statement of `program`.
///
/// Already-instrumented statements are left alone, so applying this twice is
/// the same as applying it once.
pub fn instrument(program: Program) -> Program {
    let mut instrumenter = Instrumenter::default();
    let program = instrumenter.fold_program(program);
    debug!(
        wrapped = instrumenter.wrapped,
        skipped = instrumenter.skipped,
        "instrumented program"
    );
    program
}

#[derive(Default)]
struct Instrumenter {
    wrapped: usize,
    skipped: usize,
}

impl Fold for Instrumenter {
    // Only top-level statements are rewritten, so nothing below is walked.
    fn fold_statement(&mut self, statement: Statement) -> Statement {
        if !is_wrappable(&statement.kind) {
            self.skipped += 1;
            return statement;
        }
        let Some(line) = statement.line else {
            self.skipped += 1;
            return statement;
        };

        match wrap(&generate_statement(&statement), line) {
            Some(wrapper) => {
                self.wrapped += 1;
                Statement::new(
                    StatementKind::Instrumented(InstrumentedStatement { line, wrapper }),
                    Some(line),
                )
            }
            None => {
                warn!(line, kind = statement.kind.name(), "could not instrument statement");
                self.skipped += 1;
                statement
            }
        }
    }
}

fn is_wrappable(kind: &StatementKind) -> bool {
    match kind {
        StatementKind::ClassDeclaration(_)
        | StatementKind::FunctionDeclaration(_)
        | StatementKind::VariableDeclaration(_)
        | StatementKind::Return(_)
        | StatementKind::Instrumented(_)
        | StatementKind::Expression(Expression::Function(_)) => false,
        StatementKind::Expression(expr) => !expr
            .called_identifier()
            .is_some_and(|callee| UNWRAPPED_CALLEES.contains(&callee)),
        _ => true,
    }
}

/// Build the wrapper text around `source` and parse it back.
fn wrap(source: &str, line: u32) -> Option<TryStatement> {
    let text = format!(
        "try {{\n{source}\n}} catch (error) {{\n  throw new Error(\"Runtime Error at line {line}: \" + error.message);\n}}"
    );
    let program = parse(&text).ok()?;
    let [statement] = <[Statement; 1]>::try_from(program.body).ok()?;
    match statement.kind {
        StatementKind::Try(try_stmt) => Some(try_stmt),
        _ => None,
    }
}
