//! Closed syntax tree used by the instrumenter and the code generator.
//!
//! Only the node kinds the instrumenter has to tell apart get their own
//! variants. Everything else (loops, conditionals, arbitrary expressions,
//! function and class bodies) is carried as verbatim source text, so code
//! generation never loses information it did not need to inspect.
//!
//! The tree owns all of its data: it is lowered out of the parser's arena by
//! [`crate::parse::parse`] and can be moved, cloned and compared freely.

/// A parsed script.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Program {
    /// Directive prologue entries (e.g. `"use strict"`), verbatim with quotes.
    pub directives: Vec<String>,
    /// Top-level statements in source order.
    pub body: Vec<Statement>,
}

/// A statement and the 1-based source line it starts on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    /// What kind of statement this is.
    pub kind: StatementKind,
    /// First line of the statement in the text it was parsed from.
    pub line: Option<u32>,
}

impl Statement {
    /// Create a statement.
    pub fn new(kind: StatementKind, line: Option<u32>) -> Self {
        Self { kind, line }
    }

    /// Whether this statement has already been wrapped by the instrumenter.
    pub fn is_instrumented(&self) -> bool {
        matches!(self.kind, StatementKind::Instrumented(_))
    }
}

/// Statement kinds the instrumenter distinguishes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatementKind {
    /// `expr;`
    Expression(Expression),
    /// `var`, `let` or `const` declaration.
    VariableDeclaration(VariableDeclaration),
    /// `function name() { ... }`, verbatim.
    FunctionDeclaration(Declaration),
    /// `class Name { ... }`, verbatim.
    ClassDeclaration(Declaration),
    /// `return expr;`
    Return(Option<Expression>),
    /// `throw expr;`
    Throw(Expression),
    /// `{ ... }`
    Block(Vec<Statement>),
    /// `try { ... } catch (e) { ... } finally { ... }`
    Try(TryStatement),
    /// A top-level statement already wrapped for line attribution.
    Instrumented(InstrumentedStatement),
    /// Any other statement, verbatim.
    Opaque(String),
}

impl StatementKind {
    /// Short name used in log events.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Expression(_) => "expression",
            Self::VariableDeclaration(_) => "variable_declaration",
            Self::FunctionDeclaration(_) => "function_declaration",
            Self::ClassDeclaration(_) => "class_declaration",
            Self::Return(_) => "return",
            Self::Throw(_) => "throw",
            Self::Block(_) => "block",
            Self::Try(_) => "try",
            Self::Instrumented(_) => "instrumented",
            Self::Opaque(_) => "opaque",
        }
    }
}

/// Binding keyword of a variable declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariableKind {
    /// `var`
    Var,
    /// `let`
    Let,
    /// `const`
    Const,
}

impl VariableKind {
    /// The keyword as written in source.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Var => "var",
            Self::Let => "let",
            Self::Const => "const",
        }
    }
}

/// `kind a = 1, b;`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableDeclaration {
    /// Binding keyword.
    pub kind: VariableKind,
    /// Declarators in source order.
    pub declarators: Vec<VariableDeclarator>,
}

/// One `target = init` pair of a variable declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableDeclarator {
    /// Binding identifier or destructuring pattern, verbatim.
    pub target: String,
    /// Initializer, if any.
    pub init: Option<Expression>,
}

/// A function or class declaration kept as source text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Declaration {
    /// Declared binding name.
    pub name: Option<String>,
    /// Full declaration text.
    pub source: String,
}

/// `try` statement with optional handler and finalizer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TryStatement {
    /// Statements of the protected block.
    pub block: Vec<Statement>,
    /// `catch` clause.
    pub handler: Option<CatchClause>,
    /// Statements of the `finally` block.
    pub finalizer: Option<Vec<Statement>>,
}

/// `catch (param) { body }`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatchClause {
    /// Catch binding, verbatim. `None` for `catch { ... }`.
    pub param: Option<String>,
    /// Handler statements.
    pub body: Vec<Statement>,
}

/// A top-level statement rewritten to re-throw its errors tagged with a line.
///
/// `line` is the line of the statement in the *submitted* source; the lines
/// recorded inside `wrapper` refer to the synthetic wrapper text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstrumentedStatement {
    /// Original source line of the wrapped statement.
    pub line: u32,
    /// The `try`/`catch` wrapper around the original statement.
    pub wrapper: TryStatement,
}

/// Expression kinds the instrumenter distinguishes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expression {
    /// A plain identifier reference.
    Identifier(String),
    /// `callee(arg, ...)`
    Call(CallExpression),
    /// Function or arrow function expression, verbatim.
    Function(String),
    /// Any other expression, verbatim.
    Opaque(String),
}

impl Expression {
    /// If this is a call whose callee is a plain identifier, that identifier.
    pub fn called_identifier(&self) -> Option<&str> {
        match self {
            Self::Call(call) => match call.callee.as_ref() {
                Self::Identifier(name) => Some(name),
                _ => None,
            },
            _ => None,
        }
    }
}

/// A non-optional call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallExpression {
    /// Called expression.
    pub callee: Box<Expression>,
    /// Arguments in source order. Spread arguments are opaque.
    pub arguments: Vec<Expression>,
}

/// Tree-to-tree transformation over the closed grammar.
///
/// Every method defaults to the matching `walk_*` function, which rebuilds
/// the node from its folded children. Implementors override the methods for
/// the node kinds they rewrite and call back into `walk_*` to keep descending.
pub trait Fold {
    /// Fold a whole program.
    fn fold_program(&mut self, program: Program) -> Program {
        walk_program(self, program)
    }

    /// Fold one statement.
    fn fold_statement(&mut self, statement: Statement) -> Statement {
        walk_statement(self, statement)
    }

    /// Fold one expression.
    fn fold_expression(&mut self, expression: Expression) -> Expression {
        walk_expression(self, expression)
    }
}

/// Fold every top-level statement of `program`.
pub fn walk_program<F: Fold + ?Sized>(folder: &mut F, program: Program) -> Program {
    Program {
        directives: program.directives,
        body: fold_body(folder, program.body),
    }
}

/// Fold the children of `statement`.
///
/// Instrumented statements are sealed: the wrapper is never descended into,
/// so repeated passes leave it untouched.
pub fn walk_statement<F: Fold + ?Sized>(folder: &mut F, statement: Statement) -> Statement {
    let Statement { kind, line } = statement;
    let kind = match kind {
        StatementKind::Expression(expr) => StatementKind::Expression(folder.fold_expression(expr)),
        StatementKind::VariableDeclaration(decl) => {
            StatementKind::VariableDeclaration(VariableDeclaration {
                kind: decl.kind,
                declarators: decl
                    .declarators
                    .into_iter()
                    .map(|d| VariableDeclarator {
                        target: d.target,
                        init: d.init.map(|e| folder.fold_expression(e)),
                    })
                    .collect(),
            })
        }
        StatementKind::Return(arg) => StatementKind::Return(arg.map(|e| folder.fold_expression(e))),
        StatementKind::Throw(arg) => StatementKind::Throw(folder.fold_expression(arg)),
        StatementKind::Block(body) => StatementKind::Block(fold_body(folder, body)),
        StatementKind::Try(try_stmt) => StatementKind::Try(walk_try(folder, try_stmt)),
        kind @ (StatementKind::Instrumented(_)
        | StatementKind::FunctionDeclaration(_)
        | StatementKind::ClassDeclaration(_)
        | StatementKind::Opaque(_)) => kind,
    };
    Statement { kind, line }
}

/// Fold the children of `expression`.
pub fn walk_expression<F: Fold + ?Sized>(folder: &mut F, expression: Expression) -> Expression {
    match expression {
        Expression::Call(call) => Expression::Call(CallExpression {
            callee: Box::new(folder.fold_expression(*call.callee)),
            arguments: call
                .arguments
                .into_iter()
                .map(|arg| folder.fold_expression(arg))
                .collect(),
        }),
        other @ (Expression::Identifier(_) | Expression::Function(_) | Expression::Opaque(_)) => {
            other
        }
    }
}

fn walk_try<F: Fold + ?Sized>(folder: &mut F, try_stmt: TryStatement) -> TryStatement {
    TryStatement {
        block: fold_body(folder, try_stmt.block),
        handler: try_stmt.handler.map(|h| CatchClause {
            param: h.param,
            body: fold_body(folder, h.body),
        }),
        finalizer: try_stmt.finalizer.map(|f| fold_body(folder, f)),
    }
}

fn fold_body<F: Fold + ?Sized>(folder: &mut F, body: Vec<Statement>) -> Vec<Statement> {
    body.into_iter().map(|s| folder.fold_statement(s)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Renames every identifier it sees, to prove the walk reaches them.
    struct Rename;

    impl Fold for Rename {
        fn fold_expression(&mut self, expression: Expression) -> Expression {
            match expression {
                Expression::Identifier(name) => Expression::Identifier(format!("{name}_")),
                other => walk_expression(self, other),
            }
        }
    }

    fn call(name: &str) -> Expression {
        Expression::Call(CallExpression {
            callee: Box::new(Expression::Identifier(name.into())),
            arguments: vec![Expression::Identifier("arg".into())],
        })
    }

    #[test]
    fn walk_reaches_nested_call_arguments() {
        let program = Program {
            directives: vec![],
            body: vec![Statement::new(
                StatementKind::Block(vec![Statement::new(
                    StatementKind::Expression(call("f")),
                    Some(2),
                )]),
                Some(1),
            )],
        };

        let folded = Rename.fold_program(program);
        let StatementKind::Block(inner) = &folded.body[0].kind else {
            panic!("expected block, got {:?}", folded.body[0].kind);
        };
        assert_eq!(inner[0].line, Some(2));
        let StatementKind::Expression(Expression::Call(c)) = &inner[0].kind else {
            panic!("expected call");
        };
        assert_eq!(*c.callee, Expression::Identifier("f_".into()));
        assert_eq!(c.arguments, vec![Expression::Identifier("arg_".into())]);
    }

    #[test]
    fn walk_does_not_enter_instrumented_statements() {
        let sealed = Statement::new(
            StatementKind::Instrumented(InstrumentedStatement {
                line: 7,
                wrapper: TryStatement {
                    block: vec![Statement::new(StatementKind::Expression(call("g")), Some(2))],
                    handler: None,
                    finalizer: None,
                },
            }),
            Some(7),
        );

        let folded = Rename.fold_statement(sealed.clone());
        assert_eq!(folded, sealed);
    }

    #[test]
    fn called_identifier_only_matches_plain_identifier_callees() {
        assert_eq!(call("setTimeout").called_identifier(), Some("setTimeout"));

        let member = Expression::Call(CallExpression {
            callee: Box::new(Expression::Opaque("globalThis.setTimeout".into())),
            arguments: vec![],
        });
        assert_eq!(member.called_identifier(), None);
        assert_eq!(Expression::Identifier("f".into()).called_identifier(), None);
    }
}
