//! Source text generation from the closed AST.
//!
//! Generated structure (blocks, `try`, declarations) is indented two spaces
//! per level. Verbatim text carried by opaque nodes is emitted exactly as it
//! was parsed, including its internal line breaks.

use crate::ast::{Expression, Program, Statement, StatementKind, TryStatement};

const INDENT: &str = "  ";

/// Render `program` as JavaScript source.
pub fn generate(program: &Program) -> String {
    let mut printer = Printer::default();
    printer.program(program);
    printer.out
}

/// Render a single statement at the top indentation level.
pub fn generate_statement(statement: &Statement) -> String {
    let mut printer = Printer::default();
    printer.statement(statement);
    printer.out
}

#[derive(Default)]
struct Printer {
    out: String,
    indent: usize,
}

impl Printer {
    fn newline(&mut self) {
        if !self.out.is_empty() {
            self.out.push('\n');
        }
        for _ in 0..self.indent {
            self.out.push_str(INDENT);
        }
    }

    fn push(&mut self, text: &str) {
        self.out.push_str(text);
    }

    fn program(&mut self, program: &Program) {
        for directive in &program.directives {
            self.newline();
            self.push(directive);
            if !directive.ends_with(';') {
                self.push(";");
            }
        }
        for statement in &program.body {
            self.statement(statement);
        }
    }

    fn statement(&mut self, statement: &Statement) {
        self.newline();
        match &statement.kind {
            StatementKind::Expression(expr) => {
                self.expression(expr);
                self.push(";");
            }
            StatementKind::VariableDeclaration(decl) => {
                self.push(decl.kind.as_str());
                self.push(" ");
                for (i, declarator) in decl.declarators.iter().enumerate() {
                    if i > 0 {
                        self.push(", ");
                    }
                    self.push(&declarator.target);
                    if let Some(init) = &declarator.init {
                        self.push(" = ");
                        self.expression(init);
                    }
                }
                self.push(";");
            }
            StatementKind::FunctionDeclaration(decl) | StatementKind::ClassDeclaration(decl) => {
                self.push(&decl.source);
            }
            StatementKind::Return(arg) => {
                self.push("return");
                if let Some(arg) = arg {
                    self.push(" ");
                    self.expression(arg);
                }
                self.push(";");
            }
            StatementKind::Throw(arg) => {
                self.push("throw ");
                self.expression(arg);
                self.push(";");
            }
            StatementKind::Block(body) => self.block(body),
            StatementKind::Try(try_stmt) => self.try_statement(try_stmt),
            StatementKind::Instrumented(instrumented) => self.try_statement(&instrumented.wrapper),
            StatementKind::Opaque(text) => {
                self.push(text);
                if !(text.ends_with(';') || text.ends_with('}')) {
                    self.push(";");
                }
            }
        }
    }

    fn block(&mut self, body: &[Statement]) {
        if body.is_empty() {
            self.push("{}");
            return;
        }
        self.push("{");
        self.indent += 1;
        for statement in body {
            self.statement(statement);
        }
        self.indent -= 1;
        self.newline();
        self.push("}");
    }

    fn try_statement(&mut self, try_stmt: &TryStatement) {
        self.push("try ");
        self.block(&try_stmt.block);
        if let Some(handler) = &try_stmt.handler {
            self.push(" catch ");
            if let Some(param) = &handler.param {
                self.push("(");
                self.push(param);
                self.push(") ");
            }
            self.block(&handler.body);
        }
        if let Some(finalizer) = &try_stmt.finalizer {
            self.push(" finally ");
            self.block(finalizer);
        }
    }

    fn expression(&mut self, expr: &Expression) {
        match expr {
            Expression::Identifier(name) => self.push(name),
            Expression::Call(call) => {
                self.expression(&call.callee);
                self.push("(");
                for (i, arg) in call.arguments.iter().enumerate() {
                    if i > 0 {
                        self.push(", ");
                    }
                    self.expression(arg);
                }
                self.push(")");
            }
            Expression::Function(text) | Expression::Opaque(text) => self.push(text),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::parse;

    fn roundtrip(src: &str) -> String {
        generate(&parse(src).unwrap())
    }

    #[test]
    fn empty_program_generates_nothing() {
        assert_eq!(roundtrip(""), "");
    }

    #[test]
    fn terminates_expression_statements() {
        assert_eq!(roundtrip("a = 1\nf(a, b)"), "a = 1;\nf(a, b);");
    }

    #[test]
    fn declarations_are_emitted_verbatim() {
        let src = "function f() {\n    return `a\n  b`;\n}\nclass C { m() {} }";
        assert_eq!(roundtrip(src), src);
    }

    #[test]
    fn variable_declarations_keep_every_declarator() {
        assert_eq!(roundtrip("let a = 1, {b} = o, c"), "let a = 1, {b} = o, c;");
    }

    #[test]
    fn opaque_statements_get_semicolons_only_when_needed() {
        assert_eq!(
            roundtrip("if (a) { b() }\ndo x++; while (x < 3)\nfor (;;) break"),
            "if (a) { b() }\ndo x++; while (x < 3);\nfor (;;) break;"
        );
    }

    #[test]
    fn nested_structure_is_indented() {
        let src = "{ f(); try { g() } catch (e) { h(e) } finally { k() } }";
        assert_eq!(
            roundtrip(src),
            "{\n  f();\n  try {\n    g();\n  } catch (e) {\n    h(e);\n  } finally {\n    k();\n  }\n}"
        );
    }

    #[test]
    fn directives_come_first() {
        assert_eq!(roundtrip("'use strict'\nx()"), "'use strict';\nx();");
    }

    #[test]
    fn hashbang_is_dropped() {
        assert_eq!(roundtrip("#!/usr/bin/env node\nx()"), "x();");
    }

    #[test]
    fn generated_code_parses_to_the_same_shape() {
        let src = "const m = new Map();\nm.set('a', 1);\nconsole.log(m);\nthrow new Error('x');";
        let once = roundtrip(src);
        assert_eq!(roundtrip(&once), once);
    }
}
