//! Pre-execution checks for submitted programs.
//!
//! Two layers run before any isolate exists:
//!
//! 1. [`check_limits`] rejects oversized or pathologically nested input
//!    without parsing it.
//! 2. [`validate`] parses the program as a classic script and runs oxc's
//!    early-error checks, so anything V8 would refuse to compile is reported
//!    here with a location.

use oxc_allocator::Allocator;
use oxc_semantic::SemanticBuilder;

use crate::error::{SandboxError, SyntaxDiagnostic};
use crate::parse::{first_diagnostic, script_parser, LineIndex};

/// Default maximum code size in bytes (1 MiB).
pub const DEFAULT_MAX_CODE_SIZE: usize = 1024 * 1024;

/// Maximum bracket nesting depth accepted before parsing.
pub const MAX_NESTING_DEPTH: usize = 256;

/// Check that `source` parses as a script and has no early errors.
///
/// Returns the error with the lowest source offset.
pub fn validate(source: &str) -> Result<(), SyntaxDiagnostic> {
    let allocator = Allocator::default();
    let ret = script_parser(&allocator, source).parse();
    let lines = LineIndex::new(source);

    if ret.panicked && ret.errors.is_empty() {
        return Err(SyntaxDiagnostic::unlocated("unexpected end of input"));
    }

    let errors = if ret.errors.is_empty() {
        SemanticBuilder::new()
            .with_check_syntax_error(true)
            .build(&ret.program)
            .errors
    } else {
        ret.errors
    };

    let located = errors.iter().map(|e| {
        (
            e.message.to_string(),
            e.labels
                .as_ref()
                .and_then(|labels| labels.first())
                .map(|label| label.offset()),
        )
    });
    match first_diagnostic(source, &lines, located) {
        Some(diagnostic) => Err(diagnostic),
        None => Ok(()),
    }
}

/// Reject code that is too large or nested too deeply to parse safely.
pub fn check_limits(code: &str, max_size: usize) -> Result<(), SandboxError> {
    if code.len() > max_size {
        return Err(SandboxError::CodeTooLarge {
            max: max_size,
            actual: code.len(),
        });
    }
    check_nesting_depth(code)
}

/// Scan bracket nesting depth without parsing.
///
/// Only brackets in code count: the contents of strings, template text,
/// comments and regular expression literals are skipped. Template
/// substitutions (`${...}`) count as one level.
pub fn check_nesting_depth(code: &str) -> Result<(), SandboxError> {
    let max_depth = max_bracket_depth(code);
    if max_depth > MAX_NESTING_DEPTH {
        return Err(SandboxError::NestingTooDeep {
            max: MAX_NESTING_DEPTH,
            actual: max_depth,
        });
    }
    Ok(())
}

type Chars<'a> = std::iter::Peekable<std::str::Chars<'a>>;

/// Keywords after which a `/` starts a regular expression, not a division.
const REGEX_PRECEDING_KEYWORDS: &[&str] = &[
    "await", "case", "delete", "do", "else", "in", "instanceof", "new", "of", "return", "throw",
    "typeof", "void", "yield",
];

fn max_bracket_depth(code: &str) -> usize {
    let mut depth: usize = 0;
    let mut max_depth: usize = 0;
    // Depth of each open `${`; its closing `}` resumes the template.
    let mut substitutions: Vec<usize> = Vec::new();
    let mut regex_allowed = true;
    let mut chars = code.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '\'' | '"' => {
                skip_string(&mut chars, ch);
                regex_allowed = false;
            }
            '`' => {
                if skip_template(&mut chars) {
                    depth += 1;
                    max_depth = max_depth.max(depth);
                    substitutions.push(depth);
                }
                regex_allowed = false;
            }
            '/' if chars.peek() == Some(&'/') => {
                for c in chars.by_ref() {
                    if c == '\n' {
                        break;
                    }
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut star = false;
                for c in chars.by_ref() {
                    if star && c == '/' {
                        break;
                    }
                    star = c == '*';
                }
            }
            '/' if regex_allowed => {
                skip_regex(&mut chars);
                regex_allowed = false;
            }
            '{' | '[' | '(' => {
                depth += 1;
                max_depth = max_depth.max(depth);
                regex_allowed = true;
            }
            '}' if substitutions.last() == Some(&depth) => {
                substitutions.pop();
                depth -= 1;
                if skip_template(&mut chars) {
                    depth += 1;
                    max_depth = max_depth.max(depth);
                    substitutions.push(depth);
                }
                regex_allowed = false;
            }
            '}' | ']' | ')' => {
                depth = depth.saturating_sub(1);
                regex_allowed = ch == '}';
            }
            c if c.is_whitespace() => {}
            c if c.is_alphanumeric() || c == '_' || c == '$' => {
                let mut word = String::from(c);
                while let Some(&next) = chars.peek() {
                    if !(next.is_alphanumeric() || next == '_' || next == '$') {
                        break;
                    }
                    word.push(next);
                    chars.next();
                }
                regex_allowed = REGEX_PRECEDING_KEYWORDS.contains(&word.as_str());
            }
            _ => regex_allowed = true,
        }
    }
    max_depth
}

/// Skip to the end of a string literal opened by `quote`.
fn skip_string(chars: &mut Chars<'_>, quote: char) {
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                chars.next();
            }
            '\n' => return,
            c if c == quote => return,
            _ => {}
        }
    }
}

/// Skip template text. Returns `true` when it stopped at a `${`.
fn skip_template(chars: &mut Chars<'_>) -> bool {
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                chars.next();
            }
            '`' => return false,
            '$' if chars.peek() == Some(&'{') => {
                chars.next();
                return true;
            }
            _ => {}
        }
    }
    false
}

/// Skip a regular expression body; flags are read as an identifier after.
fn skip_regex(chars: &mut Chars<'_>) {
    let mut in_class = false;
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                chars.next();
            }
            '[' => in_class = true,
            ']' => in_class = false,
            '/' if !in_class => return,
            '\n' => return,
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_valid_program() {
        let code = "const m = new Map();\nm.set('a', 1);\nconsole.log(m);";
        assert!(validate(code).is_ok());
    }

    #[test]
    fn accepts_empty_program() {
        assert!(validate("").is_ok());
        assert!(validate("  \n // nothing\n").is_ok());
    }

    #[test]
    fn reports_missing_initializer_location() {
        let err = validate("let x = ;").unwrap_err();
        assert_eq!((err.line, err.column), (Some(1), Some(9)));
        assert!(err.to_string().starts_with("Syntax Error at line 1, column 9: "));
    }

    #[test]
    fn reports_error_on_later_line() {
        let err = validate("const a = 1;\nconst b = 2;\nif (a {\n}").unwrap_err();
        assert_eq!(err.line, Some(3));
    }

    #[test]
    fn rejects_module_syntax_in_scripts() {
        assert!(validate("import fs from 'fs';").is_err());
        assert!(validate("export const x = 1;").is_err());
    }

    #[test]
    fn rejects_top_level_return() {
        assert!(validate("return 1;").is_err());
    }

    #[test]
    fn rejects_duplicate_lexical_declaration() {
        let err = validate("let a = 1;\nlet a = 2;").unwrap_err();
        assert!(err.message.contains('a'), "{err}");
        assert!(err.line.is_some());
    }

    #[test]
    fn rejects_invalid_regex_body() {
        let err = validate("const r = /(/;").unwrap_err();
        assert_eq!(err.line, Some(1));
        assert!(err.column.is_some());
        assert!(err.to_string().starts_with("Syntax Error at line 1, column "), "{err}");
    }

    #[test]
    fn accepts_valid_regex_literals() {
        assert!(validate("const r = /(a|b)+[/\\]]?/giu;\nr.test('a');").is_ok());
    }

    #[test]
    fn rejects_oversized_code() {
        let big = "x".repeat(DEFAULT_MAX_CODE_SIZE + 1);
        let err = check_limits(&big, DEFAULT_MAX_CODE_SIZE).unwrap_err();
        assert!(matches!(
            err,
            SandboxError::CodeTooLarge { actual, .. } if actual == DEFAULT_MAX_CODE_SIZE + 1
        ));
    }

    #[test]
    fn default_size_limit_admits_large_editor_input() {
        let code = "console.log(1);\n".repeat(10_000);
        assert!(code.len() > 64 * 1024);
        assert!(check_limits(&code, DEFAULT_MAX_CODE_SIZE).is_ok());
    }

    #[test]
    fn custom_max_size() {
        let code = "x".repeat(100);
        assert!(check_limits(&code, 50).is_err());
        assert!(check_limits(&code, 200).is_ok());
    }

    #[test]
    fn rejects_deep_nesting() {
        let code = format!("{}1{}", "(".repeat(300), ")".repeat(300));
        let err = check_limits(&code, DEFAULT_MAX_CODE_SIZE).unwrap_err();
        assert!(matches!(
            err,
            SandboxError::NestingTooDeep {
                max: MAX_NESTING_DEPTH,
                actual: 300
            }
        ));
    }

    #[test]
    fn brackets_inside_literals_and_comments_do_not_count() {
        let open = "(".repeat(300);
        for code in [
            format!("console.log('{open}');"),
            format!("console.log(\"{open}\");"),
            format!("console.log(`{open}`);"),
            format!("// {open}\nconsole.log(1);"),
            format!("/* {open} */ console.log(1);"),
            format!("const r = /[{open}]/;"),
            format!("function f() {{ return /\\{open}/; }}"),
        ] {
            assert!(check_nesting_depth(&code).is_ok(), "rejected: {code}");
        }
    }

    #[test]
    fn template_substitutions_count_as_nesting() {
        assert_eq!(max_bracket_depth("`a ${ f(`b ${ [1] }`) } c`"), 4);
        assert_eq!(max_bracket_depth("`${ '}' }` + (1)"), 1);
    }

    #[test]
    fn division_is_not_mistaken_for_regex() {
        assert_eq!(max_bracket_depth("const x = (a) / 2 / ((b));"), 2);
    }

    #[test]
    fn accepts_reasonable_nesting() {
        let code = format!("{}1{}", "[".repeat(50), "]".repeat(50));
        assert!(check_nesting_depth(&code).is_ok());
    }
}
