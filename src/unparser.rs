//! Rendering expression trees back to ClassAd text.
//!
//! The unparser is the inverse of the parser: for any tree the parser
//! produced, the rendered text parses back to a structurally equal tree.
//! Output comes in two flavors:
//!
//! - **Compact** via [`unparse()`] / [`unparse_classad()`] — one line,
//!   minimal whitespace
//! - **Pretty** via [`unparse_pretty()`] / [`unparse_classad_pretty()`] —
//!   records broken over indented lines for human readers
//!
//! Parentheses the source spelled out survive as explicit nodes in the tree
//! and are printed back; beyond those, parentheses are added only where an
//! operand binds more loosely than its context requires, so programmatically
//! built trees render correctly too.
//!
//! # Examples
//!
//! ```
//! use classad::{parse_expression, unparse};
//!
//! let expr = parse_expression("(1 + 2) * 3").unwrap();
//! assert_eq!(unparse(&expr), "(1 + 2) * 3");
//! ```

use std::fmt::{self, Write as _};

use crate::ast::{ExprTree, Literal, OpKind};
use crate::record::ClassAd;
use crate::value::{format_abs_time, format_rel_time, format_real, Value};

pub struct Unparser {
    pretty: bool,
}

impl Unparser {
    /// A compact, single-line unparser.
    pub fn new() -> Self {
        Unparser { pretty: false }
    }

    /// An unparser that breaks records over indented lines.
    pub fn pretty() -> Self {
        Unparser { pretty: true }
    }

    pub fn unparse(&self, expr: &ExprTree) -> String {
        let mut out = String::new();
        self.write_expr(expr, 0, 0, &mut out);
        out
    }

    pub fn unparse_classad(&self, ad: &ClassAd) -> String {
        let mut out = String::new();
        self.write_record(ad, 0, &mut out);
        out
    }

    fn write_expr(&self, expr: &ExprTree, min_level: i32, indent: usize, out: &mut String) {
        if level(expr) < min_level {
            out.push('(');
            self.write_expr(expr, 0, indent, out);
            out.push(')');
            return;
        }

        match expr {
            ExprTree::Literal(lit) => write_literal(lit, out),
            ExprTree::AttrRef(r) => {
                if let Some(base) = &r.base {
                    self.write_postfix_base(base, indent, out);
                    out.push('.');
                } else if r.absolute {
                    out.push('.');
                }
                write_name(&r.name, out);
            }
            ExprTree::UnaryOp { op, operand } => {
                if *op == OpKind::Parentheses {
                    out.push('(');
                    self.write_expr(operand, 0, indent, out);
                    out.push(')');
                } else {
                    out.push_str(op.as_str());
                    // keep a negated numeric literal from lexing back as a
                    // single negative literal token
                    if *op == OpKind::UnaryMinus
                        && matches!(
                            operand.as_ref(),
                            ExprTree::Literal(Literal::Integer(_) | Literal::Real(_))
                        )
                    {
                        out.push(' ');
                    }
                    self.write_expr(operand, 11, indent, out);
                }
            }
            ExprTree::BinaryOp { op, left, right } => match op {
                OpKind::Subscript => {
                    self.write_postfix_base(left, indent, out);
                    out.push('[');
                    self.write_expr(right, 0, indent, out);
                    out.push(']');
                }
                OpKind::Elvis => {
                    // the tight `a ?: b` spelling only parses with postfix
                    // operands; anything looser uses the empty-middle
                    // conditional spelling, which accepts any operands
                    if level(expr) >= 12 {
                        self.write_expr(left, 12, indent, out);
                        out.push_str(" ?: ");
                        self.write_expr(right, 12, indent, out);
                    } else {
                        self.write_expr(left, 1, indent, out);
                        out.push_str(" ? : ");
                        self.write_expr(right, 0, indent, out);
                    }
                }
                op => {
                    let prec = op.precedence();
                    self.write_expr(left, prec, indent, out);
                    out.push(' ');
                    out.push_str(op.as_str());
                    out.push(' ');
                    self.write_expr(right, prec + 1, indent, out);
                }
            },
            ExprTree::TernaryOp {
                cond,
                if_true,
                if_false,
            } => {
                self.write_expr(cond, 1, indent, out);
                out.push_str(" ? ");
                self.write_expr(if_true, 0, indent, out);
                out.push_str(" : ");
                self.write_expr(if_false, 0, indent, out);
            }
            ExprTree::FnCall { name, args } => {
                write_name(name, out);
                out.push('(');
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    self.write_expr(arg, 0, indent, out);
                }
                out.push(')');
            }
            ExprTree::List(exprs) => {
                if exprs.is_empty() {
                    out.push_str("{ }");
                    return;
                }
                out.push_str("{ ");
                for (i, e) in exprs.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    self.write_expr(e, 0, indent, out);
                }
                out.push_str(" }");
            }
            ExprTree::Record(ad) => self.write_record(ad, indent, out),
        }
    }

    /// The base of a subscript or selection must itself be a postfix
    /// expression; anything looser gets parenthesized. An elvis base is
    /// parenthesized even when tight, since the `?:` token would swallow
    /// the postfix chain on the way back in.
    fn write_postfix_base(&self, base: &ExprTree, indent: usize, out: &mut String) {
        let needs_parens =
            level(base) < 12 || matches!(base, ExprTree::BinaryOp { op: OpKind::Elvis, .. });
        if needs_parens {
            out.push('(');
            self.write_expr(base, 0, indent, out);
            out.push(')');
        } else {
            self.write_expr(base, 12, indent, out);
        }
    }

    fn write_record(&self, ad: &ClassAd, indent: usize, out: &mut String) {
        if ad.is_empty() {
            out.push_str("[ ]");
            return;
        }
        if self.pretty {
            out.push_str("[\n");
            for (name, expr) in ad.attributes() {
                push_indent(indent + 1, out);
                write_name(name, out);
                out.push_str(" = ");
                self.write_expr(expr, 0, indent + 1, out);
                out.push_str(";\n");
            }
            push_indent(indent, out);
            out.push(']');
        } else {
            out.push_str("[ ");
            for (i, (name, expr)) in ad.attributes().enumerate() {
                if i > 0 {
                    out.push_str("; ");
                }
                write_name(name, out);
                out.push_str(" = ");
                self.write_expr(expr, 0, indent, out);
            }
            out.push_str(" ]");
        }
    }
}

impl Default for Unparser {
    fn default() -> Self {
        Unparser::new()
    }
}

/// Binding strength of a rendered node, on the operator precedence scale.
/// Leaves and bracketed constructs are atoms; an elvis node is postfix-tight
/// only when both operands are.
fn level(expr: &ExprTree) -> i32 {
    match expr {
        ExprTree::Literal(_)
        | ExprTree::FnCall { .. }
        | ExprTree::List(_)
        | ExprTree::Record(_) => 13,
        ExprTree::AttrRef(r) => {
            if r.base.is_some() {
                12
            } else {
                13
            }
        }
        ExprTree::UnaryOp {
            op: OpKind::Parentheses,
            ..
        } => 13,
        ExprTree::UnaryOp { .. } => 11,
        ExprTree::BinaryOp {
            op: OpKind::Subscript,
            ..
        } => 12,
        ExprTree::BinaryOp {
            op: OpKind::Elvis,
            left,
            right,
        } => {
            if level(left) >= 12 && level(right) >= 12 {
                12
            } else {
                0
            }
        }
        ExprTree::BinaryOp { op, .. } => op.precedence(),
        ExprTree::TernaryOp { .. } => 0,
    }
}

fn write_literal(lit: &Literal, out: &mut String) {
    match lit {
        Literal::Undefined => out.push_str("undefined"),
        Literal::Error => out.push_str("error"),
        Literal::Boolean(b) => out.push_str(if *b { "true" } else { "false" }),
        Literal::Integer(i) => {
            let _ = write!(out, "{}", i);
        }
        Literal::Real(r) => out.push_str(&format_real(*r)),
        Literal::String(s) => {
            out.push('"');
            escape_into(s, '"', out);
            out.push('"');
        }
        Literal::AbsTime(t) => {
            out.push_str("absTime(\"");
            out.push_str(&format_abs_time(t));
            out.push_str("\")");
        }
        Literal::RelTime(secs) => {
            out.push_str("relTime(\"");
            out.push_str(&format_rel_time(*secs));
            out.push_str("\")");
        }
    }
}

/// Attribute and function names print bare when they lex back as a single
/// identifier token; everything else becomes a quoted identifier.
fn write_name(name: &str, out: &mut String) {
    if is_plain_identifier(name) {
        out.push_str(name);
    } else {
        out.push('\'');
        escape_into(name, '\'', out);
        out.push('\'');
    }
}

fn is_plain_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    if !(first.is_alphabetic() || first == '_') {
        return false;
    }
    if !chars.all(|c| c.is_alphanumeric() || c == '_') {
        return false;
    }
    !matches!(
        name.to_ascii_lowercase().as_str(),
        "true" | "false" | "undefined" | "error" | "is" | "isnt"
    )
}

/// Escapes so the lexer reads back exactly the original characters. Octal
/// escapes are always three digits, so a following literal digit cannot be
/// absorbed into them.
fn escape_into(s: &str, quote: char, out: &mut String) {
    for ch in s.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            '\u{7}' => out.push_str("\\a"),
            '\u{8}' => out.push_str("\\b"),
            '\u{c}' => out.push_str("\\f"),
            '\u{b}' => out.push_str("\\v"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c if (c as u32) < 0x20 || c as u32 == 0x7f => {
                let _ = write!(out, "\\{:03o}", c as u32);
            }
            c => out.push(c),
        }
    }
}

fn push_indent(level: usize, out: &mut String) {
    for _ in 0..level {
        out.push_str("  ");
    }
}

// Convenience functions

/// Renders an expression compactly.
pub fn unparse(expr: &ExprTree) -> String {
    Unparser::new().unparse(expr)
}

/// Renders an expression with records broken over indented lines.
pub fn unparse_pretty(expr: &ExprTree) -> String {
    Unparser::pretty().unparse(expr)
}

/// Renders a record compactly.
pub fn unparse_classad(ad: &ClassAd) -> String {
    Unparser::new().unparse_classad(ad)
}

/// Renders a record one attribute per indented line.
pub fn unparse_classad_pretty(ad: &ClassAd) -> String {
    Unparser::pretty().unparse_classad(ad)
}

/// Renders an evaluation result as the expression text denoting it.
pub fn unparse_value(value: &Value) -> String {
    match value {
        Value::List(_) | Value::ClassAd(_) => unparse(&value.to_expr()),
        scalar => {
            let mut out = String::new();
            match scalar.to_literal() {
                Some(lit) => write_literal(&lit, &mut out),
                None => out.push_str("error"),
            }
            out
        }
    }
}

impl fmt::Display for ExprTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&unparse(self))
    }
}

impl fmt::Display for ClassAd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&unparse_classad(self))
    }
}
