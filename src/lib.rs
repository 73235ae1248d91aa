//! A ClassAd expression engine.
//!
//! ClassAds are semi-structured records whose attribute values are
//! themselves expressions, resolved against a scope chain when they are
//! evaluated. Records describe resource offers and requests; an expression
//! embedded in one record can refer to attributes of another during a
//! two-sided match test.
//!
//! The crate covers the whole expression engine: lexer, recursive-descent
//! parser and unparser, the expression tree with its evaluate / flatten /
//! structural-equality contracts, scope resolution with chained-prototype
//! records, the value model, the built-in function library, and the
//! matching engine.
//!
//! # Examples
//!
//! ```
//! use classad::ClassAd;
//!
//! let ad = ClassAd::parse("[ Cpus = 4; Ok = Cpus >= 2 && member(2, {1, 2, 3}) ]").unwrap();
//! assert_eq!(ad.evaluate_attr_bool("Ok"), Some(true));
//! ```
//!
//! Two records match when each satisfies the other's requirements:
//!
//! ```
//! use classad::{ClassAd, MatchClassAd};
//!
//! let job = ClassAd::parse("[ Requirements = other.Cpus >= 2 ]").unwrap();
//! let machine = ClassAd::parse("[ Cpus = 4; Requirements = true ]").unwrap();
//! assert!(MatchClassAd::new(job, machine).symmetric_match());
//! ```

pub mod ast;
pub mod evaluator;
pub mod functions;
pub mod lexer;
pub mod matching;
pub mod parser;
pub mod record;
pub mod unparser;
pub mod value;

pub use ast::{AttributeReference, ExprTree, Literal, NumberFactor, OpKind, Token};
pub use evaluator::{EvalState, Flat, Scope, DEFAULT_RECURSION_LIMIT};
pub use functions::{call_function, register_function, BuiltinFn};
pub use lexer::{Lexer, Position};
pub use matching::MatchClassAd;
pub use parser::{ParseError, ParseErrorKind, Parser};
pub use record::{ClassAd, ExprCache};
pub use unparser::{
    unparse, unparse_classad, unparse_classad_pretty, unparse_pretty, unparse_value, Unparser,
};
pub use value::{AbsTime, AdValue, ListValue, Value};

/// Parses one expression, requiring the whole input to be consumed.
pub fn parse_expression(text: &str) -> Result<ExprTree, ParseError> {
    Parser::new(text).parse_expression(true)
}

/// Parses one record, requiring the whole input to be consumed.
pub fn parse_classad(text: &str) -> Result<ClassAd, ParseError> {
    Parser::new(text).parse_classad(true)
}
