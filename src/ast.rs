//! # ClassAd Expression Language - Abstract Syntax Tree
//!
//! This module defines the Abstract Syntax Tree (AST) for the ClassAd
//! expression language: a dynamically-typed language for describing
//! semi-structured records whose attribute values are themselves expressions,
//! resolved against a scope chain when they are evaluated.
//!
//! ## Architecture Overview
//!
//! The AST module is organized into focused submodules:
//!
//! - **[tokens]** - Lexical tokens produced by the lexer
//! - **[expressions]** - Expression nodes (literals, references, operations,
//!   calls, lists, records)
//! - **[operators]** - The closed operator enumeration with precedence levels
//!
//! ## Core Concepts
//!
//! ### Records
//!
//! A record (a "ClassAd") maps case-insensitive attribute names to
//! expressions, in insertion order:
//!
//! ```text
//! [ Memory = 2048; Requirements = other.Cpus >= Cpus; ]
//! ```
//!
//! ### References and Scope
//!
//! A bare name resolves against the nearest enclosing record; `.name` jumps
//! to the root scope; `expr.name` looks inside whatever `expr` evaluates to.
//! A record chained to a prototype consults the prototype on local misses.
//!
//! ### Three-Valued Results
//!
//! Evaluation cannot fail: an unresolvable name is the `undefined` value and
//! an ill-typed operation is the `error` value, both first-class values that
//! flow through operators by fixed absorption rules. Only the meta
//! comparisons `=?=` / `=!=` see them as ordinary comparable values.
//!
//! ## Examples
//!
//! ### Literal arithmetic
//!
//! ```text
//! (1 + 2) * 3 == 9
//! ```
//!
//! ### A record consulting itself
//!
//! ```text
//! [ A = 3; B = A + 1; ].B        // 4
//! ```
//!
//! ### List subscripts are zero-indexed
//!
//! ```text
//! { 10, 20, 30 }[1]              // 20
//! ```
pub mod expressions;
pub mod operators;
pub mod tokens;

pub use expressions::{AttributeReference, ExprTree, Literal};
pub use operators::OpKind;
pub use tokens::{NumberFactor, Token};
