use std::collections::HashMap;
use std::rc::Rc;

use crate::ast::{ExprTree, Literal};
use crate::evaluator::{self, EvalState, Flat};
use crate::parser::{ParseError, Parser};
use crate::value::Value;

/// A record ("ClassAd"): an insertion-ordered mapping from case-insensitive
/// attribute names to owned expression trees.
///
/// A record may be *chained* to a prototype record that is consulted on
/// local lookup misses, without copying its attributes. Records can track
/// which attributes were modified ("dirty" tracking), and may carry a
/// deprecated alternate-scope fallback used only under legacy evaluation
/// semantics.
///
/// # Examples
///
/// ```
/// use classad::ClassAd;
///
/// let ad = ClassAd::parse("[ A = 3; B = A + 1; ]").unwrap();
/// assert_eq!(ad.evaluate_attr_int("B"), Some(4));
/// ```
#[derive(Debug, Clone, Default)]
pub struct ClassAd {
    attrs: Vec<(String, ExprTree)>,
    chained: Option<Rc<ClassAd>>,
    alternate: Option<Rc<ClassAd>>,
    dirty: Vec<String>,
    track_dirty: bool,
}

impl PartialEq for ClassAd {
    /// Deep structural comparison over the local attributes, names compared
    /// case-insensitively. Chain, alternate scope and dirty state are not
    /// part of a record's identity.
    fn eq(&self, other: &ClassAd) -> bool {
        self.attrs.len() == other.attrs.len()
            && self
                .attrs
                .iter()
                .zip(other.attrs.iter())
                .all(|((n1, e1), (n2, e2))| n1.eq_ignore_ascii_case(n2) && e1 == e2)
    }
}

impl ClassAd {
    /// Creates an empty record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a record from its textual form, requiring the input to be
    /// exhausted.
    pub fn parse(text: &str) -> Result<ClassAd, ParseError> {
        Parser::new(text).parse_classad(true)
    }

    // ------------------------------------------------------------------
    // Insertion
    // ------------------------------------------------------------------

    /// Inserts an attribute. An existing attribute with the same name
    /// (case-insensitively) is replaced in place, keeping its position in
    /// the insertion order; a new attribute goes at the end.
    pub fn insert<S: Into<String>>(&mut self, name: S, expr: ExprTree) {
        let name = name.into();
        if self.track_dirty {
            self.mark_attribute_dirty(&name);
        }
        if let Some(slot) = self
            .attrs
            .iter_mut()
            .find(|(n, _)| n.eq_ignore_ascii_case(&name))
        {
            slot.1 = expr;
        } else {
            self.attrs.push((name, expr));
        }
    }

    /// Parses `rhs` as an expression and inserts it under `name`.
    pub fn insert_parsed(&mut self, name: &str, rhs: &str) -> Result<(), ParseError> {
        let expr = Parser::new(rhs).parse_expression(true)?;
        self.insert(name, expr);
        Ok(())
    }

    pub fn insert_int<S: Into<String>>(&mut self, name: S, value: i64) {
        self.insert(name, ExprTree::Literal(Literal::Integer(value)));
    }

    pub fn insert_real<S: Into<String>>(&mut self, name: S, value: f64) {
        self.insert(name, ExprTree::Literal(Literal::Real(value)));
    }

    pub fn insert_bool<S: Into<String>>(&mut self, name: S, value: bool) {
        self.insert(name, ExprTree::Literal(Literal::Boolean(value)));
    }

    pub fn insert_string<S: Into<String>, V: Into<String>>(&mut self, name: S, value: V) {
        self.insert(name, ExprTree::Literal(Literal::String(value.into())));
    }

    /// Copies every attribute of `other` into this record, replacing
    /// existing values. The other record's chain is not consulted.
    pub fn update(&mut self, other: &ClassAd) {
        for (name, expr) in &other.attrs {
            self.insert(name.clone(), expr.clone());
        }
    }

    // ------------------------------------------------------------------
    // Lookup
    // ------------------------------------------------------------------

    /// Finds the expression bound to a name, consulting the chained
    /// prototype on a local miss. Scoping is not involved.
    pub fn lookup(&self, name: &str) -> Option<&ExprTree> {
        match self.lookup_ignore_chain(name) {
            Some(expr) => Some(expr),
            None => self.chained.as_deref().and_then(|p| p.lookup(name)),
        }
    }

    /// Like [`ClassAd::lookup`], but never consults the chained prototype.
    pub fn lookup_ignore_chain(&self, name: &str) -> Option<&ExprTree> {
        self.attrs
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, e)| e)
    }

    pub(crate) fn lookup_mut(&mut self, name: &str) -> Option<&mut ExprTree> {
        self.attrs
            .iter_mut()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, e)| e)
    }

    /// Number of local attributes.
    pub fn len(&self) -> usize {
        self.attrs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attrs.is_empty()
    }

    /// Local attributes in insertion order.
    pub fn attributes(&self) -> impl Iterator<Item = (&str, &ExprTree)> {
        self.attrs.iter().map(|(n, e)| (n.as_str(), e))
    }

    // ------------------------------------------------------------------
    // Deletion
    // ------------------------------------------------------------------

    /// Deletes a local attribute. Returns whether it existed. If the
    /// chained prototype also defines the name, subsequent lookups fall
    /// through to the prototype's value.
    pub fn delete(&mut self, name: &str) -> bool {
        if self.track_dirty {
            self.mark_attribute_dirty(name);
        }
        let before = self.attrs.len();
        self.attrs.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
        self.attrs.len() != before
    }

    /// Like [`ClassAd::delete`], but hands the removed expression back.
    pub fn remove(&mut self, name: &str) -> Option<ExprTree> {
        if self.track_dirty {
            self.mark_attribute_dirty(name);
        }
        let idx = self
            .attrs
            .iter()
            .position(|(n, _)| n.eq_ignore_ascii_case(name))?;
        Some(self.attrs.remove(idx).1)
    }

    /// Removes every local attribute. Chain and dirty state survive.
    pub fn clear(&mut self) {
        self.attrs.clear();
    }

    // ------------------------------------------------------------------
    // Chaining
    // ------------------------------------------------------------------

    /// Chains this record to a prototype consulted on local lookup misses.
    /// Attributes defined locally shadow the prototype's; modifications
    /// never touch the prototype.
    pub fn chain_to(&mut self, parent: Rc<ClassAd>) {
        self.chained = Some(parent);
    }

    /// Detaches the chained prototype, returning it if one was attached.
    pub fn unchain(&mut self) -> Option<Rc<ClassAd>> {
        self.chained.take()
    }

    /// The chained prototype, if any.
    pub fn chained_parent(&self) -> Option<&Rc<ClassAd>> {
        self.chained.as_ref()
    }

    /// Sets the alternate-scope fallback consulted when an unscoped
    /// reference cannot be resolved and legacy evaluation semantics are
    /// enabled on the evaluation state. A migration aid; expect it to be
    /// removed.
    pub fn set_alternate_scope(&mut self, scope: Option<Rc<ClassAd>>) {
        self.alternate = scope;
    }

    pub(crate) fn alternate_scope(&self) -> Option<&ClassAd> {
        self.alternate.as_deref()
    }

    // ------------------------------------------------------------------
    // Dirty tracking
    // ------------------------------------------------------------------

    /// Enables or disables dirty tracking, returning the previous setting.
    /// While enabled, every insert or delete records the attribute name.
    pub fn set_dirty_tracking(&mut self, enable: bool) -> bool {
        std::mem::replace(&mut self.track_dirty, enable)
    }

    pub fn dirty_tracking(&self) -> bool {
        self.track_dirty
    }

    pub fn mark_attribute_dirty(&mut self, name: &str) {
        if !self.dirty.iter().any(|n| n.eq_ignore_ascii_case(name)) {
            self.dirty.push(name.to_string());
        }
    }

    pub fn mark_attribute_clean(&mut self, name: &str) {
        self.dirty.retain(|n| !n.eq_ignore_ascii_case(name));
    }

    pub fn is_attribute_dirty(&self, name: &str) -> bool {
        self.dirty.iter().any(|n| n.eq_ignore_ascii_case(name))
    }

    pub fn clear_dirty_flags(&mut self) {
        self.dirty.clear();
    }

    /// Names marked dirty, in the order they were first touched.
    pub fn dirty_attributes(&self) -> impl Iterator<Item = &str> {
        self.dirty.iter().map(String::as_str)
    }

    // ------------------------------------------------------------------
    // Evaluation
    // ------------------------------------------------------------------

    /// Evaluates the expression bound to an attribute, with this record as
    /// the current and root scope. An unbound name is the Undefined value.
    pub fn evaluate_attr(&self, name: &str) -> Value<'_> {
        let mut state = EvalState::new(self);
        evaluator::evaluate_attr_in_state(name, &mut state)
    }

    /// Evaluates an expression in the context of this record. The
    /// expression need not live in the record.
    pub fn evaluate_expr<'a>(&'a self, expr: &'a ExprTree) -> Value<'a> {
        let mut state = EvalState::new(self);
        expr.evaluate(&mut state)
    }

    /// Like [`ClassAd::evaluate_expr`], with an explicitly configured state
    /// (recursion budget, legacy semantics).
    pub fn evaluate_expr_with<'a>(
        &'a self,
        expr: &'a ExprTree,
        state: &mut EvalState<'a>,
    ) -> Value<'a> {
        expr.evaluate(state)
    }

    /// Evaluates an expression and also returns the significant
    /// sub-expression: the minimal part of the tree that was actually
    /// consulted to produce the result, for change-detection callers.
    pub fn evaluate_expr_with_significance<'a>(
        &'a self,
        expr: &'a ExprTree,
    ) -> (Value<'a>, ExprTree) {
        let mut state = EvalState::new(self);
        expr.evaluate_with_significance(&mut state)
    }

    /// Evaluates an attribute to an integer. Strict: reals do not coerce.
    pub fn evaluate_attr_int(&self, name: &str) -> Option<i64> {
        self.evaluate_attr(name).as_integer()
    }

    /// Evaluates an attribute to a real. Strict: integers do not coerce.
    pub fn evaluate_attr_real(&self, name: &str) -> Option<f64> {
        self.evaluate_attr(name).as_real()
    }

    /// Evaluates an attribute to a number: integers and booleans promote to
    /// real.
    pub fn evaluate_attr_number(&self, name: &str) -> Option<f64> {
        self.evaluate_attr(name).as_number_real()
    }

    /// Evaluates an attribute to a string; numbers and booleans coerce to
    /// their printed form.
    pub fn evaluate_attr_string(&self, name: &str) -> Option<String> {
        self.evaluate_attr(name).coerce_to_string()
    }

    /// Evaluates an attribute to a boolean. Strict: numbers do not coerce.
    pub fn evaluate_attr_bool(&self, name: &str) -> Option<bool> {
        self.evaluate_attr(name).as_bool()
    }

    /// Evaluates an attribute to a boolean, accepting numbers as their
    /// non-zero truth value.
    pub fn evaluate_attr_bool_equiv(&self, name: &str) -> Option<bool> {
        self.evaluate_attr(name).as_bool_equiv()
    }

    // ------------------------------------------------------------------
    // Flattening
    // ------------------------------------------------------------------

    /// Partially evaluates an expression in the context of this record:
    /// resolvable parts collapse to values, unresolvable sub-expressions
    /// survive as a residual tree.
    pub fn flatten<'a>(&'a self, expr: &'a ExprTree) -> Flat<'a> {
        let mut state = EvalState::new(self);
        expr.flatten(&mut state)
    }

    /// Like [`ClassAd::flatten`], but an attribute reference whose target
    /// is itself unresolved is replaced by the target's own flattening
    /// instead of surviving as a reference.
    pub fn flatten_and_inline<'a>(&'a self, expr: &'a ExprTree) -> Flat<'a> {
        let mut state = EvalState::new(self);
        state.set_flatten_and_inline(true);
        expr.flatten(&mut state)
    }
}

/// A parse-once cache for attribute right-hand sides.
///
/// Many records carry textually identical expressions; inserting through the
/// cache parses each distinct text once and copies the tree afterwards. The
/// cache is caller-owned and entirely optional — records built without it
/// behave identically.
#[derive(Debug, Default)]
pub struct ExprCache {
    map: HashMap<String, ExprTree>,
}

impl ExprCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses `rhs` (or reuses a previously parsed copy) and inserts it
    /// into `ad` under `name`.
    pub fn insert_into(
        &mut self,
        ad: &mut ClassAd,
        name: &str,
        rhs: &str,
    ) -> Result<(), ParseError> {
        if let Some(expr) = self.map.get(rhs) {
            tracing::trace!(attr = name, "expression cache hit");
            ad.insert(name, expr.clone());
            return Ok(());
        }
        let expr = Parser::new(rhs).parse_expression(true)?;
        self.map.insert(rhs.to_string(), expr.clone());
        ad.insert(name, expr);
        Ok(())
    }

    /// Number of distinct cached expression texts.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}
