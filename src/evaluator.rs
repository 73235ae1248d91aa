use std::mem;
use std::rc::Rc;

use crate::ast::{AttributeReference, ExprTree, OpKind};
use crate::functions;
use crate::record::ClassAd;
use crate::value::{AbsTime, AdValue, ListValue, Value};

/// Default recursion budget for evaluation. Deeply nested or circular
/// expressions run out of budget and evaluate to Error instead of
/// overflowing the call stack.
pub const DEFAULT_RECURSION_LIMIT: usize = 1000;

/// An immutable chain of lexical scopes, innermost first.
///
/// Frames are shared (`Rc`), so cloning a scope is cheap and a record value
/// can carry the chain it was reached through. The chain's head is the
/// current record; the tail ends at the root scope.
#[derive(Debug, Clone)]
pub struct Scope<'a> {
    frame: Option<Rc<Frame<'a>>>,
}

#[derive(Debug)]
struct Frame<'a> {
    ad: &'a ClassAd,
    parent: Scope<'a>,
}

impl<'a> Scope<'a> {
    /// A scope with no frames. Bare references resolve to Undefined here.
    pub fn empty() -> Scope<'a> {
        Scope { frame: None }
    }

    /// A single-frame scope: `ad` is both the current and the root record.
    pub fn root(ad: &'a ClassAd) -> Scope<'a> {
        Scope::empty().push(ad)
    }

    /// A new scope with `ad` as the innermost record.
    pub fn push(&self, ad: &'a ClassAd) -> Scope<'a> {
        Scope {
            frame: Some(Rc::new(Frame {
                ad,
                parent: self.clone(),
            })),
        }
    }

    /// The innermost record, if any.
    pub fn current(&self) -> Option<&'a ClassAd> {
        self.frame.as_ref().map(|f| f.ad)
    }

    /// The enclosing scope; empty at the root.
    pub fn parent(&self) -> Scope<'a> {
        match &self.frame {
            Some(f) => f.parent.clone(),
            None => Scope::empty(),
        }
    }

    /// The outermost frame as a single-element scope chain.
    pub fn root_scope(&self) -> Scope<'a> {
        let mut cursor = self.clone();
        loop {
            let parent = cursor.parent();
            if parent.frame.is_none() {
                return cursor;
            }
            cursor = parent;
        }
    }

    fn is_empty(&self) -> bool {
        self.frame.is_none()
    }
}

/// Transient evaluation context threaded through every `evaluate` and
/// `flatten` call: the scope chain, the recursion budget, and the
/// per-evaluation configuration flags.
pub struct EvalState<'a> {
    pub(crate) scope: Scope<'a>,
    depth_remaining: usize,
    flatten_and_inline: bool,
    legacy: bool,
}

impl<'a> EvalState<'a> {
    /// A state whose current and root scope is `ad`.
    pub fn new(ad: &'a ClassAd) -> EvalState<'a> {
        EvalState::with_scope(Scope::root(ad))
    }

    pub(crate) fn with_scope(scope: Scope<'a>) -> EvalState<'a> {
        EvalState {
            scope,
            depth_remaining: DEFAULT_RECURSION_LIMIT,
            flatten_and_inline: false,
            legacy: false,
        }
    }

    /// The scope chain references resolve against.
    pub fn scope(&self) -> &Scope<'a> {
        &self.scope
    }

    /// Replaces the recursion budget.
    pub fn set_recursion_limit(&mut self, limit: usize) {
        self.depth_remaining = limit;
    }

    /// Budget still available. Nested evaluation contexts spawned by
    /// built-ins inherit it so re-entrant evaluation stays bounded.
    pub(crate) fn remaining_depth(&self) -> usize {
        self.depth_remaining
    }

    /// Enables legacy evaluation semantics; today this only arms the
    /// deprecated alternate-scope fallback on lookup misses.
    pub fn set_legacy_semantics(&mut self, on: bool) {
        self.legacy = on;
    }

    pub fn legacy_semantics(&self) -> bool {
        self.legacy
    }

    pub(crate) fn set_flatten_and_inline(&mut self, on: bool) {
        self.flatten_and_inline = on;
    }

    fn enter(&mut self) -> bool {
        if self.depth_remaining == 0 {
            return false;
        }
        self.depth_remaining -= 1;
        true
    }

    fn leave(&mut self) {
        self.depth_remaining += 1;
    }
}

/// The result of partial evaluation: either everything collapsed to a
/// value, or a residual tree with the resolvable parts substituted.
#[derive(Debug)]
pub enum Flat<'a> {
    Value(Value<'a>),
    Tree(ExprTree),
}

impl<'a> Flat<'a> {
    pub fn into_value(self) -> Option<Value<'a>> {
        match self {
            Flat::Value(v) => Some(v),
            Flat::Tree(_) => None,
        }
    }

    pub fn into_tree(self) -> Option<ExprTree> {
        match self {
            Flat::Value(_) => None,
            Flat::Tree(t) => Some(t),
        }
    }

    /// The residual as a tree either way; values become literal trees.
    pub fn to_expr(&self) -> ExprTree {
        match self {
            Flat::Value(v) => v.to_expr(),
            Flat::Tree(t) => t.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

impl ExprTree {
    /// Evaluates this expression. Never fails: unresolvable names are the
    /// Undefined value, ill-typed operations and an exhausted recursion
    /// budget are the Error value.
    pub fn evaluate<'a>(&'a self, state: &mut EvalState<'a>) -> Value<'a> {
        if !state.enter() {
            return Value::Error;
        }
        let value = self.evaluate_inner(state);
        state.leave();
        value
    }

    fn evaluate_inner<'a>(&'a self, state: &mut EvalState<'a>) -> Value<'a> {
        match self {
            ExprTree::Literal(lit) => Value::from_literal(lit),
            ExprTree::AttrRef(r) => eval_attr_ref(r, state),
            ExprTree::UnaryOp { op, operand } => {
                if *op == OpKind::Parentheses {
                    return operand.evaluate(state);
                }
                let v = operand.evaluate(state);
                apply_unary(*op, v)
            }
            ExprTree::BinaryOp { op, left, right } => eval_binary(*op, left, right, state),
            ExprTree::TernaryOp {
                cond,
                if_true,
                if_false,
            } => {
                let c = cond.evaluate(state);
                match c {
                    Value::Undefined => Value::Undefined,
                    other => match other.as_bool_equiv() {
                        Some(true) => if_true.evaluate(state),
                        Some(false) => if_false.evaluate(state),
                        None => Value::Error,
                    },
                }
            }
            ExprTree::FnCall { name, args } => functions::call_function(name, args, state),
            ExprTree::List(exprs) => Value::List(ListValue::Scoped(exprs, state.scope.clone())),
            ExprTree::Record(ad) => Value::ClassAd(AdValue::Scoped(state.scope.push(ad))),
        }
    }

    /// Evaluates and also captures the significant sub-expression: the
    /// minimal portion of the tree actually consulted for the result.
    /// Callers caching results use it to decide what can invalidate them.
    pub fn evaluate_with_significance<'a>(
        &'a self,
        state: &mut EvalState<'a>,
    ) -> (Value<'a>, ExprTree) {
        if !state.enter() {
            return (Value::Error, self.clone());
        }
        let out = self.eval_sig_inner(state);
        state.leave();
        out
    }

    fn eval_sig_inner<'a>(&'a self, state: &mut EvalState<'a>) -> (Value<'a>, ExprTree) {
        match self {
            ExprTree::UnaryOp { op, operand } => {
                let (v, sig) = operand.evaluate_with_significance(state);
                if *op == OpKind::Parentheses || v.is_exceptional() {
                    // the operator only propagates; the operand alone is
                    // significant
                    let value = if *op == OpKind::Parentheses {
                        v
                    } else {
                        apply_unary(*op, v)
                    };
                    (value, sig)
                } else {
                    (apply_unary(*op, v), ExprTree::unary(*op, sig))
                }
            }
            ExprTree::BinaryOp { op, left, right } => match op {
                OpKind::LogicalAnd | OpKind::LogicalOr => {
                    let (v1, s1) = left.evaluate_with_significance(state);
                    if let Some(b) = v1.as_bool_equiv() {
                        if *op == OpKind::LogicalOr && b {
                            return (Value::Boolean(true), s1);
                        }
                        if *op == OpKind::LogicalAnd && !b {
                            return (Value::Boolean(false), s1);
                        }
                    }
                    let (v2, s2) = right.evaluate_with_significance(state);
                    (do_logical(*op, v1, v2), ExprTree::binary(*op, s1, s2))
                }
                OpKind::Elvis => {
                    let (v1, s1) = left.evaluate_with_significance(state);
                    if matches!(v1, Value::Undefined) {
                        right.evaluate_with_significance(state)
                    } else {
                        (v1, s1)
                    }
                }
                _ => {
                    let (v1, s1) = left.evaluate_with_significance(state);
                    let (v2, s2) = right.evaluate_with_significance(state);
                    if op.is_strict() && (v1.is_exceptional() || v2.is_exceptional()) {
                        // the exceptional operand is merely propagated;
                        // only its sub-expression is significant
                        let sig = match (&v1, &v2) {
                            (Value::Error, _) => s1,
                            (_, Value::Error) => s2,
                            (Value::Undefined, _) => s1,
                            (_, _) => s2,
                        };
                        (do_binary(*op, v1, v2, state), sig)
                    } else {
                        (do_binary(*op, v1, v2, state), ExprTree::binary(*op, s1, s2))
                    }
                }
            },
            ExprTree::TernaryOp {
                cond,
                if_true,
                if_false,
            } => {
                let (c, csig) = cond.evaluate_with_significance(state);
                match c {
                    Value::Undefined => (Value::Undefined, csig),
                    other => match other.as_bool_equiv() {
                        Some(true) => if_true.evaluate_with_significance(state),
                        Some(false) => if_false.evaluate_with_significance(state),
                        None => (Value::Error, csig),
                    },
                }
            }
            // leaves and calls are significant as a whole
            _ => (self.evaluate_inner(state), self.clone()),
        }
    }

    /// Partial evaluation: resolvable sub-expressions collapse to values,
    /// unresolvable references survive in a residual tree.
    pub fn flatten<'a>(&'a self, state: &mut EvalState<'a>) -> Flat<'a> {
        if !state.enter() {
            return Flat::Value(Value::Error);
        }
        let out = self.flatten_inner(state);
        state.leave();
        out
    }

    fn flatten_inner<'a>(&'a self, state: &mut EvalState<'a>) -> Flat<'a> {
        match self {
            ExprTree::Literal(lit) => Flat::Value(Value::from_literal(lit)),
            ExprTree::AttrRef(r) => flatten_attr_ref(self, r, state),
            ExprTree::UnaryOp { op, operand } => match operand.flatten(state) {
                Flat::Value(v) => {
                    if *op == OpKind::Parentheses {
                        Flat::Value(v)
                    } else {
                        Flat::Value(apply_unary(*op, v))
                    }
                }
                Flat::Tree(t) => Flat::Tree(ExprTree::unary(*op, t)),
            },
            ExprTree::BinaryOp { op, left, right } => {
                flatten_binary(*op, left, right, state)
            }
            ExprTree::TernaryOp {
                cond,
                if_true,
                if_false,
            } => {
                match cond.flatten(state) {
                    Flat::Value(Value::Undefined) => {
                        // an undefined selector leaves the whole
                        // conditional in place
                        let t = if_true.flatten(state).to_expr();
                        let f = if_false.flatten(state).to_expr();
                        Flat::Tree(ExprTree::ternary(cond.as_ref().clone(), t, f))
                    }
                    Flat::Value(c) => match c.as_bool_equiv() {
                        Some(true) => if_true.flatten(state),
                        Some(false) => if_false.flatten(state),
                        None => Flat::Value(Value::Error),
                    },
                    Flat::Tree(ct) => {
                        let t = if_true.flatten(state).to_expr();
                        let f = if_false.flatten(state).to_expr();
                        Flat::Tree(ExprTree::ternary(ct, t, f))
                    }
                }
            }
            ExprTree::FnCall { name, args } => {
                let mut flat_args = Vec::with_capacity(args.len());
                let mut all_values = true;
                for arg in args {
                    let f = arg.flatten(state);
                    if matches!(f, Flat::Tree(_)) {
                        all_values = false;
                    }
                    flat_args.push(f);
                }
                if all_values {
                    Flat::Value(functions::call_function(name, args, state))
                } else {
                    Flat::Tree(ExprTree::FnCall {
                        name: name.clone(),
                        args: flat_args.iter().map(Flat::to_expr).collect(),
                    })
                }
            }
            ExprTree::List(exprs) => {
                let mut out = Vec::with_capacity(exprs.len());
                for e in exprs {
                    out.push(e.flatten(state).to_expr());
                }
                Flat::Tree(ExprTree::List(out))
            }
            ExprTree::Record(ad) => {
                let inner_scope = state.scope.push(ad);
                let saved = mem::replace(&mut state.scope, inner_scope);
                let mut out = ClassAd::new();
                for (name, expr) in ad.attributes() {
                    let f = expr.flatten(state);
                    out.insert(name, f.to_expr());
                }
                state.scope = saved;
                Flat::Tree(ExprTree::Record(out))
            }
        }
    }
}

fn flatten_binary<'a>(
    op: OpKind,
    left: &'a ExprTree,
    right: &'a ExprTree,
    state: &mut EvalState<'a>,
) -> Flat<'a> {
    if op == OpKind::Elvis {
        return match left.flatten(state) {
            Flat::Value(Value::Undefined) => right.flatten(state),
            Flat::Value(v) => Flat::Value(v),
            Flat::Tree(t) => {
                let rt = right.flatten(state).to_expr();
                Flat::Tree(ExprTree::binary(OpKind::Elvis, t, rt))
            }
        };
    }

    let fl = left.flatten(state);
    // a value on one side of a logical connective can decide the result
    // without the other side
    if matches!(op, OpKind::LogicalAnd | OpKind::LogicalOr) {
        if let Flat::Value(v) = &fl {
            match (op, v.as_bool_equiv()) {
                (OpKind::LogicalOr, Some(true)) => return Flat::Value(Value::Boolean(true)),
                (OpKind::LogicalAnd, Some(false)) => return Flat::Value(Value::Boolean(false)),
                _ => {}
            }
        }
    }
    let fr = right.flatten(state);

    match (fl, fr) {
        (Flat::Value(v1), Flat::Value(v2)) => Flat::Value(do_binary(op, v1, v2, state)),
        (l, r) => Flat::Tree(ExprTree::binary(op, l.to_expr(), r.to_expr())),
    }
}

fn flatten_attr_ref<'a>(
    node: &ExprTree,
    r: &'a AttributeReference,
    state: &mut EvalState<'a>,
) -> Flat<'a> {
    match resolve_name(&r.name, r.absolute, r.base.as_deref(), state) {
        Resolution::Error => Flat::Value(Value::Error),
        Resolution::Undefined => Flat::Tree(node.clone()),
        Resolution::Value(Value::Undefined) => Flat::Tree(node.clone()),
        Resolution::Value(v) => Flat::Value(v),
        Resolution::Found(expr, scope) => {
            let saved = mem::replace(&mut state.scope, scope);
            let out = if state.flatten_and_inline {
                // substitute the target's own flattening for the reference
                match expr.flatten(state) {
                    Flat::Value(Value::Undefined) => Flat::Tree(node.clone()),
                    other => other,
                }
            } else {
                match expr.evaluate(state) {
                    Value::Undefined => Flat::Tree(node.clone()),
                    v => Flat::Value(v),
                }
            };
            state.scope = saved;
            out
        }
    }
}

// ---------------------------------------------------------------------------
// Attribute resolution
// ---------------------------------------------------------------------------

enum Resolution<'a> {
    /// An expression bound in some record; evaluate it with that record's
    /// scope current.
    Found(&'a ExprTree, Scope<'a>),
    /// Resolution produced a value directly (special names, synthetic
    /// containers, list broadcast).
    Value(Value<'a>),
    Undefined,
    Error,
}

fn eval_attr_ref<'a>(r: &'a AttributeReference, state: &mut EvalState<'a>) -> Value<'a> {
    match resolve_name(&r.name, r.absolute, r.base.as_deref(), state) {
        Resolution::Found(expr, scope) => eval_in_scope(expr, scope, state),
        Resolution::Value(v) => v,
        Resolution::Undefined => Value::Undefined,
        Resolution::Error => Value::Error,
    }
}

fn eval_in_scope<'a>(
    expr: &'a ExprTree,
    scope: Scope<'a>,
    state: &mut EvalState<'a>,
) -> Value<'a> {
    let saved = mem::replace(&mut state.scope, scope);
    let v = expr.evaluate(state);
    state.scope = saved;
    v
}

/// The attribute search. Chained prototypes are consulted by
/// `ClassAd::lookup` at every level; expressions found through a prototype
/// still evaluate in the referencing record's scope.
fn resolve_name<'a>(
    name: &str,
    absolute: bool,
    base: Option<&'a ExprTree>,
    state: &mut EvalState<'a>,
) -> Resolution<'a> {
    if let Some(base) = base {
        return resolve_in_base(name, base, state);
    }

    if absolute {
        let root = state.scope.root_scope();
        return match root.current() {
            Some(ad) => match ad.lookup(name) {
                Some(expr) => Resolution::Found(expr, root),
                None => Resolution::Undefined,
            },
            None => Resolution::Undefined,
        };
    }

    // relative: walk the chain innermost-out
    let mut cursor = state.scope.clone();
    let mut innermost = true;
    while let Some(ad) = cursor.current() {
        if let Some(expr) = ad.lookup(name) {
            return Resolution::Found(expr, cursor);
        }

        if innermost {
            // special names resolve once local attributes have had their
            // chance to shadow them
            match name.to_ascii_lowercase().as_str() {
                "toplevel" | "root" => {
                    return Resolution::Value(Value::ClassAd(AdValue::Scoped(
                        state.scope.root_scope(),
                    )));
                }
                "self" => {
                    return Resolution::Value(Value::ClassAd(AdValue::Scoped(cursor)));
                }
                "parent" => {
                    let parent = cursor.parent();
                    return if parent.is_empty() {
                        Resolution::Undefined
                    } else {
                        Resolution::Value(Value::ClassAd(AdValue::Scoped(parent)))
                    };
                }
                _ => {}
            }
            innermost = false;
        }
        cursor = cursor.parent();
    }

    // deprecated migration shim: an unscoped miss may retry against the
    // innermost record's alternate scope, but only under legacy semantics
    if state.legacy {
        if let Some(alt) = state.scope.current().and_then(|ad| ad.alternate_scope()) {
            if let Some(expr) = alt.lookup(name) {
                return Resolution::Found(expr, Scope::root(alt));
            }
        }
    }

    Resolution::Undefined
}

fn resolve_in_base<'a>(
    name: &str,
    base: &'a ExprTree,
    state: &mut EvalState<'a>,
) -> Resolution<'a> {
    match base.evaluate(state) {
        Value::Undefined => Resolution::Undefined,
        Value::Error => Resolution::Error,
        Value::ClassAd(AdValue::Scoped(scope)) => {
            // a record reached through a base expression is searched via
            // its own chain only, never the caller's scope
            let ad = scope.current().expect("scoped record value has a frame");
            match ad.lookup(name) {
                Some(expr) => Resolution::Found(expr, scope),
                None => Resolution::Undefined,
            }
        }
        Value::ClassAd(AdValue::Owned(ad)) => Resolution::Value(lookup_in_owned(&ad, name)),
        Value::List(list) => Resolution::Value(broadcast_lookup(&list, name, state)),
        _ => Resolution::Error,
    }
}

/// Looks an attribute up in a synthetic (owned, root-less) record and
/// detaches the result from it.
fn lookup_in_owned(ad: &Rc<ClassAd>, name: &str) -> Value<'static> {
    match ad.lookup(name) {
        None => Value::Undefined,
        Some(expr) => {
            let mut state = EvalState::with_scope(Scope::root(ad));
            expr.evaluate(&mut state).into_owned()
        }
    }
}

/// The list-broadcast branch of resolution: the lookup is applied to every
/// element independently, each in a fresh evaluation state so per-element
/// work cannot pollute a shared cache, and the results become a brand-new
/// owned list with no enclosing scope.
fn broadcast_lookup<'a>(
    list: &ListValue<'a>,
    name: &str,
    state: &EvalState<'a>,
) -> Value<'a> {
    let mut out: Vec<ExprTree> = Vec::with_capacity(list.len());

    let mut push_element = |element: Value<'_>, out: &mut Vec<ExprTree>| match element {
        Value::ClassAd(AdValue::Scoped(scope)) => {
            let ad = scope.current().expect("scoped record value has a frame");
            match ad.lookup(name) {
                None => out.push(ExprTree::undefined()),
                Some(expr) => {
                    let mut fresh = EvalState::with_scope(scope.clone());
                    fresh.set_legacy_semantics(state.legacy);
                    let v = expr.evaluate(&mut fresh);
                    out.push(v.to_expr());
                }
            }
        }
        Value::ClassAd(AdValue::Owned(ad)) => {
            out.push(lookup_in_owned(&ad, name).to_expr());
        }
        Value::List(inner) => {
            let mut fresh = EvalState::with_scope(Scope::empty());
            fresh.set_legacy_semantics(state.legacy);
            match broadcast_lookup(&inner, name, &fresh) {
                Value::List(ListValue::Owned(exprs)) => {
                    out.push(ExprTree::List(exprs.as_ref().clone()))
                }
                other => out.push(other.to_expr()),
            }
        }
        _ => out.push(ExprTree::undefined()),
    };

    match list {
        ListValue::Scoped(exprs, scope) => {
            for expr in *exprs {
                let mut fresh = EvalState::with_scope(scope.clone());
                fresh.set_legacy_semantics(state.legacy);
                let element = expr.evaluate(&mut fresh);
                push_element(element, &mut out);
            }
        }
        ListValue::Owned(exprs) => {
            for expr in exprs.iter() {
                let mut fresh = EvalState::with_scope(Scope::empty());
                fresh.set_legacy_semantics(state.legacy);
                let element = expr.evaluate(&mut fresh);
                push_element(element.into_owned(), &mut out);
            }
        }
    }

    Value::List(ListValue::Owned(Rc::new(out)))
}

/// Resolution and evaluation of a bare attribute name against a prepared
/// state; the entry point behind `ClassAd::evaluate_attr`.
pub(crate) fn evaluate_attr_in_state<'a>(name: &str, state: &mut EvalState<'a>) -> Value<'a> {
    match resolve_name(name, false, None, state) {
        Resolution::Found(expr, scope) => eval_in_scope(expr, scope, state),
        Resolution::Value(v) => v,
        Resolution::Undefined => Value::Undefined,
        Resolution::Error => Value::Error,
    }
}

// ---------------------------------------------------------------------------
// Operator semantics
// ---------------------------------------------------------------------------

fn eval_binary<'a>(
    op: OpKind,
    left: &'a ExprTree,
    right: &'a ExprTree,
    state: &mut EvalState<'a>,
) -> Value<'a> {
    match op {
        OpKind::LogicalAnd | OpKind::LogicalOr => {
            let v1 = left.evaluate(state);
            if let Some(b) = v1.as_bool_equiv() {
                // a decided connective does not evaluate its other side
                if op == OpKind::LogicalOr && b {
                    return Value::Boolean(true);
                }
                if op == OpKind::LogicalAnd && !b {
                    return Value::Boolean(false);
                }
            }
            let v2 = right.evaluate(state);
            do_logical(op, v1, v2)
        }
        OpKind::Elvis => {
            let v1 = left.evaluate(state);
            if matches!(v1, Value::Undefined) {
                right.evaluate(state)
            } else {
                v1
            }
        }
        _ => {
            let v1 = left.evaluate(state);
            let v2 = right.evaluate(state);
            do_binary(op, v1, v2, state)
        }
    }
}

pub(crate) fn do_binary<'a>(
    op: OpKind,
    v1: Value<'a>,
    v2: Value<'a>,
    state: &mut EvalState<'a>,
) -> Value<'a> {
    if op.is_strict() {
        // Error absorbs before Undefined, left operand first
        if matches!(v1, Value::Error) || matches!(v2, Value::Error) {
            return Value::Error;
        }
        if matches!(v1, Value::Undefined) || matches!(v2, Value::Undefined) {
            return Value::Undefined;
        }
    }

    use OpKind::*;
    match op {
        LessThan | LessOrEqual | GreaterThan | GreaterOrEqual | Equal | NotEqual | MetaEqual
        | MetaNotEqual => do_comparison(op, v1, v2),
        Addition | Subtraction | Multiplication | Division | Modulus => {
            do_arithmetic(op, v1, v2)
        }
        BitwiseAnd | BitwiseOr | BitwiseXor | LeftShift | RightShift | URightShift => {
            do_bitwise(op, v1, v2)
        }
        LogicalAnd | LogicalOr => do_logical(op, v1, v2),
        Elvis => {
            if matches!(v1, Value::Undefined) {
                v2
            } else {
                v1
            }
        }
        Subscript => do_subscript(v1, v2, state),
        // the remaining kinds are unary or ternary and never reach here
        _ => Value::Error,
    }
}

pub(crate) fn apply_unary<'a>(op: OpKind, v: Value<'a>) -> Value<'a> {
    // unary plus is special: it passes exceptional values and numbers
    // through before strictness is even considered
    if op == OpKind::UnaryPlus {
        return match v {
            Value::Boolean(_)
            | Value::String(_)
            | Value::List(_)
            | Value::ClassAd(_)
            | Value::AbsoluteTime(_) => Value::Error,
            other => other,
        };
    }

    if v.is_exceptional() {
        return v;
    }

    match op {
        OpKind::UnaryMinus => match v {
            Value::Integer(i) => Value::Integer(i.wrapping_neg()),
            Value::Real(r) => Value::Real(-r),
            Value::RelativeTime(t) => Value::RelativeTime(-t),
            _ => Value::Error,
        },
        OpKind::LogicalNot => match v.as_bool_equiv() {
            Some(b) => Value::Boolean(!b),
            None => Value::Error,
        },
        OpKind::BitwiseNot => match v {
            Value::Integer(i) => Value::Integer(!i),
            _ => Value::Error,
        },
        OpKind::Parentheses => v,
        _ => Value::Error,
    }
}

/// Type classes after numeric promotion, used by comparison and arithmetic.
enum Coerced {
    Integers(i64, i64),
    Reals(f64, f64),
    Strings,
    AbsTimes,
    RelTimes,
    Containers,
    Exceptional,
}

/// Numeric promotion: booleans become integers, a mixed integer/real pair
/// becomes reals. Everything else keeps its type class.
fn coerce_pair<'a>(v1: Value<'a>, v2: Value<'a>) -> (Coerced, Value<'a>, Value<'a>) {
    use Value::*;
    let kind = |v: &Value| match v {
        ClassAd(_) | List(_) => 0,
        String(_) => 1,
        Undefined | Error => 2,
        AbsoluteTime(_) => 3,
        RelativeTime(_) => 4,
        _ => 5,
    };

    // non-numeric classes win in a fixed order
    if kind(&v1) == 0 || kind(&v2) == 0 {
        return (Coerced::Containers, v1, v2);
    }
    if kind(&v1) == 1 || kind(&v2) == 1 {
        return (Coerced::Strings, v1, v2);
    }
    if kind(&v1) == 2 || kind(&v2) == 2 {
        return (Coerced::Exceptional, v1, v2);
    }
    if kind(&v1) == 3 || kind(&v2) == 3 {
        return (Coerced::AbsTimes, v1, v2);
    }
    if kind(&v1) == 4 || kind(&v2) == 4 {
        return (Coerced::RelTimes, v1, v2);
    }

    let to_num = |v: &Value<'a>| match v {
        Boolean(b) => Integer(i64::from(*b)),
        Integer(i) => Integer(*i),
        Real(r) => Real(*r),
        _ => Error,
    };
    match (to_num(&v1), to_num(&v2)) {
        (Integer(a), Integer(b)) => (Coerced::Integers(a, b), Integer(a), Integer(b)),
        (Integer(a), Real(b)) => (Coerced::Reals(a as f64, b), Real(a as f64), Real(b)),
        (Real(a), Integer(b)) => (Coerced::Reals(a, b as f64), Real(a), Real(b as f64)),
        (Real(a), Real(b)) => (Coerced::Reals(a, b), Real(a), Real(b)),
        _ => (Coerced::Exceptional, Value::Error, Value::Error),
    }
}

fn do_comparison<'a>(op: OpKind, v1: Value<'a>, v2: Value<'a>) -> Value<'a> {
    // the meta comparisons require identical types before any promotion:
    // 1 =?= 1.0 is false even though 1 == 1.0 is true
    let (op, exact) = match op {
        OpKind::MetaEqual | OpKind::MetaNotEqual => {
            let same_type = std::mem::discriminant(&v1) == std::mem::discriminant(&v2);
            if !same_type {
                return Value::Boolean(op == OpKind::MetaNotEqual);
            }
            if v1.is_exceptional() {
                return Value::Boolean(op == OpKind::MetaEqual);
            }
            if op == OpKind::MetaEqual {
                (OpKind::Equal, true)
            } else {
                (OpKind::NotEqual, true)
            }
        }
        other => (other, false),
    };

    let (coerced, c1, c2) = coerce_pair(v1, v2);

    match coerced {
        Coerced::Integers(a, b) => compare_ordered(op, a.cmp(&b)),
        Coerced::Reals(a, b) => compare_reals(op, a, b),
        Coerced::Strings => {
            let (Value::String(a), Value::String(b)) = (&c1, &c2) else {
                // strings compare only against strings
                return Value::Error;
            };
            let ord = if exact {
                a.as_str().cmp(b.as_str())
            } else {
                a.to_ascii_lowercase().cmp(&b.to_ascii_lowercase())
            };
            compare_ordered(op, ord)
        }
        Coerced::AbsTimes => {
            let (Value::AbsoluteTime(a), Value::AbsoluteTime(b)) = (&c1, &c2) else {
                return Value::Error;
            };
            compare_ordered(op, a.secs.cmp(&b.secs))
        }
        Coerced::RelTimes => {
            let (Value::RelativeTime(a), Value::RelativeTime(b)) = (&c1, &c2) else {
                return Value::Error;
            };
            compare_reals(op, *a, *b)
        }
        Coerced::Containers => Value::Error,
        Coerced::Exceptional => Value::Error,
    }
}

fn compare_ordered<'a>(op: OpKind, ord: std::cmp::Ordering) -> Value<'a> {
    use std::cmp::Ordering::*;
    let b = match op {
        OpKind::LessThan => ord == Less,
        OpKind::LessOrEqual => ord != Greater,
        OpKind::GreaterThan => ord == Greater,
        OpKind::GreaterOrEqual => ord != Less,
        OpKind::Equal => ord == Equal,
        OpKind::NotEqual => ord != Equal,
        _ => return Value::Error,
    };
    Value::Boolean(b)
}

fn compare_reals<'a>(op: OpKind, a: f64, b: f64) -> Value<'a> {
    // IEEE comparisons: everything involving NaN is false except !=
    let result = match op {
        OpKind::LessThan => a < b,
        OpKind::LessOrEqual => a <= b,
        OpKind::GreaterThan => a > b,
        OpKind::GreaterOrEqual => a >= b,
        OpKind::Equal => a == b,
        OpKind::NotEqual => a != b,
        _ => return Value::Error,
    };
    Value::Boolean(result)
}

fn do_arithmetic<'a>(op: OpKind, v1: Value<'a>, v2: Value<'a>) -> Value<'a> {
    let arithmetic_type = |v: &Value| {
        matches!(
            v,
            Value::Integer(_)
                | Value::Real(_)
                | Value::Boolean(_)
                | Value::AbsoluteTime(_)
                | Value::RelativeTime(_)
        )
    };
    if !arithmetic_type(&v1) || !arithmetic_type(&v2) {
        return Value::Error;
    }

    let (coerced, c1, c2) = coerce_pair(v1, v2);
    match coerced {
        Coerced::Integers(a, b) => match op {
            OpKind::Addition => Value::Integer(a.wrapping_add(b)),
            OpKind::Subtraction => Value::Integer(a.wrapping_sub(b)),
            OpKind::Multiplication => Value::Integer(a.wrapping_mul(b)),
            OpKind::Division => {
                if b == 0 {
                    Value::Error
                } else {
                    Value::Integer(a.wrapping_div(b))
                }
            }
            OpKind::Modulus => {
                if b == 0 {
                    Value::Error
                } else {
                    Value::Integer(a.wrapping_rem(b))
                }
            }
            _ => Value::Error,
        },
        Coerced::Reals(a, b) => match op {
            OpKind::Addition => finite_or_error(a + b),
            OpKind::Subtraction => finite_or_error(a - b),
            OpKind::Multiplication => finite_or_error(a * b),
            OpKind::Division => finite_or_error(a / b),
            // real modulus is a domain error
            OpKind::Modulus => Value::Error,
            _ => Value::Error,
        },
        Coerced::AbsTimes | Coerced::RelTimes => do_time_arithmetic(op, c1, c2),
        _ => Value::Error,
    }
}

fn finite_or_error<'a>(r: f64) -> Value<'a> {
    if r.is_infinite() {
        Value::Error
    } else {
        Value::Real(r)
    }
}

fn do_time_arithmetic<'a>(op: OpKind, v1: Value<'a>, v2: Value<'a>) -> Value<'a> {
    use Value::*;
    match (op, v1, v2) {
        (OpKind::Addition, AbsoluteTime(a), RelativeTime(r)) => AbsoluteTime(AbsTime {
            secs: a.secs + r as i64,
            offset: a.offset,
        }),
        (OpKind::Addition, RelativeTime(r), AbsoluteTime(a)) => AbsoluteTime(AbsTime {
            secs: a.secs + r as i64,
            offset: a.offset,
        }),
        (OpKind::Addition, RelativeTime(a), RelativeTime(b)) => RelativeTime(a + b),
        (OpKind::Subtraction, AbsoluteTime(a), AbsoluteTime(b)) => {
            RelativeTime((a.secs - b.secs) as f64)
        }
        (OpKind::Subtraction, AbsoluteTime(a), RelativeTime(r)) => AbsoluteTime(AbsTime {
            secs: a.secs - r as i64,
            offset: a.offset,
        }),
        (OpKind::Subtraction, RelativeTime(a), RelativeTime(b)) => RelativeTime(a - b),
        (OpKind::Multiplication, RelativeTime(t), Integer(n)) => RelativeTime(t * n as f64),
        (OpKind::Multiplication, Integer(n), RelativeTime(t)) => RelativeTime(n as f64 * t),
        (OpKind::Multiplication, RelativeTime(t), Real(x)) => RelativeTime(t * x),
        (OpKind::Multiplication, Real(x), RelativeTime(t)) => RelativeTime(x * t),
        (OpKind::Division, RelativeTime(t), Integer(n)) => RelativeTime(t / n as f64),
        (OpKind::Division, RelativeTime(t), Real(x)) => RelativeTime(t / x),
        _ => Error,
    }
}

pub(crate) fn do_logical<'a>(op: OpKind, v1: Value<'a>, v2: Value<'a>) -> Value<'a> {
    // numbers coerce to their truth value first
    let to_bool = |v: Value<'a>| match v.as_bool_equiv() {
        Some(b) => Value::Boolean(b),
        None => v,
    };
    let v1 = to_bool(v1);
    let v2 = to_bool(v2);

    let valid = |v: &Value| {
        matches!(v, Value::Boolean(_) | Value::Undefined | Value::Error)
    };
    if !valid(&v1) || !valid(&v2) {
        return Value::Error;
    }

    match op {
        OpKind::LogicalOr => match (&v1, &v2) {
            (Value::Boolean(true), _) => Value::Boolean(true),
            (Value::Error, _) => Value::Error,
            (Value::Boolean(false), _) => v2,
            // v1 is undefined
            (_, Value::Boolean(true)) => Value::Boolean(true),
            (_, Value::Boolean(false)) => Value::Undefined,
            (_, other) => other.clone(),
        },
        OpKind::LogicalAnd => match (&v1, &v2) {
            (Value::Boolean(false), _) => Value::Boolean(false),
            (Value::Error, _) => Value::Error,
            (Value::Boolean(true), _) => v2,
            // v1 is undefined
            (_, Value::Boolean(false)) => Value::Boolean(false),
            (_, Value::Boolean(true)) => Value::Undefined,
            (_, other) => other.clone(),
        },
        _ => Value::Error,
    }
}

fn do_bitwise<'a>(op: OpKind, v1: Value<'a>, v2: Value<'a>) -> Value<'a> {
    let (Value::Integer(a), Value::Integer(b)) = (&v1, &v2) else {
        return Value::Error;
    };
    let (a, b) = (*a, *b);
    let shift = (b & 63) as u32;
    match op {
        OpKind::BitwiseAnd => Value::Integer(a & b),
        OpKind::BitwiseOr => Value::Integer(a | b),
        OpKind::BitwiseXor => Value::Integer(a ^ b),
        OpKind::LeftShift => Value::Integer(a.wrapping_shl(shift)),
        OpKind::RightShift => Value::Integer(a.wrapping_shr(shift)),
        OpKind::URightShift => Value::Integer(((a as u64).wrapping_shr(shift)) as i64),
        _ => Value::Error,
    }
}

fn do_subscript<'a>(v1: Value<'a>, v2: Value<'a>, state: &mut EvalState<'a>) -> Value<'a> {
    match (v1, v2) {
        (Value::ClassAd(ad), Value::String(index)) => match ad {
            AdValue::Scoped(scope) => {
                let record = scope.current().expect("scoped record value has a frame");
                match record.lookup(&index) {
                    // subscripting a missing attribute is an error, unlike
                    // selection which is undefined
                    None => Value::Error,
                    Some(expr) => eval_in_scope(expr, scope.clone(), state),
                }
            }
            AdValue::Owned(rc) => match rc.lookup(&index) {
                None => Value::Error,
                Some(_) => lookup_in_owned(&rc, &index),
            },
        },
        (Value::List(list), Value::Integer(index)) => {
            if index < 0 || index as usize >= list.len() {
                return Value::Error;
            }
            let idx = index as usize;
            match list {
                ListValue::Scoped(exprs, scope) => eval_in_scope(&exprs[idx], scope, state),
                ListValue::Owned(exprs) => {
                    let mut fresh = EvalState::with_scope(Scope::empty());
                    exprs[idx].evaluate(&mut fresh).into_owned()
                }
            }
        }
        _ => Value::Error,
    }
}

/// Evaluates the conditional with lazy branches; used by the `ifThenElse`
/// built-in, which shares the operator's semantics.
pub(crate) fn eval_conditional<'a>(
    cond: &'a ExprTree,
    if_true: &'a ExprTree,
    if_false: &'a ExprTree,
    state: &mut EvalState<'a>,
) -> Value<'a> {
    let c = cond.evaluate(state);
    match c {
        Value::Undefined => Value::Undefined,
        other => match other.as_bool_equiv() {
            Some(true) => if_true.evaluate(state),
            Some(false) => if_false.evaluate(state),
            None => Value::Error,
        },
    }
}
