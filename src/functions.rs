//! The function registry and the built-in function library.
//!
//! A process-wide, case-insensitive table maps function names to native
//! implementations. `FnCall` nodes resolve through the table every time they
//! are evaluated; a name with no entry evaluates to the Error value, per the
//! contract that evaluating a well-formed tree never fails. The table is
//! preloaded with the built-ins below and can be extended at runtime with
//! [`register_function`]; an external module loader would call the same
//! entry point.
//!
//! Implementations receive their arguments *unevaluated*, so the lazy
//! functions (`ifThenElse`) can share the conditional operator's semantics;
//! most begin by evaluating every argument. Argument errors follow the
//! operator absorption rules: a wrong arity or operand type is the Error
//! value, an Undefined argument generally stays Undefined.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::rc::Rc;
use std::sync::RwLock;
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{Datelike, FixedOffset, Local, Offset, TimeZone, Timelike};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::ast::{ExprTree, OpKind};
use crate::evaluator::{self, EvalState, Scope};
use crate::parser::Parser;
use crate::record::ClassAd;
use crate::unparser;
use crate::value::{
    format_abs_time, format_rel_time, parse_abs_time, parse_rel_time, AbsTime, AdValue,
    ListValue, Value,
};

/// A native function implementation: the unevaluated argument trees plus
/// the evaluation state the call site was reached with.
pub type BuiltinFn = for<'a> fn(&'a [ExprTree], &mut EvalState<'a>) -> Value<'a>;

static REGISTRY: Lazy<RwLock<HashMap<String, BuiltinFn>>> =
    Lazy::new(|| RwLock::new(default_registry()));

/// Registers (or replaces) a function under a case-insensitive name.
pub fn register_function(name: &str, func: BuiltinFn) {
    tracing::debug!(name, "registering function");
    let mut table = match REGISTRY.write() {
        Ok(table) => table,
        Err(poisoned) => poisoned.into_inner(),
    };
    table.insert(name.to_ascii_lowercase(), func);
}

/// Dispatches a function call. Unknown names evaluate to Error.
pub fn call_function<'a>(
    name: &str,
    args: &'a [ExprTree],
    state: &mut EvalState<'a>,
) -> Value<'a> {
    let func = {
        let table = match REGISTRY.read() {
            Ok(table) => table,
            Err(poisoned) => poisoned.into_inner(),
        };
        table.get(&name.to_ascii_lowercase()).copied()
    };
    match func {
        Some(f) => f(args, state),
        None => Value::Error,
    }
}

fn default_registry() -> HashMap<String, BuiltinFn> {
    let entries: &[(&str, BuiltinFn)] = &[
        // type predicates
        ("isundefined", fn_is_undefined),
        ("iserror", fn_is_error),
        ("isstring", fn_is_string),
        ("isinteger", fn_is_integer),
        ("isreal", fn_is_real),
        ("islist", fn_is_list),
        ("isclassad", fn_is_classad),
        ("isboolean", fn_is_boolean),
        ("isabstime", fn_is_abstime),
        ("isreltime", fn_is_reltime),
        // list membership and aggregates
        ("member", fn_member),
        ("identicalmember", fn_identical_member),
        ("size", fn_size),
        ("sum", fn_sum),
        ("avg", fn_avg),
        ("min", fn_min),
        ("max", fn_max),
        ("anycompare", fn_any_compare),
        ("allcompare", fn_all_compare),
        // strings
        ("strcat", fn_strcat),
        ("join", fn_join),
        ("toupper", fn_to_upper),
        ("tolower", fn_to_lower),
        ("substr", fn_substr),
        ("strcmp", fn_strcmp),
        ("stricmp", fn_stricmp),
        // pattern matching
        ("regexp", fn_regexp),
        ("regexpmember", fn_regexp_member),
        ("replace", fn_replace),
        ("replaceall", fn_replace_all),
        ("regexps", fn_regexps),
        // time
        ("time", fn_time),
        ("interval", fn_interval),
        ("abstime", fn_abs_time),
        ("reltime", fn_rel_time),
        ("splittime", fn_split_time),
        ("formattime", fn_format_time),
        ("timezoneoffset", fn_timezone_offset),
        // numeric
        ("floor", fn_floor),
        ("ceil", fn_ceiling),
        ("ceiling", fn_ceiling),
        ("round", fn_round),
        ("pow", fn_pow),
        ("quantize", fn_quantize),
        // type conversion
        ("int", fn_int),
        ("real", fn_real),
        ("string", fn_string),
        ("bool", fn_bool),
        // conditional
        ("ifthenelse", fn_if_then_else),
        // version comparison
        ("versioncmp", fn_versioncmp),
        ("versionle", fn_version_le),
        ("versionlt", fn_version_lt),
        ("versionge", fn_version_ge),
        ("versiongt", fn_version_gt),
        ("versioneq", fn_version_eq),
        ("versioninrange", fn_version_in_range),
        // debugging and introspection
        ("debug", fn_debug),
        ("unparse", fn_unparse),
        ("eval", fn_eval),
    ];
    entries
        .iter()
        .map(|(name, func)| (name.to_string(), *func))
        .collect()
}

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

fn eval_in<'a>(expr: &'a ExprTree, scope: Scope<'a>, state: &mut EvalState<'a>) -> Value<'a> {
    let saved = std::mem::replace(&mut state.scope, scope);
    let v = expr.evaluate(state);
    state.scope = saved;
    v
}

fn eval_args<'a>(args: &'a [ExprTree], state: &mut EvalState<'a>) -> Vec<Value<'a>> {
    args.iter().map(|a| a.evaluate(state)).collect()
}

/// Error-then-Undefined absorption over already-evaluated arguments.
fn absorb<'a>(vals: &[Value<'a>]) -> Option<Value<'a>> {
    if vals.iter().any(|v| matches!(v, Value::Error)) {
        return Some(Value::Error);
    }
    if vals.iter().any(|v| matches!(v, Value::Undefined)) {
        return Some(Value::Undefined);
    }
    None
}

/// Values of a list's elements. A scoped list evaluates each element in the
/// scope the list was reached through; an owned list evaluates scope-less
/// and detaches every result.
fn list_values<'a>(list: &ListValue<'a>, state: &mut EvalState<'a>) -> Vec<Value<'a>> {
    match list {
        ListValue::Scoped(exprs, scope) => exprs
            .iter()
            .map(|e| eval_in(e, scope.clone(), state))
            .collect(),
        ListValue::Owned(exprs) => exprs
            .iter()
            .map(|e| {
                let mut fresh = EvalState::with_scope(Scope::empty());
                e.evaluate(&mut fresh).into_owned()
            })
            .collect(),
    }
}

/// Numbers, plus strings that read as numbers; the coercion the rounding
/// and interval built-ins share.
fn to_real_lenient(v: &Value) -> Option<f64> {
    match v {
        Value::String(s) => s.trim().parse::<f64>().ok(),
        other => other.as_number_real(),
    }
}

fn local_offset() -> i32 {
    Local::now().offset().fix().local_minus_utc()
}

fn now_abs() -> Option<AbsTime> {
    let secs = SystemTime::now().duration_since(UNIX_EPOCH).ok()?.as_secs() as i64;
    Some(AbsTime {
        secs,
        offset: local_offset(),
    })
}

// ---------------------------------------------------------------------------
// Type predicates
// ---------------------------------------------------------------------------

fn type_predicate<'a>(
    args: &'a [ExprTree],
    state: &mut EvalState<'a>,
    pred: fn(&Value) -> bool,
) -> Value<'a> {
    if args.len() != 1 {
        return Value::Error;
    }
    let v = args[0].evaluate(state);
    Value::Boolean(pred(&v))
}

fn fn_is_undefined<'a>(args: &'a [ExprTree], state: &mut EvalState<'a>) -> Value<'a> {
    type_predicate(args, state, |v| matches!(v, Value::Undefined))
}

fn fn_is_error<'a>(args: &'a [ExprTree], state: &mut EvalState<'a>) -> Value<'a> {
    type_predicate(args, state, |v| matches!(v, Value::Error))
}

fn fn_is_string<'a>(args: &'a [ExprTree], state: &mut EvalState<'a>) -> Value<'a> {
    type_predicate(args, state, |v| matches!(v, Value::String(_)))
}

fn fn_is_integer<'a>(args: &'a [ExprTree], state: &mut EvalState<'a>) -> Value<'a> {
    type_predicate(args, state, |v| matches!(v, Value::Integer(_)))
}

fn fn_is_real<'a>(args: &'a [ExprTree], state: &mut EvalState<'a>) -> Value<'a> {
    type_predicate(args, state, |v| matches!(v, Value::Real(_)))
}

fn fn_is_list<'a>(args: &'a [ExprTree], state: &mut EvalState<'a>) -> Value<'a> {
    type_predicate(args, state, |v| matches!(v, Value::List(_)))
}

fn fn_is_classad<'a>(args: &'a [ExprTree], state: &mut EvalState<'a>) -> Value<'a> {
    type_predicate(args, state, |v| matches!(v, Value::ClassAd(_)))
}

fn fn_is_boolean<'a>(args: &'a [ExprTree], state: &mut EvalState<'a>) -> Value<'a> {
    type_predicate(args, state, |v| matches!(v, Value::Boolean(_)))
}

fn fn_is_abstime<'a>(args: &'a [ExprTree], state: &mut EvalState<'a>) -> Value<'a> {
    type_predicate(args, state, |v| matches!(v, Value::AbsoluteTime(_)))
}

fn fn_is_reltime<'a>(args: &'a [ExprTree], state: &mut EvalState<'a>) -> Value<'a> {
    type_predicate(args, state, |v| matches!(v, Value::RelativeTime(_)))
}

// ---------------------------------------------------------------------------
// List membership and aggregates
// ---------------------------------------------------------------------------

/// `member(x, list)` with `==`, `identicalMember(x, list)` with `=?=`.
fn member_impl<'a>(args: &'a [ExprTree], state: &mut EvalState<'a>, op: OpKind) -> Value<'a> {
    if args.len() != 2 {
        return Value::Error;
    }
    let item = args[0].evaluate(state);
    match item {
        Value::Error | Value::List(_) | Value::ClassAd(_) => return Value::Error,
        Value::Undefined => return Value::Undefined,
        _ => {}
    }
    let list = match args[1].evaluate(state) {
        Value::List(l) => l,
        Value::Undefined => return Value::Undefined,
        _ => return Value::Error,
    };
    for elem in list_values(&list, state) {
        if matches!(
            evaluator::do_binary(op, elem, item.clone(), state),
            Value::Boolean(true)
        ) {
            return Value::Boolean(true);
        }
    }
    Value::Boolean(false)
}

fn fn_member<'a>(args: &'a [ExprTree], state: &mut EvalState<'a>) -> Value<'a> {
    member_impl(args, state, OpKind::Equal)
}

fn fn_identical_member<'a>(args: &'a [ExprTree], state: &mut EvalState<'a>) -> Value<'a> {
    member_impl(args, state, OpKind::MetaEqual)
}

/// Element count of a list or character count of a string.
fn fn_size<'a>(args: &'a [ExprTree], state: &mut EvalState<'a>) -> Value<'a> {
    if args.len() != 1 {
        return Value::Error;
    }
    match args[0].evaluate(state) {
        Value::String(s) => Value::Integer(s.chars().count() as i64),
        Value::List(l) => Value::Integer(l.len() as i64),
        Value::Undefined => Value::Undefined,
        _ => Value::Error,
    }
}

enum Fold {
    Sum,
    Avg,
    Min,
    Max,
}

fn fold_numeric<'a>(args: &'a [ExprTree], state: &mut EvalState<'a>, fold: Fold) -> Value<'a> {
    if args.len() != 1 {
        return Value::Error;
    }
    let list = match args[0].evaluate(state) {
        Value::List(l) => l,
        Value::Undefined => return Value::Undefined,
        _ => return Value::Error,
    };
    // booleans count as 0/1; anything non-numeric poisons the aggregate
    let mut nums: Vec<Value> = Vec::with_capacity(list.len());
    for v in list_values(&list, state) {
        match v {
            Value::Integer(_) | Value::Real(_) => nums.push(v),
            Value::Boolean(b) => nums.push(Value::Integer(i64::from(b))),
            Value::Undefined => return Value::Undefined,
            _ => return Value::Error,
        }
    }
    if nums.is_empty() {
        return Value::Undefined;
    }

    match fold {
        Fold::Sum => {
            if nums.iter().any(|v| matches!(v, Value::Real(_))) {
                Value::Real(nums.iter().filter_map(Value::as_number_real).sum())
            } else {
                let mut total: i64 = 0;
                for v in &nums {
                    total = total.wrapping_add(v.as_number_int().unwrap_or(0));
                }
                Value::Integer(total)
            }
        }
        Fold::Avg => {
            let total: f64 = nums.iter().filter_map(Value::as_number_real).sum();
            Value::Real(total / nums.len() as f64)
        }
        Fold::Min | Fold::Max => {
            let want_max = matches!(fold, Fold::Max);
            let mut best = nums[0].clone();
            let mut best_key = best.as_number_real().unwrap_or(0.0);
            for v in &nums[1..] {
                let key = v.as_number_real().unwrap_or(0.0);
                if (want_max && key > best_key) || (!want_max && key < best_key) {
                    best = v.clone();
                    best_key = key;
                }
            }
            best
        }
    }
}

fn fn_sum<'a>(args: &'a [ExprTree], state: &mut EvalState<'a>) -> Value<'a> {
    fold_numeric(args, state, Fold::Sum)
}

fn fn_avg<'a>(args: &'a [ExprTree], state: &mut EvalState<'a>) -> Value<'a> {
    fold_numeric(args, state, Fold::Avg)
}

fn fn_min<'a>(args: &'a [ExprTree], state: &mut EvalState<'a>) -> Value<'a> {
    fold_numeric(args, state, Fold::Min)
}

fn fn_max<'a>(args: &'a [ExprTree], state: &mut EvalState<'a>) -> Value<'a> {
    fold_numeric(args, state, Fold::Max)
}

fn comparison_op(s: &str) -> Option<OpKind> {
    match s.trim().to_ascii_lowercase().as_str() {
        "<" => Some(OpKind::LessThan),
        "<=" => Some(OpKind::LessOrEqual),
        ">" => Some(OpKind::GreaterThan),
        ">=" => Some(OpKind::GreaterOrEqual),
        "==" => Some(OpKind::Equal),
        "!=" => Some(OpKind::NotEqual),
        "is" | "=?=" => Some(OpKind::MetaEqual),
        "isnt" | "=!=" => Some(OpKind::MetaNotEqual),
        _ => None,
    }
}

/// `anyCompare(op, list, value)` / `allCompare(op, list, value)`: compares
/// every element against the value with the named operator. A comparison
/// that does not produce a boolean is an error.
fn compare_list<'a>(args: &'a [ExprTree], state: &mut EvalState<'a>, want_all: bool) -> Value<'a> {
    if args.len() != 3 {
        return Value::Error;
    }
    let op = match args[0].evaluate(state) {
        Value::String(s) => match comparison_op(&s) {
            Some(op) => op,
            None => return Value::Error,
        },
        Value::Undefined => return Value::Undefined,
        _ => return Value::Error,
    };
    let list = match args[1].evaluate(state) {
        Value::List(l) => l,
        Value::Undefined => return Value::Undefined,
        _ => return Value::Error,
    };
    let target = args[2].evaluate(state);
    for elem in list_values(&list, state) {
        match evaluator::do_binary(op, elem, target.clone(), state).as_bool() {
            Some(true) => {
                if !want_all {
                    return Value::Boolean(true);
                }
            }
            Some(false) => {
                if want_all {
                    return Value::Boolean(false);
                }
            }
            None => return Value::Error,
        }
    }
    Value::Boolean(want_all)
}

fn fn_any_compare<'a>(args: &'a [ExprTree], state: &mut EvalState<'a>) -> Value<'a> {
    compare_list(args, state, false)
}

fn fn_all_compare<'a>(args: &'a [ExprTree], state: &mut EvalState<'a>) -> Value<'a> {
    compare_list(args, state, true)
}

// ---------------------------------------------------------------------------
// Strings
// ---------------------------------------------------------------------------

/// Concatenates the printed form of every argument.
fn fn_strcat<'a>(args: &'a [ExprTree], state: &mut EvalState<'a>) -> Value<'a> {
    let vals = eval_args(args, state);
    if let Some(v) = absorb(&vals) {
        return v;
    }
    let mut out = String::new();
    for v in &vals {
        match v.coerce_to_string() {
            Some(s) => out.push_str(&s),
            None => return Value::Error,
        }
    }
    Value::String(out)
}

/// `join(sep, list)` or `join(sep, a, b, ...)`.
fn fn_join<'a>(args: &'a [ExprTree], state: &mut EvalState<'a>) -> Value<'a> {
    if args.is_empty() {
        return Value::Error;
    }
    let vals = eval_args(args, state);
    if let Some(v) = absorb(&vals) {
        return v;
    }
    let Some(sep) = vals[0].coerce_to_string() else {
        return Value::Error;
    };
    if vals.len() == 2 {
        if let Value::List(list) = &vals[1] {
            let elems = list_values(list, state);
            let mut parts = Vec::with_capacity(elems.len());
            for e in &elems {
                match e.coerce_to_string() {
                    Some(s) => parts.push(s),
                    None => return Value::Error,
                }
            }
            return Value::String(parts.join(&sep));
        }
    }
    let mut parts = Vec::with_capacity(vals.len().saturating_sub(1));
    for v in &vals[1..] {
        match v.coerce_to_string() {
            Some(s) => parts.push(s),
            None => return Value::Error,
        }
    }
    Value::String(parts.join(&sep))
}

fn case_convert<'a>(args: &'a [ExprTree], state: &mut EvalState<'a>, upper: bool) -> Value<'a> {
    if args.len() != 1 {
        return Value::Error;
    }
    match args[0].evaluate(state) {
        Value::Undefined => Value::Undefined,
        Value::Error => Value::Error,
        v => match v.coerce_to_string() {
            Some(s) => Value::String(if upper {
                s.to_uppercase()
            } else {
                s.to_lowercase()
            }),
            None => Value::Error,
        },
    }
}

fn fn_to_upper<'a>(args: &'a [ExprTree], state: &mut EvalState<'a>) -> Value<'a> {
    case_convert(args, state, true)
}

fn fn_to_lower<'a>(args: &'a [ExprTree], state: &mut EvalState<'a>) -> Value<'a> {
    case_convert(args, state, false)
}

/// `substr(s, offset [, length])`. A negative offset counts from the end;
/// a negative length leaves that many characters off the end.
fn fn_substr<'a>(args: &'a [ExprTree], state: &mut EvalState<'a>) -> Value<'a> {
    if !(2..=3).contains(&args.len()) {
        return Value::Error;
    }
    let vals = eval_args(args, state);
    if let Some(v) = absorb(&vals) {
        return v;
    }
    let Value::String(s) = &vals[0] else {
        return Value::Error;
    };
    let Some(offset) = vals[1].as_number_int() else {
        return Value::Error;
    };
    let length = match vals.get(2) {
        None => None,
        Some(v) => match v.as_number_int() {
            Some(l) => Some(l),
            None => return Value::Error,
        },
    };

    let chars: Vec<char> = s.chars().collect();
    let n = chars.len() as i64;
    let start = if offset < 0 { n + offset } else { offset }.clamp(0, n);
    let end = match length {
        None => n,
        Some(l) if l < 0 => n + l,
        Some(l) => start + l,
    }
    .clamp(start, n);
    Value::String(chars[start as usize..end as usize].iter().collect())
}

fn strcmp_impl<'a>(
    args: &'a [ExprTree],
    state: &mut EvalState<'a>,
    fold_case: bool,
) -> Value<'a> {
    if args.len() != 2 {
        return Value::Error;
    }
    let vals = eval_args(args, state);
    if let Some(v) = absorb(&vals) {
        return v;
    }
    let (Some(a), Some(b)) = (vals[0].coerce_to_string(), vals[1].coerce_to_string()) else {
        return Value::Error;
    };
    let ord = if fold_case {
        a.to_lowercase().cmp(&b.to_lowercase())
    } else {
        a.cmp(&b)
    };
    Value::Integer(match ord {
        std::cmp::Ordering::Less => -1,
        std::cmp::Ordering::Equal => 0,
        std::cmp::Ordering::Greater => 1,
    })
}

fn fn_strcmp<'a>(args: &'a [ExprTree], state: &mut EvalState<'a>) -> Value<'a> {
    strcmp_impl(args, state, false)
}

fn fn_stricmp<'a>(args: &'a [ExprTree], state: &mut EvalState<'a>) -> Value<'a> {
    strcmp_impl(args, state, true)
}

// ---------------------------------------------------------------------------
// Pattern matching
// ---------------------------------------------------------------------------

/// Compiles a pattern with the option letters `i m s x` (inline flags) and
/// `g` (global substitution, reported to the caller). Any other letter, or
/// a malformed pattern, fails the call.
fn compile_regex(pattern: &str, options: &str) -> Option<(Regex, bool)> {
    let mut flags = String::new();
    let mut global = false;
    for ch in options.chars() {
        match ch.to_ascii_lowercase() {
            'i' => flags.push('i'),
            'm' => flags.push('m'),
            's' => flags.push('s'),
            'x' => flags.push('x'),
            'g' => global = true,
            _ => return None,
        }
    }
    let full = if flags.is_empty() {
        pattern.to_string()
    } else {
        format!("(?{}){}", flags, pattern)
    };
    Regex::new(&full).ok().map(|re| (re, global))
}

fn fn_regexp<'a>(args: &'a [ExprTree], state: &mut EvalState<'a>) -> Value<'a> {
    if !(2..=3).contains(&args.len()) {
        return Value::Error;
    }
    let vals = eval_args(args, state);
    if let Some(v) = absorb(&vals) {
        return v;
    }
    let (Some(pattern), Some(target)) = (vals[0].as_str(), vals[1].as_str()) else {
        return Value::Error;
    };
    let options = match vals.get(2) {
        None => "",
        Some(Value::String(o)) => o.as_str(),
        Some(_) => return Value::Error,
    };
    match compile_regex(pattern, options) {
        Some((re, _)) => Value::Boolean(re.is_match(target)),
        None => Value::Error,
    }
}

/// True when any string in the list matches; undefined members surface as
/// Undefined only if nothing matched.
fn fn_regexp_member<'a>(args: &'a [ExprTree], state: &mut EvalState<'a>) -> Value<'a> {
    if !(2..=3).contains(&args.len()) {
        return Value::Error;
    }
    let pattern = match args[0].evaluate(state) {
        Value::String(s) => s,
        Value::Undefined => return Value::Undefined,
        _ => return Value::Error,
    };
    let list = match args[1].evaluate(state) {
        Value::List(l) => l,
        Value::Undefined => return Value::Undefined,
        _ => return Value::Error,
    };
    let options = match args.get(2).map(|a| a.evaluate(state)) {
        None => String::new(),
        Some(Value::String(o)) => o,
        Some(Value::Undefined) => return Value::Undefined,
        Some(_) => return Value::Error,
    };
    let Some((re, _)) = compile_regex(&pattern, &options) else {
        return Value::Error;
    };
    let mut saw_undefined = false;
    for elem in list_values(&list, state) {
        match elem {
            Value::String(s) => {
                if re.is_match(&s) {
                    return Value::Boolean(true);
                }
            }
            Value::Undefined => saw_undefined = true,
            _ => return Value::Error,
        }
    }
    if saw_undefined {
        Value::Undefined
    } else {
        Value::Boolean(false)
    }
}

/// Rewrites backslash capture references (`\1`) to the regex engine's
/// dollar form, and protects literal dollars.
fn convert_substitute(sub: &str) -> String {
    let mut out = String::new();
    let mut chars = sub.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '$' => out.push_str("$$"),
            '\\' => match chars.peek().copied() {
                Some(d) if d.is_ascii_digit() => {
                    chars.next();
                    out.push_str("${");
                    out.push(d);
                    out.push('}');
                }
                Some('\\') => {
                    chars.next();
                    out.push('\\');
                }
                _ => out.push('\\'),
            },
            other => out.push(other),
        }
    }
    out
}

enum SubstituteMode {
    First,
    All,
    FromOptions,
}

fn substitute_impl<'a>(
    args: &'a [ExprTree],
    state: &mut EvalState<'a>,
    mode: SubstituteMode,
) -> Value<'a> {
    if !(3..=4).contains(&args.len()) {
        return Value::Error;
    }
    let vals = eval_args(args, state);
    if let Some(v) = absorb(&vals) {
        return v;
    }
    let (Some(pattern), Some(target), Some(substitute)) =
        (vals[0].as_str(), vals[1].as_str(), vals[2].as_str())
    else {
        return Value::Error;
    };
    let options = match vals.get(3) {
        None => "",
        Some(Value::String(o)) => o.as_str(),
        Some(_) => return Value::Error,
    };
    let Some((re, global_opt)) = compile_regex(pattern, options) else {
        return Value::Error;
    };
    let global = match mode {
        SubstituteMode::First => false,
        SubstituteMode::All => true,
        SubstituteMode::FromOptions => global_opt,
    };
    let replacement = convert_substitute(substitute);
    let out = if global {
        re.replace_all(target, replacement.as_str())
    } else {
        re.replace(target, replacement.as_str())
    };
    Value::String(out.into_owned())
}

fn fn_replace<'a>(args: &'a [ExprTree], state: &mut EvalState<'a>) -> Value<'a> {
    substitute_impl(args, state, SubstituteMode::First)
}

fn fn_replace_all<'a>(args: &'a [ExprTree], state: &mut EvalState<'a>) -> Value<'a> {
    substitute_impl(args, state, SubstituteMode::All)
}

fn fn_regexps<'a>(args: &'a [ExprTree], state: &mut EvalState<'a>) -> Value<'a> {
    substitute_impl(args, state, SubstituteMode::FromOptions)
}

// ---------------------------------------------------------------------------
// Time
// ---------------------------------------------------------------------------

/// Current time as integer epoch seconds.
fn fn_time<'a>(args: &'a [ExprTree], _state: &mut EvalState<'a>) -> Value<'a> {
    if !args.is_empty() {
        return Value::Error;
    }
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(d) => Value::Integer(d.as_secs() as i64),
        Err(_) => Value::Error,
    }
}

/// Formats a second count the way people read durations: `17`, `1:01:17`,
/// `1+01:01:01`.
fn fn_interval<'a>(args: &'a [ExprTree], state: &mut EvalState<'a>) -> Value<'a> {
    if args.len() != 1 {
        return Value::Error;
    }
    let vals = eval_args(args, state);
    if let Some(v) = absorb(&vals) {
        return v;
    }
    let Some(total) = to_real_lenient(&vals[0]).map(|r| r as i64) else {
        return Value::Error;
    };
    let (sign, t) = if total < 0 { ("-", -total) } else { ("", total) };
    let days = t / 86400;
    let hours = (t % 86400) / 3600;
    let mins = (t % 3600) / 60;
    let secs = t % 60;
    let out = if days > 0 {
        format!("{}{}+{:02}:{:02}:{:02}", sign, days, hours, mins, secs)
    } else if hours > 0 {
        format!("{}{}:{:02}:{:02}", sign, hours, mins, secs)
    } else if mins > 0 {
        format!("{}{}:{:02}", sign, mins, secs)
    } else {
        format!("{}{}", sign, secs)
    };
    Value::String(out)
}

/// Runtime `absTime`: the parse-time fold only covers a literal string
/// argument, everything else lands here.
fn fn_abs_time<'a>(args: &'a [ExprTree], state: &mut EvalState<'a>) -> Value<'a> {
    match args.len() {
        0 => match now_abs() {
            Some(t) => Value::AbsoluteTime(t),
            None => Value::Error,
        },
        1 => match args[0].evaluate(state) {
            Value::String(s) => match parse_abs_time(&s) {
                Some(t) => Value::AbsoluteTime(t),
                None => Value::Error,
            },
            Value::AbsoluteTime(t) => Value::AbsoluteTime(t),
            Value::Undefined => Value::Undefined,
            v => match v.as_number_int() {
                Some(secs) => Value::AbsoluteTime(AbsTime {
                    secs,
                    offset: local_offset(),
                }),
                None => Value::Error,
            },
        },
        2 => {
            let vals = eval_args(args, state);
            if let Some(v) = absorb(&vals) {
                return v;
            }
            let (Some(secs), Some(offset)) = (vals[0].as_number_int(), vals[1].as_number_int())
            else {
                return Value::Error;
            };
            Value::AbsoluteTime(AbsTime {
                secs,
                offset: offset as i32,
            })
        }
        _ => Value::Error,
    }
}

fn fn_rel_time<'a>(args: &'a [ExprTree], state: &mut EvalState<'a>) -> Value<'a> {
    if args.len() != 1 {
        return Value::Error;
    }
    match args[0].evaluate(state) {
        Value::String(s) => match parse_rel_time(&s) {
            Some(secs) => Value::RelativeTime(secs),
            None => Value::Error,
        },
        Value::RelativeTime(r) => Value::RelativeTime(r),
        Value::Undefined => Value::Undefined,
        v => match v.as_number_real() {
            Some(secs) => Value::RelativeTime(secs),
            None => Value::Error,
        },
    }
}

/// Decomposes a time into a synthetic record of its components.
fn fn_split_time<'a>(args: &'a [ExprTree], state: &mut EvalState<'a>) -> Value<'a> {
    if args.len() != 1 {
        return Value::Error;
    }
    match args[0].evaluate(state) {
        Value::AbsoluteTime(t) => {
            let Some(zone) = FixedOffset::east_opt(t.offset) else {
                return Value::Error;
            };
            let Some(dt) = zone.timestamp_opt(t.secs, 0).single() else {
                return Value::Error;
            };
            let mut ad = ClassAd::new();
            ad.insert_string("Type", "AbsoluteTime");
            ad.insert_int("Year", i64::from(dt.year()));
            ad.insert_int("Month", i64::from(dt.month()));
            ad.insert_int("Day", i64::from(dt.day()));
            ad.insert_int("Hours", i64::from(dt.hour()));
            ad.insert_int("Minutes", i64::from(dt.minute()));
            ad.insert_int("Seconds", i64::from(dt.second()));
            ad.insert_int("Offset", i64::from(t.offset));
            Value::ClassAd(AdValue::Owned(Rc::new(ad)))
        }
        Value::RelativeTime(r) => {
            let sign = if r < 0.0 { -1 } else { 1 };
            let abs = r.abs();
            let whole = abs.trunc() as i64;
            let frac = abs.fract();
            let mut ad = ClassAd::new();
            ad.insert_string("Type", "RelativeTime");
            ad.insert_int("Days", sign * (whole / 86400));
            ad.insert_int("Hours", sign * ((whole % 86400) / 3600));
            ad.insert_int("Minutes", sign * ((whole % 3600) / 60));
            if frac > 0.0 {
                ad.insert_real("Seconds", sign as f64 * ((whole % 60) as f64 + frac));
            } else {
                ad.insert_int("Seconds", sign * (whole % 60));
            }
            Value::ClassAd(AdValue::Owned(Rc::new(ad)))
        }
        Value::Undefined => Value::Undefined,
        _ => Value::Error,
    }
}

/// `formatTime([t [, format]])` with strftime-style format codes; the
/// default format is `%c`.
fn fn_format_time<'a>(args: &'a [ExprTree], state: &mut EvalState<'a>) -> Value<'a> {
    if args.len() > 2 {
        return Value::Error;
    }
    let vals = eval_args(args, state);
    if let Some(v) = absorb(&vals) {
        return v;
    }
    let t = match vals.first() {
        None => match now_abs() {
            Some(t) => t,
            None => return Value::Error,
        },
        Some(Value::AbsoluteTime(t)) => *t,
        Some(Value::Integer(secs)) => AbsTime {
            secs: *secs,
            offset: local_offset(),
        },
        Some(_) => return Value::Error,
    };
    let format = match vals.get(1) {
        None => "%c",
        Some(Value::String(s)) => s.as_str(),
        Some(_) => return Value::Error,
    };
    let Some(zone) = FixedOffset::east_opt(t.offset) else {
        return Value::Error;
    };
    let Some(dt) = zone.timestamp_opt(t.secs, 0).single() else {
        return Value::Error;
    };
    let mut out = String::new();
    // a bad format item surfaces as a write error, not a panic
    match write!(out, "{}", dt.format(format)) {
        Ok(()) => Value::String(out),
        Err(_) => Value::Error,
    }
}

fn fn_timezone_offset<'a>(args: &'a [ExprTree], _state: &mut EvalState<'a>) -> Value<'a> {
    if !args.is_empty() {
        return Value::Error;
    }
    Value::RelativeTime(f64::from(local_offset()))
}

// ---------------------------------------------------------------------------
// Numeric
// ---------------------------------------------------------------------------

fn rounding<'a>(args: &'a [ExprTree], state: &mut EvalState<'a>, f: fn(f64) -> f64) -> Value<'a> {
    if args.len() != 1 {
        return Value::Error;
    }
    match args[0].evaluate(state) {
        Value::Integer(i) => Value::Integer(i),
        Value::Undefined => Value::Undefined,
        Value::Error => Value::Error,
        v => match to_real_lenient(&v) {
            Some(r) => Value::Integer(f(r) as i64),
            None => Value::Error,
        },
    }
}

fn fn_floor<'a>(args: &'a [ExprTree], state: &mut EvalState<'a>) -> Value<'a> {
    rounding(args, state, f64::floor)
}

fn fn_ceiling<'a>(args: &'a [ExprTree], state: &mut EvalState<'a>) -> Value<'a> {
    rounding(args, state, f64::ceil)
}

fn fn_round<'a>(args: &'a [ExprTree], state: &mut EvalState<'a>) -> Value<'a> {
    rounding(args, state, f64::round)
}

/// Integer result for an integer base and non-negative integer exponent,
/// real otherwise. Integer overflow falls back to the real computation.
fn fn_pow<'a>(args: &'a [ExprTree], state: &mut EvalState<'a>) -> Value<'a> {
    if args.len() != 2 {
        return Value::Error;
    }
    let vals = eval_args(args, state);
    if let Some(v) = absorb(&vals) {
        return v;
    }
    if let (Value::Integer(base), Value::Integer(exp)) = (&vals[0], &vals[1]) {
        if *exp >= 0 {
            if let Ok(exp32) = u32::try_from(*exp) {
                if let Some(result) = base.checked_pow(exp32) {
                    return Value::Integer(result);
                }
            }
            return Value::Real((*base as f64).powf(*exp as f64));
        }
    }
    let (Some(base), Some(exp)) = (vals[0].as_number_real(), vals[1].as_number_real()) else {
        return Value::Error;
    };
    Value::Real(base.powf(exp))
}

/// `quantize(value, quantum)` rounds up to a multiple of the quantum; a
/// list quantum instead picks its first element that is >= the value.
fn fn_quantize<'a>(args: &'a [ExprTree], state: &mut EvalState<'a>) -> Value<'a> {
    if args.len() != 2 {
        return Value::Error;
    }
    let value = args[0].evaluate(state);
    match value {
        Value::Error => return Value::Error,
        Value::Undefined => return Value::Undefined,
        _ => {}
    }
    match args[1].evaluate(state) {
        Value::List(list) => {
            for elem in list_values(&list, state) {
                if matches!(
                    evaluator::do_binary(OpKind::GreaterOrEqual, elem.clone(), value.clone(), state),
                    Value::Boolean(true)
                ) {
                    return elem;
                }
            }
            Value::Error
        }
        Value::Undefined => Value::Undefined,
        quantum => {
            let (Some(v), Some(q)) = (value.as_number_real(), quantum.as_number_real()) else {
                return Value::Error;
            };
            if q == 0.0 {
                return value;
            }
            let scaled = (v / q).ceil();
            let both_integral =
                !matches!(value, Value::Real(_)) && !matches!(quantum, Value::Real(_));
            if both_integral {
                match quantum.as_number_int() {
                    Some(qi) => Value::Integer(scaled as i64 * qi),
                    None => Value::Error,
                }
            } else {
                Value::Real(scaled * q)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Type conversion
// ---------------------------------------------------------------------------

fn fn_int<'a>(args: &'a [ExprTree], state: &mut EvalState<'a>) -> Value<'a> {
    if args.len() != 1 {
        return Value::Error;
    }
    match args[0].evaluate(state) {
        Value::Integer(i) => Value::Integer(i),
        Value::Real(r) => Value::Integer(r.trunc() as i64),
        Value::Boolean(b) => Value::Integer(i64::from(b)),
        Value::String(s) => {
            let s = s.trim();
            match s.parse::<i64>() {
                Ok(i) => Value::Integer(i),
                Err(_) => match s.parse::<f64>() {
                    Ok(r) => Value::Integer(r.trunc() as i64),
                    Err(_) => Value::Error,
                },
            }
        }
        Value::AbsoluteTime(t) => Value::Integer(t.secs),
        Value::RelativeTime(r) => Value::Integer(r.trunc() as i64),
        Value::Undefined => Value::Undefined,
        _ => Value::Error,
    }
}

fn fn_real<'a>(args: &'a [ExprTree], state: &mut EvalState<'a>) -> Value<'a> {
    if args.len() != 1 {
        return Value::Error;
    }
    match args[0].evaluate(state) {
        Value::Integer(i) => Value::Real(i as f64),
        Value::Real(r) => Value::Real(r),
        Value::Boolean(b) => Value::Real(if b { 1.0 } else { 0.0 }),
        Value::String(s) => match s.trim().parse::<f64>() {
            Ok(r) => Value::Real(r),
            Err(_) => Value::Error,
        },
        Value::AbsoluteTime(t) => Value::Real(t.secs as f64),
        Value::RelativeTime(r) => Value::Real(r),
        Value::Undefined => Value::Undefined,
        _ => Value::Error,
    }
}

fn fn_string<'a>(args: &'a [ExprTree], state: &mut EvalState<'a>) -> Value<'a> {
    if args.len() != 1 {
        return Value::Error;
    }
    match args[0].evaluate(state) {
        Value::Undefined => Value::Undefined,
        Value::Error => Value::Error,
        Value::AbsoluteTime(t) => Value::String(format_abs_time(&t)),
        Value::RelativeTime(r) => Value::String(format_rel_time(r)),
        v => match v.coerce_to_string() {
            Some(s) => Value::String(s),
            None => Value::Error,
        },
    }
}

fn fn_bool<'a>(args: &'a [ExprTree], state: &mut EvalState<'a>) -> Value<'a> {
    if args.len() != 1 {
        return Value::Error;
    }
    match args[0].evaluate(state) {
        Value::Boolean(b) => Value::Boolean(b),
        Value::Integer(i) => Value::Boolean(i != 0),
        Value::Real(r) => Value::Boolean(r != 0.0),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" => Value::Boolean(true),
            "false" => Value::Boolean(false),
            _ => Value::Error,
        },
        Value::Undefined => Value::Undefined,
        _ => Value::Error,
    }
}

// ---------------------------------------------------------------------------
// Conditional
// ---------------------------------------------------------------------------

/// The conditional operator as a function; the untaken branch is never
/// evaluated.
fn fn_if_then_else<'a>(args: &'a [ExprTree], state: &mut EvalState<'a>) -> Value<'a> {
    if args.len() != 3 {
        return Value::Error;
    }
    evaluator::eval_conditional(&args[0], &args[1], &args[2], state)
}

// ---------------------------------------------------------------------------
// Version comparison
// ---------------------------------------------------------------------------

/// Orders version strings by alternating numeric and non-numeric chunks;
/// numeric chunks compare by value (ignoring leading zeros), the rest
/// byte-wise.
fn version_cmp(a: &str, b: &str) -> std::cmp::Ordering {
    use std::cmp::Ordering;
    let ab = a.as_bytes();
    let bb = b.as_bytes();
    let (mut i, mut j) = (0, 0);
    while i < ab.len() && j < bb.len() {
        if ab[i].is_ascii_digit() && bb[j].is_ascii_digit() {
            let si = i;
            while i < ab.len() && ab[i].is_ascii_digit() {
                i += 1;
            }
            let sj = j;
            while j < bb.len() && bb[j].is_ascii_digit() {
                j += 1;
            }
            let na = a[si..i].trim_start_matches('0');
            let nb = b[sj..j].trim_start_matches('0');
            match na.len().cmp(&nb.len()).then_with(|| na.cmp(nb)) {
                Ordering::Equal => {}
                other => return other,
            }
        } else {
            match ab[i].cmp(&bb[j]) {
                Ordering::Equal => {
                    i += 1;
                    j += 1;
                }
                other => return other,
            }
        }
    }
    (ab.len() - i).cmp(&(bb.len() - j))
}

fn version_strings<'a>(
    args: &'a [ExprTree],
    state: &mut EvalState<'a>,
    arity: usize,
) -> Result<Vec<String>, Value<'a>> {
    if args.len() != arity {
        return Err(Value::Error);
    }
    let vals = eval_args(args, state);
    if let Some(v) = absorb(&vals) {
        return Err(v);
    }
    let mut out = Vec::with_capacity(arity);
    for v in &vals {
        match v.as_str() {
            Some(s) => out.push(s.to_string()),
            None => return Err(Value::Error),
        }
    }
    Ok(out)
}

fn fn_versioncmp<'a>(args: &'a [ExprTree], state: &mut EvalState<'a>) -> Value<'a> {
    let vs = match version_strings(args, state, 2) {
        Ok(vs) => vs,
        Err(v) => return v,
    };
    Value::Integer(match version_cmp(&vs[0], &vs[1]) {
        std::cmp::Ordering::Less => -1,
        std::cmp::Ordering::Equal => 0,
        std::cmp::Ordering::Greater => 1,
    })
}

fn version_test<'a>(
    args: &'a [ExprTree],
    state: &mut EvalState<'a>,
    pred: fn(std::cmp::Ordering) -> bool,
) -> Value<'a> {
    let vs = match version_strings(args, state, 2) {
        Ok(vs) => vs,
        Err(v) => return v,
    };
    Value::Boolean(pred(version_cmp(&vs[0], &vs[1])))
}

fn fn_version_le<'a>(args: &'a [ExprTree], state: &mut EvalState<'a>) -> Value<'a> {
    version_test(args, state, |o| o != std::cmp::Ordering::Greater)
}

fn fn_version_lt<'a>(args: &'a [ExprTree], state: &mut EvalState<'a>) -> Value<'a> {
    version_test(args, state, |o| o == std::cmp::Ordering::Less)
}

fn fn_version_ge<'a>(args: &'a [ExprTree], state: &mut EvalState<'a>) -> Value<'a> {
    version_test(args, state, |o| o != std::cmp::Ordering::Less)
}

fn fn_version_gt<'a>(args: &'a [ExprTree], state: &mut EvalState<'a>) -> Value<'a> {
    version_test(args, state, |o| o == std::cmp::Ordering::Greater)
}

fn fn_version_eq<'a>(args: &'a [ExprTree], state: &mut EvalState<'a>) -> Value<'a> {
    version_test(args, state, |o| o == std::cmp::Ordering::Equal)
}

fn fn_version_in_range<'a>(args: &'a [ExprTree], state: &mut EvalState<'a>) -> Value<'a> {
    let vs = match version_strings(args, state, 3) {
        Ok(vs) => vs,
        Err(v) => return v,
    };
    let (v, lo, hi) = (&vs[0], &vs[1], &vs[2]);
    Value::Boolean(
        version_cmp(lo, v) != std::cmp::Ordering::Greater
            && version_cmp(v, hi) != std::cmp::Ordering::Greater,
    )
}

// ---------------------------------------------------------------------------
// Debugging and introspection
// ---------------------------------------------------------------------------

/// Evaluates its argument, logging the expression and result.
fn fn_debug<'a>(args: &'a [ExprTree], state: &mut EvalState<'a>) -> Value<'a> {
    if args.len() != 1 {
        return Value::Error;
    }
    let text = unparser::unparse(&args[0]);
    let value = args[0].evaluate(state);
    tracing::debug!(expr = %text, value = %unparser::unparse_value(&value), "debug()");
    value
}

/// `unparse(attr)`: the textual form of the expression an attribute is
/// bound to, unevaluated. The argument must be a plain attribute reference.
fn fn_unparse<'a>(args: &'a [ExprTree], state: &mut EvalState<'a>) -> Value<'a> {
    if args.len() != 1 {
        return Value::Error;
    }
    let ExprTree::AttrRef(r) = &args[0] else {
        return Value::Error;
    };
    if r.base.is_some() {
        return Value::Error;
    }
    let mut cursor = if r.absolute {
        state.scope().root_scope()
    } else {
        state.scope().clone()
    };
    while let Some(ad) = cursor.current() {
        if let Some(expr) = ad.lookup(&r.name) {
            return Value::String(unparser::unparse(expr));
        }
        if r.absolute {
            break;
        }
        cursor = cursor.parent();
    }
    Value::Undefined
}

/// `eval(s)`: parses a string as an expression and evaluates it in the
/// current scope. The nested evaluation inherits the remaining recursion
/// budget, so self-referential strings bottom out in Error.
fn fn_eval<'a>(args: &'a [ExprTree], state: &mut EvalState<'a>) -> Value<'a> {
    if args.len() != 1 {
        return Value::Error;
    }
    match args[0].evaluate(state) {
        Value::String(text) => match Parser::new(&text).parse_expression(true) {
            Ok(tree) => {
                let mut fresh = EvalState::with_scope(state.scope().clone());
                fresh.set_recursion_limit(state.remaining_depth());
                fresh.set_legacy_semantics(state.legacy_semantics());
                tree.evaluate(&mut fresh).into_owned()
            }
            Err(_) => Value::Error,
        },
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use crate::record::ClassAd;

    fn eval_int(text: &str) -> Option<i64> {
        let ad = ClassAd::new();
        let expr = crate::parser::Parser::new(text)
            .parse_expression(true)
            .expect("test input parses");
        ad.evaluate_expr(&expr).as_integer()
    }

    fn eval_str(text: &str) -> Option<String> {
        let ad = ClassAd::new();
        let expr = crate::parser::Parser::new(text)
            .parse_expression(true)
            .expect("test input parses");
        ad.evaluate_expr(&expr).as_str().map(str::to_string)
    }

    #[test]
    fn versioncmp_orders_numerically() {
        assert_eq!(eval_int("versioncmp(\"1.2\", \"1.10\")"), Some(-1));
        assert_eq!(eval_int("versioncmp(\"1.02\", \"1.2\")"), Some(0));
        assert_eq!(eval_int("versioncmp(\"2.0\", \"1.9.9\")"), Some(1));
    }

    #[test]
    fn quantize_rounds_up() {
        assert_eq!(eval_int("quantize(17, 8)"), Some(24));
        assert_eq!(eval_int("quantize(8, 8)"), Some(8));
        assert_eq!(eval_int("quantize(3, { 1, 2, 4, 8 })"), Some(4));
    }

    #[test]
    fn strcat_coerces_scalars() {
        assert_eq!(eval_str("strcat(\"a\", 1, true)"), Some("a1true".into()));
    }

    #[test]
    fn interval_picks_shortest_form() {
        assert_eq!(eval_str("interval(17)"), Some("17".into()));
        assert_eq!(eval_str("interval(3677)"), Some("1:01:17".into()));
        assert_eq!(eval_str("interval(90061)"), Some("1+01:01:01".into()));
    }
}
