use std::rc::Rc;

use chrono::{Datelike, FixedOffset, Local, NaiveDate, NaiveDateTime, Offset, TimeZone, Timelike};

use crate::ast::{ExprTree, Literal};
use crate::evaluator::Scope;
use crate::record::ClassAd;

/// A point in time: seconds since the Unix epoch, plus the UTC offset (in
/// seconds) the time was written in. The offset does not change the instant,
/// only how it prints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AbsTime {
    pub secs: i64,
    pub offset: i32,
}

/// The result of evaluating an expression.
///
/// Exactly one variant is active at a time. `Undefined` and `Error` are
/// ordinary values, not failures: evaluation of a well-formed tree always
/// produces a `Value`.
///
/// List and record values come in two flavors. Evaluating a literal container
/// in a tree yields a *scoped* view borrowing the expression tree plus the
/// scope chain it was reached through; built-ins that synthesize containers
/// (and the list-broadcast lookup) yield *owned*, root-less containers behind
/// an `Rc`.
#[derive(Debug, Clone)]
pub enum Value<'a> {
    /// Result of an ill-typed operation, a failed dereference, or the
    /// `error` literal
    Error,
    /// An unresolvable name, or an operation over `undefined`
    Undefined,
    /// Boolean
    Boolean(bool),
    /// 64-bit integer
    Integer(i64),
    /// Double-precision real
    Real(f64),
    /// String
    String(String),
    /// Absolute time
    AbsoluteTime(AbsTime),
    /// Relative time, in seconds
    RelativeTime(f64),
    /// Ordered sequence of expressions
    List(ListValue<'a>),
    /// A record
    ClassAd(AdValue<'a>),
}

/// A list value: either a view of a list living in an expression tree
/// (together with the scope its elements evaluate in), or an owned synthetic
/// list of literal expressions.
#[derive(Debug, Clone)]
pub enum ListValue<'a> {
    Scoped(&'a [ExprTree], Scope<'a>),
    Owned(Rc<Vec<ExprTree>>),
}

/// A record value: either a record living in an expression tree together
/// with its lexical scope chain (the chain's head is the record itself), or
/// an owned synthetic record with no enclosing scope.
#[derive(Debug, Clone)]
pub enum AdValue<'a> {
    Scoped(Scope<'a>),
    Owned(Rc<ClassAd>),
}

impl<'a> ListValue<'a> {
    pub fn len(&self) -> usize {
        match self {
            ListValue::Scoped(exprs, _) => exprs.len(),
            ListValue::Owned(exprs) => exprs.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<'a> AdValue<'a> {
    /// The record this value denotes.
    pub fn ad(&self) -> &ClassAd {
        match self {
            AdValue::Scoped(scope) => scope.current().expect("scoped record value has a frame"),
            AdValue::Owned(ad) => ad,
        }
    }
}

/// Human-readable name of a value's type, for error messages and the
/// `string`/type-predicate built-ins.
pub fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Error => "error",
        Value::Undefined => "undefined",
        Value::Boolean(_) => "boolean",
        Value::Integer(_) => "integer",
        Value::Real(_) => "real",
        Value::String(_) => "string",
        Value::AbsoluteTime(_) => "abstime",
        Value::RelativeTime(_) => "reltime",
        Value::List(_) => "list",
        Value::ClassAd(_) => "classad",
    }
}

impl<'a> Value<'a> {
    /// Undefined or Error.
    pub fn is_exceptional(&self) -> bool {
        matches!(self, Value::Undefined | Value::Error)
    }

    /// Strict boolean extraction.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Boolean equivalence: booleans as themselves, numbers as non-zero.
    /// This is the coercion the logical operators and the conditional use.
    pub fn as_bool_equiv(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            Value::Integer(i) => Some(*i != 0),
            Value::Real(r) => Some(*r != 0.0),
            _ => None,
        }
    }

    /// Strict integer extraction.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Strict real extraction.
    pub fn as_real(&self) -> Option<f64> {
        match self {
            Value::Real(r) => Some(*r),
            _ => None,
        }
    }

    /// Strict string extraction.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Number extraction with truncation: integers as themselves, reals
    /// truncated, booleans as 0/1.
    pub fn as_number_int(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            Value::Real(r) => Some(*r as i64),
            Value::Boolean(b) => Some(i64::from(*b)),
            _ => None,
        }
    }

    /// Number extraction with promotion: integers promoted to real,
    /// booleans as 0.0/1.0.
    pub fn as_number_real(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(*i as f64),
            Value::Real(r) => Some(*r),
            Value::Boolean(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    /// Scalar-to-string coercion: strings as themselves, numbers and
    /// booleans in their printed form. Containers and times do not coerce.
    pub fn coerce_to_string(&self) -> Option<String> {
        match self {
            Value::String(s) => Some(s.clone()),
            Value::Integer(i) => Some(i.to_string()),
            Value::Real(r) => Some(format_real(*r)),
            Value::Boolean(b) => Some(b.to_string()),
            _ => None,
        }
    }

    /// Build a value from a literal. The result borrows nothing.
    pub fn from_literal(lit: &Literal) -> Value<'static> {
        match lit {
            Literal::Undefined => Value::Undefined,
            Literal::Error => Value::Error,
            Literal::Boolean(b) => Value::Boolean(*b),
            Literal::Integer(i) => Value::Integer(*i),
            Literal::Real(r) => Value::Real(*r),
            Literal::String(s) => Value::String(s.clone()),
            Literal::AbsTime(t) => Value::AbsoluteTime(*t),
            Literal::RelTime(r) => Value::RelativeTime(*r),
        }
    }

    /// The literal denoting this value, for scalar and time values.
    /// Containers have no literal form and return `None`.
    pub fn to_literal(&self) -> Option<Literal> {
        match self {
            Value::Undefined => Some(Literal::Undefined),
            Value::Error => Some(Literal::Error),
            Value::Boolean(b) => Some(Literal::Boolean(*b)),
            Value::Integer(i) => Some(Literal::Integer(*i)),
            Value::Real(r) => Some(Literal::Real(*r)),
            Value::String(s) => Some(Literal::String(s.clone())),
            Value::AbsoluteTime(t) => Some(Literal::AbsTime(*t)),
            Value::RelativeTime(r) => Some(Literal::RelTime(*r)),
            Value::List(_) | Value::ClassAd(_) => None,
        }
    }

    /// An expression tree denoting this value: scalars become literals,
    /// containers are deep-copied.
    pub fn to_expr(&self) -> ExprTree {
        match self {
            Value::List(ListValue::Scoped(exprs, _)) => ExprTree::List(exprs.to_vec()),
            Value::List(ListValue::Owned(exprs)) => ExprTree::List(exprs.as_ref().clone()),
            Value::ClassAd(ad) => ExprTree::Record(ad.ad().clone()),
            other => ExprTree::Literal(
                other
                    .to_literal()
                    .expect("scalar values always have a literal form"),
            ),
        }
    }

    /// Detach the value from any borrowed tree: scalars pass through,
    /// scoped containers are deep-copied into owned, root-less ones. Used
    /// when a member of a synthetic container escapes its evaluation.
    pub fn into_owned(self) -> Value<'static> {
        match self {
            Value::Error => Value::Error,
            Value::Undefined => Value::Undefined,
            Value::Boolean(b) => Value::Boolean(b),
            Value::Integer(i) => Value::Integer(i),
            Value::Real(r) => Value::Real(r),
            Value::String(s) => Value::String(s),
            Value::AbsoluteTime(t) => Value::AbsoluteTime(t),
            Value::RelativeTime(r) => Value::RelativeTime(r),
            Value::List(ListValue::Owned(l)) => Value::List(ListValue::Owned(l)),
            Value::List(ListValue::Scoped(exprs, _)) => {
                Value::List(ListValue::Owned(Rc::new(exprs.to_vec())))
            }
            Value::ClassAd(AdValue::Owned(ad)) => Value::ClassAd(AdValue::Owned(ad)),
            Value::ClassAd(AdValue::Scoped(scope)) => {
                let ad = scope.current().expect("scoped record value has a frame");
                Value::ClassAd(AdValue::Owned(Rc::new(ad.clone())))
            }
        }
    }
}

/// Print a real so that the lexer reads back the same number. Whole values
/// keep a trailing `.0` so they stay reals across a round trip.
pub fn format_real(r: f64) -> String {
    if r.is_finite() {
        format!("{:?}", r)
    } else if r.is_nan() {
        "real(\"NaN\")".to_string()
    } else if r > 0.0 {
        "real(\"INF\")".to_string()
    } else {
        "real(\"-INF\")".to_string()
    }
}

// ---------------------------------------------------------------------------
// Time parsing and formatting
// ---------------------------------------------------------------------------

/// Parse an absolute-time string: `yyyy-mm-dd[Thh:mm[:ss]]` with an optional
/// trailing zone (`Z`, `+hh:mm`, `-hhmm`, `+hh`). Without a zone the local
/// offset applies. Returns `None` on malformed input.
pub fn parse_abs_time(s: &str) -> Option<AbsTime> {
    let s = s.trim();

    // split a trailing zone designator off the date-time part
    let (body, zone) = split_zone(s);

    let naive = parse_naive_datetime(body)?;

    let offset_secs = match zone {
        Some(z) => z,
        None => Local
            .from_local_datetime(&naive)
            .earliest()?
            .offset()
            .fix()
            .local_minus_utc(),
    };

    let secs = naive.and_utc().timestamp() - i64::from(offset_secs);
    Some(AbsTime {
        secs,
        offset: offset_secs,
    })
}

fn split_zone(s: &str) -> (&str, Option<i32>) {
    if let Some(body) = s.strip_suffix(['Z', 'z']) {
        return (body, Some(0));
    }
    // look for a +/- that starts a zone suffix; skip the date's own dashes by
    // only considering signs after the time separator
    let sep = s.find(['T', 't', ' ']);
    let search_from = sep.map(|i| i + 1).unwrap_or(0);
    if let Some(rel) = s[search_from..].rfind(['+', '-']) {
        let idx = search_from + rel;
        let (body, zone) = s.split_at(idx);
        if let Some(offset) = parse_zone(zone) {
            return (body, Some(offset));
        }
    }
    (s, None)
}

fn parse_zone(z: &str) -> Option<i32> {
    let (sign, digits) = match z.as_bytes().first()? {
        b'+' => (1, &z[1..]),
        b'-' => (-1, &z[1..]),
        _ => return None,
    };
    let digits = digits.replace(':', "");
    let (h, m) = match digits.len() {
        2 => (digits.parse::<i32>().ok()?, 0),
        4 => (
            digits[..2].parse::<i32>().ok()?,
            digits[2..].parse::<i32>().ok()?,
        ),
        _ => return None,
    };
    if h > 23 || m > 59 {
        return None;
    }
    Some(sign * (h * 3600 + m * 60))
}

fn parse_naive_datetime(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    for fmt in [
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M",
        "%Y%m%dT%H%M%S",
    ] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt);
        }
    }
    for fmt in ["%Y-%m-%d", "%Y%m%d"] {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return d.and_hms_opt(0, 0, 0);
        }
    }
    None
}

/// Print an absolute time in the form the parser folds back into the same
/// value: `yyyy-mm-ddThh:mm:ss<zone>`.
pub fn format_abs_time(t: &AbsTime) -> String {
    let offset = FixedOffset::east_opt(t.offset).unwrap_or_else(|| FixedOffset::east_opt(0).expect("zero offset is valid"));
    let dt = offset.timestamp_opt(t.secs, 0).single();
    match dt {
        Some(dt) => {
            let (sign, abs) = if t.offset < 0 {
                ('-', -t.offset)
            } else {
                ('+', t.offset)
            };
            format!(
                "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}{}{:02}:{:02}",
                dt.year(),
                dt.month(),
                dt.day(),
                dt.hour(),
                dt.minute(),
                dt.second(),
                sign,
                abs / 3600,
                (abs % 3600) / 60,
            )
        }
        None => format!("{}", t.secs),
    }
}

/// Parse a relative-time string: `[-][days+]hh:mm:ss[.fff]` with shorter
/// colon forms (`mm:ss`, `ss`) accepted, or the unit-suffix form
/// `1d2h3m4.5s`. Returns seconds, or `None` on malformed input.
pub fn parse_rel_time(s: &str) -> Option<f64> {
    let s = s.trim();
    let (negative, s) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s),
    };
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    let total = if s.contains(['d', 'D', 'h', 'H', 'M', 's', 'S'])
        && !s.contains(':')
        && !s.contains('+')
    {
        parse_rel_suffixed(s)?
    } else {
        parse_rel_colon(s)?
    };

    Some(if negative { -total } else { total })
}

fn parse_rel_colon(s: &str) -> Option<f64> {
    let (days, rest) = match s.split_once('+') {
        Some((d, rest)) => (d.trim().parse::<u32>().ok()?, rest),
        None => (0, s),
    };
    let parts: Vec<&str> = rest.split(':').collect();
    if parts.len() > 3 {
        return None;
    }
    let mut secs = f64::from(days) * 86400.0;
    // rightmost component is seconds and may be fractional
    let mut scale = 1.0;
    for part in parts.iter().rev() {
        let part = part.trim();
        if scale == 1.0 {
            secs += part.parse::<f64>().ok()?;
        } else {
            secs += part.parse::<u32>().ok().map(f64::from)? * scale;
        }
        scale *= 60.0;
    }
    Some(secs)
}

fn parse_rel_suffixed(s: &str) -> Option<f64> {
    let mut total = 0.0;
    let mut number = String::new();
    for ch in s.chars() {
        if ch.is_ascii_digit() || ch == '.' {
            number.push(ch);
        } else {
            let unit = match ch {
                'd' | 'D' => 86400.0,
                'h' | 'H' => 3600.0,
                'm' | 'M' => 60.0,
                's' | 'S' => 1.0,
                _ => return None,
            };
            if number.is_empty() {
                return None;
            }
            total += number.parse::<f64>().ok()? * unit;
            number.clear();
        }
    }
    if !number.is_empty() {
        // trailing bare number counts as seconds
        total += number.parse::<f64>().ok()?;
    }
    Some(total)
}

/// Print a relative time in the `[-][days+]hh:mm:ss[.fff]` form the parser
/// reads back exactly.
pub fn format_rel_time(secs: f64) -> String {
    let negative = secs < 0.0;
    let abs = secs.abs();
    let whole = abs.trunc() as i64;
    let frac = abs.fract();

    let days = whole / 86400;
    let hours = (whole % 86400) / 3600;
    let minutes = (whole % 3600) / 60;
    let seconds = whole % 60;

    let mut out = String::new();
    if negative {
        out.push('-');
    }
    if days > 0 {
        out.push_str(&format!("{}+", days));
    }
    out.push_str(&format!("{:02}:{:02}:{:02}", hours, minutes, seconds));
    if frac > 0.0 {
        // three fractional digits, trailing zeros trimmed
        let frac_str = format!("{:.3}", frac);
        let trimmed = frac_str.trim_start_matches('0').trim_end_matches('0');
        if trimmed != "." {
            out.push_str(trimmed);
        }
    }
    out
}

#[test]
fn rel_time_round_trips() {
    let s = format_rel_time(93784.5);
    assert_eq!(s, "1+02:03:04.5");
    assert_eq!(parse_rel_time(&s), Some(93784.5));
    assert_eq!(parse_rel_time("-00:00:02"), Some(-2.0));
    assert_eq!(parse_rel_time("1d2h"), Some(93600.0));
}

#[test]
fn abs_time_round_trips() {
    let t = AbsTime {
        secs: 1_062_586_800,
        offset: -21600,
    };
    let s = format_abs_time(&t);
    assert_eq!(parse_abs_time(&s), Some(t));
}
