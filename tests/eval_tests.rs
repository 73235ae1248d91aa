use std::rc::Rc;

use classad::{ClassAd, EvalState, Value};

fn eval_int(text: &str) -> Option<i64> {
    let ad = ClassAd::new();
    let expr = classad::parse_expression(text).unwrap();
    ad.evaluate_expr(&expr).as_integer()
}

fn eval_real(text: &str) -> Option<f64> {
    let ad = ClassAd::new();
    let expr = classad::parse_expression(text).unwrap();
    ad.evaluate_expr(&expr).as_real()
}

fn eval_bool(text: &str) -> Option<bool> {
    let ad = ClassAd::new();
    let expr = classad::parse_expression(text).unwrap();
    ad.evaluate_expr(&expr).as_bool()
}

fn eval_is_error(text: &str) -> bool {
    let ad = ClassAd::new();
    let expr = classad::parse_expression(text).unwrap();
    matches!(ad.evaluate_expr(&expr), Value::Error)
}

fn eval_is_undefined(text: &str) -> bool {
    let ad = ClassAd::new();
    let expr = classad::parse_expression(text).unwrap();
    matches!(ad.evaluate_expr(&expr), Value::Undefined)
}

// ============================================================================
// The literal evaluation table
// ============================================================================

#[test]
fn test_literal_table() {
    assert_eq!(eval_int("1 + 1"), Some(2));
    assert!(eval_is_error("\"a\" + \"b\""));
    assert_eq!(eval_bool("3 == 3.0"), Some(true));
    assert!(eval_is_undefined("undefined == 3"));
    assert_eq!(eval_bool("undefined =?= undefined"), Some(true));
    assert_eq!(eval_int("{1, 2, 3}[1]"), Some(2));
    assert_eq!(eval_int("[A = 3; B = A + 1;].B"), Some(4));
}

// ============================================================================
// Arithmetic
// ============================================================================

#[test]
fn test_integer_arithmetic() {
    assert_eq!(eval_int("7 / 2"), Some(3));
    assert_eq!(eval_int("7 % 3"), Some(1));
    assert_eq!(eval_int("-7 / 2"), Some(-3));
    assert_eq!(eval_int("2 * 3 - 10"), Some(-4));
}

#[test]
fn test_numeric_promotion() {
    assert_eq!(eval_real("1 + 2.5"), Some(3.5));
    assert_eq!(eval_real("5 / 2.0"), Some(2.5));
    assert_eq!(eval_int("true + true"), Some(2));
}

#[test]
fn test_division_and_modulus_by_zero() {
    assert!(eval_is_error("1 / 0"));
    assert!(eval_is_error("1 % 0"));
    // real modulus is a domain error regardless of the divisor
    assert!(eval_is_error("5.0 % 2.0"));
}

#[test]
fn test_unary_operators() {
    assert_eq!(eval_int("-(3)"), Some(-3));
    assert_eq!(eval_int("~0"), Some(-1));
    assert_eq!(eval_bool("!0"), Some(true));
    assert_eq!(eval_bool("!true"), Some(false));
    assert!(eval_is_error("+\"str\""));
    assert!(eval_is_error("-\"str\""));
}

#[test]
fn test_number_suffix_factor_applies() {
    assert_eq!(eval_int("2K"), Some(2048));
    assert_eq!(eval_int("1M / 1K"), Some(1024));
}

// ============================================================================
// Comparison
// ============================================================================

#[test]
fn test_string_equality_is_case_insensitive() {
    assert_eq!(eval_bool("\"Foo\" == \"foo\""), Some(true));
    assert_eq!(eval_bool("\"Foo\" != \"bar\""), Some(true));
    assert_eq!(eval_bool("\"abc\" < \"abd\""), Some(true));
}

#[test]
fn test_meta_equality_is_exact() {
    assert_eq!(eval_bool("\"Foo\" =?= \"foo\""), Some(false));
    assert_eq!(eval_bool("\"Foo\" =?= \"Foo\""), Some(true));
    assert_eq!(eval_bool("undefined =?= error"), Some(false));
    assert_eq!(eval_bool("undefined =!= error"), Some(true));
    assert_eq!(eval_bool("error =?= error"), Some(true));
    // identical types are required before promotion
    assert_eq!(eval_bool("1 =?= 1.0"), Some(false));
    assert_eq!(eval_bool("1 =!= 1.0"), Some(true));
}

#[test]
fn test_is_isnt_reserved_words() {
    assert_eq!(eval_bool("undefined is undefined"), Some(true));
    assert_eq!(eval_bool("1 isnt \"1\""), Some(true));
}

#[test]
fn test_comparison_absorbs_exceptional_values() {
    assert!(eval_is_undefined("undefined < 3"));
    assert!(eval_is_error("error == 1"));
    assert!(eval_is_error("\"a\" < 1"));
}

// ============================================================================
// Logical operators
// ============================================================================

#[test]
fn test_three_valued_or() {
    assert_eq!(eval_bool("undefined || true"), Some(true));
    assert!(eval_is_undefined("undefined || false"));
    assert!(eval_is_undefined("undefined || undefined"));
    assert!(eval_is_error("error || true"));
}

#[test]
fn test_three_valued_and() {
    assert_eq!(eval_bool("undefined && false"), Some(false));
    assert!(eval_is_undefined("undefined && true"));
    assert!(eval_is_error("error && false"));
}

#[test]
fn test_short_circuit_skips_the_other_side() {
    assert_eq!(eval_bool("true || error"), Some(true));
    assert_eq!(eval_bool("false && error"), Some(false));
}

#[test]
fn test_numbers_coerce_to_truth_values() {
    assert_eq!(eval_bool("1 && true"), Some(true));
    assert_eq!(eval_bool("0 || false"), Some(false));
    assert!(eval_is_error("1 && \"x\""));
}

// ============================================================================
// Bitwise operators
// ============================================================================

#[test]
fn test_bitwise() {
    assert_eq!(eval_int("5 & 3"), Some(1));
    assert_eq!(eval_int("5 | 2"), Some(7));
    assert_eq!(eval_int("5 ^ 1"), Some(4));
    assert_eq!(eval_int("1 << 3"), Some(8));
    assert_eq!(eval_int("-8 >> 1"), Some(-4));
    assert_eq!(eval_int("-1 >>> 60"), Some(15));
    assert!(eval_is_error("1.5 & 2"));
}

// ============================================================================
// Conditional and elvis
// ============================================================================

#[test]
fn test_conditional() {
    assert_eq!(eval_int("true ? 1 : 2"), Some(1));
    assert_eq!(eval_int("false ? 1 : 2"), Some(2));
    assert_eq!(eval_int("2 ? 1 : 0"), Some(1));
    assert!(eval_is_undefined("undefined ? 1 : 2"));
    assert!(eval_is_error("\"x\" ? 1 : 2"));
}

#[test]
fn test_elvis() {
    assert_eq!(eval_int("undefined ?: 5"), Some(5));
    assert_eq!(eval_int("3 ?: 5"), Some(3));
    assert!(eval_is_error("error ?: 5"));
    assert_eq!(eval_int("NoSuchAttr ? : 9"), Some(9));
}

// ============================================================================
// Subscript and selection
// ============================================================================

#[test]
fn test_subscript() {
    assert_eq!(eval_int("{10, 20, 30}[0]"), Some(10));
    assert!(eval_is_error("{1}[5]"));
    assert!(eval_is_error("{1}[-1]"));
    assert_eq!(eval_int("[A = 1][\"A\"]"), Some(1));
    assert!(eval_is_error("[A = 1][\"B\"]"));
    assert!(eval_is_error("{1, 2}[\"x\"]"));
}

#[test]
fn test_selection_miss_is_undefined() {
    assert!(eval_is_undefined("[A = 1].B"));
    assert!(eval_is_undefined("undefined.B"));
    assert!(eval_is_error("error.B"));
    assert!(eval_is_error("3.B"));
}

#[test]
fn test_list_broadcast_selection() {
    // looking an attribute up through a list applies it element-wise
    assert_eq!(eval_int("{ [A = 1], [A = 2] }.A[1]"), Some(2));
    assert!(eval_is_undefined("{ [A = 1], [B = 2] }.A[1]"));
}

// ============================================================================
// Scope resolution
// ============================================================================

#[test]
fn test_lexical_scope_reaches_outer_record() {
    assert_eq!(eval_int("[ X = 2; Inner = [ Y = X + 1 ] ].Inner.Y"), Some(3));
}

#[test]
fn test_special_names() {
    assert_eq!(eval_int("[ A = 1; B = self.A ].B"), Some(1));
    assert_eq!(
        eval_int("[ X = 1; Inner = [ Y = parent.X ] ].Inner.Y"),
        Some(1)
    );
}

#[test]
fn test_local_attributes_shadow_special_names() {
    assert_eq!(
        eval_int("[ self = [ A = 42 ]; B = self.A ].B"),
        Some(42)
    );
}

#[test]
fn test_toplevel_and_absolute_references() {
    let ad = ClassAd::parse("[ A = 5; Inner = [ B = toplevel.A; C = .A ]; D = Inner.B; E = Inner.C ]")
        .unwrap();
    assert_eq!(ad.evaluate_attr_int("D"), Some(5));
    assert_eq!(ad.evaluate_attr_int("E"), Some(5));
}

#[test]
fn test_record_value_resolution_follows_its_chain() {
    // a nested record resolves through its lexical chain
    let ad = ClassAd::parse("[ Z = 1; Inner = [ W = Z ] ]").unwrap();
    let expr = classad::parse_expression("Inner.W").unwrap();
    assert_eq!(ad.evaluate_expr(&expr).as_integer(), Some(1));

    // a record with nothing above it resolves the same name to undefined
    assert!(eval_is_undefined("[ W = Z ].W"));
}

#[test]
fn test_case_insensitive_lookup() {
    let ad = ClassAd::parse("[ Foo = 1 ]").unwrap();
    assert_eq!(ad.evaluate_attr_int("FOO"), Some(1));
    assert_eq!(ad.evaluate_attr_int("foo"), Some(1));
    assert_eq!(eval_int("[ foo = 2; Bar = FOO + 1 ].Bar"), Some(3));
}

// ============================================================================
// Chaining
// ============================================================================

#[test]
fn test_chained_lookup_prefers_local() {
    let parent = Rc::new(ClassAd::parse("[ A = 1; B = 2 ]").unwrap());
    let mut child = ClassAd::parse("[ A = 10 ]").unwrap();
    child.chain_to(parent.clone());

    assert_eq!(child.evaluate_attr_int("A"), Some(10));
    assert_eq!(child.evaluate_attr_int("B"), Some(2));

    // deleting the local value falls through to the prototype
    assert!(child.delete("A"));
    assert_eq!(child.evaluate_attr_int("A"), Some(1));

    let detached = child.unchain();
    assert!(detached.is_some());
    assert_eq!(child.evaluate_attr_int("B"), None);
}

#[test]
fn test_chained_expression_evaluates_in_child_scope() {
    let parent = Rc::new(ClassAd::parse("[ B = A * 2 ]").unwrap());
    let mut child = ClassAd::parse("[ A = 10 ]").unwrap();
    child.chain_to(parent);
    assert_eq!(child.evaluate_attr_int("B"), Some(20));
}

// ============================================================================
// Alternate scope (legacy shim)
// ============================================================================

#[test]
fn test_alternate_scope_requires_legacy_semantics() {
    let alt = Rc::new(ClassAd::parse("[ Z = 9 ]").unwrap());
    let mut ad = ClassAd::parse("[ W = Z + 1 ]").unwrap();
    ad.set_alternate_scope(Some(alt));

    // off by default
    assert_eq!(ad.evaluate_attr_int("W"), None);

    let expr = classad::parse_expression("W").unwrap();
    let mut state = EvalState::new(&ad);
    state.set_legacy_semantics(true);
    assert_eq!(ad.evaluate_expr_with(&expr, &mut state).as_integer(), Some(10));
}

// ============================================================================
// Recursion budget
// ============================================================================

#[test]
fn test_self_reference_exhausts_budget() {
    let ad = ClassAd::parse("[ A = A ]").unwrap();
    assert!(matches!(ad.evaluate_attr("A"), Value::Error));

    let ad = ClassAd::parse("[ A = B; B = A ]").unwrap();
    assert!(matches!(ad.evaluate_attr("A"), Value::Error));
}

#[test]
fn test_configured_budget_is_honored() {
    let ad = ClassAd::new();
    let expr = classad::parse_expression("1 + 1 + 1 + 1 + 1 + 1 + 1 + 1").unwrap();
    let mut state = EvalState::new(&ad);
    state.set_recursion_limit(3);
    assert!(matches!(
        ad.evaluate_expr_with(&expr, &mut state),
        Value::Error
    ));

    let mut state = EvalState::new(&ad);
    state.set_recursion_limit(100);
    assert_eq!(
        ad.evaluate_expr_with(&expr, &mut state).as_integer(),
        Some(8)
    );
}

// ============================================================================
// Time values
// ============================================================================

#[test]
fn test_time_arithmetic() {
    assert_eq!(
        eval_bool(
            "absTime(\"2021-01-02T00:00:00+00:00\") - absTime(\"2021-01-01T00:00:00+00:00\") \
             == relTime(\"24:00:00\")"
        ),
        Some(true)
    );
    assert_eq!(
        eval_bool(
            "absTime(\"2021-01-01T00:00:00+00:00\") + relTime(\"01:00:00\") \
             == absTime(\"2021-01-01T01:00:00+00:00\")"
        ),
        Some(true)
    );
    assert_eq!(
        eval_bool("relTime(\"00:01:00\") * 2 == relTime(\"00:02:00\")"),
        Some(true)
    );
    assert!(eval_is_error("absTime(\"2021-01-01T00:00:00Z\") + absTime(\"2021-01-01T00:00:00Z\")"));
}

#[test]
fn test_abs_time_offset_does_not_change_the_instant() {
    assert_eq!(
        eval_bool(
            "absTime(\"2021-06-01T12:00:00+02:00\") == absTime(\"2021-06-01T10:00:00+00:00\")"
        ),
        Some(true)
    );
}

// ============================================================================
// Significance capture
// ============================================================================

#[test]
fn test_significant_subexpression_narrows_to_the_deciding_operand() {
    let ad = ClassAd::parse("[ A = 1 ]").unwrap();

    let expr = classad::parse_expression("B + A").unwrap();
    let (value, sig) = ad.evaluate_expr_with_significance(&expr);
    assert!(matches!(value, Value::Undefined));
    assert_eq!(classad::unparse(&sig), "B");

    let expr = classad::parse_expression("false && B").unwrap();
    let (value, sig) = ad.evaluate_expr_with_significance(&expr);
    assert_eq!(value.as_bool(), Some(false));
    assert_eq!(classad::unparse(&sig), "false");

    let expr = classad::parse_expression("A + 2").unwrap();
    let (value, sig) = ad.evaluate_expr_with_significance(&expr);
    assert_eq!(value.as_integer(), Some(3));
    assert_eq!(classad::unparse(&sig), "A + 2");
}
