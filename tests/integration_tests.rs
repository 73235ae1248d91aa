use std::rc::Rc;

use classad::{
    parse_classad, parse_expression, unparse, unparse_classad, unparse_classad_pretty,
    unparse_pretty, ClassAd, ExprCache, Flat, MatchClassAd, Value,
};
use pretty_assertions::assert_eq;

fn eval_int(text: &str) -> Option<i64> {
    let ad = ClassAd::new();
    let expr = parse_expression(text).unwrap();
    ad.evaluate_expr(&expr).as_integer()
}

fn eval_real(text: &str) -> Option<f64> {
    let ad = ClassAd::new();
    let expr = parse_expression(text).unwrap();
    ad.evaluate_expr(&expr).as_real()
}

fn eval_bool(text: &str) -> Option<bool> {
    let ad = ClassAd::new();
    let expr = parse_expression(text).unwrap();
    ad.evaluate_expr(&expr).as_bool()
}

fn eval_str(text: &str) -> Option<String> {
    let ad = ClassAd::new();
    let expr = parse_expression(text).unwrap();
    ad.evaluate_expr(&expr).as_str().map(str::to_string)
}

fn eval_is_error(text: &str) -> bool {
    let ad = ClassAd::new();
    let expr = parse_expression(text).unwrap();
    matches!(ad.evaluate_expr(&expr), Value::Error)
}

fn eval_is_undefined(text: &str) -> bool {
    let ad = ClassAd::new();
    let expr = parse_expression(text).unwrap();
    matches!(ad.evaluate_expr(&expr), Value::Undefined)
}

// ============================================================================
// The round-trip law
// ============================================================================

const ROUND_TRIP: &[&str] = &[
    "1 + 2 * 3",
    "(1 + 2) * 3",
    "a && b || !c",
    "x % 3 == 0 && y != \"\"",
    "other.Memory >= 1024 && Arch =?= \"X86_64\"",
    "{ 10, \"s\", [ A = 1 ] }",
    "[ A = 1; B = A + 1; C = { 1, 2 } ]",
    "x[3].y",
    ".Root.Child",
    "a ? b : c",
    "a ?: b",
    "a + b ? : c",
    "'quoted attr' + 1",
    "-3 + 2",
    "- 3",
    "foo(1, \"two\", bar)",
    "absTime(\"2021-01-02T03:04:05+00:00\")",
    "relTime(\"1+02:03:04.5\")",
    "a << 2 >>> 1",
    "~x & 0xFF | y ^ 2",
    "isInteger(42) ? \"int\" : \"other\"",
    "undefined =!= error",
];

#[test]
fn test_unparse_reparses_to_an_equal_tree() {
    for source in ROUND_TRIP {
        let once = parse_expression(source).unwrap();
        let text = unparse(&once);
        let twice = parse_expression(&text)
            .unwrap_or_else(|e| panic!("{:?} did not reparse: {} ({})", source, text, e));
        assert_eq!(once, twice, "round trip changed {:?} -> {:?}", source, text);

        let pretty = unparse_pretty(&once);
        assert_eq!(parse_expression(&pretty).unwrap(), once);
    }
}

#[test]
fn test_record_round_trip_with_quoting_and_escapes() {
    let ad = parse_classad(
        "[ 'my attr' = \"line\\nbreak\"; N = -2.5; T = absTime(\"2003-09-03T06:00:00-06:00\") ]",
    )
    .unwrap();
    let text = unparse_classad(&ad);
    assert_eq!(parse_classad(&text).unwrap(), ad);

    let pretty = unparse_classad_pretty(&ad);
    assert_eq!(parse_classad(&pretty).unwrap(), ad);
}

// ============================================================================
// Flattening
// ============================================================================

#[test]
fn test_flatten_collapses_fully_literal_expressions() {
    let ad = ClassAd::new();
    let expr = parse_expression("3 * 7 + 1").unwrap();
    match ad.flatten(&expr) {
        Flat::Value(v) => assert_eq!(v.as_integer(), Some(22)),
        Flat::Tree(t) => panic!("expected a value, got residual {}", t),
    }
}

#[test]
fn test_flatten_substitutes_resolvable_parts() {
    let ad = ClassAd::parse("[ X = 5 ]").unwrap();
    let expr = parse_expression("X + Y").unwrap();
    match ad.flatten(&expr) {
        Flat::Tree(t) => assert_eq!(unparse(&t), "5 + Y"),
        Flat::Value(v) => panic!("expected a residual tree, got {:?}", v),
    }
}

#[test]
fn test_flatten_decides_logical_connectives_early() {
    let ad = ClassAd::parse("[ X = false ]").unwrap();
    let expr = parse_expression("X && Y").unwrap();
    match ad.flatten(&expr) {
        Flat::Value(v) => assert_eq!(v.as_bool(), Some(false)),
        Flat::Tree(t) => panic!("expected a value, got residual {}", t),
    }
}

#[test]
fn test_flatten_and_inline_substitutes_the_target() {
    let ad = ClassAd::parse("[ A = B + 1 ]").unwrap();
    let expr = parse_expression("A").unwrap();

    match ad.flatten(&expr) {
        Flat::Tree(t) => assert_eq!(unparse(&t), "A"),
        Flat::Value(v) => panic!("expected the reference back, got {:?}", v),
    }
    match ad.flatten_and_inline(&expr) {
        Flat::Tree(t) => assert_eq!(unparse(&t), "B + 1"),
        Flat::Value(v) => panic!("expected the inlined target, got {:?}", v),
    }
}

// ============================================================================
// Matching
// ============================================================================

#[test]
fn test_trivially_true_requirements_match() {
    let left = ClassAd::parse("[ Requirements = true ]").unwrap();
    let right = ClassAd::parse("[ Requirements = true ]").unwrap();
    assert!(MatchClassAd::new(left, right).symmetric_match());
}

#[test]
fn test_one_false_side_fails_the_symmetric_match() {
    let left = ClassAd::parse("[ Requirements = true ]").unwrap();
    let right = ClassAd::parse("[ Requirements = false ]").unwrap();
    let m = MatchClassAd::new(left, right);
    assert!(!m.symmetric_match());
    assert!(!m.left_matches_right());
    assert!(m.right_matches_left());
}

#[test]
fn test_requirements_see_the_counterpart_through_other() {
    let job = ClassAd::parse(
        "[ ImageSize = 512; Requirements = other.Memory >= ImageSize && other.Arch == Arch; \
           Arch = \"x86_64\" ]",
    )
    .unwrap();
    let machine = ClassAd::parse(
        "[ Memory = 2048; Arch = \"X86_64\"; Requirements = other.ImageSize <= Memory ]",
    )
    .unwrap();
    let m = MatchClassAd::new(job, machine);
    assert!(m.symmetric_match());
}

#[test]
fn test_my_and_target_projections() {
    let left = ClassAd::parse("[ Rank = 1; Requirements = my.Rank < target.Rank ]").unwrap();
    let right = ClassAd::parse("[ Rank = 2; Requirements = true ]").unwrap();
    let m = MatchClassAd::new(left, right);
    assert!(m.right_matches_left());
}

#[test]
fn test_missing_requirements_do_not_match() {
    let left = ClassAd::parse("[ Requirements = true ]").unwrap();
    let right = ClassAd::parse("[ Cpus = 4 ]").unwrap();
    let m = MatchClassAd::new(left, right);
    assert!(!m.left_matches_right());
    assert!(!m.symmetric_match());
}

#[test]
fn test_into_parts_releases_the_records() {
    let left = ClassAd::parse("[ Cpus = 4; Requirements = true ]").unwrap();
    let right = ClassAd::parse("[ Memory = 1024; Requirements = true ]").unwrap();
    let m = MatchClassAd::new(left, right);
    assert!(m.symmetric_match());
    assert_eq!(m.left().unwrap().evaluate_attr_int("Cpus"), Some(4));

    let (left, right) = m.into_parts();
    assert_eq!(left.evaluate_attr_int("Cpus"), Some(4));
    assert_eq!(right.evaluate_attr_int("Memory"), Some(1024));
    // released records resolve standalone again; the ambient match names
    // are gone
    assert!(matches!(left.evaluate_attr("other"), Value::Undefined));
}

// ============================================================================
// Built-in functions
// ============================================================================

#[test]
fn test_type_predicates() {
    assert_eq!(eval_bool("isInteger(42)"), Some(true));
    assert_eq!(eval_bool("isReal(42)"), Some(false));
    assert_eq!(eval_bool("isString(\"x\")"), Some(true));
    assert_eq!(eval_bool("isBoolean(true)"), Some(true));
    assert_eq!(eval_bool("isUndefined(NoSuchAttr)"), Some(true));
    assert_eq!(eval_bool("isError(1 / 0)"), Some(true));
    assert_eq!(eval_bool("isList({ 1 })"), Some(true));
    assert_eq!(eval_bool("isClassAd([ A = 1 ])"), Some(true));
    assert_eq!(eval_bool("isAbstime(absTime(\"2021-01-01T00:00:00Z\"))"), Some(true));
    assert_eq!(eval_bool("isReltime(relTime(\"1:00\"))"), Some(true));
}

#[test]
fn test_membership() {
    assert_eq!(eval_bool("member(2, { 1, 2, 3 })"), Some(true));
    assert_eq!(eval_bool("member(5, { 1, 2, 3 })"), Some(false));
    // plain membership compares strings case-insensitively, the identical
    // variant does not
    assert_eq!(eval_bool("member(\"B\", { \"a\", \"b\" })"), Some(true));
    assert_eq!(eval_bool("identicalMember(\"B\", { \"a\", \"b\" })"), Some(false));
    assert!(eval_is_undefined("member(NoSuchAttr, { 1 })"));
    assert!(eval_is_error("member(1, 2)"));
}

#[test]
fn test_list_aggregates() {
    assert_eq!(eval_int("size({ 1, 2, 3 })"), Some(3));
    assert_eq!(eval_int("size(\"hello\")"), Some(5));
    assert!(eval_is_error("size(3)"));
    assert_eq!(eval_int("sum({ 1, 2, 3 })"), Some(6));
    assert_eq!(eval_real("sum({ 1, 2.5 })"), Some(3.5));
    assert!(eval_is_undefined("sum({ })"));
    assert_eq!(eval_real("avg({ 1, 2, 3, 4 })"), Some(2.5));
    assert_eq!(eval_int("min({ 3, 1, 2 })"), Some(1));
    assert_eq!(eval_int("max({ 3, 1, 2 })"), Some(3));
    assert!(eval_is_error("sum({ \"x\" })"));
}

#[test]
fn test_any_all_compare() {
    assert_eq!(eval_bool("anyCompare(\"<\", { 1, 2, 3 }, 2)"), Some(true));
    assert_eq!(eval_bool("anyCompare(\">\", { 1, 2, 3 }, 5)"), Some(false));
    assert_eq!(eval_bool("allCompare(\"<=\", { 1, 2, 3 }, 3)"), Some(true));
    assert_eq!(eval_bool("allCompare(\"is\", { 1, 1 }, 1)"), Some(true));
    assert!(eval_is_error("anyCompare(\"nope\", { 1 }, 1)"));
}

#[test]
fn test_string_functions() {
    assert_eq!(eval_str("strcat(\"foo\", 1, true)"), Some("foo1true".into()));
    assert_eq!(eval_str("join(\", \", { \"a\", \"b\" })"), Some("a, b".into()));
    assert_eq!(eval_str("join(\"-\", \"a\", \"b\", \"c\")"), Some("a-b-c".into()));
    assert_eq!(eval_str("toUpper(\"abc\")"), Some("ABC".into()));
    assert_eq!(eval_str("toLower(\"ABC\")"), Some("abc".into()));
    assert_eq!(eval_str("substr(\"abcde\", 1, 3)"), Some("bcd".into()));
    assert_eq!(eval_str("substr(\"abcde\", -2)"), Some("de".into()));
    assert_eq!(eval_str("substr(\"abcde\", 1, -1)"), Some("bcd".into()));
    assert_eq!(eval_int("strcmp(\"a\", \"b\")"), Some(-1));
    assert_eq!(eval_int("stricmp(\"A\", \"a\")"), Some(0));
    assert!(eval_is_undefined("strcat(\"a\", NoSuchAttr)"));
}

#[test]
fn test_pattern_matching() {
    assert_eq!(eval_bool("regexp(\"^ab.*f$\", \"abcdef\")"), Some(true));
    assert_eq!(eval_bool("regexp(\"AB\", \"abc\")"), Some(false));
    assert_eq!(eval_bool("regexp(\"AB\", \"abc\", \"i\")"), Some(true));
    assert!(eval_is_error("regexp(\"(unclosed\", \"x\")"));
    assert_eq!(eval_str("replace(\"a\", \"banana\", \"o\")"), Some("bonana".into()));
    assert_eq!(eval_str("replaceAll(\"a\", \"banana\", \"o\")"), Some("bonono".into()));
    assert_eq!(
        eval_str("regexps(\"o(b+)\", \"foobbar\", \"\\\\1\")"),
        Some("fobbar".into())
    );
    assert_eq!(eval_bool("regexpMember(\"^b\", { \"abc\", \"bcd\" })"), Some(true));
    assert_eq!(eval_bool("regexpMember(\"^z\", { \"abc\", \"bcd\" })"), Some(false));
}

#[test]
fn test_type_conversions() {
    assert_eq!(eval_int("int(3.9)"), Some(3));
    assert_eq!(eval_int("int(\"42\")"), Some(42));
    assert_eq!(eval_int("int(true)"), Some(1));
    assert!(eval_is_error("int(\"nope\")"));
    assert_eq!(eval_real("real(2)"), Some(2.0));
    assert_eq!(eval_real("real(\"2.5\")"), Some(2.5));
    assert_eq!(eval_str("string(2.5)"), Some("2.5".into()));
    assert_eq!(eval_str("string(true)"), Some("true".into()));
    assert_eq!(eval_bool("bool(\"TRUE\")"), Some(true));
    assert_eq!(eval_bool("bool(0)"), Some(false));
    assert!(eval_is_error("bool(\"maybe\")"));
}

#[test]
fn test_numeric_functions() {
    assert_eq!(eval_int("floor(2.7)"), Some(2));
    assert_eq!(eval_int("ceiling(2.1)"), Some(3));
    assert_eq!(eval_int("ceil(2.1)"), Some(3));
    assert_eq!(eval_int("round(2.5)"), Some(3));
    assert_eq!(eval_int("floor(-2.5)"), Some(-3));
    assert_eq!(eval_int("pow(2, 10)"), Some(1024));
    assert_eq!(eval_real("pow(2, -1)"), Some(0.5));
    assert_eq!(eval_int("quantize(17, 8)"), Some(24));
    assert_eq!(eval_real("quantize(0.3, 0.25)"), Some(0.5));
    assert_eq!(eval_int("quantize(3, { 1, 2, 4, 8 })"), Some(4));
    assert!(eval_is_error("quantize(100, { 1, 2 })"));
}

#[test]
fn test_if_then_else_is_lazy() {
    assert_eq!(eval_int("ifThenElse(true, 1, 1 / 0)"), Some(1));
    assert_eq!(eval_int("ifThenElse(false, 1 / 0, 2)"), Some(2));
    assert!(eval_is_undefined("ifThenElse(NoSuchAttr, 1, 2)"));
}

#[test]
fn test_version_comparison() {
    assert_eq!(eval_int("versioncmp(\"1.2\", \"1.10\")"), Some(-1));
    assert_eq!(eval_bool("versionLT(\"1.9\", \"1.10\")"), Some(true));
    assert_eq!(eval_bool("versionGE(\"2.0\", \"2.0\")"), Some(true));
    assert_eq!(eval_bool("versionEQ(\"1.02\", \"1.2\")"), Some(true));
    assert_eq!(eval_bool("versionInRange(\"1.5\", \"1.2\", \"1.10\")"), Some(true));
    assert_eq!(eval_bool("versionInRange(\"1.11\", \"1.2\", \"1.10\")"), Some(false));
}

#[test]
fn test_time_functions() {
    assert_eq!(eval_bool("time() > 1600000000"), Some(true));
    assert_eq!(eval_str("interval(3677)"), Some("1:01:17".into()));
    assert_eq!(eval_int("int(absTime(1609556645, 0))"), Some(1_609_556_645));
    assert_eq!(
        eval_str("formatTime(absTime(\"2021-01-02T03:04:05+00:00\"), \"%Y-%m-%d %H:%M\")"),
        Some("2021-01-02 03:04".into())
    );
    assert_eq!(
        eval_int("splitTime(absTime(\"2021-03-04T05:06:07+00:00\")).Month"),
        Some(3)
    );
    assert_eq!(
        eval_int("splitTime(absTime(\"2021-03-04T05:06:07+00:00\")).Hours"),
        Some(5)
    );
    assert_eq!(eval_int("splitTime(relTime(\"1+02:03:04\")).Days"), Some(1));
    assert_eq!(eval_bool("isReltime(timezoneOffset())"), Some(true));
}

#[test]
fn test_introspection_functions() {
    assert_eq!(eval_int("debug(21 * 2)"), Some(42));
    assert_eq!(eval_int("[ A = \"1 + 2\"; B = eval(A) ].B"), Some(3));
    assert_eq!(eval_int("eval(5)"), Some(5));
    assert!(eval_is_error("eval(\"1 +\")"));
    assert_eq!(eval_str("[ A = X + 1; S = unparse(A) ].S"), Some("X + 1".into()));
    assert!(eval_is_error("unparse(1 + 2)"));
}

#[test]
fn test_unknown_function_is_error() {
    assert!(eval_is_error("noSuchFunction(1, 2)"));
}

#[test]
fn test_function_names_are_case_insensitive() {
    assert_eq!(eval_str("STRCAT(\"a\", \"b\")"), Some("ab".into()));
    assert_eq!(eval_bool("IsInteger(1)"), Some(true));
}

// ============================================================================
// Record surface
// ============================================================================

#[test]
fn test_update_merges_and_keeps_order() {
    let mut a = ClassAd::parse("[ A = 1; B = 2 ]").unwrap();
    let b = ClassAd::parse("[ B = 20; C = 30 ]").unwrap();
    a.update(&b);
    assert_eq!(a.evaluate_attr_int("B"), Some(20));
    assert_eq!(a.evaluate_attr_int("C"), Some(30));
    let names: Vec<&str> = a.attributes().map(|(n, _)| n).collect();
    assert_eq!(names, vec!["A", "B", "C"]);
}

#[test]
fn test_insert_parsed_and_remove() {
    let mut ad = ClassAd::new();
    ad.insert_parsed("A", "2 * 3").unwrap();
    assert_eq!(ad.evaluate_attr_int("A"), Some(6));
    let expr = ad.remove("a").unwrap();
    assert_eq!(unparse(&expr), "2 * 3");
    assert!(ad.is_empty());
}

#[test]
fn test_typed_evaluation_coercions() {
    let ad = ClassAd::parse("[ I = 3; R = 2.5; B = true; S = \"hi\" ]").unwrap();

    assert_eq!(ad.evaluate_attr_int("I"), Some(3));
    assert_eq!(ad.evaluate_attr_int("R"), None); // strict
    assert_eq!(ad.evaluate_attr_real("R"), Some(2.5));
    assert_eq!(ad.evaluate_attr_number("I"), Some(3.0));
    assert_eq!(ad.evaluate_attr_number("B"), Some(1.0));
    assert_eq!(ad.evaluate_attr_string("I"), Some("3".into()));
    assert_eq!(ad.evaluate_attr_string("S"), Some("hi".into()));
    assert_eq!(ad.evaluate_attr_bool("B"), Some(true));
    assert_eq!(ad.evaluate_attr_bool("I"), None); // strict
    assert_eq!(ad.evaluate_attr_bool_equiv("I"), Some(true));
}

#[test]
fn test_dirty_tracking() {
    let mut ad = ClassAd::parse("[ A = 1 ]").unwrap();
    assert!(!ad.set_dirty_tracking(true));

    ad.insert_int("B", 2);
    ad.delete("A");
    assert!(ad.is_attribute_dirty("b")); // case-insensitive
    assert!(ad.is_attribute_dirty("A"));
    let dirty: Vec<&str> = ad.dirty_attributes().collect();
    assert_eq!(dirty, vec!["B", "A"]);

    ad.clear_dirty_flags();
    assert!(!ad.is_attribute_dirty("B"));

    // tracking off again: modifications stop recording
    ad.set_dirty_tracking(false);
    ad.insert_int("C", 3);
    assert!(!ad.is_attribute_dirty("C"));
}

#[test]
fn test_expression_cache_parses_once() {
    let mut cache = ExprCache::new();
    let mut ad = ClassAd::new();
    cache.insert_into(&mut ad, "A", "1 + 1").unwrap();
    cache.insert_into(&mut ad, "B", "1 + 1").unwrap();
    cache.insert_into(&mut ad, "C", "2 + 2").unwrap();
    assert_eq!(cache.len(), 2);
    assert_eq!(ad.evaluate_attr_int("A"), Some(2));
    assert_eq!(ad.evaluate_attr_int("B"), Some(2));
    assert_eq!(ad.evaluate_attr_int("C"), Some(4));
}

#[test]
fn test_structural_equality_ignores_chain_and_dirty_state() {
    let a = ClassAd::parse("[ A = 1; B = A + 1 ]").unwrap();
    let mut b = ClassAd::parse("[ a = 1; b = A + 1 ]").unwrap();
    assert_eq!(a, b);

    b.set_dirty_tracking(true);
    b.chain_to(Rc::new(ClassAd::parse("[ C = 3 ]").unwrap()));
    assert_eq!(a, b);

    let c = ClassAd::parse("[ A = 2; B = A + 1 ]").unwrap();
    assert_ne!(a, c);
}

#[test]
fn test_clone_is_independent() {
    let original = ClassAd::parse("[ A = 1 ]").unwrap();
    let mut copy = original.clone();
    copy.insert_int("A", 2);
    copy.insert_int("B", 3);
    assert_eq!(original.evaluate_attr_int("A"), Some(1));
    assert_eq!(original.len(), 1);
    assert_eq!(copy.evaluate_attr_int("A"), Some(2));
}
