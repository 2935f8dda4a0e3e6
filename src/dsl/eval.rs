//! Evaluator for the filter DSL AST.

use super::ast::{Comparison, FilterAst};

/// Evaluate a filter AST against an object's tag list.
pub fn evaluate_filter(ast: &FilterAst, tags: &[(&str, &str)]) -> bool {
    match ast {
        FilterAst::And(exprs) => exprs.iter().all(|e| evaluate_filter(e, tags)),
        FilterAst::Or(exprs) => exprs.iter().any(|e| evaluate_filter(e, tags)),
        FilterAst::Compare(cmp) => evaluate_comparison(cmp, tags),
    }
}

fn evaluate_comparison(cmp: &Comparison, tags: &[(&str, &str)]) -> bool {
    let mut key_seen = false;
    for (key, value) in tags {
        if !cmp.key.matches(key) {
            continue;
        }
        key_seen = true;
        match &cmp.value {
            None => return true,
            Some(pattern) if pattern.matches(value) => return true,
            Some(_) => {}
        }
    }
    !key_seen && cmp.absent_matches
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsl::parser::{ListKind, parse_filter};
    use proptest::prelude::*;

    fn check(filter: &str, tags: &[(&str, &str)]) -> bool {
        let parsed = parse_filter(filter, ListKind::Keep).unwrap();
        evaluate_filter(&parsed.ast, tags)
    }

    fn check_drop(filter: &str, tags: &[(&str, &str)]) -> bool {
        let parsed = parse_filter(filter, ListKind::Drop).unwrap();
        evaluate_filter(&parsed.ast, tags)
    }

    // ============================================
    // Pair semantics
    // ============================================

    #[test]
    fn test_key_only_matches_any_value() {
        assert!(check("shop", &[("shop", "bakery")]));
        assert!(check("shop=", &[("shop", "")]));
        assert!(!check("shop", &[("amenity", "cafe")]));
    }

    #[test]
    fn test_continuation_values() {
        let filter = "amenity=bar =pub";
        assert!(check(filter, &[("amenity", "bar")]));
        assert!(check(filter, &[("amenity", "pub")]));
        assert!(!check(filter, &[("amenity", "cafe")]));
    }

    #[test]
    fn test_numeric_comparisons() {
        assert!(check("layer>=2", &[("layer", "10")]));
        assert!(!check("layer>=2", &[("layer", "1")]));
        assert!(check("ele<0", &[("ele", "-1")]));
        assert!(check("lanes=2", &[("lanes", "2.0")]));
        assert!(check("width>3", &[("width", "3.5 m")]));
    }

    #[test]
    fn test_text_comparisons_are_bytewise() {
        assert!(check("name<N", &[("name", "Main Street")]));
        assert!(!check("name<N", &[("name", "Oak Road")]));
    }

    #[test]
    fn test_wildcards() {
        assert!(check("highway=*_link", &[("highway", "motorway_link")]));
        assert!(check("name=Bahnhof*", &[("name", "Bahnhofstraße")]));
        assert!(check("name=*hof*", &[("name", "Am Hofgarten"), ("name", "Friedhof")]));
        assert!(check("addr:*", &[("addr:street", "Main")]));
        assert!(!check("addr:*", &[("address", "Main")]));
    }

    // Regression: keep lists accept `!=` when the key is missing entirely.
    #[test]
    fn test_not_equal_on_absent_key() {
        assert!(check("name!=Main", &[("highway", "primary")]));
        assert!(!check("name!=Main", &[("name", "Main")]));
        assert!(check("name!=Main", &[("name", "Side")]));
        assert!(!check_drop("name!=Main", &[("highway", "primary")]));
        // numeric inequality does not get the rule
        assert!(!check("lanes!=2", &[("highway", "primary")]));
    }

    #[test]
    fn test_and_continuation_keeps_result_when_key_missing() {
        // `=y` joined by AND reuses `a` and must not veto when `a` is absent
        assert!(check("a!=x and =y", &[("b", "1")]));
    }

    #[test]
    fn test_meet_all() {
        let filter = "all highway=primary name";
        assert!(check(filter, &[("highway", "primary"), ("name", "A1")]));
        assert!(!check(filter, &[("highway", "primary")]));
    }

    #[test]
    fn test_empty_filter_matches_nothing() {
        assert!(!check("", &[("a", "b")]));
    }

    // ============================================
    // Equivalence with a reference evaluator
    // ============================================

    /// Shunting-yard over the raw token words, independent of the AST.
    fn reference_eval(words: &[String], tags: &[(&str, &str)]) -> bool {
        fn prec(op: &str) -> u8 {
            if op == "and" { 2 } else { 1 }
        }
        fn apply(op: &str, out: &mut Vec<bool>) {
            let b = out.pop().unwrap();
            let a = out.pop().unwrap();
            out.push(if op == "and" { a && b } else { a || b });
        }
        fn push_implicit_or(ops: &mut Vec<String>, out: &mut Vec<bool>) {
            while let Some(top) = ops.last() {
                if top == "(" {
                    break;
                }
                let op = ops.pop().unwrap();
                apply(&op, out);
            }
            ops.push("or".into());
        }

        let mut out: Vec<bool> = Vec::new();
        let mut ops: Vec<String> = Vec::new();
        let mut expect_operand = true;
        for w in words {
            match w.as_str() {
                "and" | "or" => {
                    while let Some(top) = ops.last() {
                        if top != "(" && prec(top) >= prec(w) {
                            let op = ops.pop().unwrap();
                            apply(&op, &mut out);
                        } else {
                            break;
                        }
                    }
                    ops.push(w.clone());
                    expect_operand = true;
                }
                "(" => {
                    if !expect_operand {
                        push_implicit_or(&mut ops, &mut out);
                    }
                    ops.push(w.clone());
                    expect_operand = true;
                }
                ")" => {
                    while let Some(op) = ops.pop() {
                        if op == "(" {
                            break;
                        }
                        apply(&op, &mut out);
                    }
                    expect_operand = false;
                }
                pair => {
                    if !expect_operand {
                        push_implicit_or(&mut ops, &mut out);
                    }
                    let (k, v) = pair.split_once('=').unwrap();
                    out.push(tags.iter().any(|(tk, tv)| *tk == k && *tv == v));
                    expect_operand = false;
                }
            }
        }
        while let Some(op) = ops.pop() {
            apply(&op, &mut out);
        }
        out.pop().unwrap()
    }

    fn leaf() -> impl Strategy<Value = Vec<String>> {
        (prop::sample::select(vec!["a", "b", "c"]), prop::sample::select(vec!["x", "y"]))
            .prop_map(|(k, v)| vec![format!("{k}={v}")])
    }

    fn expr() -> impl Strategy<Value = Vec<String>> {
        leaf().prop_recursive(4, 32, 4, |inner| {
            prop_oneof![
                (inner.clone(), prop::sample::select(vec!["and", "or", ""]), inner.clone())
                    .prop_map(|(mut a, op, b)| {
                        if !op.is_empty() {
                            a.push(op.to_string());
                        }
                        a.extend(b);
                        a
                    }),
                inner.prop_map(|e| {
                    let mut v = vec!["(".to_string()];
                    v.extend(e);
                    v.push(")".to_string());
                    v
                }),
            ]
        })
    }

    fn tag_set() -> impl Strategy<Value = Vec<(&'static str, &'static str)>> {
        prop::sample::subsequence(
            vec![("a", "x"), ("a", "y"), ("b", "x"), ("b", "y"), ("c", "x"), ("c", "y")],
            0..=6,
        )
    }

    proptest! {
        #[test]
        fn prop_matches_reference(words in expr(), tags in tag_set()) {
            let text = words.join(" ");
            let parsed = parse_filter(&text, ListKind::Keep).unwrap();
            prop_assert_eq!(
                evaluate_filter(&parsed.ast, &tags),
                reference_eval(&words, &tags),
                "filter: {}", text
            );
        }
    }
}
