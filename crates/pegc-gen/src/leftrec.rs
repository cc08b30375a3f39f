use cranelift_entity::{EntitySet, SecondaryMap};

use pegc::ctx::ErrorAccumulator;
use pegc::expr::Expr;
use pegc::grammar::{Grammar, RuleHandle};

/// Reject rules that can reach themselves without consuming input. The
/// lowering turns rule calls into plain recursion, so a left-recursive
/// grammar would loop forever at parse time.
pub fn check(grammar: &Grammar, err: &ErrorAccumulator) {
    let nullable = compute_nullable(grammar);

    let mut left_calls = SecondaryMap::new();
    for (handle, rule) in grammar.rules.iter() {
        let mut calls = Vec::new();
        collect_left_calls(&rule.expr, &nullable, &mut calls);
        left_calls[handle] = calls;
    }

    for (handle, rule) in grammar.rules.iter() {
        if reaches(handle, handle, &left_calls, &mut EntitySet::new()) {
            err.error(
                rule.name_span,
                format!("rule {} is left-recursive", rule.name),
            );
        }
    }
}

fn reaches(
    from: RuleHandle,
    target: RuleHandle,
    left_calls: &SecondaryMap<RuleHandle, Vec<RuleHandle>>,
    visited: &mut EntitySet<RuleHandle>,
) -> bool {
    for &next in &left_calls[from] {
        if next == target {
            return true;
        }
        // EntitySet::insert returns the previous membership
        if !visited.insert(next) && reaches(next, target, left_calls, visited) {
            return true;
        }
    }
    false
}

/// Fixpoint nullability: seeded false, so the iteration only ever flips
/// entries to true and terminates.
fn compute_nullable(grammar: &Grammar) -> SecondaryMap<RuleHandle, bool> {
    let mut nullable: SecondaryMap<RuleHandle, bool> = SecondaryMap::new();
    loop {
        let mut changed = false;
        for (handle, rule) in grammar.rules.iter() {
            if !nullable[handle] && expr_nullable(&rule.expr, &nullable) {
                nullable[handle] = true;
                changed = true;
            }
        }
        if !changed {
            return nullable;
        }
    }
}

fn expr_nullable(expr: &Expr, nullable: &SecondaryMap<RuleHandle, bool>) -> bool {
    match expr {
        Expr::Empty | Expr::Ahead(_) | Expr::NotAhead(_) | Expr::PushTrue | Expr::PushFalse => true,
        Expr::Literal { bytes, .. } => bytes.is_empty(),
        Expr::Class { .. } => false,
        Expr::Sequence(children) => children.iter().all(|c| expr_nullable(c, nullable)),
        Expr::Choice(children) => children.iter().any(|c| expr_nullable(c, nullable)),
        Expr::Repeat {
            expr,
            at_least_once,
            ..
        } => !at_least_once || expr_nullable(expr, nullable),
        // the loop can exit immediately when the stop expression matches
        Expr::Until { stop, .. } => expr_nullable(stop, nullable),
        Expr::Rule(handle) => nullable[*handle],
        Expr::Paren(expr) | Expr::Label { expr, .. } => expr_nullable(expr, nullable),
        // unresolved or unsupported, other passes report these
        Expr::Call { .. } | Expr::Unsupported { .. } => true,
    }
}

/// Rules invocable before the expression has consumed any input.
/// Lookaheads count: a left-recursive call behind `&`/`!` still recurses
/// without a cursor advance.
fn collect_left_calls(
    expr: &Expr,
    nullable: &SecondaryMap<RuleHandle, bool>,
    out: &mut Vec<RuleHandle>,
) {
    match expr {
        Expr::Rule(handle) => out.push(*handle),
        Expr::Sequence(children) => {
            for child in children {
                collect_left_calls(child, nullable, out);
                if !expr_nullable(child, nullable) {
                    break;
                }
            }
        }
        Expr::Choice(children) => {
            for child in children {
                collect_left_calls(child, nullable, out);
            }
        }
        Expr::Repeat { expr, .. } => collect_left_calls(expr, nullable, out),
        Expr::Until { expr, stop } => {
            collect_left_calls(stop, nullable, out);
            collect_left_calls(expr, nullable, out);
        }
        Expr::Ahead(a) | Expr::NotAhead(a) | Expr::Paren(a) => collect_left_calls(a, nullable, out),
        Expr::Label { expr, .. } => collect_left_calls(expr, nullable, out),
        Expr::Empty
        | Expr::Literal { .. }
        | Expr::Class { .. }
        | Expr::Call { .. }
        | Expr::PushTrue
        | Expr::PushFalse
        | Expr::Unsupported { .. } => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pegc::parse::parse_grammar;

    fn errors(src: &str) -> Vec<String> {
        let err = ErrorAccumulator::new();
        let grammar = parse_grammar(src, &err);
        assert!(err.is_empty(), "{:?}", err.get());
        check(&grammar, &err);
        let errs = err.get();
        errs.iter().map(|e| e.err.clone()).collect()
    }

    #[test]
    fn direct_left_recursion() {
        let reported = errors("rule e e '+' 'n' / 'n' end");
        assert_eq!(reported, vec!["rule e is left-recursive".to_owned()]);
    }

    #[test]
    fn indirect_left_recursion() {
        let reported = errors("rule a b 'x' end rule b a 'y' / 'z' end");
        assert_eq!(reported.len(), 2);
    }

    #[test]
    fn nullable_prefix_left_recursion() {
        let reported = errors("rule a 'x'? a end");
        assert_eq!(reported, vec!["rule a is left-recursive".to_owned()]);
    }

    #[test]
    fn guarded_recursion_is_fine() {
        assert!(errors("rule t '(' t ')' / ( ) end").is_empty());
        assert!(errors("rule t 'x' t / 'y' end").is_empty());
    }

    #[test]
    fn lookahead_left_recursion() {
        let reported = errors("rule a &a 'x' end");
        assert_eq!(reported, vec!["rule a is left-recursive".to_owned()]);
    }
}
