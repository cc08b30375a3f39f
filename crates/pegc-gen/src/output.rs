use pegc::expr::Expr;
use pegc::grammar::{Grammar, RuleHandle};

/// Run the output analysis for every rule, filling the per-rule cache.
/// Must complete before any lowering looks at `expr_has_output`.
pub fn analyze(grammar: &Grammar) {
    for handle in grammar.rules.keys() {
        rule_has_output(grammar, handle);
    }
}

/// Whether invoking the rule net-pushes exactly one value on success.
pub fn rule_has_output(grammar: &Grammar, handle: RuleHandle) -> bool {
    let rule = &grammar.rules[handle];
    if let Some(cached) = rule.has_output.get() {
        return cached;
    }
    // seed the cache so recursive references do not suppress output
    rule.has_output.set(Some(true));
    let value = expr_has_output(grammar, &rule.expr);
    rule.has_output.set(Some(value));
    value
}

pub fn expr_has_output(grammar: &Grammar, expr: &Expr) -> bool {
    match expr {
        Expr::Label { local, .. } => !local,
        Expr::PushTrue | Expr::PushFalse => true,
        Expr::Rule(handle) => rule_has_output(grammar, *handle),
        Expr::Sequence(children) | Expr::Choice(children) => children
            .iter()
            .any(|child| expr_has_output(grammar, child)),
        Expr::Repeat { expr, .. } => expr_has_output(grammar, expr),
        Expr::Until { expr, stop } => {
            expr_has_output(grammar, expr) || expr_has_output(grammar, stop)
        }
        Expr::Paren(expr) => expr_has_output(grammar, expr),
        Expr::Empty
        | Expr::Literal { .. }
        | Expr::Class { .. }
        | Expr::Ahead(_)
        | Expr::NotAhead(_)
        | Expr::Call { .. }
        | Expr::Unsupported { .. } => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pegc::ctx::ErrorAccumulator;
    use pegc::parse::parse_grammar;

    fn analyzed(src: &str) -> Grammar {
        let err = ErrorAccumulator::new();
        let grammar = parse_grammar(src, &err);
        assert!(err.is_empty(), "{:?}", err.get());
        analyze(&grammar);
        grammar
    }

    fn has_output(grammar: &Grammar, name: &str) -> bool {
        rule_has_output(grammar, grammar.lookup(name).unwrap())
    }

    #[test]
    fn terminals_are_silent() {
        let grammar = analyzed("rule Test 'a' [bc] . &'d' !'e' end");
        assert!(!has_output(&grammar, "Test"));
    }

    #[test]
    fn labels_and_booleans_produce() {
        let grammar = analyzed("rule a char:. end rule b $true end rule c %tmp:. end");
        assert!(has_output(&grammar, "a"));
        assert!(has_output(&grammar, "b"));
        // local labels move their value to the locals stack
        assert!(!has_output(&grammar, "c"));
    }

    #[test]
    fn output_flows_through_composites() {
        let grammar = analyzed(
            "rule a ( 'x' / y:'y' ) end
             rule b ( 'x' )*->( z:'z' ) end
             rule c a end",
        );
        assert!(has_output(&grammar, "a"));
        assert!(has_output(&grammar, "b"));
        assert!(has_output(&grammar, "c"));
    }

    #[test]
    fn recursion_seeds_true() {
        // a rule that only references itself settles on the seed
        let grammar = analyzed("rule a a end");
        assert!(has_output(&grammar, "a"));
    }

    #[test]
    fn recursive_rule_with_silent_body() {
        // the recursion seed classifies the rule as producing a value;
        // emission then upholds that by pushing on the silent alternative
        let grammar = analyzed("rule a '(' a ')' / 'x' end");
        assert!(has_output(&grammar, "a"));
        let grammar = analyzed("rule a '(' 'x' ')' end");
        assert!(!has_output(&grammar, "a"));
    }

    #[test]
    fn recursive_rule_with_captures() {
        let grammar = analyzed("rule a '(' inner:a ')' / char:'x' end");
        assert!(has_output(&grammar, "a"));
    }
}
