use std::cell::Cell;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt::Write;
use std::rc::Rc;

use cranelift_entity::{entity_impl, PrimaryMap};

use crate::ctx::ErrorAccumulator;
use crate::expr::Expr;
use crate::StrSpan;

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct RuleHandle(u32);

entity_impl!(RuleHandle);

pub struct Rule {
    pub name: Rc<str>,
    pub name_span: StrSpan,
    pub expr: Expr,
    /// Cached result of the output analysis, filled before lowering.
    pub has_output: Cell<Option<bool>>,
}

/// The rule table. Insertion order is preserved so emission is
/// deterministic and the first rule can serve as the default entry point.
pub struct Grammar {
    pub rules: PrimaryMap<RuleHandle, Rule>,
    names: HashMap<Rc<str>, RuleHandle>,
}

impl Grammar {
    pub fn new() -> Grammar {
        Grammar {
            rules: PrimaryMap::new(),
            names: HashMap::new(),
        }
    }

    pub fn add_rule(
        &mut self,
        name: Rc<str>,
        name_span: StrSpan,
        expr: Expr,
        err: &ErrorAccumulator,
    ) -> RuleHandle {
        let handle = self.rules.push(Rule {
            name: name.clone(),
            name_span,
            expr,
            has_output: Cell::new(None),
        });
        match self.names.entry(name) {
            Entry::Occupied(_) => {
                err.error(name_span, "duplicate rule name");
            }
            Entry::Vacant(v) => {
                v.insert(handle);
            }
        }
        handle
    }

    pub fn lookup(&self, name: &str) -> Option<RuleHandle> {
        self.names.get(name).copied()
    }

    pub fn first_rule(&self) -> Option<RuleHandle> {
        self.rules.keys().next()
    }

    pub fn rule_name(&self, handle: RuleHandle) -> Rc<str> {
        self.rules[handle].name.clone()
    }

    /// Replace every `Expr::Call` with the resolved `Expr::Rule`.
    pub fn resolve(&mut self, err: &ErrorAccumulator) {
        let names = &self.names;
        for (_, rule) in self.rules.iter_mut() {
            rule.expr.visit_mut(&mut |node| {
                if let Expr::Call { name, name_span } = node {
                    match names.get(&**name) {
                        Some(&handle) => *node = Expr::Rule(handle),
                        None => err.error(*name_span, format!("unknown rule `{name}`")),
                    }
                }
            });
        }
    }

    pub fn display_into(&self, buf: &mut dyn Write) {
        let rule_name = |handle| self.rule_name(handle);
        for (_, rule) in self.rules.iter() {
            _ = writeln!(buf, "\nrule {}:", rule.name);
            rule.expr.display_with_indent(buf, 1, &rule_name);
        }
    }
}
