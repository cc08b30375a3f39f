use std::cell::Cell;
use std::rc::Rc;

use cranelift_entity::PrimaryMap;

use pegc::ctx::ErrorAccumulator;
use pegc::expr::{ClassEntry, Expr};
use pegc::grammar::{Grammar, RuleHandle};

use crate::program::{BlockLabel, CursorVar, FlagVar, RuleProgram, RuntimeOp, Stmt};
use crate::{leftrec, output};

/// The lowered grammar: one statement program per rule, keyed identically
/// to the grammar's rule table.
pub struct CompiledGrammar {
    pub programs: PrimaryMap<RuleHandle, RuleProgram>,
}

pub fn compile(grammar: &Grammar, err: &ErrorAccumulator) -> CompiledGrammar {
    output::analyze(grammar);
    leftrec::check(grammar, err);

    let mut programs = PrimaryMap::new();
    for (_, rule) in grammar.rules.iter() {
        let compiler = RuleCompiler {
            grammar,
            err,
            cursor_vars: 0,
            flag_vars: 0,
            labels: 0,
        };
        programs.push(compiler.compile_rule(&rule.expr));
    }
    CompiledGrammar { programs }
}

/// The failure continuation: returns the statements that produce the
/// enclosing expression's failure effect. Every caller supplies its own,
/// and a fresh statement list is built at each splice point.
type OnFailure<'a> = &'a dyn Fn() -> Vec<Stmt>;

/// A jump target that only materializes in the program when something
/// actually jumps to it.
struct DynamicLabel {
    label: BlockLabel,
    used: Cell<bool>,
}

impl DynamicLabel {
    fn goto(&self) -> Stmt {
        self.used.set(true);
        Stmt::Goto(self.label)
    }
    fn break_loop(&self) -> Stmt {
        self.used.set(true);
        Stmt::Break(self.label)
    }
    fn target(&self) -> Option<Stmt> {
        self.used.get().then(|| Stmt::Target(self.label))
    }
    fn is_used(&self) -> bool {
        self.used.get()
    }
}

struct RuleCompiler<'a> {
    grammar: &'a Grammar,
    err: &'a ErrorAccumulator,
    cursor_vars: u32,
    flag_vars: u32,
    labels: u32,
}

impl<'a> RuleCompiler<'a> {
    fn new_label(&mut self) -> DynamicLabel {
        let label = BlockLabel(self.labels);
        self.labels += 1;
        DynamicLabel {
            label,
            used: Cell::new(false),
        }
    }

    fn new_cursor_var(&mut self) -> CursorVar {
        let var = CursorVar(self.cursor_vars);
        self.cursor_vars += 1;
        var
    }

    fn new_flag_var(&mut self) -> FlagVar {
        let var = FlagVar(self.flag_vars);
        self.flag_vars += 1;
        var
    }

    fn has_output(&self, expr: &Expr) -> bool {
        output::expr_has_output(self.grammar, expr)
    }

    fn compile_rule(mut self, expr: &Expr) -> RuleProgram {
        let mut stmts = self.compile_expr(expr, &|| vec![Stmt::Return(false)]);
        stmts.push(Stmt::Return(true));
        RuleProgram {
            stmts,
            cursor_vars: self.cursor_vars,
            flag_vars: self.flag_vars,
        }
    }

    fn compile_expr(&mut self, expr: &Expr, on_failure: OnFailure) -> Vec<Stmt> {
        match expr {
            Expr::Empty => vec![],
            Expr::Paren(expr) => self.compile_expr(expr, on_failure),

            Expr::Literal { bytes, fold } => vec![Stmt::Bytes {
                bytes: bytes.clone(),
                fold: *fold,
                fail: on_failure(),
            }],

            Expr::Class { entries, inverted } => {
                if entries.is_empty() && !inverted {
                    return vec![Stmt::AnyByte {
                        fail: on_failure(),
                    }];
                }
                vec![Stmt::ByteSet {
                    set: expand_class(entries),
                    inverted: *inverted,
                    fail: on_failure(),
                }]
            }

            Expr::Sequence(children) => {
                let mut stmts = Vec::new();
                let output_count = Cell::new(0u32);
                for child in children {
                    // failing mid-sequence must discard what earlier
                    // children already pushed
                    let child_failure = || {
                        let mut fail = Vec::new();
                        let count = output_count.get();
                        if count > 0 {
                            fail.push(Stmt::Runtime(RuntimeOp::Pop(count)));
                        }
                        fail.extend(on_failure());
                        fail
                    };
                    stmts.extend(self.compile_expr(child, &child_failure));
                    if self.has_output(child) {
                        output_count.set(output_count.get() + 1);
                    }
                }
                if output_count.get() >= 2 {
                    stmts.push(Stmt::Runtime(RuntimeOp::MergeLabels(output_count.get())));
                }
                stmts
            }

            Expr::Choice(children) => {
                if children.len() == 1 {
                    return self.compile_expr(&children[0], on_failure);
                }

                let has_output = self.has_output(expr);
                let choice_successful = self.new_label();
                let before_choice = self.new_cursor_var();

                let mut stmts = vec![Stmt::Save(before_choice)];
                let last = children.len() - 1;
                for (i, child) in children.iter().enumerate() {
                    if i == last {
                        stmts.extend(self.compile_expr(child, on_failure));
                        if has_output && !self.has_output(child) {
                            stmts.push(Stmt::Runtime(RuntimeOp::PushEmpty));
                        }
                        break;
                    }
                    let next_choice = self.new_label();
                    let try_next = || vec![next_choice.goto()];
                    stmts.extend(self.compile_expr(child, &try_next));
                    if has_output && !self.has_output(child) {
                        stmts.push(Stmt::Runtime(RuntimeOp::PushEmpty));
                    }
                    stmts.push(choice_successful.goto());
                    stmts.extend(next_choice.target());
                    stmts.push(Stmt::Restore(before_choice));
                }
                stmts.extend(choice_successful.target());
                stmts
            }

            Expr::Repeat {
                expr: child,
                glue,
                at_least_once,
            } => {
                let at_least_once = *at_least_once;
                let repetition = self.new_label();
                let before_repetition = self.new_cursor_var();
                let first = (at_least_once || glue.is_some()).then(|| self.new_flag_var());

                let break_loop = || {
                    let mut fail = Vec::new();
                    if at_least_once {
                        // zero matches fails the repetition as a whole
                        fail.push(Stmt::IfFlag {
                            flag: first.unwrap(),
                            value: true,
                            body: on_failure(),
                        });
                    }
                    fail.push(Stmt::Restore(before_repetition));
                    fail.push(repetition.break_loop());
                    fail
                };

                let mut body = Vec::new();
                if let Some(glue) = glue {
                    let mut glue_stmts = self.compile_expr(glue, &break_loop);
                    if self.has_output(glue) {
                        // the separator's value is discarded
                        glue_stmts.push(Stmt::Runtime(RuntimeOp::Pop(1)));
                    }
                    body.push(Stmt::IfFlag {
                        flag: first.unwrap(),
                        value: false,
                        body: glue_stmts,
                    });
                }
                body.extend(self.compile_expr(child, &break_loop));
                if self.has_output(child) {
                    body.push(Stmt::Runtime(RuntimeOp::AppendToArray));
                }
                if let Some(first) = first {
                    body.push(Stmt::SetFlag(first, false));
                }
                if repetition.is_used() {
                    body.insert(0, Stmt::Save(before_repetition));
                }

                let mut stmts = Vec::new();
                if let Some(first) = first {
                    stmts.push(Stmt::SetFlag(first, true));
                }
                if self.has_output(expr) {
                    stmts.push(Stmt::Runtime(RuntimeOp::PushArray));
                }
                stmts.push(Stmt::Loop {
                    label: repetition.label,
                    body,
                });
                stmts
            }

            Expr::Until { expr: child, stop } => {
                let until = self.new_label();
                let check_failed = self.new_label();
                let before_check = self.new_cursor_var();

                let mut body = vec![Stmt::Save(before_check)];
                let try_child = || vec![check_failed.goto()];
                body.extend(self.compile_expr(stop, &try_child));
                if self.has_output(stop) {
                    body.push(Stmt::Runtime(RuntimeOp::AppendToArray));
                }
                body.push(until.break_loop());
                body.extend(check_failed.target());
                body.push(Stmt::Restore(before_check));
                body.extend(self.compile_expr(child, on_failure));
                if self.has_output(child) {
                    body.push(Stmt::Runtime(RuntimeOp::AppendToArray));
                }

                let mut stmts = Vec::new();
                if self.has_output(expr) {
                    stmts.push(Stmt::Runtime(RuntimeOp::PushArray));
                }
                stmts.push(Stmt::Loop {
                    label: until.label,
                    body,
                });
                stmts
            }

            Expr::Ahead(child) => {
                let before_lookahead = self.new_cursor_var();
                let mut stmts = vec![Stmt::Save(before_lookahead)];
                stmts.extend(self.compile_expr(child, on_failure));
                if self.has_output(child) {
                    // lookahead must not leave captures behind
                    stmts.push(Stmt::Runtime(RuntimeOp::Pop(1)));
                }
                stmts.push(Stmt::Restore(before_lookahead));
                stmts
            }

            Expr::NotAhead(child) => {
                let lookahead_successful = self.new_label();
                let before_lookahead = self.new_cursor_var();
                let mut stmts = vec![Stmt::Save(before_lookahead)];
                let child_failed = || vec![lookahead_successful.goto()];
                stmts.extend(self.compile_expr(child, &child_failed));
                if self.has_output(child) {
                    stmts.push(Stmt::Runtime(RuntimeOp::Pop(1)));
                }
                // the child matched, so the lookahead as a whole fails
                stmts.extend(on_failure());
                stmts.extend(lookahead_successful.target());
                stmts.push(Stmt::Restore(before_lookahead));
                stmts
            }

            Expr::Rule(handle) => vec![Stmt::Call {
                rule: *handle,
                fail: on_failure(),
            }],

            // resolution already reported this reference
            Expr::Call { .. } => on_failure(),

            Expr::Label {
                name,
                local,
                expr: child,
            } => {
                let child_has_output = self.has_output(child);
                let mut stmts;
                if child_has_output {
                    stmts = self.compile_expr(child, on_failure);
                } else {
                    // no value from the child: capture the matched span
                    let label_start = self.new_cursor_var();
                    stmts = vec![Stmt::Save(label_start)];
                    stmts.extend(self.compile_expr(child, on_failure));
                    stmts.push(Stmt::Runtime(RuntimeOp::PushInputRange(label_start)));
                }
                if *local {
                    stmts.push(Stmt::Runtime(RuntimeOp::LocalsPush(1)));
                } else if &**name != "@" {
                    stmts.push(Stmt::Runtime(RuntimeOp::MakeLabel(name.clone())));
                }
                // `@` uses the value directly, without wrapping
                stmts
            }

            Expr::PushTrue => vec![Stmt::Runtime(RuntimeOp::PushTrue)],
            Expr::PushFalse => vec![Stmt::Runtime(RuntimeOp::PushFalse)],

            Expr::Unsupported { feature, span } => {
                self.err
                    .error(*span, format!("unsupported feature: {feature}"));
                on_failure()
            }
        }
    }
}

/// Materialize class selections into a sorted byte set, ranges inclusive
/// on both endpoints.
fn expand_class(entries: &[ClassEntry]) -> Rc<[u8]> {
    let mut present = [false; 256];
    for entry in entries {
        match *entry {
            ClassEntry::Byte(b) => present[b as usize] = true,
            ClassEntry::Range(begin, end) => {
                for b in begin..=end {
                    present[b as usize] = true;
                }
            }
        }
    }
    let set: Vec<u8> = (0..=255u8).filter(|&b| present[b as usize]).collect();
    Rc::from(set)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pegc::parse::parse_grammar;

    fn compile_src(src: &str) -> (Grammar, CompiledGrammar, Vec<String>) {
        let err = ErrorAccumulator::new();
        let grammar = parse_grammar(src, &err);
        let compiled = compile(&grammar, &err);
        let errors = err.get().iter().map(|e| e.err.clone()).collect();
        (grammar, compiled, errors)
    }

    #[test]
    fn class_expansion() {
        let set = expand_class(&[
            ClassEntry::Range(b'b', b'd'),
            ClassEntry::Byte(b'f'),
            ClassEntry::Byte(b'-'),
            ClassEntry::Byte(b'h'),
        ]);
        assert_eq!(&*set, b"-bcdfh");
    }

    #[test]
    fn sequence_pops_on_failure() {
        let (grammar, compiled, errors) = compile_src("rule Test a:'a' 'b' end");
        assert!(errors.is_empty(), "{errors:?}");
        let handle = grammar.lookup("Test").unwrap();
        let program = &compiled.programs[handle];
        // the 'b' terminal must pop the capture of `a:` before failing
        let Some(Stmt::Bytes { fail, .. }) = program
            .stmts
            .iter()
            .find(|s| matches!(s, Stmt::Bytes { bytes, .. } if &**bytes == b"b"))
        else {
            panic!("missing terminal for 'b'");
        };
        assert_eq!(fail[0], Stmt::Runtime(RuntimeOp::Pop(1)));
        assert_eq!(fail[1], Stmt::Return(false));
    }

    #[test]
    fn single_alternative_choice_is_transparent() {
        let (grammar, compiled, _) = compile_src("rule Test / 'a' end");
        let handle = grammar.lookup("Test").unwrap();
        let program = &compiled.programs[handle];
        assert!(matches!(program.stmts[0], Stmt::Bytes { .. }));
    }

    #[test]
    fn repetition_saves_cursor_when_body_can_fail() {
        let (grammar, compiled, _) = compile_src("rule Test ( 'a' )* 'b' end");
        let handle = grammar.lookup("Test").unwrap();
        let program = &compiled.programs[handle];
        let Stmt::Loop { body, .. } = &program.stmts[0] else {
            panic!("expected loop");
        };
        assert!(matches!(body[0], Stmt::Save(_)));
    }

    #[test]
    fn unsupported_features_are_rejected() {
        let (_, _, errors) = compile_src("rule Test 'a' $error['x'] end");
        assert_eq!(errors, vec!["unsupported feature: $error".to_owned()]);
    }

    #[test]
    fn left_recursion_is_rejected() {
        let (_, _, errors) = compile_src("rule e e '+' 'n' / 'n' end");
        assert_eq!(errors, vec!["rule e is left-recursive".to_owned()]);
    }
}
