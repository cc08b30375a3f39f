use pegc::grammar::RuleHandle;
use pegc_runtime::machine::Machine;
use pegc_runtime::values::to_json;
use pegc_runtime::ParseError;

use crate::compile::CompiledGrammar;
use crate::program::{describe_byte_set, BlockLabel, RuntimeOp, Stmt};

/// How control leaves a statement. Gotos and breaks propagate outward
/// through enclosing blocks until their label is found; a goto lands on
/// the matching `Target` statement, a break on the matching loop.
enum Flow {
    Next,
    Goto(BlockLabel),
    Break(BlockLabel),
    Return(bool),
}

/// Per-invocation slots of one rule program.
struct Frame {
    cursors: Vec<usize>,
    flags: Vec<bool>,
}

impl CompiledGrammar {
    /// Run the main rule over `input` and serialize the capture tree.
    /// The parse only succeeds when the whole input was consumed, which
    /// the sentinel byte makes a single cursor comparison.
    pub fn parse(&self, main: RuleHandle, input: &[u8]) -> Result<serde_json::Value, ParseError> {
        let mut machine = Machine::new(input);
        let matched = self.run_rule(main, &mut machine);
        if !matched || !machine.at_sentinel() {
            return Err(machine.into_error());
        }
        let (value, buf) = machine.finish();
        Ok(to_json(&value, &buf))
    }

    fn run_rule(&self, rule: RuleHandle, m: &mut Machine) -> bool {
        let program = &self.programs[rule];
        let mut frame = Frame {
            cursors: vec![0; program.cursor_vars as usize],
            flags: vec![false; program.flag_vars as usize],
        };
        match self.run_block(&program.stmts, &mut frame, m) {
            Flow::Return(matched) => matched,
            Flow::Next => true,
            Flow::Goto(_) | Flow::Break(_) => unreachable!("jump escaped a rule body"),
        }
    }

    fn run_block(&self, stmts: &[Stmt], frame: &mut Frame, m: &mut Machine) -> Flow {
        let mut i = 0;
        while i < stmts.len() {
            match self.run_stmt(&stmts[i], frame, m) {
                Flow::Next => i += 1,
                Flow::Goto(label) => {
                    // forward scan for the landing point in this block,
                    // otherwise hand the jump to the enclosing block
                    let target = stmts[i + 1..]
                        .iter()
                        .position(|s| matches!(s, Stmt::Target(t) if *t == label));
                    match target {
                        Some(offset) => i = i + 1 + offset + 1,
                        None => return Flow::Goto(label),
                    }
                }
                other => return other,
            }
        }
        Flow::Next
    }

    fn run_stmt(&self, stmt: &Stmt, frame: &mut Frame, m: &mut Machine) -> Flow {
        match stmt {
            Stmt::Bytes { bytes, fold, fail } => {
                if m.match_bytes(bytes, *fold) {
                    Flow::Next
                } else {
                    let text = String::from_utf8_lossy(bytes);
                    m.record_failure(format!("{text:?}"), true);
                    self.run_block(fail, frame, m)
                }
            }
            Stmt::ByteSet {
                set,
                inverted,
                fail,
            } => {
                if m.match_byte_set(set, *inverted) {
                    Flow::Next
                } else {
                    m.record_failure(describe_byte_set(set, *inverted), true);
                    self.run_block(fail, frame, m)
                }
            }
            Stmt::AnyByte { fail } => {
                if m.match_any() {
                    Flow::Next
                } else {
                    m.record_failure("any byte", true);
                    self.run_block(fail, frame, m)
                }
            }
            Stmt::Call { rule, fail } => {
                if self.run_rule(*rule, m) {
                    Flow::Next
                } else {
                    self.run_block(fail, frame, m)
                }
            }
            Stmt::Save(var) => {
                frame.cursors[var.0 as usize] = m.cursor();
                Flow::Next
            }
            Stmt::Restore(var) => {
                m.set_cursor(frame.cursors[var.0 as usize]);
                Flow::Next
            }
            Stmt::Loop { label, body } => loop {
                match self.run_block(body, frame, m) {
                    Flow::Next => continue,
                    Flow::Break(l) if l == *label => return Flow::Next,
                    other => return other,
                }
            },
            Stmt::Break(label) => Flow::Break(*label),
            Stmt::Goto(label) => Flow::Goto(*label),
            Stmt::Target(_) => Flow::Next,
            Stmt::SetFlag(flag, value) => {
                frame.flags[flag.0 as usize] = *value;
                Flow::Next
            }
            Stmt::IfFlag { flag, value, body } => {
                if frame.flags[flag.0 as usize] == *value {
                    self.run_block(body, frame, m)
                } else {
                    Flow::Next
                }
            }
            Stmt::Runtime(op) => {
                self.run_op(op, frame, m);
                Flow::Next
            }
            Stmt::Return(matched) => Flow::Return(*matched),
        }
    }

    fn run_op(&self, op: &RuntimeOp, frame: &Frame, m: &mut Machine) {
        match op {
            RuntimeOp::PushEmpty => m.push_empty(),
            RuntimeOp::PushInputRange(var) => m.push_input_range(frame.cursors[var.0 as usize]),
            RuntimeOp::PushTrue => m.push_bool(true),
            RuntimeOp::PushFalse => m.push_bool(false),
            RuntimeOp::PushArray => m.push_array(),
            RuntimeOp::AppendToArray => m.append_to_array(),
            RuntimeOp::MakeLabel(name) => m.make_label(name),
            RuntimeOp::MergeLabels(count) => m.merge_labels(*count as usize),
            RuntimeOp::Pop(count) => m.pop(*count as usize),
            RuntimeOp::LocalsPush(count) => m.locals_push(*count as usize),
        }
    }
}
