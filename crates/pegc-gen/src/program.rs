use std::fmt::Write;
use std::rc::Rc;

use pegc::grammar::{Grammar, RuleHandle};

/// Jump target allocated per rule; rendered as `'bN`.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct BlockLabel(pub u32);

/// Cursor snapshot slot allocated per rule.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct CursorVar(pub u32);

/// Boolean slot allocated per rule (the repetition `first` flag).
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct FlagVar(pub u32);

/// Runtime primitives the lowering emits. The machine exposes a few more
/// (string pushes, locals loads, the factory hook) that only exist for
/// grammar features without a lowering.
#[derive(Clone, PartialEq, Debug)]
pub enum RuntimeOp {
    PushEmpty,
    /// Push the input span from the saved cursor to the current one.
    PushInputRange(CursorVar),
    PushTrue,
    PushFalse,
    PushArray,
    AppendToArray,
    MakeLabel(Rc<str>),
    MergeLabels(u32),
    Pop(u32),
    LocalsPush(u32),
}

/// One statement of a lowered rule body. Failure handling is structural:
/// fallible statements carry the statements to run when they do not
/// match, spliced in by the failure continuation of the enclosing
/// expression.
#[derive(Clone, PartialEq, Debug)]
pub enum Stmt {
    /// Match and consume a byte string; `fold` is ASCII case-insensitive.
    Bytes {
        bytes: Rc<[u8]>,
        fold: bool,
        fail: Vec<Stmt>,
    },
    /// Match and consume one byte against a set.
    ByteSet {
        set: Rc<[u8]>,
        inverted: bool,
        fail: Vec<Stmt>,
    },
    /// Consume one byte (the `.` wildcard). The sentinel byte is not
    /// matchable, which is what makes `.*` stop at the end of input.
    AnyByte { fail: Vec<Stmt> },
    /// Invoke another rule's program.
    Call { rule: RuleHandle, fail: Vec<Stmt> },
    Save(CursorVar),
    Restore(CursorVar),
    Loop { label: BlockLabel, body: Vec<Stmt> },
    Break(BlockLabel),
    /// Forward jump to the matching `Target` in this or an enclosing block.
    Goto(BlockLabel),
    Target(BlockLabel),
    SetFlag(FlagVar, bool),
    /// Run `body` when the flag equals `value`.
    IfFlag {
        flag: FlagVar,
        value: bool,
        body: Vec<Stmt>,
    },
    Runtime(RuntimeOp),
    /// Leave the rule program; `false` signals a failed match.
    Return(bool),
}

/// The lowered body of one rule plus its slot requirements.
#[derive(Clone, PartialEq, Debug, Default)]
pub struct RuleProgram {
    pub stmts: Vec<Stmt>,
    pub cursor_vars: u32,
    pub flag_vars: u32,
}

/// Render a byte set the way it was written in a grammar, merging runs
/// back into ranges. Also used for failure expectations.
pub fn describe_byte_set(set: &[u8], inverted: bool) -> String {
    let mut out = String::from("[");
    if inverted {
        out.push('^');
    }
    let push_byte = |out: &mut String, b: u8| match b {
        b'\n' => out.push_str("\\n"),
        b'\t' => out.push_str("\\t"),
        b'-' => out.push_str("\\-"),
        0 => out.push_str("\\0"),
        b if b.is_ascii_graphic() || b == b' ' => out.push(b as char),
        b => _ = write!(out, "\\x{b:02x}"),
    };
    let mut i = 0;
    while i < set.len() {
        let mut j = i;
        while j + 1 < set.len() && Some(set[j + 1]) == set[j].checked_add(1) {
            j += 1;
        }
        if j - i >= 2 {
            push_byte(&mut out, set[i]);
            out.push('-');
            push_byte(&mut out, set[j]);
        } else {
            for &b in &set[i..=j] {
                push_byte(&mut out, b);
            }
        }
        i = j + 1;
    }
    out.push(']');
    out
}

pub fn display_program(
    buf: &mut dyn Write,
    name: &str,
    program: &RuleProgram,
    grammar: &Grammar,
) {
    _ = writeln!(buf, "fn {name} {{");
    display_stmts(buf, &program.stmts, grammar, 1);
    _ = writeln!(buf, "}}");
}

fn print_indent(buf: &mut dyn Write, indent: u32) {
    for _ in 0..indent {
        _ = buf.write_str("    ");
    }
}

fn display_stmts(buf: &mut dyn Write, stmts: &[Stmt], grammar: &Grammar, indent: u32) {
    for stmt in stmts {
        display_stmt(buf, stmt, grammar, indent);
    }
}

fn display_fallible(
    buf: &mut dyn Write,
    condition: &str,
    fail: &[Stmt],
    grammar: &Grammar,
    indent: u32,
) {
    print_indent(buf, indent);
    if fail.is_empty() {
        _ = writeln!(buf, "{condition};");
        return;
    }
    _ = writeln!(buf, "if !{condition} {{");
    display_stmts(buf, fail, grammar, indent + 1);
    print_indent(buf, indent);
    _ = writeln!(buf, "}}");
}

#[rustfmt::skip]
fn display_stmt(buf: &mut dyn Write, stmt: &Stmt, grammar: &Grammar, indent: u32) {
    match stmt {
        Stmt::Bytes { bytes, fold, fail } => {
            let text = String::from_utf8_lossy(bytes);
            let condition = match *fold {
                true => format!("bytes_fold({text:?})"),
                false => format!("bytes({text:?})"),
            };
            display_fallible(buf, &condition, fail, grammar, indent);
        }
        Stmt::ByteSet { set, inverted, fail } => {
            let condition = format!("byte_set({})", describe_byte_set(set, *inverted));
            display_fallible(buf, &condition, fail, grammar, indent);
        }
        Stmt::AnyByte { fail } => {
            display_fallible(buf, "any_byte()", fail, grammar, indent);
        }
        Stmt::Call { rule, fail } => {
            let condition = format!("{}()", grammar.rule_name(*rule));
            display_fallible(buf, &condition, fail, grammar, indent);
        }
        Stmt::Save(var) => {
            print_indent(buf, indent);
            _ = writeln!(buf, "let c{} = cursor;", var.0);
        }
        Stmt::Restore(var) => {
            print_indent(buf, indent);
            _ = writeln!(buf, "cursor = c{};", var.0);
        }
        Stmt::Loop { label, body } => {
            print_indent(buf, indent);
            _ = writeln!(buf, "'b{}: loop {{", label.0);
            display_stmts(buf, body, grammar, indent + 1);
            print_indent(buf, indent);
            _ = writeln!(buf, "}}");
        }
        Stmt::Break(label) => {
            print_indent(buf, indent);
            _ = writeln!(buf, "break 'b{};", label.0);
        }
        Stmt::Goto(label) => {
            print_indent(buf, indent);
            _ = writeln!(buf, "goto 'b{};", label.0);
        }
        Stmt::Target(label) => {
            print_indent(buf, indent.saturating_sub(1));
            _ = writeln!(buf, "'b{}:", label.0);
        }
        Stmt::SetFlag(flag, value) => {
            print_indent(buf, indent);
            _ = writeln!(buf, "f{} = {value};", flag.0);
        }
        Stmt::IfFlag { flag, value, body } => {
            print_indent(buf, indent);
            match *value {
                true => _ = writeln!(buf, "if f{} {{", flag.0),
                false => _ = writeln!(buf, "if !f{} {{", flag.0),
            }
            display_stmts(buf, body, grammar, indent + 1);
            print_indent(buf, indent);
            _ = writeln!(buf, "}}");
        }
        Stmt::Runtime(op) => {
            print_indent(buf, indent);
            match op {
                RuntimeOp::PushEmpty => _ = writeln!(buf, "push_empty();"),
                RuntimeOp::PushInputRange(var) => {
                    _ = writeln!(buf, "push_input_range(c{});", var.0)
                }
                RuntimeOp::PushTrue => _ = writeln!(buf, "push_true();"),
                RuntimeOp::PushFalse => _ = writeln!(buf, "push_false();"),
                RuntimeOp::PushArray => _ = writeln!(buf, "push_array();"),
                RuntimeOp::AppendToArray => _ = writeln!(buf, "append_to_array();"),
                RuntimeOp::MakeLabel(name) => _ = writeln!(buf, "make_label({name:?});"),
                RuntimeOp::MergeLabels(count) => _ = writeln!(buf, "merge_labels({count});"),
                RuntimeOp::Pop(count) => _ = writeln!(buf, "pop({count});"),
                RuntimeOp::LocalsPush(count) => _ = writeln!(buf, "locals_push({count});"),
            }
        }
        Stmt::Return(value) => {
            print_indent(buf, indent);
            _ = writeln!(buf, "return {value};");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_set_descriptions() {
        assert_eq!(describe_byte_set(b"bcdfh", false), "[b-dfh]");
        assert_eq!(describe_byte_set(b"a", true), "[^a]");
        assert_eq!(describe_byte_set(b"\n-", false), "[\\n\\-]");
        assert_eq!(describe_byte_set(b"ab", false), "[ab]");
    }
}
