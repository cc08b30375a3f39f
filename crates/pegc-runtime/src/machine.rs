use std::collections::BTreeMap;
use std::rc::Rc;

use crate::error::ParseError;
use crate::values::Value;
use crate::Factory;

/// The state a compiled rule program runs against: the input buffer with
/// its sentinel byte, the cursor, the output and locals stacks, and the
/// farthest-failure record. A fresh machine is created per parse, which
/// is what resets all shared state between top-level parses.
pub struct Machine {
    buf: Vec<u8>,
    cursor: usize,
    output: Vec<Value>,
    locals: Vec<Value>,
    failure_position: usize,
    failure_expectations: Vec<String>,
    failure_other_reasons: Vec<String>,
    factory: Option<Factory>,
}

impl Machine {
    /// Appends a `0` sentinel so single-byte consumes never need a bounds
    /// check and full consumption can be verified at the end.
    pub fn new(input: &[u8]) -> Machine {
        let mut buf = Vec::with_capacity(input.len() + 1);
        buf.extend_from_slice(input);
        buf.push(0);
        Machine {
            buf,
            cursor: 0,
            output: Vec::new(),
            locals: Vec::new(),
            failure_position: 0,
            failure_expectations: Vec::new(),
            failure_other_reasons: Vec::new(),
            factory: None,
        }
    }

    pub fn set_factory(&mut self, factory: Factory) {
        self.factory = Some(factory);
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn set_cursor(&mut self, cursor: usize) {
        debug_assert!(cursor <= self.buf.len());
        self.cursor = cursor;
    }

    /// The parse consumed the whole input iff the cursor rests exactly on
    /// the sentinel byte.
    pub fn at_sentinel(&self) -> bool {
        self.cursor == self.buf.len() - 1
    }

    pub fn output_depth(&self) -> usize {
        self.output.len()
    }

    pub fn locals_depth(&self) -> usize {
        self.locals.len()
    }

    pub fn match_bytes(&mut self, bytes: &[u8], fold: bool) -> bool {
        let end = self.cursor + bytes.len();
        if end > self.buf.len() {
            return false;
        }
        let at = &self.buf[self.cursor..end];
        let matched = match fold {
            true => at.eq_ignore_ascii_case(bytes),
            false => at == bytes,
        };
        if matched {
            self.cursor = end;
        }
        matched
    }

    pub fn match_byte_set(&mut self, set: &[u8], inverted: bool) -> bool {
        let Some(&byte) = self.buf.get(self.cursor) else {
            return false;
        };
        if set.contains(&byte) != inverted {
            self.cursor += 1;
            true
        } else {
            false
        }
    }

    /// The `.` wildcard: one byte, no membership test. The sentinel at
    /// the end of the buffer is not matchable, so `.` fails exactly at
    /// end of input and `.*` terminates.
    pub fn match_any(&mut self) -> bool {
        if self.cursor + 1 < self.buf.len() {
            self.cursor += 1;
            true
        } else {
            false
        }
    }

    fn push_output(&mut self, value: Value) {
        self.output.push(value);
    }

    fn pop_output(&mut self) -> Value {
        self.output.pop().expect("output stack underflow")
    }

    pub fn push_empty(&mut self) {
        self.push_output(Value::empty_map());
    }

    pub fn push_input_range(&mut self, start: usize) {
        self.push_output(Value::Range(start, self.cursor));
    }

    pub fn push_bool(&mut self, value: bool) {
        self.push_output(Value::Bool(value));
    }

    pub fn push_string(&mut self, value: &str) {
        self.push_output(Value::Str(Rc::from(value)));
    }

    pub fn push_array(&mut self) {
        self.push_output(Value::Array(Vec::new()));
    }

    pub fn append_to_array(&mut self) {
        let value = self.pop_output();
        match self.output.last_mut() {
            Some(Value::Array(items)) => items.push(value),
            _ => panic!("AppendToArray on a non-array value"),
        }
    }

    pub fn make_label(&mut self, name: &Rc<str>) {
        let value = self.pop_output();
        let mut map = BTreeMap::new();
        map.insert(name.clone(), value);
        self.push_output(Value::Map(map));
    }

    /// Union the top `count` values in push order, so later values win on
    /// key collisions. Non-map values are discarded.
    pub fn merge_labels(&mut self, count: usize) {
        assert!(self.output.len() >= count, "MergeLabels past stack bottom");
        let mut merged = BTreeMap::new();
        for value in self.output.split_off(self.output.len() - count) {
            if let Value::Map(map) = value {
                merged.extend(map);
            }
        }
        self.push_output(Value::Map(merged));
    }

    pub fn make_object(&mut self, class: &str) {
        let value = self.pop_output();
        let value = match &self.factory {
            Some(factory) => factory(class, value),
            None => value,
        };
        self.push_output(value);
    }

    pub fn pop(&mut self, count: usize) {
        for _ in 0..count {
            self.pop_output();
        }
    }

    pub fn locals_push(&mut self, count: usize) {
        for _ in 0..count {
            let value = self.pop_output();
            self.locals.push(value);
        }
    }

    pub fn locals_load(&mut self, index: usize) {
        let value = self.locals[self.locals.len() - 1 - index].clone();
        self.push_output(value);
    }

    pub fn locals_pop(&mut self, count: usize) {
        assert!(self.locals.len() >= count, "LocalsPop past stack bottom");
        self.locals.truncate(self.locals.len() - count);
    }

    /// Record a failure reason at the current cursor; only reasons at the
    /// farthest position seen so far are kept.
    pub fn record_failure(&mut self, reason: impl Into<String>, is_expectation: bool) {
        let position = self.cursor;
        if position > self.failure_position {
            self.failure_position = position;
            self.failure_expectations.clear();
            self.failure_other_reasons.clear();
        }
        if position == self.failure_position {
            match is_expectation {
                true => self.failure_expectations.push(reason.into()),
                false => self.failure_other_reasons.push(reason.into()),
            }
        }
    }

    /// Finish a successful parse: an output-less parse yields the empty
    /// map, and exactly one value must remain.
    pub fn finish(mut self) -> (Value, Vec<u8>) {
        if self.output.is_empty() {
            self.push_empty();
        }
        assert!(
            self.output.len() == 1,
            "parse left {} values on the output stack",
            self.output.len()
        );
        (self.output.pop().unwrap(), self.buf)
    }

    pub fn into_error(mut self) -> ParseError {
        self.buf.pop();
        let position = self.failure_position.min(self.buf.len());
        ParseError {
            input: self.buf,
            position,
            expectations: self.failure_expectations,
            other_reasons: self.failure_other_reasons,
        }
    }
}
