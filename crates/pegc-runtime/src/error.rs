use std::fmt::{self, Display};

/// The farthest-failure report for a parse that did not match.
#[derive(Debug)]
pub struct ParseError {
    pub input: Vec<u8>,
    pub position: usize,
    pub expectations: Vec<String>,
    pub other_reasons: Vec<String>,
}

impl Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let before = &self.input[..self.position];
        let line = before.iter().filter(|&&b| b == b'\n').count() + 1;
        let line_start = before
            .iter()
            .rposition(|&b| b == b'\n')
            .map(|i| i + 1)
            .unwrap_or(0);
        let column = self.position - line_start + 1;

        let mut reasons = self.other_reasons.clone();
        if !self.expectations.is_empty() {
            reasons.push(format!("expected one of {}", self.expectations.join(", ")));
        }
        if reasons.is_empty() {
            reasons.push("no match".to_owned());
        }

        let prefix_offset = before.len().saturating_sub(20);
        let prefix = String::from_utf8_lossy(&before[prefix_offset..]);
        write!(
            f,
            "at line {line}, column {column} (byte {}, after {prefix:?}): {}",
            self.position,
            reasons.join(" / ")
        )
    }
}

impl std::error::Error for ParseError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_position_and_reasons() {
        let err = ParseError {
            input: b"ab\ncd".to_vec(),
            position: 4,
            expectations: vec!["'x'".to_owned(), "'y'".to_owned()],
            other_reasons: vec![],
        };
        let rendered = err.to_string();
        assert!(rendered.contains("line 2, column 2"), "{rendered}");
        assert!(rendered.contains("expected one of 'x', 'y'"), "{rendered}");
    }
}
