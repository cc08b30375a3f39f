use std::cell::{Ref, RefCell};

use crate::{SpannedError, StrSpan};

/// Shared sink for compile-time diagnostics. Passes that only read the
/// grammar still need to report, so this uses interior mutability.
#[derive(Default)]
pub struct ErrorAccumulator {
    errors: RefCell<Vec<SpannedError>>,
}

impl ErrorAccumulator {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn error(&self, span: StrSpan, err: impl ToString) {
        self.errors.borrow_mut().push(SpannedError {
            span,
            err: err.to_string(),
        });
    }
    pub fn is_empty(&self) -> bool {
        self.errors.borrow().is_empty()
    }
    pub fn get(&self) -> Ref<'_, Vec<SpannedError>> {
        self.errors.borrow()
    }
    pub fn clear(&self) {
        self.errors.borrow_mut().clear();
    }
}
