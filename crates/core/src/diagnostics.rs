//! Diagnostic context for user-expression evaluation.
//!
//! Operators run user-supplied predicates, selectors and comparers. A
//! `Diagnostics` handle is passed to each operator explicitly; every
//! evaluation runs inside a scope that names the operator, so a sink can
//! attribute panics or errors to the operator that was evaluating. The
//! default handle carries no sink and costs nothing.

use crate::error::Error;
use alloc::rc::Rc;

/// Receiver of evaluation-scope events.
pub trait DiagnosticSink {
    /// Called before an operator evaluates a user expression.
    fn enter(&self, operator: &'static str);

    /// Called after the evaluation finished, including during unwinding.
    fn exit(&self, operator: &'static str);

    /// Called when a propagation step of `operator` failed.
    fn on_error(&self, _operator: &'static str, _error: &Error) {}
}

/// Sink that ignores every event.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopSink;

impl DiagnosticSink for NoopSink {
    #[inline]
    fn enter(&self, _operator: &'static str) {}

    #[inline]
    fn exit(&self, _operator: &'static str) {}
}

/// Injectable diagnostic handle. Cloning shares the sink.
#[derive(Clone, Default)]
pub struct Diagnostics {
    sink: Option<Rc<dyn DiagnosticSink>>,
}

impl core::fmt::Debug for Diagnostics {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Diagnostics")
            .field("enabled", &self.sink.is_some())
            .finish()
    }
}

impl Diagnostics {
    /// Creates a handle without a sink.
    pub fn disabled() -> Self {
        Self { sink: None }
    }

    /// Creates a handle reporting to `sink`.
    pub fn new(sink: Rc<dyn DiagnosticSink>) -> Self {
        Self { sink: Some(sink) }
    }

    /// Returns true if a sink is attached.
    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.sink.is_some()
    }

    /// Opens an evaluation scope for `operator`. The scope closes on drop.
    pub fn scope(&self, operator: &'static str) -> EvaluationScope<'_> {
        if let Some(sink) = &self.sink {
            sink.enter(operator);
        }
        EvaluationScope {
            diagnostics: self,
            operator,
        }
    }

    /// Runs `f` inside an evaluation scope for `operator`.
    pub fn evaluate<R>(&self, operator: &'static str, f: impl FnOnce() -> R) -> R {
        let _scope = self.scope(operator);
        f()
    }

    /// Reports a failed propagation step. Only debug builds forward the
    /// error to the sink; the error itself is never altered.
    #[inline]
    pub fn report_error(&self, operator: &'static str, error: &Error) {
        #[cfg(debug_assertions)]
        if let Some(sink) = &self.sink {
            sink.on_error(operator, error);
        }
        #[cfg(not(debug_assertions))]
        let _ = (operator, error);
    }
}

/// Guard returned by `Diagnostics::scope`.
pub struct EvaluationScope<'a> {
    diagnostics: &'a Diagnostics,
    operator: &'static str,
}

impl Drop for EvaluationScope<'_> {
    fn drop(&mut self) {
        if let Some(sink) = &self.diagnostics.sink {
            sink.exit(self.operator);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;
    use alloc::vec::Vec;
    use core::cell::RefCell;

    #[derive(Default)]
    struct Recorder {
        stack: RefCell<Vec<&'static str>>,
        log: RefCell<Vec<&'static str>>,
    }

    impl DiagnosticSink for Recorder {
        fn enter(&self, operator: &'static str) {
            self.stack.borrow_mut().push(operator);
            self.log.borrow_mut().push("enter");
        }

        fn exit(&self, _operator: &'static str) {
            self.stack.borrow_mut().pop();
            self.log.borrow_mut().push("exit");
        }

        fn on_error(&self, operator: &'static str, _error: &Error) {
            self.log.borrow_mut().push(operator);
        }
    }

    #[test]
    fn test_disabled_is_noop() {
        let diagnostics = Diagnostics::default();
        assert!(!diagnostics.is_enabled());
        assert_eq!(diagnostics.evaluate("Filtering", || 7), 7);
    }

    #[test]
    fn test_scope_attributes_operator() {
        let recorder = Rc::new(Recorder::default());
        let diagnostics = Diagnostics::new(recorder.clone());

        let seen = diagnostics.evaluate("Ordering", || recorder.stack.borrow().last().copied());
        assert_eq!(seen, Some("Ordering"));
        assert!(recorder.stack.borrow().is_empty());
        assert_eq!(*recorder.log.borrow(), vec!["enter", "exit"]);
    }

    #[test]
    fn test_nested_scopes() {
        let recorder = Rc::new(Recorder::default());
        let diagnostics = Diagnostics::new(recorder.clone());

        let _outer = diagnostics.scope("Grouping");
        {
            let _inner = diagnostics.scope("Filtering");
            assert_eq!(*recorder.stack.borrow(), vec!["Grouping", "Filtering"]);
        }
        assert_eq!(*recorder.stack.borrow(), vec!["Grouping"]);
    }

    #[cfg(debug_assertions)]
    #[test]
    fn test_report_error_in_debug() {
        let recorder = Rc::new(Recorder::default());
        let diagnostics = Diagnostics::new(recorder.clone());
        diagnostics.report_error("Paging", &Error::invalid_operation("x"));
        assert_eq!(*recorder.log.borrow(), vec!["Paging"]);
    }
}
