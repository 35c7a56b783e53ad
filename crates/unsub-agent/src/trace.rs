//! Human-readable step log returned with every result.

use tracing::debug;

/// Append-only list of trace lines.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepTrace {
    steps: Vec<String>,
}

impl StepTrace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, step: impl Into<String>) {
        let step = step.into();
        debug!("step: {}", step.trim_start());
        self.steps.push(step);
    }

    /// Last `n` entries (fewer when the trace is shorter).
    pub fn recent(&self, n: usize) -> &[String] {
        &self.steps[self.steps.len().saturating_sub(n)..]
    }

    pub fn last(&self) -> Option<&str> {
        self.steps.last().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn as_slice(&self) -> &[String] {
        &self.steps
    }

    pub fn into_steps(self) -> Vec<String> {
        self.steps
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recent_window() {
        let mut t = StepTrace::new();
        for i in 0..15 {
            t.push(format!("step {}", i));
        }
        let r = t.recent(10);
        assert_eq!(r.len(), 10);
        assert_eq!(r[0], "step 5");
        assert_eq!(t.last(), Some("step 14"));
    }

    #[test]
    fn recent_shorter_than_window() {
        let mut t = StepTrace::new();
        t.push("a");
        assert_eq!(t.recent(10), &["a".to_string()]);
        assert!(StepTrace::new().recent(3).is_empty());
    }
}
