//! Two-strike anti-cheat escalation.

/// Outcome of recording one integrity violation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViolationOutcome {
    /// First strike: warn the candidate and keep going.
    Warning { message: String },
    /// Second strike: the interview ends.
    Terminate { message: String },
}

/// Counts client-reported integrity violations (tab switches, window blur)
/// for one connection. The count never resets within a session.
#[derive(Debug, Default)]
pub struct ViolationTracker {
    count: u32,
}

impl ViolationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self) -> ViolationOutcome {
        self.count += 1;
        if self.count < 2 {
            ViolationOutcome::Warning {
                message: "Please stay on the interview tab. Another violation will end \
                          the session."
                    .to_string(),
            }
        } else {
            ViolationOutcome::Terminate {
                message: "The session was ended after repeated focus violations.".to_string(),
            }
        }
    }

    pub fn count(&self) -> u32 {
        self.count
    }
}
