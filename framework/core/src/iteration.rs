use std::any::Any;
use std::time::Duration;

/// A named assertion made by a virtual user while an iteration was running.
///
/// A failed check is reported but does not fail the iteration it was made in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckResult {
    pub name: String,
    pub passed: bool,
}

/// Recorded when a behaviour returns an error or panics. The virtual user carries on with its
/// next iteration.
#[derive(derive_more::Error, derive_more::Display, Debug, Clone, PartialEq, Eq)]
#[display("Iteration {iter_id} of virtual user {vu_id} failed: {msg}")]
pub struct ScenarioError {
    vu_id: usize,
    iter_id: u64,
    msg: String,
}

impl ScenarioError {
    pub fn new(vu_id: usize, iter_id: u64, msg: impl Into<String>) -> Self {
        Self {
            vu_id,
            iter_id,
            msg: msg.into(),
        }
    }

    /// Build an error from the payload of a caught panic.
    pub fn from_panic(vu_id: usize, iter_id: u64, payload: &(dyn Any + Send)) -> Self {
        Self::new(vu_id, iter_id, panic_message(payload))
    }

    pub fn vu_id(&self) -> usize {
        self.vu_id
    }

    pub fn iter_id(&self) -> u64 {
        self.iter_id
    }

    pub fn message(&self) -> &str {
        &self.msg
    }
}

/// Describe the payload of a caught panic.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {s}")
    } else {
        "panicked with a non-string payload".to_string()
    }
}

/// The outcome of one run of a behaviour by one virtual user.
#[derive(Debug, Clone)]
pub struct IterationResult {
    pub vu_id: usize,
    pub iter_id: u64,
    pub duration: Duration,
    pub outcome: Result<(), ScenarioError>,
    pub checks: Vec<CheckResult>,
}

impl IterationResult {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panic_payload_message() {
        let err = std::panic::catch_unwind(|| panic!("bad {}", "state")).unwrap_err();
        let err = ScenarioError::from_panic(3, 7, err.as_ref());

        assert_eq!("panicked: bad state", err.message());
        assert_eq!(
            "Iteration 7 of virtual user 3 failed: panicked: bad state",
            err.to_string()
        );
    }

    #[test]
    fn static_str_panic_payload() {
        let err = std::panic::catch_unwind(|| panic!("boom")).unwrap_err();
        let err = ScenarioError::from_panic(1, 0, err.as_ref());

        assert_eq!("panicked: boom", err.message());
        assert_eq!(1, err.vu_id());
        assert_eq!(0, err.iter_id());
    }

    #[test]
    fn non_string_panic_payload() {
        let payload = std::panic::catch_unwind(|| std::panic::panic_any(42u32)).unwrap_err();

        assert_eq!(
            "panicked with a non-string payload",
            panic_message(payload.as_ref())
        );
    }
}
