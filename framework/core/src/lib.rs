mod iteration;
mod shutdown;

pub mod prelude {
    pub use crate::iteration::{panic_message, CheckResult, IterationResult, ScenarioError};
    pub use crate::shutdown::{DelegatedShutdownListener, ShutdownHandle};
}
