pub mod clock;
pub mod drain;
pub mod identity;
pub mod poller;
pub mod runner;
pub mod target;
pub mod termination;

pub use clock::{Clock, SystemClock};
pub use drain::{DrainDetector, DrainState, DrainTimer, Transition};
pub use identity::{ExposedPort, PortSelection, TaskIdentity};
pub use poller::{HealthObservation, HealthPoller, TargetState};
pub use runner::{bootstrap, run_until_signal, Runner};
pub use target::TargetReference;
pub use termination::{ExitTrigger, Outcome, TerminationTrigger};
