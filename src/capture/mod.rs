mod machine;
mod request;

pub use machine::{transition, CaptureCommand, CaptureState, CaptureStateMachine, Step};
pub use request::RequestPolicy;
