pub mod engine;
pub mod service;
pub mod states;

pub use engine::{LifecycleError, SignRequest};
pub use service::{LifecycleService, SignReceipt, DEFAULT_MAX_CONFLICT_RETRIES};
pub use states::{Audience, NotificationIntent, Transition, TransitionOutcome};
