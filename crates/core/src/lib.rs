pub mod audit;
pub mod config;
pub mod domain;
pub mod errors;
pub mod identity;
pub mod ledger;
pub mod lifecycle;
pub mod notify;
pub mod store;

pub use audit::{AuditAction, AuditEntry};
pub use domain::content::{DeferralContent, Department};
pub use domain::deferral::{
    Deferral, DeferralCode, DeferralCodeGenerator, DeferralId, DeferralStatus, RandomCodeGenerator,
};
pub use domain::signature::{RequiredSignatures, Signature, SignatureRole, SignatureSet};
pub use domain::user::{Identity, UserId, UserRole};
pub use errors::{ApplicationError, InterfaceError};
pub use identity::{IdentityDirectory, InMemoryIdentityDirectory};
pub use ledger::{SignatureError, SignatureOutcome};
pub use lifecycle::{LifecycleError, LifecycleService, SignReceipt, SignRequest, Transition};
pub use notify::{InMemoryNotifier, Notification, NotificationKind, Notifier, NotifyError};
pub use store::{DeferralFilter, DeferralStore, InMemoryDeferralStore, StoreError};
