pub mod channel;
pub mod coordinator;
pub mod types;

pub use channel::ApprovalChannel;
pub use coordinator::{ApprovalCoordinator, ApprovalTicket, RegistrationError};
pub use types::{ApprovalVerdict, PendingApproval, Resolution};
