//! Explicit state machine for the join request lifecycle.
//!
//! The design separates:
//! - **State**: the durable `RequestRecord` and its `RequestState`
//! - **Events**: what happened (`Event`)
//! - **Effects**: what to do (`Effect`)
//! - **Transition**: pure function `(Record, Event) -> (Record, Vec<Effect>)`
//!
//! The interpreter executes effects against the channel traits and returns
//! result events; the store persists every changed record before its effects
//! run. `survey`, `approval` and `invitation` are the operations built on top.

pub mod approval;
pub mod effect;
pub mod error;
pub mod event;
pub mod interpreter;
pub mod invitation;
pub mod repository;
pub mod state;
pub mod store;
pub mod survey;
pub mod transition;

pub use approval::{ApprovalCoordinator, DecisionOutcome};
pub use error::LifecycleError;
pub use event::Event;
pub use interpreter::InterpreterContext;
pub use invitation::{InvitationIssuer, IssueOutcome};
pub use repository::{
    InMemoryRepository, RepositoryError, RequestRepository, SqliteRepository, UpdateClaim,
};
pub use state::{
    AdminIdentity, AdminRef, Decision, InviteHandle, RequestId, RequestRecord, RequestState,
    RequesterId, RequesterProfile,
};
pub use store::RequestStore;
pub use survey::{NextQuestion, SurveyEngine};
