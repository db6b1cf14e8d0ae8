pub mod coordinator;
pub mod generator;
pub mod race;

pub use coordinator::{CoordinatorResponse, EventCoordinator, Handled, LateReplyStrategy};
pub use generator::{GenerationError, LlmReplyGenerator, ReplyGenerator};
pub use race::{DeadlineRace, PendingReply, RaceOutcome};
