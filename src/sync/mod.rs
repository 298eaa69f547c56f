pub mod merger;
pub mod presence;
pub mod session;
pub mod typing;

pub use merger::MessageMerger;
pub use presence::{PresenceSnapshot, PresenceTracker};
pub use session::{SessionCoordinator, SessionSettings};
pub use typing::TypingController;
