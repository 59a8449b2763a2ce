//! Time-bounded collection of image evidence posted after a form submission

pub mod collector;
pub mod session;

pub use collector::{
    Evidence, EvidenceCollector, EvidenceOutcome, EvidenceRequest, EvidenceSettings, MessageBus,
    PendingEvidence, DOWNLOAD_FAILED_NOTICE,
};
pub use session::{EvidenceSession, SessionEvent};
