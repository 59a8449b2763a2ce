use statig::prelude::*;
use tracing::{debug, info};

use crate::platform::UserId;

/// Events observed by a single evidence session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A message from the submitter with the wrong number of attachments
    Rejected { attachments: usize },
    /// The expected attachments were downloaded for a live submission
    Accepted,
    DeadlineElapsed,
    /// A newer form submission from the same user took over
    Superseded,
    /// Submission vanished or the download failed
    Abandoned { reason: String },
}

/// One submitter's bounded window for posting evidence
pub struct EvidenceSession {
    pub user_id: UserId,
    pub required: usize,
    pub rejected: u32,
}

impl EvidenceSession {
    pub fn new(user_id: UserId, required: usize) -> Self {
        Self {
            user_id,
            required,
            rejected: 0,
        }
    }
}

#[state_machine(initial = "State::listening()", state(derive(Debug, Clone, PartialEq, Eq)))]
impl EvidenceSession {
    #[state]
    fn listening(&mut self, event: &SessionEvent) -> Outcome<State> {
        match event {
            SessionEvent::Rejected { attachments } => {
                self.rejected += 1;
                info!(
                    user_id = %self.user_id,
                    attachments = %attachments,
                    required = %self.required,
                    rejected = %self.rejected,
                    "Evidence message rejected, session stays open"
                );
                Handled
            }
            SessionEvent::Accepted => {
                info!(
                    user_id = %self.user_id,
                    rejected = %self.rejected,
                    "Evidence accepted"
                );
                Transition(State::completed())
            }
            SessionEvent::DeadlineElapsed => {
                info!(user_id = %self.user_id, "Evidence window elapsed");
                Transition(State::expired())
            }
            SessionEvent::Superseded => {
                info!(user_id = %self.user_id, "Evidence session superseded by a newer submission");
                Transition(State::superseded())
            }
            SessionEvent::Abandoned { reason } => {
                info!(user_id = %self.user_id, reason = %reason, "Evidence session abandoned");
                Transition(State::abandoned())
            }
        }
    }

    #[state]
    fn completed(&mut self, event: &SessionEvent) -> Outcome<State> {
        debug!(user_id = %self.user_id, ?event, "Ignoring event after completion");
        Handled
    }

    #[state]
    fn expired(&mut self, event: &SessionEvent) -> Outcome<State> {
        debug!(user_id = %self.user_id, ?event, "Ignoring event after expiry");
        Handled
    }

    #[state]
    fn superseded(&mut self, event: &SessionEvent) -> Outcome<State> {
        debug!(user_id = %self.user_id, ?event, "Ignoring event after supersession");
        Handled
    }

    #[state]
    fn abandoned(&mut self, event: &SessionEvent) -> Outcome<State> {
        debug!(user_id = %self.user_id, ?event, "Ignoring event after abandonment");
        Handled
    }
}

/// Whether the session still accepts messages
pub fn is_listening(state: &State) -> bool {
    matches!(state, State::Listening { .. })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejections_keep_the_session_open() {
        let mut sm = EvidenceSession::new(UserId(1), 2).state_machine();
        sm.handle(&SessionEvent::Rejected { attachments: 1 });
        sm.handle(&SessionEvent::Rejected { attachments: 3 });
        assert!(is_listening(sm.state()));
    }

    #[test]
    fn acceptance_is_terminal() {
        let mut sm = EvidenceSession::new(UserId(1), 2).state_machine();
        sm.handle(&SessionEvent::Accepted);
        assert!(matches!(sm.state(), State::Completed { .. }));

        sm.handle(&SessionEvent::DeadlineElapsed);
        assert!(matches!(sm.state(), State::Completed { .. }));
    }

    #[test]
    fn deadline_expires_a_listening_session() {
        let mut sm = EvidenceSession::new(UserId(1), 3).state_machine();
        sm.handle(&SessionEvent::DeadlineElapsed);
        assert!(matches!(sm.state(), State::Expired { .. }));

        sm.handle(&SessionEvent::Accepted);
        assert!(matches!(sm.state(), State::Expired { .. }));
    }

    #[test]
    fn supersession_and_abandonment_end_the_session() {
        let mut sm = EvidenceSession::new(UserId(1), 2).state_machine();
        sm.handle(&SessionEvent::Superseded);
        assert!(matches!(sm.state(), State::Superseded { .. }));

        let mut sm = EvidenceSession::new(UserId(2), 2).state_machine();
        sm.handle(&SessionEvent::Abandoned {
            reason: "download failed".to_string(),
        });
        assert!(matches!(sm.state(), State::Abandoned { .. }));
    }
}
