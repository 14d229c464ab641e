use std::fmt;

/// Side of the negotiation a session plays
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Creates the offer and the data channel
    Initiator,
    /// Scans the offer and answers it
    Responder,
}

// ========== NEGOTIATION PHASES ==========

/// Idle → NegotiationStarted → LocalDescriptionReady →
///   (Initiator) AwaitingAnswer | (Responder) AnswerReady → Connected → Closed
///
/// `Failed` is terminal and reachable from every non-terminal phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    NegotiationStarted,
    LocalDescriptionReady,
    AwaitingAnswer,
    AnswerReady,
    Connected,
    Closed,
    Failed,
}

impl Phase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Closed | Phase::Failed)
    }

    /// Phases in which a channel-open notification completes the handshake
    pub fn awaits_channel(self) -> bool {
        matches!(self, Phase::AwaitingAnswer | Phase::AnswerReady)
    }

    /// Whether `self → next` is an edge of the state machine
    pub fn can_transition_to(self, next: Phase) -> bool {
        use Phase::*;
        match (self, next) {
            (from, Failed) => !from.is_terminal(),
            (from, Closed) => !from.is_terminal(),
            (Idle, NegotiationStarted) => true,
            (NegotiationStarted, LocalDescriptionReady) => true,
            (LocalDescriptionReady, AwaitingAnswer) => true,
            (LocalDescriptionReady, AnswerReady) => true,
            (AwaitingAnswer, Connected) => true,
            (AnswerReady, Connected) => true,
            _ => false,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_reachable_from_non_terminal_only() {
        for phase in [
            Phase::Idle,
            Phase::NegotiationStarted,
            Phase::LocalDescriptionReady,
            Phase::AwaitingAnswer,
            Phase::AnswerReady,
            Phase::Connected,
        ] {
            assert!(phase.can_transition_to(Phase::Failed), "{phase}");
        }
        assert!(!Phase::Closed.can_transition_to(Phase::Failed));
        assert!(!Phase::Failed.can_transition_to(Phase::Closed));
    }

    #[test]
    fn no_shortcuts_to_connected() {
        assert!(!Phase::Idle.can_transition_to(Phase::Connected));
        assert!(!Phase::NegotiationStarted.can_transition_to(Phase::Connected));
        assert!(!Phase::LocalDescriptionReady.can_transition_to(Phase::Connected));
        assert!(Phase::AwaitingAnswer.can_transition_to(Phase::Connected));
        assert!(Phase::AnswerReady.can_transition_to(Phase::Connected));
    }
}
