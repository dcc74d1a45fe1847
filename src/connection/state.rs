//! Session state machine

use crate::{Error, Result};

/// Session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Transport open, greeting not yet read
    Initial,

    /// SSL request sent, TLS handshake in progress
    NegotiatingTls,

    /// Handshake response (or COM_CHANGE_USER) sent, plugin exchange running
    Authenticating,

    /// Idle (ready for a command)
    Idle,

    /// Command written, awaiting the first response packet
    CommandInProgress,

    /// Reading result set rows
    ReadingResults,

    /// Closed
    Closed,
}

impl ConnectionState {
    /// Check if transition is valid
    pub fn can_transition_to(&self, next: ConnectionState) -> bool {
        use ConnectionState::*;

        matches!(
            (self, next),
            (Initial, NegotiatingTls)
                | (Initial, Authenticating)
                | (NegotiatingTls, Authenticating)
                | (Authenticating, Idle)
                | (Idle, Authenticating)
                | (Idle, CommandInProgress)
                | (CommandInProgress, ReadingResults)
                | (CommandInProgress, Idle)
                | (ReadingResults, CommandInProgress)
                | (ReadingResults, Idle)
                | (_, Closed)
        )
    }

    /// Transition to new state
    pub fn transition(&mut self, next: ConnectionState) -> Result<()> {
        if !self.can_transition_to(next) {
            return Err(Error::InvalidState {
                expected: format!("valid transition from {:?}", self),
                actual: format!("{:?}", next),
            });
        }
        *self = next;
        Ok(())
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Initial => write!(f, "initial"),
            Self::NegotiatingTls => write!(f, "negotiating_tls"),
            Self::Authenticating => write!(f, "authenticating"),
            Self::Idle => write!(f, "idle"),
            Self::CommandInProgress => write!(f, "command_in_progress"),
            Self::ReadingResults => write!(f, "reading_results"),
            Self::Closed => write!(f, "closed"),
        }
    }
}
