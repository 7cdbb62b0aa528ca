use serde::Serialize;
use uuid::Uuid;

// Sessions only move forward. The three terminal phases are absorbing:
// a finished upload cannot be revived, re-failed, or fed more bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionPhase {
    Connecting,
    Handshaking,
    Active,
    Completed,
    Failed,
    Aborted,
}

impl SessionPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionPhase::Completed | SessionPhase::Failed | SessionPhase::Aborted
        )
    }
}

// One session tracks one upload attempt over the realtime channel.
// Owned by the connection task, so no interior locking is needed.
#[derive(Debug)]
pub struct TransferSession {
    id: String,
    phase: SessionPhase,
    identity: Option<String>,
    bytes: u64,
}

impl TransferSession {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4().simple().to_string(),
            phase: SessionPhase::Connecting,
            identity: None,
            bytes: 0,
        }
    }

    //-- Accessors

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    /// Identity of the stored file, set once the session completes.
    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }

    //-- Transitions
    // Each returns false when the move is not legal from the current phase.

    /// Connecting -> Handshaking: a begin frame arrived and is being validated.
    pub fn begin_handshake(&mut self) -> bool {
        if self.phase != SessionPhase::Connecting {
            return false;
        }
        self.phase = SessionPhase::Handshaking;
        true
    }

    /// Handshaking -> Active: validation passed, bytes may flow.
    pub fn activate(&mut self) -> bool {
        if self.phase != SessionPhase::Handshaking {
            return false;
        }
        tracing::debug!(session = %self.id, "upload session active");
        self.phase = SessionPhase::Active;
        true
    }

    /// Count transferred bytes. Only counts while active.
    pub fn add_bytes(&mut self, n: u64) -> bool {
        if self.phase != SessionPhase::Active {
            return false;
        }
        self.bytes += n;
        true
    }

    /// Active -> Completed. Records the identity of the durably stored file;
    /// a session never completes before the file exists on disk.
    pub fn complete(&mut self, identity: String) -> bool {
        if self.phase != SessionPhase::Active {
            return false;
        }
        tracing::info!(session = %self.id, %identity, bytes = self.bytes, "upload session completed");
        self.identity = Some(identity);
        self.phase = SessionPhase::Completed;
        true
    }

    /// Any live phase -> Failed.
    pub fn fail(&mut self) -> bool {
        if self.phase.is_terminal() {
            return false;
        }
        tracing::debug!(session = %self.id, from = ?self.phase, "upload session failed");
        self.phase = SessionPhase::Failed;
        true
    }

    /// Any live phase -> Aborted (the client went away mid-transfer).
    pub fn abort(&mut self) -> bool {
        if self.phase.is_terminal() {
            return false;
        }
        tracing::debug!(session = %self.id, bytes = self.bytes, "upload session aborted");
        self.phase = SessionPhase::Aborted;
        true
    }
}

impl Default for TransferSession {
    fn default() -> Self {
        Self::new()
    }
}
