//! Commands accepted by the session engine.

use sketchrelay_core::command::Command;
use uuid::Uuid;

use crate::domain::pin::Pin;
use crate::domain::task::{Content, TaskType};

/// Command to open a lobby under a PIN chosen by the caller.
#[derive(Debug, Clone)]
pub struct HostGame {
    /// The correlation ID for tracing.
    pub correlation_id: Uuid,
    /// The session key to claim.
    pub pin: Pin,
    /// The hosting player.
    pub player_name: String,
}

impl Command for HostGame {
    fn command_type(&self) -> &'static str {
        "session.host_game"
    }

    fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }

    fn session_key(&self) -> Option<&str> {
        Some(self.pin.as_str())
    }
}

/// Command to open a lobby under a freshly drawn PIN.
#[derive(Debug, Clone)]
pub struct HostNewGame {
    /// The correlation ID for tracing.
    pub correlation_id: Uuid,
    /// The hosting player.
    pub player_name: String,
}

impl Command for HostNewGame {
    fn command_type(&self) -> &'static str {
        "session.host_new_game"
    }

    fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }

    fn session_key(&self) -> Option<&str> {
        None
    }
}

/// Command to take a seat in a lobby.
#[derive(Debug, Clone)]
pub struct JoinGame {
    /// The correlation ID for tracing.
    pub correlation_id: Uuid,
    /// The session to join.
    pub pin: Pin,
    /// The joining player.
    pub player_name: String,
}

impl Command for JoinGame {
    fn command_type(&self) -> &'static str {
        "session.join_game"
    }

    fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }

    fn session_key(&self) -> Option<&str> {
        Some(self.pin.as_str())
    }
}

/// Command to fix the relay order and start playing.
#[derive(Debug, Clone)]
pub struct StartGame {
    /// The correlation ID for tracing.
    pub correlation_id: Uuid,
    /// The session to start.
    pub pin: Pin,
    /// Must be the host.
    pub requester: String,
}

impl Command for StartGame {
    fn command_type(&self) -> &'static str {
        "session.start_game"
    }

    fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }

    fn session_key(&self) -> Option<&str> {
        Some(self.pin.as_str())
    }
}

/// Command to call the game off.
#[derive(Debug, Clone)]
pub struct CancelGame {
    /// The correlation ID for tracing.
    pub correlation_id: Uuid,
    /// The session to cancel.
    pub pin: Pin,
    /// Must be the host.
    pub requester: String,
}

impl Command for CancelGame {
    fn command_type(&self) -> &'static str {
        "session.cancel_game"
    }

    fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }

    fn session_key(&self) -> Option<&str> {
        Some(self.pin.as_str())
    }
}

/// Command to leave a session voluntarily.
#[derive(Debug, Clone)]
pub struct LeaveGame {
    /// The correlation ID for tracing.
    pub correlation_id: Uuid,
    /// The session to leave.
    pub pin: Pin,
    /// The leaving player.
    pub player_name: String,
}

impl Command for LeaveGame {
    fn command_type(&self) -> &'static str {
        "session.leave_game"
    }

    fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }

    fn session_key(&self) -> Option<&str> {
        Some(self.pin.as_str())
    }
}

/// Command to answer the player's current task.
#[derive(Debug, Clone)]
pub struct SubmitTask {
    /// The correlation ID for tracing.
    pub correlation_id: Uuid,
    /// The session played in.
    pub pin: Pin,
    /// The submitting player.
    pub player_name: String,
    /// The chain the content extends.
    pub root_player: String,
    /// The task being answered.
    pub task_type: TaskType,
    /// The sentence or drawing.
    pub content: Content,
}

impl Command for SubmitTask {
    fn command_type(&self) -> &'static str {
        "session.submit_task"
    }

    fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }

    fn session_key(&self) -> Option<&str> {
        Some(self.pin.as_str())
    }
}

/// Command to evict a player whose inactivity exceeded the timeout. The
/// staleness is re-checked against the stored document.
#[derive(Debug, Clone)]
pub struct EvictInactivePlayer {
    /// The correlation ID for tracing.
    pub correlation_id: Uuid,
    /// The session swept.
    pub pin: Pin,
    /// The suspected player.
    pub player_name: String,
}

impl Command for EvictInactivePlayer {
    fn command_type(&self) -> &'static str {
        "session.evict_inactive_player"
    }

    fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }

    fn session_key(&self) -> Option<&str> {
        Some(self.pin.as_str())
    }
}

/// Command to delete a session document.
#[derive(Debug, Clone)]
pub struct DeleteSession {
    /// The correlation ID for tracing.
    pub correlation_id: Uuid,
    /// The session to delete.
    pub pin: Pin,
}

impl Command for DeleteSession {
    fn command_type(&self) -> &'static str {
        "session.delete_session"
    }

    fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }

    fn session_key(&self) -> Option<&str> {
        Some(self.pin.as_str())
    }
}
