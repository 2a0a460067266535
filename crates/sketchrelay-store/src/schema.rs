//! Database names shared with the migrations under `migrations/`.

/// `NOTIFY` channel carrying the key of every changed session.
pub const CHANGE_CHANNEL: &str = "sketchrelay_session_changes";
