//! Session status and snapshot types.
//!
//! These are the values a caller sees when asking "what is this session
//! doing?" and the exact shape written to `state.json`.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// SessionStatus
// ---------------------------------------------------------------------------

/// The connection status of a session.
///
/// ```text
///   LoggedOut ──(connect + pair)──→ Connected ⇄ Disconnected
///        ↑                                │
///        └────────────(logout)────────────┘
///
///   Error overlays any of the above after a failed transition.
/// ```
///
/// Status is *derived*: see [`SessionStatus::derive`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// No credentials; the session has to pair before it can send.
    #[default]
    LoggedOut,

    /// Authenticated and live.
    Connected,

    /// Socket up but not authenticated, or authenticated with the socket down.
    Disconnected,

    /// The last lifecycle operation failed. The message lives in
    /// [`SessionSnapshot::connection_error`].
    Error,
}

impl SessionStatus {
    /// Computes the status from the engine's live flags.
    ///
    /// - logged in → `Connected`
    /// - connected but not logged in → `Disconnected`
    /// - neither → `fallback`, the last explicitly recorded status
    pub fn derive(connected: bool, logged_in: bool, fallback: SessionStatus) -> Self {
        if logged_in {
            Self::Connected
        } else if connected {
            Self::Disconnected
        } else {
            fallback
        }
    }

    /// The snake_case name used on disk.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LoggedOut => "logged_out",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Account
// ---------------------------------------------------------------------------

/// Display metadata the engine learns once a session is authenticated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Account {
    /// The profile name the network shows for this account.
    pub push_name: Option<String>,
    /// The account's own phone number (the user part of its address).
    pub phone_number: Option<String>,
}

// ---------------------------------------------------------------------------
// SessionSnapshot
// ---------------------------------------------------------------------------

/// A point-in-time view of one session.
///
/// Returned by `Session::state()` and persisted verbatim as
/// `<root>/<id>/state.json`. Empty `phone_number` and `connection_error`
/// are left out of the file; missing fields default on load so older files
/// keep loading.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub id: String,
    #[serde(default)]
    pub status: SessionStatus,
    pub last_activity: DateTime<Utc>,
    #[serde(default)]
    pub connected: bool,
    #[serde(default)]
    pub logged_in: bool,
    #[serde(default)]
    pub push_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub phone_number: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub connection_error: String,
}

impl SessionSnapshot {
    /// Whether a restart should try to bring this session back online.
    pub fn was_online(&self) -> bool {
        self.status == SessionStatus::Connected || self.connected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> SessionSnapshot {
        SessionSnapshot {
            id: "work".into(),
            status: SessionStatus::Disconnected,
            last_activity: DateTime::parse_from_rfc3339("2024-05-01T10:00:00Z")
                .unwrap()
                .with_timezone(&Utc),
            connected: true,
            logged_in: false,
            push_name: String::new(),
            phone_number: String::new(),
            connection_error: String::new(),
        }
    }

    #[test]
    fn test_derive_logged_in_wins_over_everything() {
        for fallback in [SessionStatus::Error, SessionStatus::LoggedOut] {
            assert_eq!(
                SessionStatus::derive(false, true, fallback),
                SessionStatus::Connected
            );
        }
    }

    #[test]
    fn test_derive_connected_not_logged_in_is_disconnected() {
        assert_eq!(
            SessionStatus::derive(true, false, SessionStatus::Error),
            SessionStatus::Disconnected
        );
    }

    #[test]
    fn test_derive_offline_uses_fallback() {
        assert_eq!(
            SessionStatus::derive(false, false, SessionStatus::Error),
            SessionStatus::Error
        );
        assert_eq!(
            SessionStatus::derive(false, false, SessionStatus::LoggedOut),
            SessionStatus::LoggedOut
        );
    }

    #[test]
    fn test_status_display_matches_serde_name() {
        let json = serde_json::to_string(&SessionStatus::LoggedOut).unwrap();
        assert_eq!(json, format!("\"{}\"", SessionStatus::LoggedOut));
    }

    #[test]
    fn test_snapshot_omits_empty_phone_and_error() {
        let json = serde_json::to_value(snapshot()).unwrap();
        let obj = json.as_object().unwrap();
        assert!(!obj.contains_key("phone_number"));
        assert!(!obj.contains_key("connection_error"));
        assert_eq!(obj["status"], "disconnected");
        assert_eq!(obj["push_name"], "");
    }

    #[test]
    fn test_snapshot_keeps_connection_error_when_set() {
        let mut snap = snapshot();
        snap.connection_error = "dial tcp: refused".into();
        let json = serde_json::to_value(&snap).unwrap();
        assert_eq!(json["connection_error"], "dial tcp: refused");
    }

    #[test]
    fn test_snapshot_loads_minimal_file() {
        let snap: SessionSnapshot = serde_json::from_str(
            r#"{"id":"home","last_activity":"2024-05-01T10:00:00Z"}"#,
        )
        .unwrap();
        assert_eq!(snap.status, SessionStatus::LoggedOut);
        assert!(!snap.was_online());
    }

    #[test]
    fn test_was_online_from_status_or_flag() {
        let mut snap = snapshot();
        assert!(snap.was_online(), "connected flag alone counts");
        snap.connected = false;
        snap.status = SessionStatus::Connected;
        assert!(snap.was_online());
        snap.status = SessionStatus::Error;
        assert!(!snap.was_online());
    }
}
