use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default wait budget for an operation deferred behind the readiness gate.
pub const DEFAULT_OP_TIMEOUT: Duration = Duration::from_millis(30_000);

/// Opaque identifier assigned to an operation at submission time.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OperationId(pub u64);

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "op-{}", self.0)
    }
}

/// Whether an operation reads backend state or mutates it.
///
/// Reads may be retried and degraded; mutations are replayed through the
/// offline queue instead and never silently degraded.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum OpKind {
    /// Idempotent read; safe to retry and to substitute a degraded result.
    Read,
    /// State-changing call; must commit remotely before reporting success.
    Mutation,
}

impl OpKind {
    /// Stable lowercase label used in log fields.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Mutation => "mutation",
        }
    }
}

/// Role discriminator carried by an authenticated session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProfileKind {
    /// Applicant-side account.
    Student,
    /// Institution/admissions-office account.
    Institution,
    /// School counselor account.
    Counselor,
    /// Parent/guardian account.
    Parent,
    /// Recommender account.
    Recommender,
}

impl ProfileKind {
    /// Stable lowercase label used in signatures and log fields.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Student => "student",
            Self::Institution => "institution",
            Self::Counselor => "counselor",
            Self::Parent => "parent",
            Self::Recommender => "recommender",
        }
    }
}

impl std::str::FromStr for ProfileKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "student" => Ok(Self::Student),
            "institution" => Ok(Self::Institution),
            "counselor" => Ok(Self::Counselor),
            "parent" => Ok(Self::Parent),
            "recommender" => Ok(Self::Recommender),
            other => Err(format!("unknown profile kind '{other}'")),
        }
    }
}

/// Current identity state published to frontend subscribers.
///
/// The same logical state can be derived independently by a restored local
/// session and by a backend auth listener; the broadcaster collapses the
/// duplicates via [`session_signature`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionState {
    /// Whether a subject is currently authenticated.
    pub authenticated: bool,
    /// Stable subject identifier when authenticated.
    pub subject_id: Option<String>,
    /// Role discriminator for the authenticated profile.
    pub profile_kind: Option<ProfileKind>,
}

impl SessionState {
    /// State representing "no one signed in".
    pub fn signed_out() -> Self {
        Self {
            authenticated: false,
            subject_id: None,
            profile_kind: None,
        }
    }

    /// State representing an authenticated subject.
    pub fn signed_in(subject_id: impl Into<String>, profile_kind: ProfileKind) -> Self {
        Self {
            authenticated: true,
            subject_id: Some(subject_id.into()),
            profile_kind: Some(profile_kind),
        }
    }
}

/// Default signature projection over the salient identity fields.
///
/// Two states with equal signatures are treated as the same logical state
/// and the second emission is suppressed.
pub fn session_signature(state: &SessionState) -> String {
    format!(
        "{}|{}|{}",
        state.authenticated,
        state.subject_id.as_deref().unwrap_or("-"),
        state.profile_kind.map(ProfileKind::as_str).unwrap_or("-"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_projects_salient_fields() {
        let alice = SessionState::signed_in("u-alice", ProfileKind::Student);
        assert_eq!(session_signature(&alice), "true|u-alice|student");
        assert_eq!(session_signature(&SessionState::signed_out()), "false|-|-");
    }

    #[test]
    fn signature_distinguishes_subjects_and_roles() {
        let a = SessionState::signed_in("u1", ProfileKind::Counselor);
        let b = SessionState::signed_in("u2", ProfileKind::Counselor);
        let c = SessionState::signed_in("u1", ProfileKind::Parent);
        assert_ne!(session_signature(&a), session_signature(&b));
        assert_ne!(session_signature(&a), session_signature(&c));
    }

    #[test]
    fn profile_kind_round_trips_through_labels() {
        for kind in [
            ProfileKind::Student,
            ProfileKind::Institution,
            ProfileKind::Counselor,
            ProfileKind::Parent,
            ProfileKind::Recommender,
        ] {
            let parsed: ProfileKind = kind.as_str().parse().expect("label should parse");
            assert_eq!(parsed, kind);
        }
        assert!("registrar".parse::<ProfileKind>().is_err());
    }

    #[test]
    fn profile_kind_serializes_snake_case() {
        let raw = serde_json::to_string(&ProfileKind::Recommender).expect("serialize should work");
        assert_eq!(raw, "\"recommender\"");
    }
}
