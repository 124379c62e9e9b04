use serde::{Deserialize, Serialize};

use crate::error::DomainError;

// ── Identifiers ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstanceId(pub i64);

impl InstanceId {
    pub fn new(id: i64) -> Self {
        InstanceId(id)
    }

    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for InstanceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OwnerId(pub i64);

impl OwnerId {
    pub fn new(id: i64) -> Self {
        OwnerId(id)
    }

    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for OwnerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Lifecycle state machine ───────────────────────────────────────────────────

/// The lifecycle state of a managed instance.
///
/// Transitions:
///   Pending → Provisioning → Running
///   Provisioning → Failed
///   Running ↔ Suspended
///   any non-terminal → Destroying → Destroyed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    /// Created but not yet enqueued for provisioning.
    #[default]
    Pending,
    /// Queued or in-flight in the provisioning pipeline.
    Provisioning,
    /// All provisioning steps completed and verified.
    Running,
    /// Workload stopped by an operator or billing event; resources retained.
    Suspended,
    /// Provisioning hit a terminal failure; the event log explains where.
    Failed,
    /// Queued or in-flight in the destruction pipeline.
    Destroying,
    /// Destruction finalized; row retained soft-deleted for audit.
    Destroyed,
}

impl InstanceStatus {
    /// Terminal states never re-enter a pipeline without an explicit enqueue.
    pub fn is_terminal(&self) -> bool {
        matches!(self, InstanceStatus::Destroyed)
    }

    /// States the work queue scans for.
    pub fn is_queued(&self) -> bool {
        matches!(self, InstanceStatus::Provisioning | InstanceStatus::Destroying)
    }

    /// Counts toward the owner's tier limit.
    pub fn is_live(&self) -> bool {
        !matches!(self, InstanceStatus::Destroying | InstanceStatus::Destroyed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceStatus::Pending => "pending",
            InstanceStatus::Provisioning => "provisioning",
            InstanceStatus::Running => "running",
            InstanceStatus::Suspended => "suspended",
            InstanceStatus::Failed => "failed",
            InstanceStatus::Destroying => "destroying",
            InstanceStatus::Destroyed => "destroyed",
        }
    }

    pub fn parse(s: &str) -> Result<Self, DomainError> {
        match s {
            "pending" => Ok(InstanceStatus::Pending),
            "provisioning" => Ok(InstanceStatus::Provisioning),
            "running" => Ok(InstanceStatus::Running),
            "suspended" => Ok(InstanceStatus::Suspended),
            "failed" => Ok(InstanceStatus::Failed),
            "destroying" => Ok(InstanceStatus::Destroying),
            "destroyed" => Ok(InstanceStatus::Destroyed),
            other => Err(DomainError::InvalidStatus(other.to_string())),
        }
    }
}

impl std::fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ── Provisioning event vocabulary ─────────────────────────────────────────────

/// Which half of a step an event row records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventPhase {
    Execute,
    Verify,
}

impl EventPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventPhase::Execute => "execute",
            EventPhase::Verify => "verify",
        }
    }

    pub fn parse(s: &str) -> Result<Self, DomainError> {
        match s {
            "execute" => Ok(EventPhase::Execute),
            "verify" => Ok(EventPhase::Verify),
            other => Err(DomainError::InvalidStatus(other.to_string())),
        }
    }
}

impl std::fmt::Display for EventPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    InProgress,
    Completed,
    Failed,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::InProgress => "in_progress",
            EventStatus::Completed => "completed",
            EventStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Result<Self, DomainError> {
        match s {
            "in_progress" => Ok(EventStatus::InProgress),
            "completed" => Ok(EventStatus::Completed),
            "failed" => Ok(EventStatus::Failed),
            other => Err(DomainError::InvalidStatus(other.to_string())),
        }
    }
}

impl std::fmt::Display for EventStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ── Subdomain validation ──────────────────────────────────────────────────────

/// Validate the tenant-chosen subdomain label.
///
/// One DNS label: 1–63 chars, lowercase ASCII alphanumerics and hyphens,
/// no leading/trailing hyphen. Uniqueness among non-deleted instances is a
/// store predicate, not checked here.
pub fn validate_subdomain(s: &str) -> Result<(), DomainError> {
    if s.is_empty() || s.len() > 63 {
        return Err(DomainError::InvalidSubdomain(s.to_string()));
    }
    if s.starts_with('-') || s.ends_with('-') {
        return Err(DomainError::InvalidSubdomain(s.to_string()));
    }
    if !s.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-') {
        return Err(DomainError::InvalidSubdomain(s.to_string()));
    }
    Ok(())
}
