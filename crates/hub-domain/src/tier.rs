use serde::{Deserialize, Serialize};

use crate::error::DomainError;

// ── Billing ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BillingStatus {
    #[default]
    Active,
    PastDue,
    Cancelled,
}

impl BillingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillingStatus::Active => "active",
            BillingStatus::PastDue => "past_due",
            BillingStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Result<Self, DomainError> {
        match s {
            "active" => Ok(BillingStatus::Active),
            "past_due" => Ok(BillingStatus::PastDue),
            "cancelled" => Ok(BillingStatus::Cancelled),
            other => Err(DomainError::InvalidTier(other.to_string())),
        }
    }
}

impl std::fmt::Display for BillingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ── Feature tier ──────────────────────────────────────────────────────────────

/// The communication features an instance is entitled to. Each tier is a
/// strict superset of the one before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FeatureTier {
    #[default]
    Chat,
    Audio,
    Video,
}

impl FeatureTier {
    pub fn audio_enabled(&self) -> bool {
        matches!(self, FeatureTier::Audio | FeatureTier::Video)
    }

    pub fn video_enabled(&self) -> bool {
        matches!(self, FeatureTier::Video)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FeatureTier::Chat => "chat",
            FeatureTier::Audio => "audio",
            FeatureTier::Video => "video",
        }
    }

    pub fn parse(s: &str) -> Result<Self, DomainError> {
        match s {
            "chat" => Ok(FeatureTier::Chat),
            "audio" => Ok(FeatureTier::Audio),
            "video" => Ok(FeatureTier::Video),
            other => Err(DomainError::InvalidTier(other.to_string())),
        }
    }
}

impl std::fmt::Display for FeatureTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ── User-count tier ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum UserCountTier {
    #[default]
    #[serde(rename = "10")]
    Ten,
    #[serde(rename = "50")]
    Fifty,
    #[serde(rename = "100")]
    Hundred,
    #[serde(rename = "500")]
    FiveHundred,
}

impl UserCountTier {
    pub fn max_users(&self) -> u32 {
        match self {
            UserCountTier::Ten => 10,
            UserCountTier::Fifty => 50,
            UserCountTier::Hundred => 100,
            UserCountTier::FiveHundred => 500,
        }
    }

    pub fn from_max_users(n: u32) -> Result<Self, DomainError> {
        match n {
            10 => Ok(UserCountTier::Ten),
            50 => Ok(UserCountTier::Fifty),
            100 => Ok(UserCountTier::Hundred),
            500 => Ok(UserCountTier::FiveHundred),
            other => Err(DomainError::InvalidTier(other.to_string())),
        }
    }
}

impl std::fmt::Display for UserCountTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.max_users())
    }
}

// ── Resource limits ───────────────────────────────────────────────────────────

/// Container resource limits derived from a tier profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLimits {
    pub max_memory_mb: u64,
    pub max_cpu_percent: u32,
    pub max_upload_mb: u64,
}

impl ResourceLimits {
    /// Engine memory limit in bytes.
    pub fn memory_bytes(&self) -> i64 {
        (self.max_memory_mb as i64) << 20
    }

    /// Engine CPU quota in microseconds per 100ms period.
    pub fn cpu_quota(&self) -> i64 {
        (self.max_cpu_percent as i64) * 1_000
    }

    /// The engine CPU period the quota is relative to.
    pub fn cpu_period(&self) -> i64 {
        100_000
    }
}

// ── Tier profile ──────────────────────────────────────────────────────────────

/// The `(feature_tier, user_count_tier, hd_upgrade)` triple that drives
/// resource limits and feature flags for one instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct TierProfile {
    pub feature_tier: FeatureTier,
    pub user_count_tier: UserCountTier,
    pub hd_upgrade: bool,
}

impl TierProfile {
    pub fn new(feature_tier: FeatureTier, user_count_tier: UserCountTier, hd_upgrade: bool) -> Self {
        Self { feature_tier, user_count_tier, hd_upgrade }
    }

    pub fn resource_limits(&self) -> ResourceLimits {
        let base_memory: u64 = match self.user_count_tier {
            UserCountTier::Ten => 512,
            UserCountTier::Fifty => 1024,
            UserCountTier::Hundred => 2048,
            UserCountTier::FiveHundred => 4096,
        };
        // Media processing needs headroom beyond the chat baseline.
        let memory = match self.feature_tier {
            FeatureTier::Chat => base_memory,
            FeatureTier::Audio => base_memory + 512,
            FeatureTier::Video => base_memory + 1024,
        };
        let cpu = match self.user_count_tier {
            UserCountTier::Ten => 100,
            UserCountTier::Fifty => 200,
            UserCountTier::Hundred => 400,
            UserCountTier::FiveHundred => 800,
        };
        let upload = match self.feature_tier {
            FeatureTier::Chat => 25,
            FeatureTier::Audio => 100,
            FeatureTier::Video => {
                if self.hd_upgrade {
                    1024
                } else {
                    500
                }
            }
        };
        ResourceLimits { max_memory_mb: memory, max_cpu_percent: cpu, max_upload_mb: upload }
    }

    /// Feature-gating flags rendered into the instance config document.
    pub fn feature_flags(&self) -> serde_json::Value {
        serde_json::json!({
            "audioEnabled": self.feature_tier.audio_enabled(),
            "videoEnabled": self.feature_tier.video_enabled(),
            "hdStreams": self.feature_tier.video_enabled() && self.hd_upgrade,
            "maxUsers": self.user_count_tier.max_users(),
            "maxUploadMb": self.resource_limits().max_upload_mb,
        })
    }
}
