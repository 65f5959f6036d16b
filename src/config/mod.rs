pub mod source;

pub use source::{ConfigSource, SharedConfig};

use crate::core::{EnforceError, EntityClass, OwnerId, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Upper bound for every per-class duration (30 days). Keeps timestamp arithmetic in range.
pub const MAX_DURATION_SECS: i64 = 30 * 24 * 60 * 60;

/// Scoring policy for one class of tracked entity (grids or players)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClassPolicy {
    /// CPU milliseconds per frame that count as a lag score of 1.0
    pub budget_ms: f64,

    /// Span of history kept per entity
    pub tracking_window_secs: i64,

    /// Minimum time an entity stays pinned after its last breach
    pub pin_duration_secs: i64,

    /// Time after first appearance during which the entity always scores 0
    pub grace_period_secs: i64,

    /// Z-score above which a point's contribution is capped at 1.0.
    /// `None` disables outlier suppression. A lone spike among `n` points
    /// scores at most `sqrt(n - 1)`, so short windows need a fence below 2.
    pub outlier_fence: Option<f64>,

    /// Normalized score at which the owner starts receiving warnings
    pub warning_threshold: f64,
}

impl ClassPolicy {
    pub fn new(budget_ms: f64) -> Self {
        Self {
            budget_ms,
            ..Self::default()
        }
    }

    pub fn tracking_window(mut self, secs: i64) -> Self {
        self.tracking_window_secs = secs;
        self
    }

    pub fn pin_duration(mut self, secs: i64) -> Self {
        self.pin_duration_secs = secs;
        self
    }

    pub fn grace_period(mut self, secs: i64) -> Self {
        self.grace_period_secs = secs;
        self
    }

    pub fn outlier_fence(mut self, fence: Option<f64>) -> Self {
        self.outlier_fence = fence;
        self
    }

    pub fn warning_threshold(mut self, threshold: f64) -> Self {
        self.warning_threshold = threshold;
        self
    }

    pub fn tracking_window_duration(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.tracking_window_secs)
    }

    pub fn pin_duration_duration(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.pin_duration_secs)
    }

    pub fn grace_period_duration(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.grace_period_secs)
    }

    /// History an entity needs before its score may pin it.
    pub fn required_history(&self) -> chrono::Duration {
        let required = self.tracking_window_secs - 5;
        chrono::Duration::seconds(required.max(0))
    }

    pub fn validate(&self, class: EntityClass) -> Result<()> {
        if !self.budget_ms.is_finite() || self.budget_ms <= 0.0 {
            return Err(EnforceError::InvalidConfig(format!(
                "{} budget_ms must be a positive number",
                class
            )));
        }
        if self.tracking_window_secs <= 0 {
            return Err(EnforceError::InvalidConfig(format!(
                "{} tracking_window_secs must be > 0",
                class
            )));
        }
        if self.pin_duration_secs < 0 || self.grace_period_secs < 0 {
            return Err(EnforceError::InvalidConfig(format!(
                "{} pin and grace durations cannot be negative",
                class
            )));
        }
        for (name, secs) in [
            ("tracking_window_secs", self.tracking_window_secs),
            ("pin_duration_secs", self.pin_duration_secs),
            ("grace_period_secs", self.grace_period_secs),
        ] {
            if secs > MAX_DURATION_SECS {
                return Err(EnforceError::InvalidConfig(format!(
                    "{} {} must be at most {}",
                    class, name, MAX_DURATION_SECS
                )));
            }
        }
        if let Some(fence) = self.outlier_fence {
            if !fence.is_finite() || fence <= 0.0 {
                return Err(EnforceError::InvalidConfig(format!(
                    "{} outlier_fence must be a positive number",
                    class
                )));
            }
        }
        if !self.warning_threshold.is_finite() || self.warning_threshold < 0.0 {
            return Err(EnforceError::InvalidConfig(format!(
                "{} warning_threshold cannot be negative",
                class
            )));
        }
        Ok(())
    }
}

impl Default for ClassPolicy {
    fn default() -> Self {
        Self {
            budget_ms: 0.5,
            tracking_window_secs: 300,
            pin_duration_secs: 600,
            grace_period_secs: 120,
            outlier_fence: Some(1.5),
            warning_threshold: 0.7,
        }
    }
}

/// What happens to the parts of a pinned grid.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum PunishmentMode {
    #[default]
    None,
    /// Pinned grids are exposed to everyone through world markers
    Broadcast,
    Disable,
    Damage,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PunishmentPolicy {
    pub mode: PunishmentMode,

    /// Fraction of a part's max integrity removed per interval in damage mode
    pub damage_normal: f64,

    /// Damage never takes a part below this fraction of its max integrity
    pub min_integrity_normal: f64,

    /// Upper bound on parts touched per host dispatch
    pub max_parts_per_slice: usize,
}

impl Default for PunishmentPolicy {
    fn default() -> Self {
        Self {
            mode: PunishmentMode::None,
            damage_normal: 0.05,
            min_integrity_normal: 0.5,
            max_parts_per_slice: 100,
        }
    }
}

/// A part type that must never be punished. A `subtype` of `*` matches every subtype.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PartTypeRule {
    pub type_id: String,
    pub subtype: String,
}

impl PartTypeRule {
    pub fn exact(type_id: &str, subtype: &str) -> Self {
        Self {
            type_id: type_id.to_string(),
            subtype: subtype.to_string(),
        }
    }

    pub fn any_subtype(type_id: &str) -> Self {
        Self::exact(type_id, "*")
    }
}

/// Chat templates. Placeholders: `{owner}`, `{entity}`, `{score}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MessageTemplates {
    pub punishment_started: String,
    pub deleted_while_flagged: String,
}

impl Default for MessageTemplates {
    fn default() -> Self {
        Self {
            punishment_started: "{owner}'s grid \"{entity}\" is over the server budget ({score}) and has been flagged".to_string(),
            deleted_while_flagged: "{owner} deleted grid \"{entity}\" while it was flagged ({score})".to_string(),
        }
    }
}

impl MessageTemplates {
    pub fn render(template: &str, owner: &str, entity: &str, score: f64) -> String {
        template
            .replace("{owner}", owner)
            .replace("{entity}", entity)
            .replace("{score}", &format!("{:.0}%", score * 100.0))
    }
}

/// Complete, read-only enforcement configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EnforcementConfig {
    pub enabled: bool,

    /// Length of one profiling window
    pub profile_window_ms: u64,

    /// Idle time after an iteration's derivations complete
    pub iteration_pause_ms: u64,

    pub grids: ClassPolicy,
    pub players: ClassPolicy,

    pub exempt_owners: Vec<OwnerId>,
    pub exempt_groups: Vec<String>,
    pub exempt_parts: Vec<PartTypeRule>,

    pub punishment: PunishmentPolicy,
    pub messages: MessageTemplates,
}

impl Default for EnforcementConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            profile_window_ms: 5_000,
            iteration_pause_ms: 0,
            grids: ClassPolicy::default(),
            players: ClassPolicy::new(1.0),
            exempt_owners: Vec::new(),
            exempt_groups: Vec::new(),
            exempt_parts: Vec::new(),
            punishment: PunishmentPolicy::default(),
            messages: MessageTemplates::default(),
        }
    }
}

impl EnforcementConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn profile_window(mut self, window: Duration) -> Self {
        self.profile_window_ms = window.as_millis() as u64;
        self
    }

    pub fn iteration_pause(mut self, pause: Duration) -> Self {
        self.iteration_pause_ms = pause.as_millis() as u64;
        self
    }

    pub fn grids(mut self, policy: ClassPolicy) -> Self {
        self.grids = policy;
        self
    }

    pub fn players(mut self, policy: ClassPolicy) -> Self {
        self.players = policy;
        self
    }

    pub fn punishment_mode(mut self, mode: PunishmentMode) -> Self {
        self.punishment.mode = mode;
        self
    }

    pub fn exempt_owner(mut self, owner: OwnerId) -> Self {
        self.exempt_owners.push(owner);
        self
    }

    pub fn exempt_group(mut self, tag: &str) -> Self {
        self.exempt_groups.push(tag.to_string());
        self
    }

    pub fn exempt_part(mut self, rule: PartTypeRule) -> Self {
        self.exempt_parts.push(rule);
        self
    }

    pub fn profile_window_duration(&self) -> Duration {
        Duration::from_millis(self.profile_window_ms)
    }

    pub fn iteration_pause_duration(&self) -> Duration {
        Duration::from_millis(self.iteration_pause_ms)
    }

    pub fn policy(&self, class: EntityClass) -> &ClassPolicy {
        match class {
            EntityClass::Grid => &self.grids,
            EntityClass::Player => &self.players,
        }
    }

    pub fn is_owner_exempt(&self, owner: OwnerId) -> bool {
        self.exempt_owners.contains(&owner)
    }

    pub fn is_group_exempt(&self, tag: Option<&str>) -> bool {
        match tag {
            Some(tag) => self.exempt_groups.iter().any(|g| g.eq_ignore_ascii_case(tag)),
            None => false,
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.grids.validate(EntityClass::Grid)?;
        self.players.validate(EntityClass::Player)?;

        if self.profile_window_ms == 0 {
            return Err(EnforceError::InvalidConfig(
                "profile_window_ms must be > 0".to_string(),
            ));
        }

        let punishment = &self.punishment;
        if punishment.max_parts_per_slice == 0 {
            return Err(EnforceError::InvalidConfig(
                "max_parts_per_slice must be > 0".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&punishment.damage_normal)
            || !(0.0..=1.0).contains(&punishment.min_integrity_normal)
        {
            return Err(EnforceError::InvalidConfig(
                "damage_normal and min_integrity_normal must be within [0, 1]".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = EnforcementConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.enabled);
        assert_eq!(config.punishment.mode, PunishmentMode::None);
    }

    #[test]
    fn test_builder_pattern() {
        let config = EnforcementConfig::new()
            .grids(ClassPolicy::new(1.0).tracking_window(30).pin_duration(60))
            .punishment_mode(PunishmentMode::Damage)
            .exempt_owner(OwnerId(9))
            .exempt_group("ADM");

        assert_eq!(config.grids.budget_ms, 1.0);
        assert_eq!(config.grids.tracking_window_secs, 30);
        assert_eq!(config.punishment.mode, PunishmentMode::Damage);
        assert!(config.is_owner_exempt(OwnerId(9)));
        assert!(config.is_group_exempt(Some("adm")));
        assert!(!config.is_group_exempt(None));
    }

    #[test]
    fn test_validate() {
        let zero_budget = EnforcementConfig::new().grids(ClassPolicy::new(0.0));
        assert!(zero_budget.validate().is_err());

        let no_window = EnforcementConfig::new().players(ClassPolicy::new(1.0).tracking_window(0));
        assert!(no_window.validate().is_err());

        let bad_fence = EnforcementConfig::new().grids(ClassPolicy::new(1.0).outlier_fence(Some(-1.0)));
        assert!(bad_fence.validate().is_err());

        let huge_pin = EnforcementConfig::new().grids(ClassPolicy::new(1.0).pin_duration(i64::MAX));
        assert!(huge_pin.validate().is_err());

        let huge_grace: EnforcementConfig =
            serde_json::from_str(r#"{"players": {"grace_period_secs": 9223372036854775807}}"#).unwrap();
        assert!(huge_grace.validate().is_err());

        let huge_window = EnforcementConfig::new()
            .grids(ClassPolicy::new(1.0).tracking_window(MAX_DURATION_SECS + 1));
        assert!(huge_window.validate().is_err());

        let longest = EnforcementConfig::new().grids(
            ClassPolicy::new(1.0)
                .tracking_window(MAX_DURATION_SECS)
                .pin_duration(MAX_DURATION_SECS)
                .grace_period(MAX_DURATION_SECS),
        );
        assert!(longest.validate().is_ok());

        let mut bad_damage = EnforcementConfig::new();
        bad_damage.punishment.damage_normal = 1.5;
        assert!(bad_damage.validate().is_err());
    }

    #[test]
    fn test_required_history_never_negative() {
        assert_eq!(ClassPolicy::new(1.0).tracking_window(3).required_history(), chrono::Duration::zero());
        assert_eq!(ClassPolicy::new(1.0).tracking_window(20).required_history(), chrono::Duration::seconds(15));
    }

    #[test]
    fn test_render_template() {
        let message = MessageTemplates::render("{owner}/{entity}/{score}", "bob", "Miner", 1.25);
        assert_eq!(message, "bob/Miner/125%");
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: EnforcementConfig =
            serde_json::from_str(r#"{"enabled": false, "profile_window_ms": 1000}"#).unwrap();
        assert!(!config.enabled);
        assert_eq!(config.profile_window_ms, 1000);
        assert_eq!(config.grids, ClassPolicy::default());

        let nested: EnforcementConfig =
            serde_json::from_str(r#"{"grids": {"budget_ms": 2.0}, "punishment": {"mode": "Damage"}}"#).unwrap();
        assert_eq!(nested.grids.budget_ms, 2.0);
        assert_eq!(nested.grids.tracking_window_secs, 300);
        assert_eq!(nested.punishment.mode, PunishmentMode::Damage);
        assert_eq!(nested.punishment.max_parts_per_slice, 100);
    }
}
