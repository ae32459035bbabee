use std::env;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn profiled_env_or(profile: &str, key: &str, default: &str) -> String {
    profiled_env_opt(profile, key).unwrap_or_else(|| default.to_string())
}

fn profiled_env_u16(profile: &str, key: &str) -> Option<u16> {
    profiled_env_opt(profile, key).and_then(|v| v.parse().ok())
}

fn profiled_env_u32(profile: &str, key: &str, default: u32) -> u32 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_u64(profile: &str, key: &str, default: u64) -> u64 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_bool(profile: &str, key: &str, default: bool) -> bool {
    match profiled_env_opt(profile, key) {
        Some(v) => matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        None => default,
    }
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Active profile name (empty = default).
    pub profile: String,
    pub scheduler: SchedulerSettings,
    pub intervals: IntervalConfig,
    pub email: EmailConfig,
    pub source: SourceConfig,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `LOOKOUT_PROFILE`. When set (e.g. `PROD`), every
    /// key is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        let profile = env_or("LOOKOUT_PROFILE", "").to_uppercase();
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Self {
        let p = profile.to_uppercase();
        let p = p.as_str();
        Self {
            profile: p.to_string(),
            scheduler: SchedulerSettings::from_env_profiled(p),
            intervals: IntervalConfig::from_env_profiled(p),
            email: EmailConfig::from_env_profiled(p),
            source: SourceConfig::from_env_profiled(p),
        }
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Print a redacted summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!(
            "  scheduler:   tick={}s, pending_grace={}m, backfill_threads={}, backup={}",
            self.scheduler.execution_delay_secs,
            self.scheduler.pending_grace_minutes,
            self.scheduler.backfill_threads,
            self.scheduler
                .backup_path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "(none)".to_string())
        );
        tracing::info!(
            "  intervals:   minutes={}, hours={}, days={}, weeks={}, months={}",
            self.intervals.minutes,
            self.intervals.hours,
            self.intervals.days,
            self.intervals.weeks,
            self.intervals.months
        );
        tracing::info!(
            "  email:       enabled={}, smtp={}, failure={}",
            self.email.enabled,
            self.email.smtp_host.as_deref().unwrap_or("(none)"),
            if self.email.failure_email.is_some() { "set" } else { "(none)" }
        );
        tracing::info!("  source:      timeout={}s", self.source.timeout_secs);
    }
}

// ── Scheduler ─────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerSettings {
    /// Dispatch loop period in seconds.
    pub execution_delay_secs: u64,
    /// Pending markers older than this are re-queued on reconciliation.
    pub pending_grace_minutes: i64,
    /// Backfill worker threads. 0 = available parallelism.
    pub backfill_threads: usize,
    /// Daily JSON snapshot target, if any.
    pub backup_path: Option<PathBuf>,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            execution_delay_secs: 30,
            pending_grace_minutes: 5,
            backfill_threads: 0,
            backup_path: None,
        }
    }
}

impl SchedulerSettings {
    fn from_env_profiled(p: &str) -> Self {
        let defaults = Self::default();
        Self {
            execution_delay_secs: profiled_env_u64(p, "EXECUTION_DELAY_SECS", defaults.execution_delay_secs)
                .max(1),
            pending_grace_minutes: profiled_env_u64(
                p,
                "PENDING_GRACE_MINUTES",
                defaults.pending_grace_minutes as u64,
            ) as i64,
            backfill_threads: profiled_env_u64(p, "BACKFILL_THREADS", 0) as usize,
            backup_path: profiled_env_opt(p, "BACKUP_PATH").map(PathBuf::from),
        }
    }

    /// Resolve backfill thread count (0 means use available parallelism).
    pub fn resolved_backfill_threads(&self) -> usize {
        if self.backfill_threads == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        } else {
            self.backfill_threads
        }
    }
}

// ── Lookback intervals ────────────────────────────────────────

/// Number of granularity buckets in one detection lookback window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntervalConfig {
    pub minutes: u32,
    pub hours: u32,
    pub days: u32,
    pub weeks: u32,
    pub months: u32,
}

impl Default for IntervalConfig {
    fn default() -> Self {
        Self {
            minutes: 180,
            hours: 672,
            days: 28,
            weeks: 12,
            months: 6,
        }
    }
}

impl IntervalConfig {
    fn from_env_profiled(p: &str) -> Self {
        let d = Self::default();
        Self {
            minutes: profiled_env_u32(p, "INTERVAL_MINUTES", d.minutes),
            hours: profiled_env_u32(p, "INTERVAL_HOURS", d.hours),
            days: profiled_env_u32(p, "INTERVAL_DAYS", d.days),
            weeks: profiled_env_u32(p, "INTERVAL_WEEKS", d.weeks),
            months: profiled_env_u32(p, "INTERVAL_MONTHS", d.months),
        }
    }
}

// ── Email ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EmailConfig {
    pub enabled: bool,
    /// Recipient of failure reports.
    pub failure_email: Option<String>,
    pub from: String,
    pub smtp_host: Option<String>,
    pub smtp_port: Option<u16>,
    pub smtp_tls: bool,
}

impl EmailConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            enabled: profiled_env_bool(p, "ENABLE_EMAIL", false),
            failure_email: profiled_env_opt(p, "FAILURE_EMAIL"),
            from: profiled_env_or(p, "EMAIL_FROM", "lookout@localhost"),
            smtp_host: profiled_env_opt(p, "SMTP_HOST"),
            smtp_port: profiled_env_u16(p, "SMTP_PORT"),
            smtp_tls: profiled_env_bool(p, "SMTP_TLS", true),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.enabled && self.smtp_host.is_some()
    }
}

// ── Data source ───────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub timeout_secs: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self { timeout_secs: 30 }
    }
}

impl SourceConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            timeout_secs: profiled_env_u64(p, "DATA_SOURCE_TIMEOUT_SECS", 30),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let c = Config::default();
        assert_eq!(c.scheduler.execution_delay_secs, 30);
        assert_eq!(c.scheduler.pending_grace_minutes, 5);
        assert_eq!(c.intervals.days, 28);
        assert!(!c.email.enabled);
        assert_eq!(c.profile_label(), "default");
    }

    #[test]
    fn resolved_backfill_threads_is_positive() {
        let s = SchedulerSettings::default();
        assert!(s.resolved_backfill_threads() >= 1);
        let s = SchedulerSettings { backfill_threads: 3, ..SchedulerSettings::default() };
        assert_eq!(s.resolved_backfill_threads(), 3);
    }

    #[test]
    fn email_requires_enable_and_host() {
        let mut e = EmailConfig { enabled: true, ..EmailConfig::default() };
        assert!(!e.is_configured());
        e.smtp_host = Some("smtp.example.com".to_string());
        assert!(e.is_configured());
    }
}
