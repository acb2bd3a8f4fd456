//! Job engine configuration loaded from environment variables
//!
//! Everything here has a default that works for a single local daemon, so
//! an empty environment yields a usable configuration.

use std::collections::BTreeMap;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};

/// Default number of pool slots
pub const DEFAULT_POOL_SIZE: usize = 4;

/// Job engine configuration
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Maximum number of jobs executing at once across all queues
    pub pool_size: usize,

    /// Per-queue concurrency ceilings registered before any job runs
    pub queue_limits: BTreeMap<String, usize>,

    /// Directory holding `<name>.toml` templates
    pub template_dir: PathBuf,

    /// Templates whose entries the periodic scheduler walks
    pub schedules: Vec<String>,

    /// Seconds between scheduler ticks
    pub scheduler_tick_secs: u64,

    /// Retries granted to each job after its first failed attempt
    pub max_retries: u32,

    /// Delay between attempts in seconds
    pub retry_delay_secs: u64,

    /// How long `kill` waits for an aborted execution unit to wind down
    pub kill_grace_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            pool_size: DEFAULT_POOL_SIZE,
            queue_limits: BTreeMap::new(),
            template_dir: PathBuf::from("./templates"),
            schedules: vec!["periodic".to_string()],
            scheduler_tick_secs: 60,
            max_retries: 0,
            retry_delay_secs: 60,
            kill_grace_ms: 1000,
        }
    }
}

impl WorkerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let pool_size: usize = env::var("WORKERS_POOL_SIZE")
            .unwrap_or_else(|_| defaults.pool_size.to_string())
            .trim()
            .parse()
            .context("Invalid WORKERS_POOL_SIZE value")?;

        let queue_limits = match env::var("LIBRARIAN_QUEUE_LIMITS") {
            Ok(raw) => parse_queue_limits(&raw).context("Invalid LIBRARIAN_QUEUE_LIMITS value")?,
            Err(_) => BTreeMap::new(),
        };

        let schedules = match env::var("LIBRARIAN_SCHEDULES") {
            Ok(raw) => raw
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            Err(_) => defaults.schedules,
        };

        Ok(Self {
            pool_size: pool_size.max(1),
            queue_limits,
            template_dir: env::var("LIBRARIAN_TEMPLATE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.template_dir),
            schedules,
            scheduler_tick_secs: env::var("SCHEDULER_TICK_SECS")
                .unwrap_or_else(|_| "60".to_string())
                .trim()
                .parse()
                .context("Invalid SCHEDULER_TICK_SECS value")?,
            max_retries: env::var("WORKER_MAX_RETRIES")
                .unwrap_or_else(|_| "0".to_string())
                .trim()
                .parse()
                .context("Invalid WORKER_MAX_RETRIES value")?,
            retry_delay_secs: env::var("WORKER_RETRY_DELAY")
                .unwrap_or_else(|_| "60".to_string())
                .trim()
                .parse()
                .context("Invalid WORKER_RETRY_DELAY value")?,
            kill_grace_ms: env::var("KILL_GRACE_MS")
                .unwrap_or_else(|_| "1000".to_string())
                .trim()
                .parse()
                .context("Invalid KILL_GRACE_MS value")?,
        })
    }

    /// Configuration for an in-process engine with `pool_size` slots
    pub fn with_pool_size(pool_size: usize) -> Self {
        Self {
            pool_size: pool_size.max(1),
            ..Self::default()
        }
    }

    pub fn scheduler_tick(&self) -> Duration {
        Duration::from_secs(self.scheduler_tick_secs.max(1))
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }

    pub fn kill_grace(&self) -> Duration {
        Duration::from_millis(self.kill_grace_ms)
    }
}

/// Parse `queue=limit` pairs separated by commas
pub fn parse_queue_limits(raw: &str) -> Result<BTreeMap<String, usize>> {
    let mut limits = BTreeMap::new();
    for pair in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let Some((queue, limit)) = pair.split_once('=') else {
            bail!("expected queue=limit, got '{}'", pair);
        };
        let limit: usize = limit
            .trim()
            .parse()
            .with_context(|| format!("invalid limit for queue '{}'", queue.trim()))?;
        limits.insert(crate::job::normalize_queue(Some(queue)), limit);
    }
    Ok(limits)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Mutex to ensure tests that modify environment variables don't run in parallel
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    const VARS: &[&str] = &[
        "WORKERS_POOL_SIZE",
        "LIBRARIAN_QUEUE_LIMITS",
        "LIBRARIAN_TEMPLATE_DIR",
        "LIBRARIAN_SCHEDULES",
        "SCHEDULER_TICK_SECS",
        "WORKER_MAX_RETRIES",
        "WORKER_RETRY_DELAY",
        "KILL_GRACE_MS",
    ];

    /// Helper to temporarily set environment variables for a test
    struct EnvGuard {
        vars: Vec<(String, Option<String>)>,
    }

    impl EnvGuard {
        fn new(vars: &[(&str, &str)]) -> Self {
            let mut guard = Self::remove_vars(VARS);
            for (k, v) in vars {
                env::set_var(k, v);
                if !guard.vars.iter().any(|(name, _)| name == k) {
                    guard.vars.push((k.to_string(), None));
                }
            }
            guard
        }

        fn remove_vars(vars: &[&str]) -> Self {
            let saved: Vec<_> = vars
                .iter()
                .map(|k| {
                    let old = env::var(*k).ok();
                    env::remove_var(*k);
                    (k.to_string(), old)
                })
                .collect();
            Self { vars: saved }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (k, v) in &self.vars {
                match v {
                    Some(val) => env::set_var(k, val),
                    None => env::remove_var(k),
                }
            }
        }
    }

    #[test]
    fn test_defaults_from_empty_environment() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let _guard = EnvGuard::remove_vars(VARS);

        let config = WorkerConfig::from_env().unwrap();
        assert_eq!(config.pool_size, 4);
        assert!(config.queue_limits.is_empty());
        assert_eq!(config.template_dir, PathBuf::from("./templates"));
        assert_eq!(config.schedules, vec!["periodic"]);
        assert_eq!(config.scheduler_tick(), Duration::from_secs(60));
        assert_eq!(config.max_retries, 0);
        assert_eq!(config.kill_grace(), Duration::from_millis(1000));
    }

    #[test]
    fn test_custom_values() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let _guard = EnvGuard::new(&[
            ("WORKERS_POOL_SIZE", "8"),
            ("LIBRARIAN_QUEUE_LIMITS", "Downloads=2, convert=1"),
            ("LIBRARIAN_SCHEDULES", "periodic, nightly"),
            ("WORKER_MAX_RETRIES", "2"),
            ("KILL_GRACE_MS", "250"),
        ]);

        let config = WorkerConfig::from_env().unwrap();
        assert_eq!(config.pool_size, 8);
        assert_eq!(config.queue_limits.get("downloads"), Some(&2));
        assert_eq!(config.queue_limits.get("convert"), Some(&1));
        assert_eq!(config.schedules, vec!["periodic", "nightly"]);
        assert_eq!(config.max_retries, 2);
        assert_eq!(config.kill_grace_ms, 250);
    }

    #[test]
    fn test_pool_size_floor_is_one() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let _guard = EnvGuard::new(&[("WORKERS_POOL_SIZE", "0")]);

        assert_eq!(WorkerConfig::from_env().unwrap().pool_size, 1);
    }

    #[test]
    fn test_invalid_pool_size_format() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let _guard = EnvGuard::new(&[("WORKERS_POOL_SIZE", "lots")]);

        let err = WorkerConfig::from_env().unwrap_err();
        assert!(err.to_string().contains("WORKERS_POOL_SIZE"));
    }

    #[test]
    fn test_parse_queue_limits_rejects_missing_separator() {
        assert!(parse_queue_limits("downloads").is_err());
        assert!(parse_queue_limits("downloads=many").is_err());
        assert!(parse_queue_limits("").unwrap().is_empty());
    }
}
