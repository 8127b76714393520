//! Typed view of the container-level keys.

use std::path::{Path, PathBuf};
use std::time::Duration;

use container_telemetry::TelemetryConfig;

use crate::config::{invalid, Config, LOGGED_STORE_BASE_DIR_ENV};
use crate::error::ConfigError;
use crate::monitor::NO_THROTTLING_POLICY;

/// Store base directory used when nothing else is configured, relative to
/// the working directory.
pub const DEFAULT_STORE_DIR: &str = "state";

/// Container settings with defaults applied.
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerConfig {
    pub job_name: String,
    pub job_id: String,
    /// Rayon pool size for the run loop; 0 runs single threaded.
    pub thread_pool_size: usize,
    /// Grace period the shutdown hook waits for the run loop.
    pub shutdown_grace: Duration,
    pub disk_quota_bytes: u64,
    /// `None` disables the disk quota monitor.
    pub disk_poll_interval: Option<Duration>,
    pub disk_quota_policy: String,
    pub max_throttling_delay: Duration,
    /// `None` disables the host statistics monitor.
    pub host_stats_interval: Option<Duration>,
    pub admin_enabled: bool,
    pub diagnostics_enabled: bool,
    pub timers_enabled: bool,
    pub security_manager_factory: Option<String>,
    pub logged_store_base_dir: PathBuf,
    pub non_logged_store_base_dir: PathBuf,
}

impl ContainerConfig {
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let job_name = config.require("job.name")?.to_string();
        let job_id = config.get_or("job.id", "1").to_string();

        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        let default_dir = cwd.join(DEFAULT_STORE_DIR);
        let env_dir = std::env::var(LOGGED_STORE_BASE_DIR_ENV).ok();

        let non_logged_store_base_dir = config
            .get("job.non-logged.store.base.dir")
            .map(PathBuf::from)
            .unwrap_or_else(|| default_dir.clone());
        let logged_store_base_dir =
            resolve_logged_store_dir(config, env_dir.as_deref(), &default_dir)?;

        let quota = config.get_u64("container.disk.quota.bytes", u64::MAX)?;
        if quota == 0 {
            return Err(invalid(
                "container.disk.quota.bytes",
                "0",
                "quota must be positive",
            ));
        }

        Ok(Self {
            job_name,
            job_id,
            thread_pool_size: config.get_usize("job.container.thread.pool.size", 0)?,
            shutdown_grace: Duration::from_millis(config.get_u64("task.shutdown.ms", 5000)?),
            disk_quota_bytes: quota,
            disk_poll_interval: interval(config.get_u64("container.disk.poll.interval.ms", 0)?),
            disk_quota_policy: config
                .get_or("container.disk.quota.policy.factory", NO_THROTTLING_POLICY)
                .to_string(),
            max_throttling_delay: Duration::from_millis(
                config.get_u64("container.disk.quota.max.throttling.delay.ms", 1000)?,
            ),
            host_stats_interval: interval(
                config.get_u64("container.host.statistics.poll.interval.ms", 60_000)?,
            ),
            admin_enabled: config.get_bool("job.jmx.enabled", true)?,
            diagnostics_enabled: config.get_bool("job.diagnostics.enabled", false)?,
            timers_enabled: config.get_bool("metrics.timer.enabled", true)?,
            security_manager_factory: config
                .get("job.security.manager.factory")
                .map(str::to_string),
            logged_store_base_dir,
            non_logged_store_base_dir,
        })
    }

    /// Logging settings for container `container_id` of this job.
    pub fn telemetry(&self, container_id: &str) -> TelemetryConfig {
        let job = format!("{}-{}", self.job_name, self.job_id);
        TelemetryConfig::for_container(&job, container_id)
    }
}

fn interval(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}

/// Resolve the logged store base directory.
///
/// Precedence: `job.logged.store.base.dir`, then `<env>/<job.name>-<job.id>`
/// when the environment override is set, then `default`.
pub fn resolve_logged_store_dir(
    config: &Config,
    env_dir: Option<&str>,
    default: &Path,
) -> Result<PathBuf, ConfigError> {
    if let Some(dir) = config.get("job.logged.store.base.dir") {
        return Ok(PathBuf::from(dir));
    }
    match env_dir.filter(|d| !d.trim().is_empty()) {
        Some(base) => {
            let job_name = config.require("job.name")?;
            let job_id = config.get_or("job.id", "1");
            Ok(Path::new(base).join(format!("{job_name}-{job_id}")))
        }
        None => Ok(default.to_path_buf()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Config {
        Config::new().with("job.name", "wordcount")
    }

    #[test]
    fn test_defaults() {
        let cfg = ContainerConfig::from_config(&base()).unwrap();
        assert_eq!(cfg.job_id, "1");
        assert_eq!(cfg.thread_pool_size, 0);
        assert_eq!(cfg.shutdown_grace, Duration::from_millis(5000));
        assert_eq!(cfg.disk_quota_bytes, u64::MAX);
        assert_eq!(cfg.disk_poll_interval, None);
        assert_eq!(cfg.disk_quota_policy, "no-throttling");
        assert_eq!(cfg.max_throttling_delay, Duration::from_millis(1000));
        assert_eq!(cfg.host_stats_interval, Some(Duration::from_secs(60)));
        assert!(cfg.admin_enabled);
        assert!(!cfg.diagnostics_enabled);
        assert!(cfg.timers_enabled);
        assert_eq!(cfg.security_manager_factory, None);
    }

    #[test]
    fn test_telemetry_names_job_instance_and_container() {
        let cfg = ContainerConfig::from_config(&base().with("job.id", "2")).unwrap();
        assert_eq!(cfg.telemetry("0").service_name(), "wordcount-2-0");
    }

    #[test]
    fn test_job_name_required() {
        assert!(matches!(
            ContainerConfig::from_config(&Config::new()),
            Err(ConfigError::MissingKey { .. })
        ));
    }

    #[test]
    fn test_zero_intervals_disable_monitors() {
        let cfg = ContainerConfig::from_config(
            &base()
                .with("container.disk.poll.interval.ms", "0")
                .with("container.host.statistics.poll.interval.ms", "0"),
        )
        .unwrap();
        assert!(cfg.disk_poll_interval.is_none());
        assert!(cfg.host_stats_interval.is_none());
    }

    #[test]
    fn test_logged_store_dir_precedence() {
        let default = PathBuf::from("/work/state");
        let config = base().with("job.id", "3");

        assert_eq!(
            resolve_logged_store_dir(&config, None, &default).unwrap(),
            default
        );
        assert_eq!(
            resolve_logged_store_dir(&config, Some("/mnt/logged"), &default).unwrap(),
            PathBuf::from("/mnt/logged/wordcount-3")
        );

        let explicit = config.with("job.logged.store.base.dir", "/explicit");
        assert_eq!(
            resolve_logged_store_dir(&explicit, Some("/mnt/logged"), &default).unwrap(),
            PathBuf::from("/explicit")
        );
    }
}
