//! Pool settings: parallelism, idle life, retry and health-check policy.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Prefix of the environment variables read by [`PoolSettings::from_env`].
pub const ENV_PREFIX: &str = "BROWSER_POOL_";

/// Process-wide pool configuration, read-only once the pool is running.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolSettings {
    /// Upper bound on concurrently alive (non-retiring) browser sessions.
    pub max_degree_of_parallel: usize,
    /// Base idle time after which a session becomes eligible for retirement.
    pub max_idle_time_ms: u64,
    /// Added to the idle time of each subsequently created session so
    /// evictions do not cluster.
    pub delta_idle_time_ms: u64,
    /// In-memory queue capacity; `None` means unbounded.
    pub queue_limit: Option<usize>,
    /// Create `max_degree_of_parallel` sessions up front on start.
    pub start_browsers_on_run: bool,
    /// Never retire the last active session and always keep one alive.
    pub keep_alive_at_least_one_browser: bool,
    /// Attempts a standard command gets before it is moved to the problem sink.
    pub command_max_runs: u32,
    /// Failures a session may accumulate before it is retired.
    pub browser_max_fail: u32,
    /// Backlog per active session above which another session is started.
    pub max_queue_size_per_browser: usize,
    /// Periodically probe idle sessions.
    pub send_health_checks: bool,
    /// Minimum time between two probes of the same session.
    pub health_check_interval_ms: u64,
    /// Fallback wake-up period of the dispatch loop.
    pub dispatch_poll_interval_ms: u64,
    /// Pause between two control-loop ticks.
    pub control_tick_interval_ms: u64,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_degree_of_parallel: 1,
            max_idle_time_ms: 10 * 60 * 1000,
            delta_idle_time_ms: 0,
            queue_limit: None,
            start_browsers_on_run: false,
            keep_alive_at_least_one_browser: true,
            command_max_runs: 3,
            browser_max_fail: 3,
            max_queue_size_per_browser: 3,
            send_health_checks: false,
            health_check_interval_ms: 0,
            dispatch_poll_interval_ms: 200,
            control_tick_interval_ms: 200,
        }
    }
}

impl PoolSettings {
    /// Settings with the documented defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the parallelism ceiling.
    #[must_use]
    pub const fn with_max_degree_of_parallel(mut self, max: usize) -> Self {
        self.max_degree_of_parallel = max;
        self
    }

    /// Set the base idle time.
    #[must_use]
    pub fn with_max_idle_time(mut self, idle: Duration) -> Self {
        self.max_idle_time_ms = crate::util::duration_ms(idle);
        self
    }

    /// Set the per-session idle stagger.
    #[must_use]
    pub fn with_delta_idle_time(mut self, delta: Duration) -> Self {
        self.delta_idle_time_ms = crate::util::duration_ms(delta);
        self
    }

    /// Bound the in-memory queue.
    #[must_use]
    pub const fn with_queue_limit(mut self, limit: Option<usize>) -> Self {
        self.queue_limit = limit;
        self
    }

    /// Pre-start the full session complement.
    #[must_use]
    pub const fn with_start_browsers_on_run(mut self, enabled: bool) -> Self {
        self.start_browsers_on_run = enabled;
        self
    }

    /// Keep at least one session alive.
    #[must_use]
    pub const fn with_keep_alive_at_least_one_browser(mut self, enabled: bool) -> Self {
        self.keep_alive_at_least_one_browser = enabled;
        self
    }

    /// Set the attempt budget of standard commands.
    #[must_use]
    pub const fn with_command_max_runs(mut self, runs: u32) -> Self {
        self.command_max_runs = runs;
        self
    }

    /// Set the failure budget of sessions.
    #[must_use]
    pub const fn with_browser_max_fail(mut self, fails: u32) -> Self {
        self.browser_max_fail = fails;
        self
    }

    /// Set the backlog-per-session scale-up threshold.
    #[must_use]
    pub const fn with_max_queue_size_per_browser(mut self, size: usize) -> Self {
        self.max_queue_size_per_browser = size;
        self
    }

    /// Enable health checks with the given interval.
    #[must_use]
    pub fn with_health_checks(mut self, interval: Duration) -> Self {
        self.send_health_checks = true;
        self.health_check_interval_ms = crate::util::duration_ms(interval);
        self
    }

    /// Set the dispatch loop fallback poll interval.
    #[must_use]
    pub fn with_dispatch_poll_interval(mut self, interval: Duration) -> Self {
        self.dispatch_poll_interval_ms = crate::util::duration_ms(interval);
        self
    }

    /// Set the control loop tick interval.
    #[must_use]
    pub fn with_control_tick_interval(mut self, interval: Duration) -> Self {
        self.control_tick_interval_ms = crate::util::duration_ms(interval);
        self
    }

    /// Base idle time.
    #[must_use]
    pub const fn max_idle_time(&self) -> Duration {
        Duration::from_millis(self.max_idle_time_ms)
    }

    /// Per-session idle stagger.
    #[must_use]
    pub const fn delta_idle_time(&self) -> Duration {
        Duration::from_millis(self.delta_idle_time_ms)
    }

    /// Health-check interval, `None` when health checks are disabled.
    #[must_use]
    pub const fn health_check_interval(&self) -> Option<Duration> {
        if self.send_health_checks && self.health_check_interval_ms > 0 {
            Some(Duration::from_millis(self.health_check_interval_ms))
        } else {
            None
        }
    }

    /// Dispatch loop fallback poll interval.
    #[must_use]
    pub const fn dispatch_poll_interval(&self) -> Duration {
        Duration::from_millis(self.dispatch_poll_interval_ms)
    }

    /// Control loop tick interval.
    #[must_use]
    pub const fn control_tick_interval(&self) -> Duration {
        Duration::from_millis(self.control_tick_interval_ms)
    }

    /// Validate settings values.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_degree_of_parallel == 0 {
            return Err("max_degree_of_parallel must be greater than 0".into());
        }
        if self.queue_limit == Some(0) {
            return Err("queue_limit must be greater than 0 when set".into());
        }
        if self.command_max_runs == 0 {
            return Err("command_max_runs must be greater than 0".into());
        }
        if self.browser_max_fail == 0 {
            return Err("browser_max_fail must be greater than 0".into());
        }
        if self.dispatch_poll_interval_ms == 0 {
            return Err("dispatch_poll_interval_ms must be greater than 0".into());
        }
        if self.control_tick_interval_ms == 0 {
            return Err("control_tick_interval_ms must be greater than 0".into());
        }
        Ok(())
    }

    /// Parse settings from a JSON string and validate.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let settings: Self =
            serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load settings from `BROWSER_POOL_*` environment variables (a `.env`
    /// file is honoured), falling back to defaults, then validate.
    pub fn from_env() -> Result<Self, String> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from an arbitrary key lookup. Keys are the upper-cased
    /// field names prefixed with [`ENV_PREFIX`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self, String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut settings = Self::default();
        let var = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));

        if let Some(v) = var("MAX_DEGREE_OF_PARALLEL") {
            settings.max_degree_of_parallel = parse(&v, "MAX_DEGREE_OF_PARALLEL")?;
        }
        if let Some(v) = var("MAX_IDLE_TIME_MS") {
            settings.max_idle_time_ms = parse(&v, "MAX_IDLE_TIME_MS")?;
        }
        if let Some(v) = var("DELTA_IDLE_TIME_MS") {
            settings.delta_idle_time_ms = parse(&v, "DELTA_IDLE_TIME_MS")?;
        }
        if let Some(v) = var("QUEUE_LIMIT") {
            settings.queue_limit = if v.trim().is_empty() {
                None
            } else {
                Some(parse(&v, "QUEUE_LIMIT")?)
            };
        }
        if let Some(v) = var("START_BROWSERS_ON_RUN") {
            settings.start_browsers_on_run = parse(&v, "START_BROWSERS_ON_RUN")?;
        }
        if let Some(v) = var("KEEP_ALIVE_AT_LEAST_ONE_BROWSER") {
            settings.keep_alive_at_least_one_browser =
                parse(&v, "KEEP_ALIVE_AT_LEAST_ONE_BROWSER")?;
        }
        if let Some(v) = var("COMMAND_MAX_RUNS") {
            settings.command_max_runs = parse(&v, "COMMAND_MAX_RUNS")?;
        }
        if let Some(v) = var("BROWSER_MAX_FAIL") {
            settings.browser_max_fail = parse(&v, "BROWSER_MAX_FAIL")?;
        }
        if let Some(v) = var("MAX_QUEUE_SIZE_PER_BROWSER") {
            settings.max_queue_size_per_browser = parse(&v, "MAX_QUEUE_SIZE_PER_BROWSER")?;
        }
        if let Some(v) = var("SEND_HEALTH_CHECKS") {
            settings.send_health_checks = parse(&v, "SEND_HEALTH_CHECKS")?;
        }
        if let Some(v) = var("HEALTH_CHECK_INTERVAL_MS") {
            settings.health_check_interval_ms = parse(&v, "HEALTH_CHECK_INTERVAL_MS")?;
        }
        if let Some(v) = var("DISPATCH_POLL_INTERVAL_MS") {
            settings.dispatch_poll_interval_ms = parse(&v, "DISPATCH_POLL_INTERVAL_MS")?;
        }
        if let Some(v) = var("CONTROL_TICK_INTERVAL_MS") {
            settings.control_tick_interval_ms = parse(&v, "CONTROL_TICK_INTERVAL_MS")?;
        }

        settings.validate()?;
        Ok(settings)
    }
}

fn parse<T>(raw: &str, name: &str) -> Result<T, String>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| format!("{ENV_PREFIX}{name} invalid: {e}"))
}
