// Long-running driver: Connecting -> Running <-> Retrying.
// `step` performs one transition and reports how long to wait before the next one;
// `run` applies the waits and stops on the shutdown signal (only ever between passes).

use std::str::FromStr;
use std::time::Duration;

use chrono::TimeDelta;
use tokio::sync::oneshot::error::TryRecvError;
use tracing::{error, info, instrument, warn};

use crate::config::AppConfig;
use crate::error::EtlError;
use crate::etl_worker::run_one_pass;
use crate::store::StoreConnector;

/// Delay policy for connection and connectivity retries.
pub trait Backoff: Send {
    /// Delay before retry number `attempt` (1-based, consecutive failures so far).
    fn delay(&mut self, attempt: u32) -> Duration;
}

#[derive(Debug, Clone, Copy)]
pub struct FixedBackoff(pub Duration);

impl Default for FixedBackoff {
    fn default() -> Self {
        FixedBackoff(Duration::from_millis(100))
    }
}

impl Backoff for FixedBackoff {
    fn delay(&mut self, _attempt: u32) -> Duration {
        self.0
    }
}

/// When the next pass starts after one finishes.
#[derive(Debug, Clone)]
pub enum PassSchedule {
    Interval(Duration),
    /// Cron expression evaluated in local time.
    Cron(Box<cron::Schedule>),
}

impl PassSchedule {
    pub fn from_config(interval: Duration, cron_expr: Option<&str>) -> Result<Self, EtlError> {
        match cron_expr {
            Some(expr) => cron::Schedule::from_str(expr)
                .map(|s| PassSchedule::Cron(Box::new(s)))
                .map_err(|e| EtlError::Config(format!("invalid pass_schedule {expr:?}: {e}"))),
            None => Ok(PassSchedule::Interval(interval)),
        }
    }

    pub fn delay_after_pass(&self, now: chrono::DateTime<chrono::Local>) -> Duration {
        match self {
            PassSchedule::Interval(d) => *d,
            PassSchedule::Cron(schedule) => schedule
                .after(&now)
                .next()
                .and_then(|next| (next - now).to_std().ok())
                .unwrap_or(Duration::from_secs(3600)),
        }
    }
}

/// Runner state. Store handles live inside the states that have them.
pub enum RunnerState<R, A> {
    Connecting,
    Running { readings: R, aggregates: A },
    /// A pass hit a connectivity failure; it is retried from scratch after backoff.
    Retrying { readings: R, aggregates: A },
}

impl<R, A> RunnerState<R, A> {
    pub fn name(&self) -> &'static str {
        match self {
            RunnerState::Connecting => "connecting",
            RunnerState::Running { .. } => "running",
            RunnerState::Retrying { .. } => "retrying",
        }
    }
}

/// Result of one transition: the next state and how long to wait before entering it.
pub struct Step<R, A> {
    pub state: RunnerState<R, A>,
    pub wait: Duration,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunnerStats {
    pub connect_failures: u64,
    pub passes_completed: u64,
    pub rows_written_total: u64,
    pub pass_retries: u64,
    pub data_failures: u64,
}

#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub startup_delay: Duration,
    pub schedule: PassSchedule,
    pub lookback: Option<TimeDelta>,
}

impl RunnerConfig {
    pub fn from_app_config(config: &AppConfig) -> Result<Self, EtlError> {
        Ok(Self {
            startup_delay: config.etl.startup_delay(),
            schedule: PassSchedule::from_config(
                config.etl.pass_interval(),
                config.etl.pass_schedule.as_deref(),
            )?,
            lookback: config.etl.lookback_hours.map(|h| TimeDelta::hours(h as i64)),
        })
    }
}

pub struct EtlRunner<C, B> {
    connector: C,
    backoff: B,
    config: RunnerConfig,
    stats: RunnerStats,
    consecutive_failures: u32,
}

impl<C, B> EtlRunner<C, B>
where
    C: StoreConnector,
    B: Backoff,
{
    pub fn new(connector: C, backoff: B, config: RunnerConfig) -> Self {
        Self {
            connector,
            backoff,
            config,
            stats: RunnerStats::default(),
            consecutive_failures: 0,
        }
    }

    pub fn stats(&self) -> &RunnerStats {
        &self.stats
    }

    /// One transition. `Err` only for failures that must stop the process (configuration).
    /// Any other connect failure stays in `Connecting` and waits out the backoff.
    pub async fn step(
        &mut self,
        state: RunnerState<C::Readings, C::Aggregates>,
    ) -> Result<Step<C::Readings, C::Aggregates>, EtlError> {
        match state {
            RunnerState::Connecting => match self.connector.connect().await {
                Ok((readings, aggregates)) => {
                    self.consecutive_failures = 0;
                    info!("connection to reading and aggregate stores successful");
                    Ok(Step {
                        state: RunnerState::Running {
                            readings,
                            aggregates,
                        },
                        wait: Duration::ZERO,
                    })
                }
                Err(e @ EtlError::Config(_)) => Err(e),
                Err(e) => {
                    self.consecutive_failures += 1;
                    self.stats.connect_failures += 1;
                    let wait = self.backoff.delay(self.consecutive_failures);
                    if e.is_transient() {
                        warn!(
                            error = %e,
                            attempt = self.consecutive_failures,
                            backoff_ms = wait.as_millis() as u64,
                            "store not reachable; retrying connection"
                        );
                    } else {
                        // e.g. schema setup rejected by the aggregate store
                        error!(
                            error = %e,
                            attempt = self.consecutive_failures,
                            backoff_ms = wait.as_millis() as u64,
                            "store setup failed; retrying connection"
                        );
                    }
                    Ok(Step {
                        state: RunnerState::Connecting,
                        wait,
                    })
                }
            },
            RunnerState::Running {
                readings,
                aggregates,
            } => match run_one_pass(&readings, &aggregates, self.config.lookback).await {
                Ok(report) => {
                    self.consecutive_failures = 0;
                    self.stats.passes_completed += 1;
                    self.stats.rows_written_total += report.rows_written as u64;
                    let wait = self.config.schedule.delay_after_pass(chrono::Local::now());
                    info!(
                        passes_completed = self.stats.passes_completed,
                        rows_written_total = self.stats.rows_written_total,
                        pass_retries = self.stats.pass_retries,
                        data_failures = self.stats.data_failures,
                        next_pass_in_secs = wait.as_secs(),
                        "runner stats"
                    );
                    Ok(Step {
                        state: RunnerState::Running {
                            readings,
                            aggregates,
                        },
                        wait,
                    })
                }
                Err(e) if e.is_transient() => {
                    self.consecutive_failures += 1;
                    self.stats.pass_retries += 1;
                    warn!(error = %e, attempt = self.consecutive_failures, "pass failed on connectivity; will retry");
                    Ok(Step {
                        state: RunnerState::Retrying {
                            readings,
                            aggregates,
                        },
                        wait: Duration::ZERO,
                    })
                }
                Err(e @ EtlError::Config(_)) => Err(e),
                Err(e) => {
                    // Bad data is not retried on the backoff; the pass is dropped and the
                    // next scheduled pass reads the store again.
                    self.consecutive_failures = 0;
                    self.stats.data_failures += 1;
                    error!(error = %e, "pass aborted on data error; nothing written");
                    Ok(Step {
                        state: RunnerState::Running {
                            readings,
                            aggregates,
                        },
                        wait: self.config.schedule.delay_after_pass(chrono::Local::now()),
                    })
                }
            },
            RunnerState::Retrying {
                readings,
                aggregates,
            } => {
                let wait = self.backoff.delay(self.consecutive_failures);
                Ok(Step {
                    state: RunnerState::Running {
                        readings,
                        aggregates,
                    },
                    wait,
                })
            }
        }
    }

    /// Runs until `shutdown` resolves (checked between passes) or a fatal error occurs.
    #[instrument(skip_all)]
    pub async fn run(
        &mut self,
        mut shutdown: tokio::sync::oneshot::Receiver<()>,
    ) -> Result<(), EtlError> {
        if !self.config.startup_delay.is_zero() {
            info!(
                delay_secs = self.config.startup_delay.as_secs(),
                "waiting for upstream before connecting"
            );
            tokio::select! {
                _ = tokio::time::sleep(self.config.startup_delay) => {}
                _ = &mut shutdown => {
                    info!("shutdown before start");
                    return Ok(());
                }
            }
        }
        info!("ETL starting");

        let mut state = RunnerState::Connecting;
        loop {
            let step = self.step(state).await?;
            state = step.state;
            if step.wait.is_zero() {
                // Still give a pending shutdown a chance between transitions.
                if !matches!(shutdown.try_recv(), Err(TryRecvError::Empty)) {
                    break;
                }
                continue;
            }
            tokio::select! {
                _ = tokio::time::sleep(step.wait) => {}
                _ = &mut shutdown => break,
            }
        }
        info!(stats = ?self.stats, "ETL runner stopped");
        Ok(())
    }
}
