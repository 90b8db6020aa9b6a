//! Poll the change signal and rebuild the live policy when it moves.
//!
//! # State machine
//! - `load()` runs the first pass at startup and returns its error.
//! - Each `tick()` reads the signal. A value strictly greater than the last
//!   applied one starts a pass; anything else leaves state alone.
//! - The last applied value advances only after a generation is swapped in,
//!   so a failed or empty pass is retried on the next tick.
//! - The pass is single-flight. A tick that finds a pass running returns
//!   [`TickOutcome::Busy`] instead of waiting.
//! - The last applied value is readable without the single-flight guard;
//!   it is only written while the guard is held.
//! - A freshly built engine must hold exactly the compiled rules before it is
//!   swapped in.
//!
//! # Failure handling
//! Errors inside the loop are logged and counted, never propagated. A role
//! whose aggregation fails is left out of the pass; other roles compile.
use super::PolicyError;
use super::aggregator::RoleResourceAggregator;
use super::compiler::{CompiledPolicy, PolicyCompiler, RoleResources};
use super::enforcer::EnforcerFactory;
use super::handle::{EnforcerHandle, Generation};
use super::publisher::PolicyFilePublisher;
use crate::store::RbacStore;
use futures::StreamExt;
use gatehouse_authz::PolicyEngine;
use gatehouse_cache::ChangeSignal;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub model_path: PathBuf,
    pub policy_path: PathBuf,
    pub compiler: PolicyCompiler,
}

#[derive(Debug, Clone)]
pub enum ReloadOutcome {
    Swapped(Arc<Generation>),
    /// Nothing compiled; the current generation was kept.
    Empty,
}

#[derive(Debug, Clone)]
pub enum TickOutcome {
    /// No signal has ever been written.
    Idle,
    Unchanged,
    Reloaded(Arc<Generation>),
    Failed,
    Busy,
    SignalUnavailable,
}

/// Stands in for "no signal applied yet"; real markers are positive.
const UNAPPLIED: i64 = i64::MIN;

pub struct PolicySync {
    store: Arc<dyn RbacStore>,
    aggregator: RoleResourceAggregator,
    compiler: PolicyCompiler,
    publisher: PolicyFilePublisher,
    factory: Arc<dyn EnforcerFactory>,
    handle: Arc<EnforcerHandle>,
    signal: ChangeSignal,
    model_path: PathBuf,
    pass: Mutex<()>,
    last_applied: AtomicI64,
}

impl PolicySync {
    pub fn new(
        store: Arc<dyn RbacStore>,
        signal: ChangeSignal,
        factory: Arc<dyn EnforcerFactory>,
        handle: Arc<EnforcerHandle>,
        settings: SyncSettings,
    ) -> Self {
        Self {
            aggregator: RoleResourceAggregator::new(Arc::clone(&store)),
            store,
            compiler: settings.compiler,
            publisher: PolicyFilePublisher::new(settings.policy_path),
            factory,
            handle,
            signal,
            model_path: settings.model_path,
            pass: Mutex::new(()),
            last_applied: AtomicI64::new(UNAPPLIED),
        }
    }

    pub fn handle(&self) -> &Arc<EnforcerHandle> {
        &self.handle
    }

    pub fn last_applied(&self) -> Option<i64> {
        match self.last_applied.load(Ordering::Acquire) {
            UNAPPLIED => None,
            marker => Some(marker),
        }
    }

    fn set_last_applied(&self, marker: Option<i64>) {
        if let Some(marker) = marker {
            self.last_applied.store(marker, Ordering::Release);
        }
    }

    /// First pass at startup. Waits for any concurrent pass instead of
    /// skipping.
    pub async fn load(&self) -> Result<ReloadOutcome, PolicyError> {
        let _pass = self.pass.lock().await;
        let signal = self.read_signal_for_pass().await;
        let outcome = self.run_pass(signal).await?;
        match &outcome {
            ReloadOutcome::Swapped(_) => self.set_last_applied(signal),
            ReloadOutcome::Empty => {
                tracing::warn!("initial policy load compiled no lines; denying all requests until data arrives");
            }
        }
        Ok(outcome)
    }

    /// Rebuild now regardless of the signal. Fails with
    /// [`PolicyError::ReloadInProgress`] instead of queueing behind a pass.
    pub async fn reload(&self) -> Result<ReloadOutcome, PolicyError> {
        let _pass = self
            .pass
            .try_lock()
            .map_err(|_| PolicyError::ReloadInProgress)?;
        let signal = self.read_signal_for_pass().await;
        let outcome = self.run_pass(signal).await?;
        if let ReloadOutcome::Swapped(_) = outcome {
            self.set_last_applied(max_marker(self.last_applied(), signal));
        }
        Ok(outcome)
    }

    pub async fn tick(&self) -> TickOutcome {
        let Ok(_pass) = self.pass.try_lock() else {
            metrics::counter!("policyd_ticks_skipped_total").increment(1);
            return TickOutcome::Busy;
        };
        let current = match self.signal.read().await {
            Ok(Some(current)) => current,
            Ok(None) => return TickOutcome::Idle,
            Err(err) => {
                tracing::warn!(error = %err, "change signal unavailable; skipping tick");
                return TickOutcome::SignalUnavailable;
            }
        };
        let last_applied = self.last_applied();
        if last_applied.is_some_and(|applied| current <= applied) {
            return TickOutcome::Unchanged;
        }

        tracing::info!(signal = current, last_applied = ?last_applied, "change signal moved; reloading policy");
        match self.run_pass(Some(current)).await {
            Ok(ReloadOutcome::Swapped(generation)) => {
                self.set_last_applied(Some(current));
                TickOutcome::Reloaded(generation)
            }
            Ok(ReloadOutcome::Empty) => {
                tracing::warn!(signal = current, "reload compiled no lines; keeping current policy");
                TickOutcome::Failed
            }
            Err(err) => {
                tracing::error!(signal = current, error = %err, "policy reload failed; keeping current policy");
                TickOutcome::Failed
            }
        }
    }

    /// Run `tick` every `interval` until [`ReloadTask::shutdown`].
    ///
    /// Ticks that fall due while a pass is still running are dropped.
    pub fn spawn(self: Arc<Self>, interval: Duration) -> ReloadTask {
        let interval = interval.max(Duration::from_millis(1));
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        let join = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The first tick fires immediately; load() already covered it.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    _ = ticker.tick() => {
                        let started = Instant::now();
                        self.tick().await;
                        let dropped = dropped_ticks(started.elapsed(), interval);
                        if dropped > 0 {
                            metrics::counter!("policyd_ticks_skipped_total").increment(dropped);
                            tracing::debug!(dropped, "reload outlasted tick interval");
                        }
                    }
                }
            }
            tracing::info!("policy reload loop stopped");
        });
        ReloadTask {
            stop: Some(stop_tx),
            join,
        }
    }

    async fn read_signal_for_pass(&self) -> Option<i64> {
        match self.signal.read().await {
            Ok(signal) => signal,
            Err(err) => {
                tracing::warn!(error = %err, "change signal unreadable; pass will not record it");
                None
            }
        }
    }

    async fn run_pass(&self, signal: Option<i64>) -> Result<ReloadOutcome, PolicyError> {
        let started = Instant::now();
        let result = self.compile_and_swap(signal).await;
        metrics::histogram!("policyd_reload_duration_seconds").record(started.elapsed().as_secs_f64());
        let label = match &result {
            Ok(ReloadOutcome::Swapped(_)) => "ok",
            Ok(ReloadOutcome::Empty) => "empty",
            Err(_) => "error",
        };
        metrics::counter!("policyd_reload_total", "result" => label).increment(1);
        result
    }

    async fn compile_and_swap(&self, signal: Option<i64>) -> Result<ReloadOutcome, PolicyError> {
        let started = Instant::now();
        let roles = self.store.list_enabled_roles().await?;
        let role_count = roles.len();

        let aggregator = &self.aggregator;
        let items = futures::stream::iter(roles)
            .map(|role| async move {
                let result = aggregator.resources(&role.id).await;
                (role.id, result)
            })
            .buffer_unordered(self.compiler.workers())
            .filter_map(|(role_id, result)| async move {
                match result {
                    Ok(resources) => Some(RoleResources { role_id, resources }),
                    Err(err) => {
                        metrics::counter!("policyd_role_aggregation_failures_total").increment(1);
                        tracing::error!(role_id = %role_id, error = %err, "role aggregation failed; role omitted from policy");
                        None
                    }
                }
            });
        let compiled = self.compiler.compile(items).await?;
        if compiled.rejected > 0 {
            metrics::counter!("policyd_rejected_policy_lines_total").increment(compiled.rejected as u64);
        }
        if compiled.is_empty() {
            return Ok(ReloadOutcome::Empty);
        }

        self.publisher.publish(&compiled).await?;
        let engine = self
            .factory
            .build(&self.model_path, self.publisher.policy_path())
            .await?;
        verify_loaded_rules(&compiled, engine.as_ref())?;
        let lines = compiled.lines.len();
        let generation = self.handle.install(engine, signal, lines);

        metrics::gauge!("policyd_policy_lines").set(lines as f64);
        metrics::gauge!("policyd_policy_generation").set(generation.id as f64);
        tracing::info!(
            generation = generation.id,
            signal = ?signal,
            roles = role_count,
            compiled_roles = compiled.roles,
            resources = compiled.resources,
            rejected = compiled.rejected,
            lines,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "policy generation swapped in"
        );
        Ok(ReloadOutcome::Swapped(generation))
    }
}

/// The engine must hold the compiled lines and nothing else.
fn verify_loaded_rules(compiled: &CompiledPolicy, engine: &dyn PolicyEngine) -> Result<(), PolicyError> {
    let mut loaded = engine.rules();
    loaded.sort();
    let matches = loaded.len() == compiled.lines.len()
        && loaded
            .iter()
            .zip(&compiled.lines)
            .all(|(rule, line)| *rule == line.to_rule());
    if matches {
        Ok(())
    } else {
        Err(PolicyError::RuleMismatch {
            compiled: compiled.lines.len(),
            loaded: loaded.len(),
        })
    }
}

fn max_marker(applied: Option<i64>, signal: Option<i64>) -> Option<i64> {
    match (applied, signal) {
        (Some(applied), Some(signal)) => Some(applied.max(signal)),
        (applied, signal) => applied.or(signal),
    }
}

fn dropped_ticks(elapsed: Duration, interval: Duration) -> u64 {
    if interval.is_zero() {
        return 0;
    }
    (elapsed.as_nanos() / interval.as_nanos()) as u64
}

/// Handle to the spawned reload loop.
pub struct ReloadTask {
    stop: Option<oneshot::Sender<()>>,
    join: JoinHandle<()>,
}

impl ReloadTask {
    /// Stop the timer and wait for an in-flight pass to finish.
    pub async fn shutdown(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Err(err) = (&mut self.join).await {
            tracing::warn!(error = %err, "policy reload loop ended abnormally");
        }
    }
}
