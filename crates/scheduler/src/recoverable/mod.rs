//! Fixed-rate task runner that survives failures of its own tasks.
//!
//! Each registration gets a driver task that ticks at a fixed period and
//! awaits every invocation before the next tick, so at most one invocation
//! of a registration is ever in flight. An invocation that returns an error
//! or panics ends its driver; the [`ResubmitPolicy`] then decides whether the
//! task is registered again with its first tick one period from now, or
//! dropped for good.


use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::error::SchedulerError;

/// A unit of recurring work.
#[async_trait]
pub trait PeriodicTask: Send + Sync {
    /// Registration key and log label.
    fn name(&self) -> &str;

    async fn run(&self) -> Result<(), SchedulerError>;
}

/// Why an invocation terminated abnormally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskFailure {
    Error(String),
    Panic(String),
}

impl std::fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskFailure::Error(e) => write!(f, "error: {e}"),
            TaskFailure::Panic(p) => write!(f, "panic: {p}"),
        }
    }
}

/// Decides whether a task that terminated abnormally is registered again.
pub trait ResubmitPolicy: Send + Sync {
    fn should_resubmit(&self, _task: &str, _failure: &TaskFailure) -> bool {
        true
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysResubmit;

impl ResubmitPolicy for AlwaysResubmit {}

impl<F> ResubmitPolicy for F
where
    F: Fn(&str, &TaskFailure) -> bool + Send + Sync,
{
    fn should_resubmit(&self, task: &str, failure: &TaskFailure) -> bool {
        self(task, failure)
    }
}

struct Registration {
    active: Arc<AtomicBool>,
    wake: Arc<Notify>,
    handle: JoinHandle<()>,
    resubmissions: u64,
}

struct Shared {
    registry: RwLock<HashMap<String, Registration>>,
    policy: Arc<dyn ResubmitPolicy>,
}

/// Runs [`PeriodicTask`]s at a fixed rate and resubmits them after failures.
pub struct RecoverableExecutor {
    shared: Arc<Shared>,
}

impl Default for RecoverableExecutor {
    fn default() -> Self {
        Self::new(Arc::new(AlwaysResubmit))
    }
}

impl RecoverableExecutor {
    pub fn new(policy: Arc<dyn ResubmitPolicy>) -> Self {
        Self {
            shared: Arc::new(Shared {
                registry: RwLock::new(HashMap::new()),
                policy,
            }),
        }
    }

    /// Register `task` to run every `period`, first after `initial_delay`.
    /// A registration under the same name is cancelled first.
    pub fn schedule_at_fixed_rate(
        &self,
        task: Arc<dyn PeriodicTask>,
        initial_delay: Duration,
        period: Duration,
    ) -> Result<(), SchedulerError> {
        let name = task.name().to_string();
        self.cancel(&name);

        let active = Arc::new(AtomicBool::new(true));
        let wake = Arc::new(Notify::new());
        let mut registry = write_registry(&self.shared)?;
        let handle = spawn_driver(
            Arc::clone(&self.shared),
            task,
            initial_delay,
            period,
            Arc::clone(&active),
            Arc::clone(&wake),
        );
        registry.insert(
            name.clone(),
            Registration { active, wake, handle, resubmissions: 0 },
        );
        info!(task = %name, period_ms = period.as_millis() as u64, "Registered periodic task");
        Ok(())
    }

    /// Stop a registration. An in-flight invocation finishes but no further
    /// invocation or resubmission happens. Returns whether it was registered.
    pub fn cancel(&self, name: &str) -> bool {
        let Ok(mut registry) = self.shared.registry.write() else {
            return false;
        };
        match registry.remove(name) {
            Some(reg) => {
                reg.active.store(false, Ordering::SeqCst);
                reg.wake.notify_one();
                info!(task = %name, "Cancelled periodic task");
                true
            }
            None => false,
        }
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.shared
            .registry
            .read()
            .map(|r| r.contains_key(name))
            .unwrap_or(false)
    }

    /// How many times a registration was resubmitted after failures.
    pub fn resubmissions(&self, name: &str) -> Option<u64> {
        self.shared
            .registry
            .read()
            .ok()
            .and_then(|r| r.get(name).map(|reg| reg.resubmissions))
    }

    /// Cancel every registration and wait for in-flight invocations.
    pub async fn shutdown(&self) {
        let drained: Vec<(String, Registration)> = match self.shared.registry.write() {
            Ok(mut registry) => registry.drain().collect(),
            Err(poisoned) => poisoned.into_inner().drain().collect(),
        };
        for (_, reg) in &drained {
            reg.active.store(false, Ordering::SeqCst);
            reg.wake.notify_one();
        }
        for (name, reg) in drained {
            if let Err(e) = reg.handle.await {
                warn!(task = %name, error = %e, "Driver ended abnormally during shutdown");
            }
        }
        info!("Periodic executor shut down");
    }
}

fn write_registry(
    shared: &Shared,
) -> Result<std::sync::RwLockWriteGuard<'_, HashMap<String, Registration>>, SchedulerError> {
    shared
        .registry
        .write()
        .map_err(|e| SchedulerError::Pool(format!("task registry poisoned: {e}")))
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Invoke the task once on its own tokio task so a panic is contained.
async fn invoke(task: &Arc<dyn PeriodicTask>) -> Result<(), TaskFailure> {
    let t = Arc::clone(task);
    match tokio::spawn(async move { t.run().await }).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(TaskFailure::Error(e.to_string())),
        Err(join) if join.is_panic() => Err(TaskFailure::Panic(panic_message(join.into_panic()))),
        Err(join) => Err(TaskFailure::Error(join.to_string())),
    }
}

fn spawn_driver(
    shared: Arc<Shared>,
    task: Arc<dyn PeriodicTask>,
    initial_delay: Duration,
    period: Duration,
    active: Arc<AtomicBool>,
    wake: Arc<Notify>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let name = task.name().to_string();
        let mut ticker = tokio::time::interval_at(Instant::now() + initial_delay, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let failure = loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = wake.notified() => {}
            }
            if !active.load(Ordering::SeqCst) {
                debug!(task = %name, "Driver stopping");
                return;
            }
            match invoke(&task).await {
                Ok(()) => debug!(task = %name, "Periodic task completed"),
                Err(failure) => break failure,
            }
        };

        let resubmit = shared.policy.should_resubmit(&name, &failure);
        let Ok(mut registry) = shared.registry.write() else {
            error!(task = %name, fatal = true, "Task registry poisoned; periodic task dropped");
            return;
        };
        // Cancellation and resubmission serialize on the registry lock.
        if !active.load(Ordering::SeqCst) || !registry.contains_key(&name) {
            return;
        }
        if resubmit {
            warn!(task = %name, failure = %failure, "Periodic task terminated abnormally; resubmitting");
            let handle = spawn_driver(
                Arc::clone(&shared),
                Arc::clone(&task),
                period,
                period,
                Arc::clone(&active),
                Arc::clone(&wake),
            );
            if let Some(reg) = registry.get_mut(&name) {
                reg.handle = handle;
                reg.resubmissions += 1;
            }
        } else {
            active.store(false, Ordering::SeqCst);
            registry.remove(&name);
            error!(
                task = %name,
                failure = %failure,
                fatal = true,
                "Periodic task terminated abnormally and will not be resubmitted"
            );
        }
    })
}
