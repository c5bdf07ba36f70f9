use std::time::Duration;

use anyhow::{Context, Result};
use log::{info, warn};
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};

use crate::probes::{AttachmentManager, ProgramCollection};

/// Receiving side of the process-wide cancellation signal.
#[derive(Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

pub fn shutdown_channel() -> (ShutdownTrigger, ShutdownSignal) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger { tx }, ShutdownSignal { rx })
}

impl ShutdownTrigger {
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }
}

impl ShutdownSignal {
    #[cfg(test)]
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once shutdown is requested or the trigger is dropped.
    pub async fn cancelled(&mut self) {
        while !*self.rx.borrow_and_update() {
            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }
}

/// Work repeated by [`run_periodic`].
///
/// Both hooks run on the blocking thread pool, so map syscalls, lock waits
/// and sink writes never occupy a runtime worker.
pub trait PeriodicTask: Send + 'static {
    /// Runs once before the first period starts.
    fn on_start(&mut self) {}

    fn on_tick(&mut self);
}

async fn on_blocking_pool<T: PeriodicTask>(mut task: T, step: fn(&mut T)) -> Option<T> {
    match tokio::task::spawn_blocking(move || {
        step(&mut task);
        task
    })
    .await
    {
        Ok(task) => Some(task),
        Err(e) => {
            warn!("Periodic task ended abnormally: {}", e);
            None
        }
    }
}

/// Ticks `task` every `period`, first after one full period, until
/// shutdown. A slow tick delays only this task's following ticks.
pub async fn run_periodic<T: PeriodicTask>(
    period: Duration,
    mut shutdown: ShutdownSignal,
    task: T,
) {
    let Some(mut task) = on_blocking_pool(task, T::on_start).await else {
        return;
    };
    let Some(start) = Instant::now().checked_add(period) else {
        warn!("Period {:?} is out of range, not ticking", period);
        return;
    };
    let mut ticker = interval_at(start, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }
        task = match on_blocking_pool(task, T::on_tick).await {
            Some(task) => task,
            None => break,
        };
    }
}

/// Waits for SIGINT or SIGTERM.
pub async fn wait_for_termination() -> Result<()> {
    let mut sigterm = signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
    tokio::select! {
        res = tokio::signal::ctrl_c() => res.context("Failed to listen for SIGINT")?,
        _ = sigterm.recv() => {}
    }
    info!("Exiting...");
    Ok(())
}

/// Named handles of the running exporter and sweeper tasks.
#[derive(Default)]
pub struct TaskSet {
    tasks: Vec<(String, JoinHandle<()>)>,
}

impl TaskSet {
    pub fn spawn<F>(&mut self, name: impl Into<String>, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tasks.push((name.into(), tokio::spawn(task)));
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub async fn join_all(self) {
        for (name, handle) in self.tasks {
            if let Err(e) = handle.await {
                warn!("Task {} ended abnormally: {}", name, e);
            }
        }
    }
}

/// Collections that can be removed from the kernel as a whole.
pub trait Unload {
    fn unload(&mut self);
}

/// A loaded collection and the attachments bound into it.
///
/// Teardown releases attachments first, then unloads the collection, and
/// only does so once.
pub struct Session<C: ProgramCollection + Unload> {
    collection: C,
    attachments: AttachmentManager<C::Link>,
    closed: bool,
}

impl<C: ProgramCollection + Unload> Session<C> {
    pub fn new(collection: C) -> Self {
        Self {
            collection,
            attachments: AttachmentManager::new(),
            closed: false,
        }
    }

    pub fn collection_mut(&mut self) -> &mut C {
        &mut self.collection
    }

    pub fn attachments(&self) -> &AttachmentManager<C::Link> {
        &self.attachments
    }

    pub fn attach(&mut self, plan: &crate::probes::DomainPlan) -> Result<usize> {
        self.attachments.attach_plan(&mut self.collection, plan)
    }

    pub fn shutdown(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        let total = self.attachments.len();
        let released = self.attachments.release_all(&mut self.collection);
        info!("Released {}/{} attachments", released, total);
        self.collection.unload();
    }
}

impl<C: ProgramCollection + Unload> Drop for Session<C> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::domain::TraceDomain;
    use crate::probes::DomainPlan;
    use crate::probes::testing::MockCollection;
    use crate::symbols::SymbolOverrideTable;

    struct Tracked {
        inner: MockCollection,
        unloads: usize,
    }

    impl ProgramCollection for Tracked {
        type Link = u64;

        fn attach(&mut self, hook: &crate::probes::HookSpec) -> Result<u64> {
            self.inner.attach(hook)
        }

        fn detach(&mut self, link: u64) -> Result<()> {
            self.inner.detach(link)
        }
    }

    impl Unload for Tracked {
        fn unload(&mut self) {
            self.unloads += 1;
        }
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let mut session = Session::new(Tracked {
            inner: MockCollection::default(),
            unloads: 0,
        });
        let mut plan = DomainPlan::new(TraceDomain::Operations);
        plan.add_kprobe_pair("nfs_lock", &SymbolOverrideTable::default());
        session.attach(&plan).unwrap();

        session.shutdown();
        session.shutdown();

        let collection = session.collection_mut();
        assert_eq!(collection.unloads, 1);
        assert_eq!(collection.inner.detach_calls, 2);
        assert!(collection.inner.live.is_empty());
        assert!(session.attachments().is_empty());
    }

    struct Counting(Arc<AtomicUsize>);

    impl PeriodicTask for Counting {
        fn on_tick(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Stalling(Duration);

    impl PeriodicTask for Stalling {
        fn on_tick(&mut self) {
            std::thread::sleep(self.0);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_waits_one_period_and_stops_on_shutdown() {
        let (trigger, signal) = shutdown_channel();
        let ticks = Arc::new(AtomicUsize::new(0));

        let task = tokio::spawn(run_periodic(
            Duration::from_secs(10),
            signal,
            Counting(ticks.clone()),
        ));

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 3);

        trigger.trigger();
        task.await.unwrap();
        let after = ticks.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), after);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_slow_tasks_do_not_hold_back_others() {
        let (trigger, signal) = shutdown_channel();
        let mut tasks = TaskSet::default();
        for name in ["slow-a", "slow-b"] {
            tasks.spawn(
                name,
                run_periodic(
                    Duration::from_millis(100),
                    signal.clone(),
                    Stalling(Duration::from_millis(1500)),
                ),
            );
        }
        let ticks = Arc::new(AtomicUsize::new(0));
        tasks.spawn(
            "fast",
            run_periodic(
                Duration::from_millis(100),
                signal.clone(),
                Counting(ticks.clone()),
            ),
        );

        tokio::time::sleep(Duration::from_millis(1200)).await;
        trigger.trigger();
        let fast_ticks = ticks.load(Ordering::SeqCst);
        tasks.join_all().await;

        assert!(fast_ticks >= 5, "fast task ticked {} times", fast_ticks);
    }

    #[tokio::test(start_paused = true)]
    async fn test_out_of_range_period_returns() {
        let (_trigger, signal) = shutdown_channel();
        let ticks = Arc::new(AtomicUsize::new(0));
        run_periodic(Duration::MAX, signal, Counting(ticks.clone())).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_dropped_trigger_cancels() {
        let (trigger, mut signal) = shutdown_channel();
        assert!(!signal.is_cancelled());
        drop(trigger);
        signal.cancelled().await;
    }

    #[tokio::test]
    async fn test_task_set_joins_all() {
        let (trigger, signal) = shutdown_channel();
        let mut tasks = TaskSet::default();
        for name in ["op", "nfsd", "error"] {
            let mut signal = signal.clone();
            tasks.spawn(name, async move { signal.cancelled().await });
        }
        assert_eq!(tasks.len(), 3);
        trigger.trigger();
        tasks.join_all().await;
    }
}
