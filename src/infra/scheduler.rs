//! Background driver for garbage collection and preload ticks.
//!
//! Both loops run as tokio tasks until the shutdown channel fires. Every tick
//! first reloads the persisted cache configuration, since operators change it
//! from a separate process.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::cache::{ConfigCell, GarbageCollector, Preloader, StatsCollector};
use crate::config::SchedulerSettings;
use crate::infra::state::StateStore;

pub struct Scheduler {
    gc: Arc<GarbageCollector>,
    preloader: Arc<Preloader>,
    stats: Arc<StatsCollector>,
    config: Arc<ConfigCell>,
    states: StateStore,
    preload_tick: Duration,
    stats_every_gc_pass: bool,
}

impl Scheduler {
    pub fn new(
        gc: Arc<GarbageCollector>,
        preloader: Arc<Preloader>,
        stats: Arc<StatsCollector>,
        config: Arc<ConfigCell>,
        states: StateStore,
        settings: &SchedulerSettings,
    ) -> Self {
        Self {
            gc,
            preloader,
            stats,
            config,
            states,
            preload_tick: settings.preload_tick,
            stats_every_gc_pass: settings.stats_every_gc_pass,
        }
    }

    /// Runs both loops until `shutdown` fires, then waits for them to stop.
    pub async fn run(self, shutdown: broadcast::Sender<()>) {
        let this = Arc::new(self);
        this.refresh_config();

        match this.preloader.recover() {
            Ok(true) => info!("Abandoned preload run reset"),
            Ok(false) => {}
            Err(err) => warn!(error = %err, "Preload recovery failed"),
        }
        this.collect_stats();

        let mut tasks = JoinSet::new();
        tasks.spawn(Arc::clone(&this).gc_loop(shutdown.subscribe()));
        tasks.spawn(Arc::clone(&this).preload_loop(shutdown.subscribe()));

        info!(
            preload_tick_ms = this.preload_tick.as_millis() as u64,
            gc_interval_secs = this.gc.schedule().interval_secs,
            "Scheduler started"
        );

        while let Some(joined) = tasks.join_next().await {
            if let Err(err) = joined {
                warn!(error = %err, "Scheduler task ended abnormally");
            }
        }
        info!("Scheduler stopped");
    }

    async fn gc_loop(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        loop {
            let wait = self.gc.schedule().interval();
            tokio::select! {
                _ = tokio::time::sleep(wait) => {
                    self.refresh_config();
                    self.gc.on_tick().await;
                    if self.stats_every_gc_pass {
                        self.collect_stats();
                    }
                }
                _ = shutdown.recv() => {
                    debug!("Garbage collection loop shutting down");
                    return;
                }
            }
        }
    }

    async fn preload_loop(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        let mut interval = tokio::time::interval(self.preload_tick);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.refresh_config();
                    self.preloader.on_tick().await;
                }
                _ = shutdown.recv() => {
                    debug!("Preload loop shutting down");
                    return;
                }
            }
        }
    }

    fn refresh_config(&self) {
        match self.states.load_config() {
            Ok(Some(config)) => self.config.replace(config),
            Ok(None) => {}
            Err(err) => warn!(error = %err, "Cache configuration unreadable; keeping the last one"),
        }
    }

    fn collect_stats(&self) {
        if let Err(err) = self.stats.collect() {
            warn!(error = %err, "Cache stats could not be saved");
        }
    }
}
