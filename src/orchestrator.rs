//! Discovery cycles and the fan-out of tailers.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::{BoxFuture, FutureExt};
use futures_util::stream::{FuturesUnordered, StreamExt};
use tokio::sync::Semaphore;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::catalog::Catalog;
use crate::config::{CyclePolicy, TailConfig};
use crate::error::Result;
use crate::selector::{SelectionSet, Selector};
use crate::service::{LogGroup, LogService, LogStream};
use crate::sink::LineSink;
use crate::tailer::{StreamTailer, TailOptions};

type PairKey = (LogGroup, LogStream);

type Reaped = (PairKey, std::result::Result<Result<()>, JoinError>);

/// Counters for one discovery cycle.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
struct CycleReport {
    cycle: u64,
    groups: usize,
    selected: usize,
    spawned: usize,
    cancelled: usize,
    failed: usize,
}

impl CycleReport {
    fn log(&self) {
        info!(
            cycle = self.cycle,
            groups = self.groups,
            selected = self.selected,
            spawned = self.spawned,
            cancelled = self.cancelled,
            failed = self.failed,
            "cycle summary"
        );
    }

    fn record(&mut self, reaped: Reaped) {
        let ((group, stream), result) = reaped;
        match result {
            Ok(Ok(())) => {
                debug!(group = %group, stream = %stream, "tailer stopped");
            }
            Ok(Err(e)) => {
                error!(group = %group, stream = %stream, error = %e, "tailer ended");
                self.failed += 1;
            }
            Err(e) => {
                error!(group = %group, stream = %stream, error = %e, "tailer panicked");
                self.failed += 1;
            }
        }
    }
}

/// Running tailers, keyed by the pair they follow.
///
/// A key stays present until its task has actually finished, even after
/// cancellation, so a pair never has two live sessions.
#[derive(Default)]
struct Fleet {
    running: HashMap<PairKey, CancellationToken>,
    pending: FuturesUnordered<BoxFuture<'static, Reaped>>,
}

impl Fleet {
    fn contains(&self, key: &PairKey) -> bool {
        self.running.contains_key(key)
    }

    fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    fn spawn<S: LogService>(&mut self, tailer: StreamTailer<S>, cancel: CancellationToken) {
        let key = (
            tailer.session().group().clone(),
            tailer.session().stream().clone(),
        );
        let handle = tokio::spawn(tailer.run(cancel.clone()));
        self.running.insert(key.clone(), cancel);
        self.pending
            .push(async move { (key, handle.await) }.boxed());
    }

    /// Cancels every tailer whose pair is not part of `selection`.
    fn retain(&mut self, selection: &SelectionSet) -> usize {
        let mut cancelled = 0;
        for ((group, stream), cancel) in &self.running {
            if !cancel.is_cancelled() && !selection.contains(group, stream) {
                info!(group = %group, stream = %stream, "stream no longer selected, stopping");
                cancel.cancel();
                cancelled += 1;
            }
        }
        cancelled
    }

    /// Waits for the next tailer to finish.
    async fn next(&mut self) -> Option<Reaped> {
        let reaped = self.pending.next().await?;
        self.running.remove(&reaped.0);
        Some(reaped)
    }

    async fn shutdown(&mut self) {
        for cancel in self.running.values() {
            cancel.cancel();
        }
        while self.next().await.is_some() {}
    }
}

/// Drives discovery cycles and keeps one tailer per selected stream.
pub struct Orchestrator<S> {
    service: Arc<S>,
    catalog: Catalog<S>,
    selector: Selector,
    config: Arc<TailConfig>,
    sink: Arc<dyn LineSink>,
    limiter: Option<Arc<Semaphore>>,
}

impl<S: LogService> Orchestrator<S> {
    /// Compiles the patterns of `config`. Invalid patterns are reported here,
    /// before any discovery happens.
    pub fn new(service: Arc<S>, config: TailConfig, sink: Arc<dyn LineSink>) -> Result<Self> {
        let selector = Selector::new(&config.group_pattern, &config.stream_pattern)?;
        let limiter = config
            .max_concurrent_fetches
            .map(|max| Arc::new(Semaphore::new(max.max(1))));

        Ok(Orchestrator {
            catalog: Catalog::new(Arc::clone(&service)),
            service,
            selector,
            config: Arc::new(config),
            sink,
            limiter,
        })
    }

    pub fn config(&self) -> &TailConfig {
        &self.config
    }

    /// Lists the catalog and applies the selector.
    pub async fn discover(&self) -> Result<SelectionSet> {
        self.selector.select(&self.catalog).await
    }

    /// Runs discovery cycles until `shutdown` is cancelled.
    ///
    /// Returns an error only when discovery fails; failures of individual
    /// tailers are logged and never stop the run.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        match self.config.cycle_policy {
            CyclePolicy::UntilAllEnded => self.run_until_all_ended(&shutdown).await,
            CyclePolicy::Rediscover(period) => self.run_rediscovering(period, &shutdown).await,
        }
    }

    fn spawn_tailer(
        &self,
        fleet: &mut Fleet,
        group: &LogGroup,
        stream: &LogStream,
        parent: &CancellationToken,
    ) {
        let tailer = StreamTailer::start(
            Arc::clone(&self.service),
            Arc::clone(&self.sink),
            group.clone(),
            stream.clone(),
            TailOptions::from_config(&self.config, self.limiter.clone()),
        );
        fleet.spawn(tailer, parent.child_token());
    }

    fn begin_cycle(&self, cycle: u64, selection: &SelectionSet) -> CycleReport {
        if selection.group_count() == 0 {
            info!(cycle, "No groups matched.");
        } else if selection.is_empty() {
            info!(cycle, groups = selection.group_count(), "No streams matched.");
        }

        CycleReport {
            cycle,
            groups: selection.group_count(),
            selected: selection.len(),
            ..CycleReport::default()
        }
    }

    async fn run_until_all_ended(&self, shutdown: &CancellationToken) -> Result<()> {
        let mut cycle = 0;

        loop {
            cycle += 1;
            let selection = self.discover().await?;
            let mut report = self.begin_cycle(cycle, &selection);

            // Every tailer of the cycle starts from the same point: no
            // cursor, and the run's single start floor.
            let mut fleet = Fleet::default();
            for (group, stream) in selection.pairs() {
                self.spawn_tailer(&mut fleet, group, stream, shutdown);
                report.spawned += 1;
            }

            while !fleet.is_empty() {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        fleet.shutdown().await;
                        return Ok(());
                    }
                    Some(reaped) = fleet.next() => report.record(reaped),
                }
            }
            report.log();

            tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                _ = tokio::time::sleep(self.config.cycle_delay) => {}
            }
        }
    }

    async fn run_rediscovering(&self, period: Duration, shutdown: &CancellationToken) -> Result<()> {
        let mut fleet = Fleet::default();
        let mut cycle = 0;

        let result = 'cycles: loop {
            cycle += 1;
            let selection = match self.discover().await {
                Ok(selection) => selection,
                Err(e) => break Err(e),
            };
            let mut report = self.begin_cycle(cycle, &selection);

            report.cancelled = fleet.retain(&selection);
            for (group, stream) in selection.pairs() {
                if fleet.contains(&(group.clone(), stream.clone())) {
                    continue;
                }
                self.spawn_tailer(&mut fleet, group, stream, shutdown);
                report.spawned += 1;
            }

            let deadline = tokio::time::sleep(period);
            tokio::pin!(deadline);

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        report.log();
                        break 'cycles Ok(());
                    }
                    _ = &mut deadline => break,
                    Some(reaped) = fleet.next(), if !fleet.is_empty() => report.record(reaped),
                }
            }
            report.log();
        };

        fleet.shutdown().await;

        result
    }
}
