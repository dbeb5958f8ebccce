use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::{Id, JoinError, JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::provider::LogSourceProvider;
use crate::source::{LogEvent, SourceDescriptor, StreamOptions};
use crate::tailer::{Tailer, TailerExit, TailerReport};

/// Configuration for the merge buffer and the tailer worker pool
#[derive(Clone, Debug)]
pub struct MuxConfig {
    /// Events buffered between tailers and the consumer
    pub buffer_capacity: usize,
    /// Tailers running at the same time. Further sources wait in a queue.
    pub max_tailers: usize,
}

impl Default for MuxConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: 256,
            max_tailers: 64,
        }
    }
}

/// Merges the events of every tailer of a session into one sequence
pub struct Multiplexer {
    events: mpsc::Receiver<LogEvent>,
    reports: mpsc::UnboundedReceiver<TailerReport>,
    dispatcher: JoinHandle<()>,
    sources: Vec<SourceDescriptor>,
    cancel: CancellationToken,
    complete: bool,
}

impl Multiplexer {
    /// Start tailing `sources`. Tailers stop when `cancel` fires.
    pub fn start(
        sources: Vec<SourceDescriptor>,
        options: StreamOptions,
        provider: Arc<dyn LogSourceProvider>,
        cancel: CancellationToken,
        config: MuxConfig,
    ) -> Self {
        let (event_tx, events) = mpsc::channel(config.buffer_capacity.max(1));
        let (report_tx, reports) = mpsc::unbounded_channel();

        let dispatcher = Dispatcher {
            pending: sources.iter().cloned().collect(),
            options,
            provider,
            events: event_tx,
            reports: report_tx,
            cancel: cancel.clone(),
            permits: Arc::new(Semaphore::new(config.max_tailers.max(1))),
        };

        Self {
            events,
            reports,
            dispatcher: tokio::spawn(dispatcher.run()),
            sources,
            cancel,
            complete: false,
        }
    }

    /// Next merged event. Returns `None` once every tailer has stopped, and
    /// keeps returning `None` from then on.
    pub async fn next(&mut self) -> Option<LogEvent> {
        if self.complete {
            return None;
        }
        let event = self.events.recv().await;
        if event.is_none() {
            self.complete = true;
            debug!("All {} tailer(s) finished", self.sources.len());
        }
        event
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn sources(&self) -> &[SourceDescriptor] {
        &self.sources
    }

    /// Cancel every tailer and wait up to `grace` for them to stop; stragglers
    /// are aborted. Returns one report per source.
    pub async fn shutdown(mut self, grace: Duration) -> Vec<TailerReport> {
        self.cancel.cancel();
        self.events.close();

        if tokio::time::timeout(grace, &mut self.dispatcher).await.is_err() {
            warn!("Tailers still running after {:?}, aborting them", grace);
            self.dispatcher.abort();
            let _ = (&mut self.dispatcher).await;
        }

        let mut by_source = HashMap::new();
        while let Ok(report) = self.reports.try_recv() {
            by_source.insert(report.source.clone(), report);
        }
        self.sources
            .iter()
            .map(|source| {
                by_source
                    .remove(source)
                    .unwrap_or_else(|| TailerReport::new(source.clone(), TailerExit::Aborted, 0))
            })
            .collect()
    }
}

impl Drop for Multiplexer {
    fn drop(&mut self) {
        // Dropping the dispatcher's JoinSet aborts any tailer still running
        self.cancel.cancel();
        self.dispatcher.abort();
    }
}

/// Starts tailers from a FIFO of pending sources as worker slots free up
struct Dispatcher {
    pending: VecDeque<SourceDescriptor>,
    options: StreamOptions,
    provider: Arc<dyn LogSourceProvider>,
    events: mpsc::Sender<LogEvent>,
    reports: mpsc::UnboundedSender<TailerReport>,
    cancel: CancellationToken,
    permits: Arc<Semaphore>,
}

impl Dispatcher {
    async fn run(self) {
        let Dispatcher {
            mut pending,
            options,
            provider,
            events,
            reports,
            cancel,
            permits,
        } = self;
        let mut tailers = JoinSet::new();
        let mut running: HashMap<Id, SourceDescriptor> = HashMap::new();
        let mut started = HashSet::new();

        while let Some(source) = pending.pop_front() {
            if !started.insert(source.clone()) {
                warn!("[{}] Duplicate source ignored", source);
                continue;
            }

            let permit = loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break None,
                    Some(joined) = tailers.join_next_with_id(), if !tailers.is_empty() => {
                        finished(&reports, joined, &mut running);
                    }
                    permit = permits.clone().acquire_owned() => break permit.ok(),
                }
            };
            let Some(permit) = permit else {
                let _ = reports.send(TailerReport::new(source, TailerExit::NotStarted, 0));
                continue;
            };

            let tailer = Tailer::new(source.clone(), options.clone());
            let provider = provider.clone();
            let events = events.clone();
            let cancel = cancel.clone();
            let handle = tailers.spawn(async move {
                let report = tailer.run(provider.as_ref(), events, cancel).await;
                drop(permit);
                report
            });
            running.insert(handle.id(), source);
        }

        // The consumer sees completion once the last tailer drops its sender
        drop(events);

        while let Some(joined) = tailers.join_next_with_id().await {
            finished(&reports, joined, &mut running);
        }
    }
}

fn finished(
    reports: &mpsc::UnboundedSender<TailerReport>,
    joined: Result<(Id, TailerReport), JoinError>,
    running: &mut HashMap<Id, SourceDescriptor>,
) {
    let report = match joined {
        Ok((id, report)) => {
            running.remove(&id);
            report
        }
        Err(e) => {
            let Some(source) = running.remove(&e.id()) else {
                return;
            };
            error!("[{}] Tailer task failed: {}", source, e);
            TailerReport::new(source, TailerExit::Aborted, 0)
        }
    };
    let _ = reports.send(report);
}
