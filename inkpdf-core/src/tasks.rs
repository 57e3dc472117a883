use std::collections::HashSet;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

pub type TaskId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    Save,
    Export,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskKind::Save => f.write_str("save"),
            TaskKind::Export => f.write_str("export"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TaskOutcome {
    pub id: TaskId,
    pub kind: TaskKind,
    pub destination: PathBuf,
    pub result: Result<PathBuf, String>,
}

impl TaskOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

pub struct BackgroundTasks {
    runtime: Handle,
    sender: UnboundedSender<TaskOutcome>,
    receiver: UnboundedReceiver<TaskOutcome>,
    in_flight: Arc<Mutex<HashSet<PathBuf>>>,
    pending: usize,
}

impl BackgroundTasks {
    pub fn new(runtime: Handle) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            runtime,
            sender,
            receiver,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            pending: 0,
        }
    }

    /// Runs `job` on the blocking pool. Returns `None` without scheduling anything while another
    /// job still writes to `destination`.
    pub fn submit<F>(&mut self, kind: TaskKind, destination: PathBuf, job: F) -> Option<TaskId>
    where
        F: FnOnce() -> Result<PathBuf> + Send + 'static,
    {
        if !self.in_flight.lock().insert(destination.clone()) {
            warn!(%kind, ?destination, "previous job for this destination still running");
            return None;
        }

        let id = Uuid::new_v4();
        let sender = self.sender.clone();
        let in_flight = Arc::clone(&self.in_flight);
        self.pending += 1;
        debug!(%id, %kind, ?destination, "job submitted");
        self.runtime.spawn_blocking(move || {
            let result = match panic::catch_unwind(AssertUnwindSafe(job)) {
                Ok(result) => result.map_err(|err| format!("{err:#}")),
                Err(payload) => Err(panic_reason(&*payload)),
            };
            if let Err(reason) = &result {
                warn!(%id, %kind, ?destination, %reason, "job failed");
            }
            in_flight.lock().remove(&destination);
            let _ = sender.send(TaskOutcome {
                id,
                kind,
                destination,
                result,
            });
        });
        Some(id)
    }

    pub fn is_busy(&self, destination: &Path) -> bool {
        self.in_flight.lock().contains(destination)
    }

    pub fn pending(&self) -> usize {
        self.pending
    }

    pub fn drain(&mut self) -> Vec<TaskOutcome> {
        let mut outcomes = Vec::new();
        while let Ok(outcome) = self.receiver.try_recv() {
            outcomes.push(outcome);
        }
        self.pending = self.pending.saturating_sub(outcomes.len());
        outcomes
    }

    pub async fn wait_all(&mut self) -> Vec<TaskOutcome> {
        let mut outcomes = Vec::new();
        while self.pending > 0 {
            match self.receiver.recv().await {
                Some(outcome) => {
                    self.pending -= 1;
                    outcomes.push(outcome);
                }
                None => break,
            }
        }
        outcomes
    }
}

fn panic_reason(payload: &(dyn std::any::Any + Send)) -> String {
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_owned());
    format!("job panicked: {message}")
}

/// Fixed-interval trigger polled from the interactive loop. A zero interval never fires.
#[derive(Debug, Clone, Copy)]
pub struct Autosave {
    interval: Duration,
    last: Instant,
}

impl Autosave {
    pub fn new(interval: Duration, now: Instant) -> Self {
        Self {
            interval,
            last: now,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn poll(&mut self, now: Instant) -> bool {
        if self.interval.is_zero() || now.saturating_duration_since(self.last) < self.interval {
            return false;
        }
        self.last = now;
        true
    }

    pub fn reset(&mut self, now: Instant) {
        self.last = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc as std_mpsc;

    #[tokio::test(flavor = "multi_thread")]
    async fn outcomes_arrive_once_per_job() {
        let mut tasks = BackgroundTasks::new(Handle::current());
        let ok = tasks
            .submit(TaskKind::Save, PathBuf::from("/tmp/a.json"), || {
                Ok(PathBuf::from("/tmp/a.json"))
            })
            .unwrap();
        let failed = tasks
            .submit(TaskKind::Export, PathBuf::from("/tmp/b.pdf"), || {
                Err(anyhow::anyhow!("disk full"))
            })
            .unwrap();
        assert_eq!(tasks.pending(), 2);

        let mut outcomes = tasks.wait_all().await;
        outcomes.sort_by_key(|o| o.kind == TaskKind::Export);
        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[0].id, ok);
        assert_eq!(outcomes[0].result, Ok(PathBuf::from("/tmp/a.json")));
        assert_eq!(outcomes[1].id, failed);
        assert_eq!(outcomes[1].result, Err("disk full".to_owned()));
        assert!(tasks.drain().is_empty());
        assert_eq!(tasks.pending(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn same_destination_is_single_flight() {
        let mut tasks = BackgroundTasks::new(Handle::current());
        let (release, gate) = std_mpsc::channel::<()>();
        let destination = PathBuf::from("/tmp/out.pdf");

        let first = tasks.submit(TaskKind::Export, destination.clone(), move || {
            let _ = gate.recv();
            Ok(PathBuf::from("/tmp/out.pdf"))
        });
        assert!(first.is_some());
        assert!(tasks.is_busy(&destination));
        assert!(tasks
            .submit(TaskKind::Export, destination.clone(), || Ok(PathBuf::new()))
            .is_none());
        assert!(tasks
            .submit(TaskKind::Export, PathBuf::from("/tmp/other.pdf"), || {
                Ok(PathBuf::from("/tmp/other.pdf"))
            })
            .is_some());

        release.send(()).unwrap();
        let outcomes = tasks.wait_all().await;
        assert_eq!(outcomes.len(), 2);
        assert!(!tasks.is_busy(&destination));
        assert!(tasks
            .submit(TaskKind::Export, destination, || Ok(PathBuf::new()))
            .is_some());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn panicking_job_still_reports_and_frees_its_destination() {
        let mut tasks = BackgroundTasks::new(Handle::current());
        let destination = PathBuf::from("/tmp/broken.pdf");
        let id = tasks
            .submit(TaskKind::Export, destination.clone(), || panic!("malformed xref"))
            .unwrap();

        let outcomes = tokio::time::timeout(Duration::from_secs(5), tasks.wait_all())
            .await
            .expect("a panicking job must still report");
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].id, id);
        assert_eq!(
            outcomes[0].result,
            Err("job panicked: malformed xref".to_owned())
        );
        assert!(!tasks.is_busy(&destination));
        assert_eq!(tasks.pending(), 0);
    }

    #[test]
    fn autosave_fires_on_the_interval() {
        let start = Instant::now();
        let mut autosave = Autosave::new(Duration::from_secs(60), start);
        assert!(!autosave.poll(start + Duration::from_secs(59)));
        assert!(autosave.poll(start + Duration::from_secs(60)));
        assert!(!autosave.poll(start + Duration::from_secs(61)));
        assert!(autosave.poll(start + Duration::from_secs(125)));
    }

    #[test]
    fn zero_interval_disables_autosave() {
        let start = Instant::now();
        let mut autosave = Autosave::new(Duration::ZERO, start);
        assert!(!autosave.poll(start + Duration::from_secs(3600)));
    }
}
