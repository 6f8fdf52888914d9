//! Terminal progress: numbered steps on stdout and a spinner while waiting

use dwhctl_core::{ClusterStatus, Progress};
use std::io::Write;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const FRAMES: [char; 4] = ['\\', '|', '/', '-'];
const FRAME_INTERVAL: Duration = Duration::from_millis(100);

struct Ticker {
    stop: CancellationToken,
    task: JoinHandle<()>,
}

/// Draws a spinner on stderr, independent of how often the cluster is polled
#[derive(Default)]
pub struct Spinner {
    ticker: Mutex<Option<Ticker>>,
}

impl Spinner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_spinning(&self) -> bool {
        self.lock().as_ref().is_some_and(|ticker| !ticker.task.is_finished())
    }

    fn lock(&self) -> MutexGuard<'_, Option<Ticker>> {
        self.ticker.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn start(&self) {
        self.stop();

        let stop = CancellationToken::new();
        let token = stop.clone();
        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(FRAME_INTERVAL);
            let mut tick = 0usize;
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = interval.tick() => {
                        let mut stderr = std::io::stderr();
                        let _ = write!(stderr, "\r{}", frame(tick));
                        let _ = stderr.flush();
                        tick = tick.wrapping_add(1);
                    }
                }
            }
            let mut stderr = std::io::stderr();
            let _ = write!(stderr, "\r \r");
            let _ = stderr.flush();
        });

        *self.lock() = Some(Ticker { stop, task });
    }

    fn stop(&self) {
        if let Some(ticker) = self.lock().take() {
            ticker.stop.cancel();
        }
    }
}

/// Spinner character shown on the `tick`-th frame
pub fn frame(tick: usize) -> char {
    FRAMES[tick % FRAMES.len()]
}

impl Progress for Spinner {
    fn step(&self, number: &str, description: &str) {
        println!("{} {}", number, description);
    }

    fn waiting(&self, _identifier: &str, _status: &ClusterStatus) {
        self.start();
    }

    fn settled(&self, identifier: &str, status: Option<&ClusterStatus>) {
        self.stop();
        if let Some(status) = status {
            println!("Cluster {} is {}", identifier, status);
        }
    }
}

impl Drop for Spinner {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frames_cycle() {
        let frames: String = (0..6).map(frame).collect();
        assert_eq!(frames, "\\|/-\\|");
    }

    #[tokio::test]
    async fn test_spinner_stops_when_settled() {
        let spinner = Spinner::new();
        spinner.waiting("dwhcluster", &ClusterStatus::Creating);
        assert!(spinner.is_spinning());

        tokio::time::sleep(Duration::from_millis(20)).await;
        spinner.settled("dwhcluster", Some(&ClusterStatus::Available));
        assert!(!spinner.is_spinning());
    }

    #[tokio::test]
    async fn test_waiting_twice_replaces_ticker() {
        let spinner = Spinner::new();
        spinner.waiting("dwhcluster", &ClusterStatus::Creating);
        spinner.waiting("dwhcluster", &ClusterStatus::Deleting);
        assert!(spinner.is_spinning());
        spinner.settled("dwhcluster", None);
        assert!(!spinner.is_spinning());
    }
}
