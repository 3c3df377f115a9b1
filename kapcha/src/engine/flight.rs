use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tracing::debug;

use crate::cache::{CachedRecognition, Fingerprint};
use crate::error::{KapchaError, Result};

type FlightResult = Result<CachedRecognition>;
type FlightReceiver = watch::Receiver<Option<FlightResult>>;

/// Collapses concurrent recognitions of one fingerprint into a single
/// computation. The leader runs the work in a detached task, so a caller
/// disconnecting mid-flight never cancels the computation for the other
/// waiters.
pub struct FlightGroup {
    inflight: Mutex<HashMap<Fingerprint, FlightReceiver>>,
}

impl FlightGroup {
    pub fn new() -> Self {
        Self {
            inflight: Mutex::new(HashMap::new()),
        }
    }

    /// Number of computations currently in flight.
    pub fn len(&self) -> usize {
        self.inflight.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run `work` under single-flight for `fingerprint`: the first caller
    /// spawns it, every concurrent caller for the same key awaits the same
    /// outcome.
    pub async fn run<F, Fut>(self: &Arc<Self>, fingerprint: Fingerprint, work: F) -> FlightResult
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = FlightResult> + Send + 'static,
    {
        let rx = {
            let mut inflight = self.inflight.lock().unwrap();
            if let Some(rx) = inflight.get(&fingerprint) {
                debug!(fingerprint = %fingerprint, "Joining in-flight recognition");
                rx.clone()
            } else {
                let (tx, rx) = watch::channel(None);
                inflight.insert(fingerprint.clone(), rx.clone());
                let group = Arc::clone(self);
                let key = fingerprint.clone();
                let fut = work();
                tokio::spawn(async move {
                    let outcome = fut.await;
                    group.inflight.lock().unwrap().remove(&key);
                    // Receivers cloned before removal still observe the value.
                    let _ = tx.send(Some(outcome));
                });
                rx
            }
        };

        self.wait(&fingerprint, rx).await
    }

    async fn wait(&self, fingerprint: &Fingerprint, mut rx: FlightReceiver) -> FlightResult {
        match rx.wait_for(|outcome| outcome.is_some()).await {
            Ok(outcome) => outcome
                .clone()
                .unwrap_or_else(|| {
                    Err(KapchaError::InternalError(
                        "recognition flight resolved without an outcome".to_string(),
                    ))
                }),
            Err(_) => {
                // The task panicked before sending and never removed its map
                // entry; clear it so the fingerprint can recover.
                let mut inflight = self.inflight.lock().unwrap();
                if let Some(stale) = inflight.get(fingerprint) {
                    if stale.same_channel(&rx) {
                        inflight.remove(fingerprint);
                    }
                }
                Err(KapchaError::InternalError(
                    "recognition task aborted unexpectedly".to_string(),
                ))
            }
        }
    }
}

impl Default for FlightGroup {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processors::{CaptchaType, FinalValue};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn outcome(text: &str) -> CachedRecognition {
        CachedRecognition {
            raw_text: text.to_string(),
            value: FinalValue::Text(text.to_string()),
            captcha_type: CaptchaType::Text,
            confidence: None,
        }
    }

    fn key(name: &[u8]) -> Fingerprint {
        Fingerprint::compute(name, "text", "p", "o")
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_computation() {
        let group = Arc::new(FlightGroup::new());
        let runs = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..10 {
            let group = Arc::clone(&group);
            let runs = Arc::clone(&runs);
            handles.push(tokio::spawn(async move {
                group
                    .run(key(b"shared"), move || async move {
                        runs.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok(outcome("R"))
                    })
                    .await
            }));
        }

        for handle in handles {
            let result = handle.await.unwrap().unwrap();
            assert_eq!(result, outcome("R"));
        }
        assert_eq!(runs.load(Ordering::SeqCst), 1, "exactly one execution");
        assert!(group.is_empty(), "flight entry removed after completion");
    }

    #[tokio::test]
    async fn test_distinct_fingerprints_run_independently() {
        let group = Arc::new(FlightGroup::new());
        let runs = Arc::new(AtomicUsize::new(0));

        let a = {
            let runs = Arc::clone(&runs);
            group.run(key(b"a"), move || async move {
                runs.fetch_add(1, Ordering::SeqCst);
                Ok(outcome("a"))
            })
        };
        let b = {
            let runs = Arc::clone(&runs);
            group.run(key(b"b"), move || async move {
                runs.fetch_add(1, Ordering::SeqCst);
                Ok(outcome("b"))
            })
        };

        let (ra, rb) = tokio::join!(a, b);
        assert_eq!(ra.unwrap(), outcome("a"));
        assert_eq!(rb.unwrap(), outcome("b"));
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failure_broadcast_to_all_waiters() {
        let group = Arc::new(FlightGroup::new());

        let mut handles = Vec::new();
        for _ in 0..4 {
            let group = Arc::clone(&group);
            handles.push(tokio::spawn(async move {
                group
                    .run(key(b"failing"), || async {
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Err(KapchaError::RecognitionFailed("unparseable".to_string()))
                    })
                    .await
            }));
        }

        for handle in handles {
            let err = handle.await.unwrap().unwrap_err();
            assert!(matches!(err, KapchaError::RecognitionFailed(_)));
        }
        assert!(group.is_empty());
    }

    #[tokio::test]
    async fn test_flight_survives_caller_cancellation() {
        let group = Arc::new(FlightGroup::new());
        let runs = Arc::new(AtomicUsize::new(0));

        let leader = {
            let group = Arc::clone(&group);
            let runs = Arc::clone(&runs);
            tokio::spawn(async move {
                group
                    .run(key(b"abandoned"), move || async move {
                        runs.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok(outcome("survived"))
                    })
                    .await
            })
        };

        // Let the flight start, then abandon the caller.
        tokio::time::sleep(Duration::from_millis(10)).await;
        leader.abort();
        assert!(leader.await.unwrap_err().is_cancelled());

        // A late caller joins the still-running flight; the work closure it
        // supplies must never execute.
        let result = group
            .run(key(b"abandoned"), || async {
                panic!("joined flight must not re-run the work");
            })
            .await
            .unwrap();
        assert_eq!(result, outcome("survived"));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_sequential_runs_recompute() {
        let group = Arc::new(FlightGroup::new());
        let runs = Arc::new(AtomicUsize::new(0));

        for _ in 0..2 {
            let runs = Arc::clone(&runs);
            let result = group
                .run(key(b"twice"), move || async move {
                    runs.fetch_add(1, Ordering::SeqCst);
                    Ok(outcome("v"))
                })
                .await
                .unwrap();
            assert_eq!(result, outcome("v"));
        }
        // Single-flight dedupes concurrent work only; sequential calls are
        // the cache's job.
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }
}
