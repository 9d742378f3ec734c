use indicatif::{ProgressBar, ProgressStyle};
use rand::{rngs::StdRng, SeedableRng};
use rand_distr::{Distribution, Open01};
use rayon::prelude::*;
use serde::Serialize;
use std::{
    collections::BTreeMap,
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use crate::data::Subject;
use crate::error::SimulationError;
use crate::simulator::{driver::Simulator, trajectory::SubjectOutcome};

/// Cooperative cancellation flag shared with a running batch
///
/// Cancellation is observed between subjects; a subject that already started runs to
/// completion.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, Default)]
pub struct BatchOptions {
    /// Seed of the per-subject draws, for subjects without an explicit draw
    pub seed: u64,
    pub progress: bool,
    /// Subjects not started within this budget are reported as cancelled
    pub timeout: Option<Duration>,
    pub cancellation: Option<CancellationToken>,
}

impl BatchOptions {
    pub fn new(seed: u64) -> Self {
        BatchOptions {
            seed,
            ..Default::default()
        }
    }

    pub fn with_progress(mut self, progress: bool) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    fn should_stop(&self, started: Instant) -> bool {
        self.cancellation
            .as_ref()
            .is_some_and(CancellationToken::is_cancelled)
            || self.timeout.is_some_and(|limit| started.elapsed() >= limit)
    }
}

/// Uniform draw in `(0, 1)` for the subject at `index`, independent of scheduling
pub fn subject_draw(seed: u64, index: usize) -> f64 {
    let mut rng = StdRng::seed_from_u64(seed.wrapping_add(index as u64));
    Open01.sample(&mut rng)
}

/// Result of one subject within a batch
#[derive(Debug)]
pub struct SubjectResult {
    pub id: String,
    pub result: Result<SubjectOutcome, SimulationError>,
}

/// Results of a population, in input order
#[derive(Debug)]
pub struct BatchReport {
    results: Vec<SubjectResult>,
}

impl BatchReport {
    pub fn results(&self) -> &[SubjectResult] {
        &self.results
    }

    pub fn into_results(self) -> Vec<SubjectResult> {
        self.results
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Successfully simulated subjects
    pub fn outcomes(&self) -> impl Iterator<Item = &SubjectOutcome> {
        self.results.iter().filter_map(|r| r.result.as_ref().ok())
    }

    pub fn failures(&self) -> impl Iterator<Item = (&str, &SimulationError)> {
        self.results
            .iter()
            .filter_map(|r| r.result.as_ref().err().map(|e| (r.id.as_str(), e)))
    }

    pub fn summary(&self) -> BatchSummary {
        let mut summary = BatchSummary {
            total: self.results.len(),
            ..Default::default()
        };
        for result in &self.results {
            match &result.result {
                Ok(outcome) if outcome.event.censored => summary.censored += 1,
                Ok(_) => summary.events += 1,
                Err(SimulationError::Cancelled { .. }) => summary.cancelled += 1,
                Err(e) => {
                    summary.failed += 1;
                    *summary.failures.entry(e.kind().to_string()).or_insert(0) += 1;
                }
            }
        }
        summary
    }
}

/// Counts over a [BatchReport]
#[derive(Serialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub total: usize,
    pub events: usize,
    pub censored: usize,
    pub failed: usize,
    pub cancelled: usize,
    /// Failed subjects per error kind
    pub failures: BTreeMap<String, usize>,
}

impl fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} subjects: {} events, {} censored, {} failed, {} cancelled",
            self.total, self.events, self.censored, self.failed, self.cancelled
        )
    }
}

impl Simulator {
    /// Simulate every subject in parallel
    ///
    /// Each subject uses its own draw when it carries one, otherwise [subject_draw] with
    /// the batch seed and its position, so results do not depend on the thread count.
    pub fn simulate_population(&self, subjects: &[Subject], options: &BatchOptions) -> BatchReport {
        let started = Instant::now();
        let pb = if options.progress {
            ProgressBar::new(subjects.len() as u64)
        } else {
            ProgressBar::hidden()
        };
        if let Ok(style) =
            ProgressStyle::with_template("{bar:40.cyan/blue} {pos}/{len} subjects ({eta})")
        {
            pb.set_style(style);
        }

        let results: Vec<SubjectResult> = subjects
            .par_iter()
            .enumerate()
            .map(|(index, subject)| {
                let result = if options.should_stop(started) {
                    Err(SimulationError::Cancelled {
                        id: subject.id().to_string(),
                    })
                } else {
                    let draw = subject
                        .draw()
                        .unwrap_or_else(|| subject_draw(options.seed, index));
                    self.simulate_subject(subject, draw)
                };
                match &result {
                    Err(SimulationError::Cancelled { .. }) => {}
                    Err(e) => tracing::warn!(subject = subject.id(), error = %e, "subject failed"),
                    Ok(_) => {}
                }
                pb.inc(1);
                SubjectResult {
                    id: subject.id().to_string(),
                    result,
                }
            })
            .collect();
        pb.finish_and_clear();

        let report = BatchReport { results };
        let summary = report.summary();
        tracing::info!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            "{summary}"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn draws_are_reproducible_and_open() {
        for index in 0..100 {
            let u = subject_draw(42, index);
            assert!(u > 0.0 && u < 1.0);
            assert_eq!(u, subject_draw(42, index));
        }
        assert_ne!(subject_draw(42, 0), subject_draw(42, 1));
    }

    #[test]
    fn token_is_shared_between_clones() {
        let token = CancellationToken::new();
        let observer = token.clone();
        assert!(!observer.is_cancelled());
        token.cancel();
        assert!(observer.is_cancelled());
    }

    #[test]
    fn options_stop_on_cancellation_or_timeout() {
        let started = Instant::now();
        assert!(!BatchOptions::new(1).should_stop(started));

        let token = CancellationToken::new();
        let options = BatchOptions::new(1).with_cancellation(token.clone());
        assert!(!options.should_stop(started));
        token.cancel();
        assert!(options.should_stop(started));

        let expired = BatchOptions::new(1).with_timeout(Duration::ZERO);
        assert!(expired.should_stop(started));
    }

    #[test]
    fn summary_display() {
        let summary = BatchSummary {
            total: 4,
            events: 2,
            censored: 1,
            failed: 1,
            cancelled: 0,
            failures: BTreeMap::from([("domain".to_string(), 1)]),
        };
        assert_eq!(
            summary.to_string(),
            "4 subjects: 2 events, 1 censored, 1 failed, 0 cancelled"
        );
    }
}
