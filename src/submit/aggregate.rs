use crate::payload::{Console, Envelope, Job};

/// Collects section envelopes for one job and runs its final step once.
pub struct Aggregator {
    job: Box<dyn Job>,
    job_id: Option<u64>,
    expected: Option<usize>,
    received: usize,
    console: Console,
    finished: bool,
}

impl Aggregator {
    pub fn new(job: Box<dyn Job>, console: Console) -> Self {
        Self {
            job,
            job_id: None,
            expected: None,
            received: 0,
            console,
            finished: false,
        }
    }

    /// Records the id and section count the manager granted.
    pub fn set_expected(&mut self, job_id: u64, sections: usize) -> bool {
        self.job_id = Some(job_id);
        self.expected = Some(sections);
        self.try_finish()
    }

    /// Takes one section's envelope. Returns true if this completed the job.
    pub fn accept(&mut self, envelope: Envelope) -> bool {
        let job_id = self.job_id.unwrap_or_default();
        for line in envelope.console {
            tracing::info!(job_id, output = %line, "Node output");
            self.console.log(line);
        }
        for result in envelope.results {
            if let Err(e) = self.job.add_result(result) {
                tracing::warn!(job_id, error = %e, "Discarding result");
                self.console.log(format!("discarded result: {}", e));
            }
        }
        self.received += 1;
        self.try_finish()
    }

    fn try_finish(&mut self) -> bool {
        let Some(expected) = self.expected else {
            return false;
        };
        if self.finished || self.received < expected {
            return false;
        }
        self.finished = true;
        tracing::info!(job_id = self.job_id.unwrap_or_default(), sections = self.received, "All sections received, running final step");
        if let Err(e) = self.job.run_final(&mut self.console) {
            tracing::warn!(error = %e, "Final step failed");
            self.console.log(format!("final step failed: {}", e));
        }
        true
    }

    pub fn job_id(&self) -> Option<u64> {
        self.job_id
    }

    pub fn expected(&self) -> Option<usize> {
        self.expected
    }

    pub fn received(&self) -> usize {
        self.received
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn console(&self) -> &Console {
        &self.console
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::error::Result;
    use crate::payload::{JobResult, JobTask, ResultType};
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize)]
    struct Hit(u32);

    impl ResultType for Hit {
        const KIND: &'static str = "hit";
    }

    struct Counting {
        results: Vec<u32>,
        finals: Arc<AtomicUsize>,
    }

    impl Job for Counting {
        fn name(&self) -> &str {
            "counting"
        }

        fn setup(&mut self, _: &[String], _: &mut Console) -> Result<Vec<Box<dyn JobTask>>> {
            Ok(Vec::new())
        }

        fn add_result(&mut self, result: JobResult) -> Result<()> {
            self.results.push(result.decode::<Hit>()?.0);
            Ok(())
        }

        fn run_final(&mut self, console: &mut Console) -> Result<()> {
            self.finals.fetch_add(1, Ordering::SeqCst);
            console.log(format!("total {}", self.results.iter().sum::<u32>()));
            Ok(())
        }
    }

    fn aggregator() -> (Aggregator, Arc<AtomicUsize>) {
        let finals = Arc::new(AtomicUsize::new(0));
        let job = Counting {
            results: Vec::new(),
            finals: Arc::clone(&finals),
        };
        (Aggregator::new(Box::new(job), Console::new()), finals)
    }

    fn envelope(value: u32) -> Envelope {
        Envelope {
            console: vec![format!("section says {}", value)],
            results: vec![JobResult::new(1, &Hit(value)).unwrap()],
        }
    }

    #[test]
    fn final_step_runs_once_after_all_sections() {
        let (mut agg, finals) = aggregator();
        assert!(!agg.set_expected(1, 2));
        assert!(!agg.accept(envelope(3)));
        assert_eq!(finals.load(Ordering::SeqCst), 0);
        assert!(agg.accept(envelope(4)));
        assert_eq!(finals.load(Ordering::SeqCst), 1);
        assert!(agg.is_finished());

        // A stray extra envelope does not rerun the final step.
        assert!(!agg.accept(envelope(5)));
        assert_eq!(finals.load(Ordering::SeqCst), 1);
        assert_eq!(
            agg.console().lines(),
            &["section says 3", "section says 4", "total 7", "section says 5"]
        );
    }

    #[test]
    fn results_before_accept_are_counted() {
        let (mut agg, finals) = aggregator();
        assert!(!agg.accept(envelope(1)));
        assert!(agg.set_expected(9, 1));
        assert_eq!(finals.load(Ordering::SeqCst), 1);
        assert_eq!(agg.job_id(), Some(9));
    }

    #[test]
    fn failed_sections_still_count() {
        let (mut agg, finals) = aggregator();
        agg.set_expected(1, 1);
        assert!(agg.accept(Envelope::failure(vec!["loader crashed".to_string()])));
        assert_eq!(finals.load(Ordering::SeqCst), 1);
        assert_eq!(agg.console().lines(), &["loader crashed", "total 0"]);
    }
}
