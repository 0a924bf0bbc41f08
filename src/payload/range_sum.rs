//! Sums the integers `1..=n` in chunks. Mostly useful for trying a cluster out.
//!
//! Arguments: `[n] [chunks]`, defaulting to `1000` and `10`.

use serde::{Deserialize, Serialize};

use crate::error::{ClusterError, Result};
use crate::payload::job::{Console, Job, JobTask, TaskContext};
use crate::payload::loader::Manifest;
use crate::payload::result::{JobResult, ResultType};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialSum {
    pub start: u64,
    pub end: u64,
    pub sum: u64,
}

impl ResultType for PartialSum {
    const KIND: &'static str = "range-sum/partial";
}

/// Sum of `start..=end`, or a payload error if it does not fit in a u64.
fn range_sum(start: u64, end: u64) -> Result<u64> {
    if end < start {
        return Ok(0);
    }
    let count = u128::from(end - start) + 1;
    let ends = u128::from(start) + u128::from(end);
    // One of the two factors is always even.
    let sum = if count % 2 == 0 {
        (count / 2).checked_mul(ends)
    } else {
        count.checked_mul(ends / 2)
    };
    sum.and_then(|sum| u64::try_from(sum).ok())
        .ok_or_else(|| ClusterError::Payload(format!("sum of {}..={} overflows u64", start, end)))
}

struct SumChunk {
    start: u64,
    end: u64,
}

impl JobTask for SumChunk {
    fn run(&self, ctx: &mut TaskContext<'_>) -> Result<()> {
        let sum = range_sum(self.start, self.end)?;
        ctx.log(format!("task {}: {}..={} = {}", ctx.index(), self.start, self.end, sum));
        ctx.emit(&PartialSum {
            start: self.start,
            end: self.end,
            sum,
        })
    }
}

#[derive(Debug, Default)]
pub struct RangeSum {
    nodes: usize,
    partials: Vec<PartialSum>,
}

impl RangeSum {
    pub const NAME: &'static str = "range-sum";

    pub fn new(nodes: usize) -> Self {
        Self {
            nodes,
            partials: Vec::new(),
        }
    }

    pub fn from_manifest(manifest: &Manifest) -> Box<dyn Job> {
        Box::new(Self::new(manifest.nodes.unwrap_or(1)))
    }

    pub fn total(&self) -> u128 {
        self.partials.iter().map(|p| u128::from(p.sum)).sum()
    }

    fn parse_args(args: &[String]) -> Result<(u64, u64)> {
        let parse = |index: usize, default: u64| -> Result<u64> {
            match args.get(index) {
                Some(raw) => raw
                    .parse()
                    .map_err(|_| ClusterError::Payload(format!("not a number: {:?}", raw))),
                None => Ok(default),
            }
        };
        let n = parse(0, 1000)?;
        let chunks = parse(1, 10)?.max(1);
        Ok((n, chunks))
    }
}

impl Job for RangeSum {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn requested_nodes(&self) -> usize {
        self.nodes
    }

    fn setup(&mut self, args: &[String], _console: &mut Console) -> Result<Vec<Box<dyn JobTask>>> {
        let (n, chunks) = Self::parse_args(args)?;
        let chunk_len = n.div_ceil(chunks).max(1);
        let mut tasks: Vec<Box<dyn JobTask>> = Vec::new();
        let mut start = 1;
        while start <= n {
            let end = start.saturating_add(chunk_len - 1).min(n);
            tasks.push(Box::new(SumChunk { start, end }));
            match end.checked_add(1) {
                Some(next) => start = next,
                None => break,
            }
        }
        Ok(tasks)
    }

    fn run_initial(&mut self, args: &[String], console: &mut Console) -> Result<()> {
        let (n, chunks) = Self::parse_args(args)?;
        console.log(format!("Summing 1..={} in {} chunks", n, chunks));
        Ok(())
    }

    fn add_result(&mut self, result: JobResult) -> Result<()> {
        self.partials.push(result.decode::<PartialSum>()?);
        Ok(())
    }

    fn run_final(&mut self, console: &mut Console) -> Result<()> {
        self.partials.sort_by_key(|p| p.start);
        let covered: u128 = self
            .partials
            .iter()
            .map(|p| u128::from(p.end - p.start) + 1)
            .sum();
        console.log(format!(
            "Sum = {} ({} chunks, {} numbers)",
            self.total(),
            self.partials.len(),
            covered
        ));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::partition::{run_section, SectionSpec};

    fn args(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn setup_splits_into_chunks() {
        let mut job = RangeSum::new(1);
        let tasks = job.setup(&args(&["100", "4"]), &mut Console::new()).unwrap();
        assert_eq!(tasks.len(), 4);
    }

    #[test]
    fn sections_and_final_step_add_up() {
        let args = args(&["100", "4"]);
        let mut submitter = RangeSum::new(2);
        for section in 0..2 {
            let spec = SectionSpec {
                job_id: 1,
                section_id: section,
                total_sections: 2,
            };
            let mut node_side = RangeSum::new(2);
            let results = run_section(&mut node_side, &spec, &args, &mut Console::new()).unwrap();
            assert_eq!(results.len(), 2);
            for result in results {
                submitter.add_result(result).unwrap();
            }
        }
        assert_eq!(submitter.total(), 5050);

        let mut console = Console::new();
        submitter.run_final(&mut console).unwrap();
        assert_eq!(console.lines(), &["Sum = 5050 (4 chunks, 100 numbers)"]);
    }

    #[test]
    fn range_sum_matches_iteration() {
        for (start, end) in [(1, 100), (51, 100), (7, 7), (0, 9), (3, 12)] {
            assert_eq!(range_sum(start, end).unwrap(), (start..=end).sum::<u64>());
        }
        assert_eq!(range_sum(5, 4).unwrap(), 0);
    }

    #[test]
    fn range_sum_near_the_limit() {
        // 1 + 2 + ... + n fits in a u64 up to n = 6_074_000_999
        assert_eq!(range_sum(1, 6_074_000_999).unwrap(), 18_446_744_070_963_499_500);
        assert!(matches!(
            range_sum(1, 6_074_001_000),
            Err(ClusterError::Payload(_))
        ));
        assert!(range_sum(u64::MAX, u64::MAX).is_ok());
        assert!(range_sum(u64::MAX - 1, u64::MAX).is_err());
    }

    #[test]
    fn bad_arguments_are_payload_errors() {
        let mut job = RangeSum::new(1);
        let err = job.setup(&args(&["lots"]), &mut Console::new()).err().unwrap();
        assert!(matches!(err, ClusterError::Payload(_)));
    }
}
