use crate::error::Result;
use crate::payload::result::{JobResult, ResultType};

/// How a job's tasks are split across sections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Schedule {
    /// Contiguous blocks of `tasks / sections` tasks.
    #[default]
    Fixed,
    /// Interleaved tasks. Reserved; not implemented.
    Leapfrog,
}

impl std::fmt::Display for Schedule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Schedule::Fixed => write!(f, "fixed"),
            Schedule::Leapfrog => write!(f, "leapfrog"),
        }
    }
}

/// Text a job or task wants shown to the submitting user.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Console {
    lines: Vec<String>,
}

impl Console {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn log(&mut self, line: impl Into<String>) {
        self.lines.push(line.into());
    }

    pub fn extend(&mut self, lines: impl IntoIterator<Item = String>) {
        self.lines.extend(lines);
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn into_lines(self) -> Vec<String> {
        self.lines
    }
}

/// What a running task can see and produce.
pub struct TaskContext<'a> {
    job_id: u64,
    index: usize,
    console: &'a mut Console,
    results: &'a mut Vec<JobResult>,
}

impl<'a> TaskContext<'a> {
    pub fn new(
        job_id: u64,
        index: usize,
        console: &'a mut Console,
        results: &'a mut Vec<JobResult>,
    ) -> Self {
        Self {
            job_id,
            index,
            console,
            results,
        }
    }

    pub fn job_id(&self) -> u64 {
        self.job_id
    }

    /// The task's position in the job's task list.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn log(&mut self, line: impl Into<String>) {
        self.console.log(line);
    }

    /// Records a result tagged with this job's id.
    pub fn emit<T: ResultType>(&mut self, value: &T) -> Result<()> {
        self.results.push(JobResult::new(self.job_id, value)?);
        Ok(())
    }
}

/// One independently runnable unit of a job.
pub trait JobTask: Send {
    fn run(&self, ctx: &mut TaskContext<'_>) -> Result<()>;
}

/// A unit of distributed work.
///
/// Nodes call [`Job::setup`] and run their section of the tasks. The submitter
/// calls [`Job::run_initial`] once before submitting, feeds every returned
/// result to [`Job::add_result`], and calls [`Job::run_final`] once when all
/// sections are back.
pub trait Job: Send {
    fn name(&self) -> &str;

    fn requested_nodes(&self) -> usize {
        1
    }

    fn schedule(&self) -> Schedule {
        Schedule::Fixed
    }

    fn setup(&mut self, args: &[String], console: &mut Console) -> Result<Vec<Box<dyn JobTask>>>;

    fn run_initial(&mut self, _args: &[String], _console: &mut Console) -> Result<()> {
        Ok(())
    }

    fn add_result(&mut self, result: JobResult) -> Result<()>;

    fn run_final(&mut self, _console: &mut Console) -> Result<()> {
        Ok(())
    }
}
