use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ClusterError, Result};
use crate::protocol::to_wire_json;

/// A typed value that can travel as a [`JobResult`].
///
/// `KIND` is written next to the value so the receiving side can tell result
/// types apart without knowing their shape up front.
pub trait ResultType: Serialize + DeserializeOwned {
    const KIND: &'static str;
}

/// One self-describing result produced by a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    #[serde(rename = "type")]
    pub kind: String,
    pub job_id: u64,
    pub value: Value,
}

impl JobResult {
    pub fn new<T: ResultType>(job_id: u64, value: &T) -> Result<Self> {
        Ok(Self {
            kind: T::KIND.to_string(),
            job_id,
            value: serde_json::to_value(value)?,
        })
    }

    pub fn is<T: ResultType>(&self) -> bool {
        self.kind == T::KIND
    }

    /// Reconstitutes the concrete value, checking the type tag first.
    pub fn decode<T: ResultType>(&self) -> Result<T> {
        if !self.is::<T>() {
            return Err(ClusterError::Payload(format!(
                "expected result type {}, got {}",
                T::KIND,
                self.kind
            )));
        }
        Ok(serde_json::from_value(self.value.clone())?)
    }
}

#[derive(Serialize, Deserialize)]
struct ConsoleOutput {
    console_output: Vec<String>,
}

/// Everything one section sends back: captured console text, then its results.
///
/// Serialized as a JSON array whose first element is
/// `{"console_output": [...]}` and whose remaining elements are results.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Envelope {
    pub console: Vec<String>,
    pub results: Vec<JobResult>,
}

impl Envelope {
    /// An envelope with no results, carrying diagnostic text.
    pub fn failure(console: Vec<String>) -> Self {
        Self {
            console,
            results: Vec::new(),
        }
    }

    fn to_value(&self) -> Result<Value> {
        let mut items = Vec::with_capacity(self.results.len() + 1);
        items.push(serde_json::to_value(ConsoleOutput {
            console_output: self.console.clone(),
        })?);
        for result in &self.results {
            items.push(serde_json::to_value(result)?);
        }
        Ok(Value::Array(items))
    }

    /// JSON safe to put in a single frame field.
    pub fn to_wire(&self) -> Result<String> {
        to_wire_json(&self.to_value()?)
    }

    /// Plain JSON, as printed by the loader.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.to_value()?)?)
    }

    /// Parses either form produced by [`Envelope::to_wire`] or [`Envelope::to_json`].
    pub fn parse(text: &str) -> Result<Self> {
        let items: Vec<Value> = serde_json::from_str(text.trim())?;
        let mut items = items.into_iter();
        let console = match items.next() {
            Some(first) => serde_json::from_value::<ConsoleOutput>(first)?.console_output,
            None => return Err(ClusterError::Payload("empty result envelope".to_string())),
        };
        let results = items
            .map(serde_json::from_value)
            .collect::<std::result::Result<Vec<JobResult>, _>>()?;
        Ok(Self { console, results })
    }
}
