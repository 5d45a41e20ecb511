//! Ordered per-stage summaries.

use std::fmt::{self, Debug};
use std::path::PathBuf;

use crate::core::ItemKey;

/// One usable output of a stage, as seen by a summarizer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SummaryEntry {
    /// The output key.
    pub key: ItemKey,
    /// Where the output lives.
    pub location: PathBuf,
    /// The output data.
    pub data: Vec<u8>,
}

/// Builds a stage's summary artifact from its outputs.
///
/// Always called once, after every worker has finished, with entries sorted
/// by key, so the result is independent of worker scheduling.
pub trait Summarize: Send + Sync + Debug {
    /// Returns the summary artifact.
    ///
    /// # Errors
    ///
    /// An error leaves the previous summary in place and is logged.
    fn summarize(&self, stage: &str, entries: &[SummaryEntry]) -> anyhow::Result<Vec<u8>>;
}

/// A closure-based summarizer.
pub struct FnSummary<F>
where
    F: Fn(&str, &[SummaryEntry]) -> anyhow::Result<Vec<u8>> + Send + Sync,
{
    func: F,
}

impl<F> FnSummary<F>
where
    F: Fn(&str, &[SummaryEntry]) -> anyhow::Result<Vec<u8>> + Send + Sync,
{
    /// Wraps a closure.
    pub const fn new(func: F) -> Self {
        Self { func }
    }
}

impl<F> Debug for FnSummary<F>
where
    F: Fn(&str, &[SummaryEntry]) -> anyhow::Result<Vec<u8>> + Send + Sync,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FnSummary")
    }
}

impl<F> Summarize for FnSummary<F>
where
    F: Fn(&str, &[SummaryEntry]) -> anyhow::Result<Vec<u8>> + Send + Sync,
{
    fn summarize(&self, stage: &str, entries: &[SummaryEntry]) -> anyhow::Result<Vec<u8>> {
        (self.func)(stage, entries)
    }
}

/// Writes one line per entry: `<key>\t<byte length>`. Handy as a table of
/// contents for a stage.
#[derive(Debug, Clone, Copy, Default)]
pub struct IndexSummary;

impl Summarize for IndexSummary {
    fn summarize(&self, _stage: &str, entries: &[SummaryEntry]) -> anyhow::Result<Vec<u8>> {
        Ok(entries
            .iter()
            .map(|entry| format!("{}\t{}\n", entry.key, entry.data.len()))
            .collect::<String>()
            .into_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(key: &str, data: &[u8]) -> SummaryEntry {
        SummaryEntry {
            key: ItemKey::new(key),
            location: PathBuf::from(format!("mem://s/{key}")),
            data: data.to_vec(),
        }
    }

    #[test]
    fn test_index_summary() {
        let bytes = IndexSummary
            .summarize("collapse", &[entry("a", b"xx"), entry("b", b"yyy")])
            .unwrap();
        assert_eq!(String::from_utf8(bytes).unwrap(), "a\t2\nb\t3\n");
    }

    #[test]
    fn test_fn_summary() {
        let summary = FnSummary::new(|stage: &str, entries: &[SummaryEntry]| {
            Ok(format!("{stage}:{}", entries.len()).into_bytes())
        });
        assert_eq!(summary.summarize("s", &[entry("a", b"")]).unwrap(), b"s:1".to_vec());
    }
}
