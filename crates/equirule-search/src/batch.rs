//! Parallel enumeration over many template pairs.
//!
//! Each pair gets its own catalog and search state. Rules reach the sink in
//! input order, whatever order the workers finish in.

use crate::config::{BatchConfig, EnumeratorConfig};
use crate::enumerator::{enumerate_pair, EnumerateError};
use crate::oracle::LogicOracle;
use parking_lot::Mutex;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplatePair {
    pub source: String,
    pub target: String,
}

impl TemplatePair {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
        }
    }
}

/// Serialized rules collected from all workers.
#[derive(Debug, Default)]
pub struct RuleSink {
    rules: Mutex<Vec<String>>,
}

impl RuleSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append<I: IntoIterator<Item = String>>(&self, rules: I) {
        self.rules.lock().extend(rules);
    }

    pub fn len(&self) -> usize {
        self.rules.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.lock().is_empty()
    }

    pub fn snapshot(&self) -> Vec<String> {
        self.rules.lock().clone()
    }

    pub fn into_rules(self) -> Vec<String> {
        self.rules.into_inner()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    pub pairs: usize,
    pub enumerated: usize,
    /// Pairs dropped on a recoverable error.
    pub skipped: usize,
    pub timed_out: usize,
    pub rules: usize,
    pub oracle_calls: u64,
}

#[derive(Debug, Error)]
pub enum BatchError {
    #[error("template pair #{index} failed: {error}")]
    Enumerate {
        index: usize,
        #[source]
        error: EnumerateError,
    },

    #[error("failed to build worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

enum PairOutcome {
    Enumerated {
        rules: Vec<String>,
        timed_out: bool,
        oracle_calls: u64,
    },
    Skipped,
}

/// Enumerate every pair, appending discovered rules to `sink`.
///
/// Recoverable per-pair errors are logged and counted; any other error
/// aborts the batch.
pub fn enumerate_pairs(
    pairs: &[TemplatePair],
    config: &BatchConfig,
    oracle: &dyn LogicOracle,
    sink: &RuleSink,
) -> Result<BatchReport, BatchError> {
    let run = || -> Result<Vec<PairOutcome>, BatchError> {
        pairs
            .par_iter()
            .enumerate()
            .map(|(index, pair)| run_pair(index, pair, &config.enumerator, oracle))
            .collect()
    };
    let outcomes = match config.threads {
        Some(threads) => rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build()?
            .install(run)?,
        None => run()?,
    };

    let mut report = BatchReport {
        pairs: pairs.len(),
        ..BatchReport::default()
    };
    for outcome in outcomes {
        match outcome {
            PairOutcome::Enumerated {
                rules,
                timed_out,
                oracle_calls,
            } => {
                report.enumerated += 1;
                report.rules += rules.len();
                sink.append(rules);
                report.oracle_calls += oracle_calls;
                if timed_out {
                    report.timed_out += 1;
                }
            }
            PairOutcome::Skipped => report.skipped += 1,
        }
    }
    tracing::info!(
        pairs = report.pairs,
        skipped = report.skipped,
        rules = report.rules,
        "batch finished"
    );
    Ok(report)
}

fn run_pair(
    index: usize,
    pair: &TemplatePair,
    config: &EnumeratorConfig,
    oracle: &dyn LogicOracle,
) -> Result<PairOutcome, BatchError> {
    match enumerate_pair(&pair.source, &pair.target, config, oracle) {
        Ok(outcome) => Ok(PairOutcome::Enumerated {
            rules: outcome.rules.iter().map(|rule| rule.to_text()).collect(),
            timed_out: outcome.timed_out,
            oracle_calls: outcome.stats.oracle_calls,
        }),
        Err(error) if error.is_recoverable() => {
            tracing::warn!(
                pair = index,
                source = %pair.source,
                target = %pair.target,
                error = %error,
                "skipping template pair"
            );
            Ok(PairOutcome::Skipped)
        }
        Err(error) => Err(BatchError::Enumerate { index, error }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::IsomorphismOracle;

    fn dry_run(threads: Option<usize>) -> BatchConfig {
        let mut config = BatchConfig {
            threads,
            ..BatchConfig::default()
        };
        config.enumerator.dry_run = true;
        config
    }

    #[test]
    fn sink_collects_rules_from_every_pair() {
        let pairs = vec![
            TemplatePair::new("Filter<p0 a0>(Input<t0>)", "Filter<p1 a1>(Input<t1>)"),
            TemplatePair::new("Proj<a0>(Input<t0>)", "Input<t1>"),
            TemplatePair::new("Input<t0>", "Input<t1>"),
        ];
        let sink = RuleSink::new();
        let report = enumerate_pairs(&pairs, &dry_run(Some(2)), &IsomorphismOracle, &sink).unwrap();

        assert_eq!(report.pairs, 3);
        assert_eq!(report.enumerated, 3);
        assert_eq!(report.skipped, 0);
        assert_eq!(report.rules, 2);
        assert_eq!(
            sink.into_rules(),
            vec![
                "Filter<p0 a0>(Input<t0>)|Filter<p1 a1>(Input<t1>)|AttrsSub(a0,t0);TableEq(t0,t1);AttrsEq(a0,a1);PredicateEq(p0,p1)".to_string(),
                "Input<t0>|Input<t1>|TableEq(t0,t1)".to_string(),
            ]
        );
    }

    #[test]
    fn rules_follow_input_order() {
        let filter = TemplatePair::new("Filter<p0 a0>(Input<t0>)", "Filter<p1 a1>(Input<t1>)");
        let input = TemplatePair::new("Input<t0>", "Input<t1>");
        let pairs: Vec<TemplatePair> = (0..8)
            .map(|i| if i % 2 == 0 { input.clone() } else { filter.clone() })
            .collect();
        let expected: Vec<String> = (0..8)
            .map(|i| {
                if i % 2 == 0 {
                    "Input<t0>|Input<t1>|TableEq(t0,t1)".to_string()
                } else {
                    "Filter<p0 a0>(Input<t0>)|Filter<p1 a1>(Input<t1>)|AttrsSub(a0,t0);TableEq(t0,t1);AttrsEq(a0,a1);PredicateEq(p0,p1)".to_string()
                }
            })
            .collect();
        for _ in 0..3 {
            let sink = RuleSink::new();
            enumerate_pairs(&pairs, &dry_run(Some(4)), &IsomorphismOracle, &sink).unwrap();
            assert_eq!(sink.into_rules(), expected);
        }
    }

    #[test]
    fn malformed_pairs_are_skipped() {
        let pairs = vec![
            TemplatePair::new("Sort(Input<t0>)", "Input<t1>"),
            TemplatePair::new("Input<t0>", "Input<t1>"),
        ];
        let sink = RuleSink::new();
        let report = enumerate_pairs(&pairs, &dry_run(None), &IsomorphismOracle, &sink).unwrap();
        assert_eq!(report.skipped, 1);
        assert_eq!(report.enumerated, 1);
        assert_eq!(sink.len(), 1);
    }
}
