//! Resolution, selection and access strategies.

use crate::error::{FailureDetail, PartialFailure, RepoError, RepoResult};
use log::{debug, warn};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Maps a shard key to one shard index.
pub trait ShardResolutionStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// # Errors
    /// - `Configuration` when no shard can be resolved.
    fn resolve(&self, shard_key: &str, shard_ids: &[String]) -> RepoResult<usize>;
}

/// Expands an optional target shard into the shard indices to touch.
pub trait ShardSelectionStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn select(&self, target: Option<usize>, shard_count: usize) -> Vec<usize>;
}

/// One unit of shard work.
pub struct ShardCall<'a, T> {
    pub shard_id: String,
    pub task: Box<dyn FnOnce() -> RepoResult<T> + Send + 'a>,
}

impl<'a, T> ShardCall<'a, T> {
    pub fn new(
        shard_id: impl Into<String>,
        task: impl FnOnce() -> RepoResult<T> + Send + 'a,
    ) -> Self {
        Self {
            shard_id: shard_id.into(),
            task: Box::new(task),
        }
    }
}

/// Runs shard calls and gathers their outcomes.
pub trait ShardAccessStrategy<T>: Send + Sync {
    fn name(&self) -> &'static str;

    fn apply<'a>(&self, calls: Vec<ShardCall<'a, T>>) -> AccessOutcome<T>
    where
        T: 'a;
}

/// Per-shard outcome of one fan-out.
#[derive(Debug)]
pub struct AccessOutcome<T> {
    pub completed: Vec<(String, T)>,
    pub failures: Vec<FailureDetail>,
    pub skipped: Vec<String>,
}

impl<T> Default for AccessOutcome<T> {
    fn default() -> Self {
        Self {
            completed: Vec::new(),
            failures: Vec::new(),
            skipped: Vec::new(),
        }
    }
}

impl<T> AccessOutcome<T> {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty() && self.skipped.is_empty()
    }

    /// Returns completed results, or a `PartialFailure` counting successful
    /// shards when any shard failed or was skipped.
    pub fn into_result(self) -> RepoResult<Vec<(String, T)>> {
        self.into_result_counting(|_| 1)
    }

    /// Like `into_result`, with `succeeded` summed from `count` over the
    /// completed results.
    pub fn into_result_counting(
        self,
        count: impl Fn(&T) -> u64,
    ) -> RepoResult<Vec<(String, T)>> {
        if self.is_success() {
            return Ok(self.completed);
        }
        let succeeded = self.completed.iter().map(|(_, value)| count(value)).sum();
        Err(RepoError::PartialFailure(PartialFailure {
            succeeded,
            failures: self.failures,
            skipped: self.skipped,
        }))
    }
}

/// Index of `shard_key` among `shard_count` shards: the first 8 bytes of its
/// SHA-256 digest as a big-endian integer, modulo the count.
pub fn hash_shard_index(shard_key: &str, shard_count: usize) -> Option<usize> {
    if shard_count == 0 {
        return None;
    }
    let digest = Sha256::digest(shard_key.as_bytes());
    let mut head = [0_u8; 8];
    head.copy_from_slice(&digest[..8]);
    let value = u64::from_be_bytes(head);
    usize::try_from(value % shard_count as u64).ok()
}

#[derive(Debug, Clone, Copy, Default)]
pub struct HashResolution;

impl ShardResolutionStrategy for HashResolution {
    fn name(&self) -> &'static str {
        "hash"
    }

    fn resolve(&self, shard_key: &str, shard_ids: &[String]) -> RepoResult<usize> {
        hash_shard_index(shard_key, shard_ids.len())
            .ok_or_else(|| RepoError::Configuration("no shards to resolve against".to_string()))
    }
}

/// Explicit shard-key table with hash fallback for unmapped keys.
#[derive(Debug, Clone)]
pub struct LookupResolution {
    table: BTreeMap<String, String>,
}

impl LookupResolution {
    /// # Errors
    /// - `Configuration` when a table entry names an unknown shard.
    pub fn new(table: BTreeMap<String, String>, shard_ids: &[String]) -> RepoResult<Self> {
        if let Some((key, target)) = table
            .iter()
            .find(|(_, target)| !shard_ids.contains(target))
        {
            return Err(RepoError::Configuration(format!(
                "lookup entry `{key}` targets unknown shard `{target}`"
            )));
        }
        Ok(Self { table })
    }
}

impl ShardResolutionStrategy for LookupResolution {
    fn name(&self) -> &'static str {
        "lookup"
    }

    fn resolve(&self, shard_key: &str, shard_ids: &[String]) -> RepoResult<usize> {
        match self.table.get(shard_key) {
            Some(target) => shard_ids
                .iter()
                .position(|id| id == target)
                .ok_or_else(|| {
                    RepoError::Configuration(format!("lookup target `{target}` is not a shard"))
                }),
            None => HashResolution.resolve(shard_key, shard_ids),
        }
    }
}

/// The target shard, or every shard when there is no target.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultSelection;

impl ShardSelectionStrategy for DefaultSelection {
    fn name(&self) -> &'static str {
        "default"
    }

    fn select(&self, target: Option<usize>, shard_count: usize) -> Vec<usize> {
        match target {
            Some(index) if index < shard_count => vec![index],
            Some(_) => Vec::new(),
            None => (0..shard_count).collect(),
        }
    }
}

/// The target shard, or only the first shard when there is no target.
#[derive(Debug, Clone, Copy, Default)]
pub struct FirstShardSelection;

impl ShardSelectionStrategy for FirstShardSelection {
    fn name(&self) -> &'static str {
        "first"
    }

    fn select(&self, target: Option<usize>, shard_count: usize) -> Vec<usize> {
        match target {
            Some(index) if index < shard_count => vec![index],
            Some(_) => Vec::new(),
            None if shard_count > 0 => vec![0],
            None => Vec::new(),
        }
    }
}

/// Runs calls in order and stops at the first failure; the remaining shards
/// are reported as skipped.
#[derive(Debug, Clone, Copy, Default)]
pub struct SequentialAccess;

impl<T: Send> ShardAccessStrategy<T> for SequentialAccess {
    fn name(&self) -> &'static str {
        "sequential"
    }

    fn apply<'a>(&self, calls: Vec<ShardCall<'a, T>>) -> AccessOutcome<T>
    where
        T: 'a,
    {
        let mut outcome = AccessOutcome::default();
        let mut calls = calls.into_iter();
        for call in calls.by_ref() {
            match (call.task)() {
                Ok(value) => outcome.completed.push((call.shard_id, value)),
                Err(err) => {
                    warn!(
                        "event=shard_call module=sharding status=error access=sequential shard={} error={err}",
                        call.shard_id
                    );
                    outcome.failures.push(FailureDetail::new(call.shard_id, err));
                    break;
                }
            }
        }
        outcome.skipped = calls.map(|call| call.shard_id).collect();
        outcome
    }
}

/// Runs every call on its own scoped thread and joins all of them.
#[derive(Debug, Clone, Copy, Default)]
pub struct ParallelAccess;

impl<T: Send> ShardAccessStrategy<T> for ParallelAccess {
    fn name(&self) -> &'static str {
        "parallel"
    }

    fn apply<'a>(&self, calls: Vec<ShardCall<'a, T>>) -> AccessOutcome<T>
    where
        T: 'a,
    {
        if calls.len() <= 1 {
            return SequentialAccess.apply(calls);
        }

        let results: Vec<(String, RepoResult<T>)> = std::thread::scope(|scope| {
            let handles: Vec<_> = calls
                .into_iter()
                .map(|call| {
                    let ShardCall { shard_id, task } = call;
                    (shard_id, scope.spawn(task))
                })
                .collect();

            handles
                .into_iter()
                .map(|(shard_id, handle)| {
                    let result = handle.join().unwrap_or_else(|_| {
                        Err(RepoError::backend("sharding", "shard task panicked"))
                    });
                    (shard_id, result)
                })
                .collect()
        });

        let mut outcome = AccessOutcome::default();
        for (shard_id, result) in results {
            match result {
                Ok(value) => outcome.completed.push((shard_id, value)),
                Err(err) => {
                    warn!(
                        "event=shard_call module=sharding status=error access=parallel shard={shard_id} error={err}"
                    );
                    outcome.failures.push(FailureDetail::new(shard_id, err));
                }
            }
        }
        debug!(
            "event=shard_fanout module=sharding status=ok access=parallel completed={} failed={}",
            outcome.completed.len(),
            outcome.failures.len()
        );
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::{
        hash_shard_index, DefaultSelection, FirstShardSelection, HashResolution,
        LookupResolution, ParallelAccess, SequentialAccess, ShardAccessStrategy, ShardCall,
        ShardResolutionStrategy, ShardSelectionStrategy,
    };
    use crate::error::RepoError;
    use std::collections::BTreeMap;

    fn ids() -> Vec<String> {
        vec!["a".to_string(), "b".to_string(), "c".to_string()]
    }

    fn calls<'a>(fail_on: &'a str) -> Vec<ShardCall<'a, u32>> {
        ids()
            .into_iter()
            .enumerate()
            .map(|(index, id)| {
                let fails = id == fail_on;
                ShardCall::new(id, move || {
                    if fails {
                        Err(RepoError::backend("test", "offline"))
                    } else {
                        Ok(index as u32)
                    }
                })
            })
            .collect()
    }

    #[test]
    fn hash_index_is_stable_and_in_range() {
        let first = hash_shard_index("customers/42", 3).unwrap();
        for _ in 0..10 {
            assert_eq!(hash_shard_index("customers/42", 3), Some(first));
        }
        assert!(first < 3);
        assert_eq!(hash_shard_index("x", 0), None);
        assert_eq!(
            HashResolution.resolve("customers/42", &ids()).unwrap(),
            first
        );
    }

    #[test]
    fn lookup_uses_table_then_falls_back_to_hash() {
        let table = BTreeMap::from([("eu".to_string(), "c".to_string())]);
        let lookup = LookupResolution::new(table, &ids()).unwrap();

        assert_eq!(lookup.resolve("eu", &ids()).unwrap(), 2);
        assert_eq!(
            lookup.resolve("us", &ids()).unwrap(),
            hash_shard_index("us", 3).unwrap()
        );

        let bad = BTreeMap::from([("eu".to_string(), "z".to_string())]);
        assert!(LookupResolution::new(bad, &ids()).is_err());
    }

    #[test]
    fn selection_strategies_expand_targets() {
        assert_eq!(DefaultSelection.select(Some(1), 3), vec![1]);
        assert_eq!(DefaultSelection.select(None, 3), vec![0, 1, 2]);
        assert_eq!(FirstShardSelection.select(Some(2), 3), vec![2]);
        assert_eq!(FirstShardSelection.select(None, 3), vec![0]);
    }

    #[test]
    fn sequential_access_stops_and_reports_skipped() {
        let outcome = SequentialAccess.apply(calls("b"));
        assert_eq!(outcome.completed, vec![("a".to_string(), 0)]);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].target, "b");
        assert_eq!(outcome.skipped, vec!["c".to_string()]);
    }

    #[test]
    fn parallel_access_collects_every_outcome() {
        let outcome = ParallelAccess.apply(calls("b"));
        assert_eq!(outcome.completed.len(), 2);
        assert!(outcome.skipped.is_empty());

        match outcome.into_result() {
            Err(RepoError::PartialFailure(partial)) => {
                assert_eq!(partial.succeeded, 2);
                assert_eq!(partial.failed_targets(), vec!["b"]);
            }
            other => panic!("expected partial failure, got {other:?}"),
        }
    }
}
