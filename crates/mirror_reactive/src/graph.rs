//! Dependency graph and flush loop

use crate::error::{ComputationError, ReactiveError};
use crate::scope::TrackingScope;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::hash::Hash;

/// Body of a computation
pub type ComputationBody<S, C> =
    Box<dyn FnMut(&mut C, &mut TrackingScope<S>) -> Result<(), ComputationError> + Send>;

/// Handle to a computation, invalidated by `stop`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ComputationId {
    index: u32,
    generation: u32,
}

impl fmt::Display for ComputationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "computation#{}v{}", self.index, self.generation)
    }
}

/// Context handed to computations, reporting which sources changed
pub trait InvalidationSource<S> {
    /// Take every source mutated since the previous call
    fn drain_invalidations(&mut self) -> Vec<S>;
}

/// Configuration for the reactive graph
#[derive(Debug, Clone)]
pub struct ReactiveConfig {
    /// Maximum number of passes one flush may take before giving up.
    ///
    /// A pass re-runs every dirty computation once; computations writing to
    /// sources read by others cause further passes.
    pub max_flush_passes: usize,
}

impl Default for ReactiveConfig {
    fn default() -> Self {
        Self {
            max_flush_passes: 100,
        }
    }
}

/// A computation whose body returned an error
#[derive(Debug, Clone)]
pub struct ComputationFailure {
    pub id: ComputationId,
    pub name: String,
    pub error: ComputationError,
}

/// Outcome of one flush
#[derive(Debug, Clone, Default)]
pub struct FlushReport {
    /// Passes taken before the graph settled
    pub passes: usize,
    /// Bodies that ran successfully
    pub executed: usize,
    /// Bodies that failed
    pub failures: Vec<ComputationFailure>,
}

impl FlushReport {
    /// Whether every body succeeded
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// Total bodies run, failed or not
    pub fn runs(&self) -> usize {
        self.executed + self.failures.len()
    }
}

/// Counters over the graph's lifetime
#[derive(Debug, Clone, Default)]
pub struct GraphStats {
    pub computations_created: u64,
    pub computations_stopped: u64,
    pub runs: u64,
    pub failures: u64,
    pub flushes: u64,
}

struct Computation<S, C> {
    name: String,
    body: Option<ComputationBody<S, C>>,
    sources: Vec<S>,
    dirty: bool,
    runs: u64,
}

struct Slot<S, C> {
    generation: u32,
    entry: Option<Computation<S, C>>,
}

/// Owner of every computation and of the source→dependents edges
pub struct ReactiveGraph<S, C> {
    config: ReactiveConfig,
    slots: Vec<Slot<S, C>>,
    free_list: Vec<u32>,
    dependents: HashMap<S, Vec<ComputationId>>,
    dirty: VecDeque<ComputationId>,
    stats: GraphStats,
}

impl<S, C> ReactiveGraph<S, C>
where
    S: Hash + Eq + Clone,
{
    /// Create a new graph
    pub fn new(config: ReactiveConfig) -> Self {
        Self {
            config,
            slots: Vec::new(),
            free_list: Vec::new(),
            dependents: HashMap::new(),
            dirty: VecDeque::new(),
            stats: GraphStats::default(),
        }
    }

    /// Register a computation. It first runs at the next flush.
    pub fn create<F>(&mut self, name: impl Into<String>, body: F) -> ComputationId
    where
        F: FnMut(&mut C, &mut TrackingScope<S>) -> Result<(), ComputationError> + Send + 'static,
    {
        let computation = Computation {
            name: name.into(),
            body: Some(Box::new(body)),
            sources: Vec::new(),
            dirty: true,
            runs: 0,
        };

        let id = if let Some(index) = self.free_list.pop() {
            let slot = &mut self.slots[index as usize];
            slot.entry = Some(computation);
            ComputationId {
                index,
                generation: slot.generation,
            }
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(Slot {
                generation: 0,
                entry: Some(computation),
            });
            ComputationId { index, generation: 0 }
        };

        self.dirty.push_back(id);
        self.stats.computations_created += 1;
        id
    }

    /// Permanently remove a computation and all of its dependency edges
    pub fn stop(&mut self, id: ComputationId) -> Result<(), ReactiveError> {
        let slot = self
            .slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .ok_or(ReactiveError::UnknownComputation(id))?;
        let computation = slot.entry.take().ok_or(ReactiveError::UnknownComputation(id))?;

        slot.generation = slot.generation.wrapping_add(1);
        self.free_list.push(id.index);
        for source in &computation.sources {
            self.unlink(source, id);
        }
        self.stats.computations_stopped += 1;
        Ok(())
    }

    /// Whether `id` is still registered
    pub fn is_alive(&self, id: ComputationId) -> bool {
        self.get(id).is_some()
    }

    /// Number of live computations
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.entry.is_some()).count()
    }

    /// Whether there are no live computations
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// How many times a computation has run
    pub fn run_count(&self, id: ComputationId) -> Option<u64> {
        self.get(id).map(|c| c.runs)
    }

    /// Sources a computation read during its last run
    pub fn sources_of(&self, id: ComputationId) -> Option<&[S]> {
        self.get(id).map(|c| c.sources.as_slice())
    }

    /// Number of computations depending on `source`
    pub fn dependent_count(&self, source: &S) -> usize {
        self.dependents.get(source).map_or(0, Vec::len)
    }

    /// Whether any computation is waiting for the next flush
    pub fn has_pending(&self) -> bool {
        !self.dirty.is_empty()
    }

    /// Get statistics
    pub fn stats(&self) -> &GraphStats {
        &self.stats
    }

    /// Schedule every dependent of `source`. Returns how many were newly scheduled.
    pub fn invalidate(&mut self, source: &S) -> usize {
        let Some(ids) = self.dependents.get(source) else {
            return 0;
        };

        let mut scheduled = 0;
        for id in ids {
            let computation = self
                .slots
                .get_mut(id.index as usize)
                .filter(|slot| slot.generation == id.generation)
                .and_then(|slot| slot.entry.as_mut());
            if let Some(computation) = computation {
                if !computation.dirty {
                    computation.dirty = true;
                    self.dirty.push_back(*id);
                    scheduled += 1;
                }
            }
        }
        scheduled
    }

    /// Re-run dirty computations until no invalidations remain
    pub fn flush(&mut self, ctx: &mut C) -> Result<FlushReport, ReactiveError>
    where
        C: InvalidationSource<S>,
    {
        self.stats.flushes += 1;
        let mut report = FlushReport::default();

        loop {
            for source in ctx.drain_invalidations() {
                self.invalidate(&source);
            }
            if self.dirty.is_empty() {
                break;
            }
            if report.passes == self.config.max_flush_passes {
                log::error!(
                    "Reactive flush exceeded {} passes with {} computations still dirty",
                    self.config.max_flush_passes,
                    self.dirty.len()
                );
                return Err(ReactiveError::FlushLimitExceeded {
                    passes: report.passes,
                });
            }

            report.passes += 1;
            let pass: Vec<ComputationId> = self.dirty.drain(..).collect();
            for id in pass {
                self.run(id, ctx, &mut report);
            }
        }

        Ok(report)
    }

    fn run(&mut self, id: ComputationId, ctx: &mut C, report: &mut FlushReport) {
        let Some(computation) = self.get_mut(id) else {
            return;
        };
        computation.dirty = false;
        let Some(mut body) = computation.body.take() else {
            return;
        };

        let mut scope = TrackingScope::for_computation(id);
        let result = body(ctx, &mut scope);
        self.rewire(id, scope.into_sources());

        let Some(computation) = self.get_mut(id) else {
            return;
        };
        computation.body = Some(body);
        computation.runs += 1;
        let name = computation.name.clone();
        self.stats.runs += 1;

        match result {
            Ok(()) => report.executed += 1,
            Err(error) => {
                log::warn!("Computation '{}' ({}) failed: {}", name, id, error);
                self.stats.failures += 1;
                report.failures.push(ComputationFailure { id, name, error });
            }
        }
    }

    /// Replace the edges of `id` with `sources`
    fn rewire(&mut self, id: ComputationId, sources: Vec<S>) {
        let old = match self.get_mut(id) {
            Some(computation) => std::mem::take(&mut computation.sources),
            None => return,
        };

        for source in old.iter().filter(|s| !sources.contains(s)) {
            self.unlink(source, id);
        }
        for source in sources.iter().filter(|s| !old.contains(s)) {
            self.dependents.entry(source.clone()).or_default().push(id);
        }

        if let Some(computation) = self.get_mut(id) {
            computation.sources = sources;
        }
    }

    fn unlink(&mut self, source: &S, id: ComputationId) {
        if let Some(ids) = self.dependents.get_mut(source) {
            ids.retain(|existing| *existing != id);
            if ids.is_empty() {
                self.dependents.remove(source);
            }
        }
    }

    fn get(&self, id: ComputationId) -> Option<&Computation<S, C>> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.entry.as_ref())
    }

    fn get_mut(&mut self, id: ComputationId) -> Option<&mut Computation<S, C>> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.entry.as_mut())
    }
}

impl<S, C> Default for ReactiveGraph<S, C>
where
    S: Hash + Eq + Clone,
{
    fn default() -> Self {
        Self::new(ReactiveConfig::default())
    }
}

impl<S, C> fmt::Debug for ReactiveGraph<S, C>
where
    S: Hash + Eq + Clone,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReactiveGraph")
            .field("computations", &self.len())
            .field("sources", &self.dependents.len())
            .field("dirty", &self.dirty.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[derive(Default)]
    struct Cells {
        values: HashMap<&'static str, i64>,
        changed: Vec<&'static str>,
        log: Vec<String>,
    }

    impl Cells {
        fn set(&mut self, key: &'static str, value: i64) {
            if self.values.insert(key, value) != Some(value) {
                self.changed.push(key);
            }
        }

        fn read(&self, scope: &mut TrackingScope<&'static str>, key: &'static str) -> i64 {
            scope.track(key);
            self.values.get(key).copied().unwrap_or(0)
        }
    }

    impl InvalidationSource<&'static str> for Cells {
        fn drain_invalidations(&mut self) -> Vec<&'static str> {
            std::mem::take(&mut self.changed)
        }
    }

    type Graph = ReactiveGraph<&'static str, Cells>;

    #[test]
    fn test_new_computation_runs_at_flush() {
        let mut graph = Graph::default();
        let mut cells = Cells::default();
        let id = graph.create("sum", |c: &mut Cells, s| {
            let total = c.read(s, "a") + c.read(s, "b");
            c.log.push(format!("sum={}", total));
            Ok(())
        });

        assert_eq!(graph.run_count(id), Some(0));
        let report = graph.flush(&mut cells).unwrap();
        assert_eq!(report.executed, 1);
        assert_eq!(cells.log, vec!["sum=0"]);
        assert_eq!(graph.sources_of(id).unwrap(), &["a", "b"]);
    }

    #[test]
    fn test_rerun_once_per_flush() {
        let mut graph = Graph::default();
        let mut cells = Cells::default();
        let id = graph.create("sum", |c: &mut Cells, s| {
            let _ = c.read(s, "a") + c.read(s, "b");
            Ok(())
        });
        graph.flush(&mut cells).unwrap();

        cells.set("a", 1);
        cells.set("b", 2);
        cells.set("a", 3);
        graph.flush(&mut cells).unwrap();
        assert_eq!(graph.run_count(id), Some(2));
    }

    #[test]
    fn test_unread_source_does_not_schedule() {
        let mut graph = Graph::default();
        let mut cells = Cells::default();
        let id = graph.create("a-only", |c: &mut Cells, s| {
            c.read(s, "a");
            Ok(())
        });
        graph.flush(&mut cells).unwrap();

        cells.set("b", 5);
        let report = graph.flush(&mut cells).unwrap();
        assert_eq!(report.runs(), 0);
        assert_eq!(graph.run_count(id), Some(1));
    }

    #[test]
    fn test_dependencies_follow_last_run() {
        let mut graph = Graph::default();
        let mut cells = Cells::default();
        let id = graph.create("branch", |c: &mut Cells, s| {
            if c.read(s, "flag") == 0 {
                c.read(s, "left");
            } else {
                c.read(s, "right");
            }
            Ok(())
        });
        graph.flush(&mut cells).unwrap();
        assert_eq!(graph.dependent_count(&"left"), 1);

        cells.set("flag", 1);
        graph.flush(&mut cells).unwrap();
        assert_eq!(graph.dependent_count(&"left"), 0);
        assert_eq!(graph.dependent_count(&"right"), 1);

        cells.set("left", 9);
        graph.flush(&mut cells).unwrap();
        assert_eq!(graph.run_count(id), Some(2));
    }

    #[test]
    fn test_stop_removes_edges() {
        let mut graph = Graph::default();
        let mut cells = Cells::default();
        let id = graph.create("watch", |c: &mut Cells, s| {
            c.read(s, "a");
            Ok(())
        });
        graph.flush(&mut cells).unwrap();

        graph.stop(id).unwrap();
        assert!(!graph.is_alive(id));
        assert_eq!(graph.dependent_count(&"a"), 0);
        assert!(graph.stop(id).is_err());

        cells.set("a", 1);
        assert_eq!(graph.flush(&mut cells).unwrap().runs(), 0);
    }

    #[test]
    fn test_stopped_slot_reuse_does_not_alias() {
        let mut graph = Graph::default();
        let old = graph.create("old", |_: &mut Cells, _| Ok(()));
        graph.stop(old).unwrap();
        let new = graph.create("new", |_: &mut Cells, _| Ok(()));
        assert_ne!(old, new);
        assert!(!graph.is_alive(old));
        assert!(graph.is_alive(new));
    }

    #[test]
    fn test_failure_is_isolated() {
        let mut graph = Graph::default();
        let mut cells = Cells::default();
        graph.create("broken", |c: &mut Cells, s| {
            c.read(s, "a");
            Err(ComputationError::new("no such element"))
        });
        graph.create("healthy", |c: &mut Cells, s| {
            c.read(s, "a");
            c.log.push("healthy".into());
            Ok(())
        });

        let report = graph.flush(&mut cells).unwrap();
        assert_eq!(report.executed, 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].name, "broken");
        assert_eq!(cells.log, vec!["healthy"]);

        // The failed computation still tracked its read and runs again
        cells.set("a", 1);
        assert_eq!(graph.flush(&mut cells).unwrap().runs(), 2);
    }

    #[test]
    fn test_chained_writes_take_extra_passes() {
        let mut graph = Graph::default();
        let mut cells = Cells::default();
        graph.create("double", |c: &mut Cells, s| {
            let a = c.read(s, "a");
            c.set("doubled", a * 2);
            Ok(())
        });
        graph.create("show", |c: &mut Cells, s| {
            let d = c.read(s, "doubled");
            c.log.push(format!("doubled={}", d));
            Ok(())
        });
        graph.flush(&mut cells).unwrap();
        cells.log.clear();

        cells.set("a", 4);
        let report = graph.flush(&mut cells).unwrap();
        assert_eq!(report.passes, 2);
        assert_eq!(cells.log, vec!["doubled=8"]);
    }

    #[test]
    fn test_flush_limit() {
        let mut graph: Graph = ReactiveGraph::new(ReactiveConfig { max_flush_passes: 3 });
        let mut cells = Cells::default();
        graph.create("runaway", |c: &mut Cells, s| {
            let n = c.read(s, "n");
            c.set("n", n + 1);
            Ok(())
        });
        let err = graph.flush(&mut cells).unwrap_err();
        assert!(matches!(err, ReactiveError::FlushLimitExceeded { passes: 3 }));
    }
}
