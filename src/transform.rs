//! Single-pass filter/reduce pipeline.
//!
//! A [`Pipeline`] is a list of filters followed by a list of reductions. Each
//! entry runs through every filter and, if none rejects it, through every
//! reduction; no intermediate collection is built. Filters are kept apart from
//! reductions so a rejected entry never reaches aggregator state.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use smallvec::SmallVec;
use std::sync::Arc;

use crate::aggregate::{Method, Reducer, WildcardReducer};
use crate::store::Entry;
use crate::value::Record;
use crate::where_clause::Predicate;

/// One aggregated query result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Time the query ran, epoch milliseconds
    pub ts: i64,
    pub values: Record,
}

impl Snapshot {
    pub fn empty(ts: i64) -> Self {
        Self {
            ts,
            values: Record::new(),
        }
    }
}

/// What a filter decided for one entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Skip,
    /// Skip this entry and every remaining (older) one.
    Stop,
}

#[derive(Debug)]
enum Filter {
    /// Entries must be at or after the cutoff.
    Period { cutoff: i64 },
    Where(Arc<Predicate>),
}

impl Filter {
    fn check(&self, entry: &Entry) -> Flow {
        match self {
            // Entries arrive newest first, so everything after a miss is older.
            Filter::Period { cutoff } if entry.ts < *cutoff => Flow::Stop,
            Filter::Period { .. } => Flow::Continue,
            Filter::Where(predicate) if predicate.matches(&entry.values) => Flow::Continue,
            Filter::Where(_) => Flow::Skip,
        }
    }
}

#[derive(Debug)]
enum Reduction {
    /// `current` is this slot's own accumulator, so a field selected twice
    /// never feeds one slot's value into the other.
    Field {
        field: String,
        reducer: Reducer,
        current: Option<Value>,
    },
    Wildcard(WildcardReducer),
}

impl Reduction {
    fn step(&mut self, acc: &mut Record, entry: &Entry) {
        match self {
            Reduction::Field {
                field,
                reducer,
                current,
            } => {
                *current = reducer.step(entry.get(field), current.take());
                if let Some(value) = current {
                    acc.insert(field.clone(), value.clone());
                }
            }
            Reduction::Wildcard(wildcard) => wildcard.step(&entry.values, acc),
        }
    }
}

#[derive(Debug, Default)]
pub struct Pipeline {
    filters: SmallVec<[Filter; 2]>,
    reductions: SmallVec<[Reduction; 4]>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops entries older than `cutoff`; `None` keeps everything.
    pub fn period(mut self, cutoff: Option<i64>) -> Self {
        if let Some(cutoff) = cutoff {
            self.filters.push(Filter::Period { cutoff });
        }
        self
    }

    pub fn filter(mut self, predicate: Arc<Predicate>) -> Self {
        self.filters.push(Filter::Where(predicate));
        self
    }

    pub fn reduce(mut self, field: impl Into<String>, method: Method) -> Self {
        self.reductions.push(Reduction::Field {
            field: field.into(),
            reducer: method.reducer(),
            current: None,
        });
        self
    }

    pub fn reduce_all(mut self, method: Method) -> Self {
        self.reductions
            .push(Reduction::Wildcard(WildcardReducer::new(method)));
        self
    }

    pub fn stage_count(&self) -> usize {
        self.filters.len() + self.reductions.len()
    }

    /// Runs one entry through the pipeline.
    pub fn step(&mut self, acc: &mut Record, entry: &Entry) -> Flow {
        for filter in &self.filters {
            match filter.check(entry) {
                Flow::Continue => {}
                rejected => return rejected,
            }
        }
        for reduction in &mut self.reductions {
            reduction.step(acc, entry);
        }
        Flow::Continue
    }

    /// Folds the entries newest to oldest, consuming the pipeline so reducer
    /// state can't outlive one run.
    pub fn fold<'a, I>(mut self, entries: I, init: Snapshot) -> Snapshot
    where
        I: IntoIterator<Item = &'a Entry>,
        I::IntoIter: DoubleEndedIterator,
    {
        let mut acc = init;
        for entry in entries.into_iter().rev() {
            if self.step(&mut acc.values, entry) == Flow::Stop {
                break;
            }
        }
        acc
    }
}
