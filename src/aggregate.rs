//! Registry of stateful aggregation methods.
//!
//! Each [`Method`] produces a fresh [`Reducer`] per field. A reducer is folded
//! as `(current, previous) -> next`: it sees the field's value on one entry
//! together with the accumulated value so far and returns the new
//! accumulated value. Inputs that fail a method's type check are skipped and
//! the previous accumulated value carries forward.

use rustc_hash::FxHashMap;
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use crate::error::TemporaError;
use crate::value::{self, Record};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// First value seen
    None,
    Avg,
    /// Numeric inputs
    Count,
    /// Truthy inputs
    CountA,
    Max,
    Min,
    Product,
    Sum,
    /// Sample standard deviation
    Stdevs,
}

impl Method {
    pub const ALL: [Method; 9] = [
        Method::None,
        Method::Avg,
        Method::Count,
        Method::CountA,
        Method::Max,
        Method::Min,
        Method::Product,
        Method::Sum,
        Method::Stdevs,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Method::None => "none",
            Method::Avg => "avg",
            Method::Count => "count",
            Method::CountA => "counta",
            Method::Max => "max",
            Method::Min => "min",
            Method::Product => "product",
            Method::Sum => "sum",
            Method::Stdevs => "stdevs",
        }
    }

    /// Registered method names.
    pub fn names() -> impl Iterator<Item = &'static str> {
        Self::ALL.iter().map(Method::name)
    }

    pub fn reducer(self) -> Reducer {
        Reducer::new(self)
    }
}

impl FromStr for Method {
    type Err = TemporaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_ascii_lowercase();
        if lowered == "stdev" {
            return Ok(Method::Stdevs);
        }
        Self::ALL
            .iter()
            .copied()
            .find(|m| m.name() == lowered)
            .ok_or_else(|| TemporaError::value(format!("unknown aggregate method '{}'", s)))
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Default)]
struct Moments {
    n: u64,
    sum: f64,
    sum_sq: f64,
}

/// Running state for one `(method, field)` pair.
#[derive(Debug, Clone)]
pub struct Reducer {
    method: Method,
    count: u64,
    moments: Moments,
}

impl Reducer {
    pub fn new(method: Method) -> Self {
        Self {
            method,
            count: 0,
            moments: Moments::default(),
        }
    }

    pub fn method(&self) -> Method {
        self.method
    }

    /// Folds one input into the accumulated value.
    ///
    /// `current` is `None` when the entry has no such field.
    pub fn step(&mut self, current: Option<&Value>, previous: Option<Value>) -> Option<Value> {
        match self.method {
            Method::None => previous.or_else(|| current.map(value::scalar_or_placeholder)),
            Method::Count => {
                if current.is_some_and(value::is_number) {
                    self.count += 1;
                }
                Some(Value::from(self.count))
            }
            Method::CountA => {
                if current.is_some_and(value::is_truthy) {
                    self.count += 1;
                }
                Some(Value::from(self.count))
            }
            Method::Avg => {
                let Some(x) = current.and_then(value::as_number) else {
                    return previous;
                };
                self.moments.n += 1;
                self.moments.sum += x;
                Some(value::number(self.moments.sum / self.moments.n as f64))
            }
            Method::Stdevs => {
                let Some(x) = current.and_then(value::as_number) else {
                    return previous;
                };
                let m = &mut self.moments;
                m.n += 1;
                m.sum += x;
                m.sum_sq += x * x;
                if m.n < 2 {
                    return Some(value::number(0.0));
                }
                let n = m.n as f64;
                let variance = m.sum_sq - (m.sum * m.sum) / n;
                Some(value::number((variance.abs() / (n - 1.0)).sqrt()))
            }
            Method::Max => Self::combine(current, previous, f64::max),
            Method::Min => Self::combine(current, previous, f64::min),
            Method::Sum => Self::combine(current, previous, |a, b| a + b),
            Method::Product => Self::combine(current, previous, |a, b| a * b),
        }
    }

    /// Stateless binary fold; a non-numeric accumulator restarts from `current`.
    fn combine(
        current: Option<&Value>,
        previous: Option<Value>,
        op: impl Fn(f64, f64) -> f64,
    ) -> Option<Value> {
        let Some(x) = current.and_then(value::as_number) else {
            return previous;
        };
        let next = match previous.as_ref().and_then(value::as_number) {
            Some(acc) => op(acc, x),
            None => x,
        };
        Some(value::number(next))
    }
}

/// Applies one method independently to every field it encounters.
///
/// Reducers are created the first time a field shows up and keep their own
/// state afterwards.
#[derive(Debug, Clone)]
pub struct WildcardReducer {
    method: Method,
    reducers: FxHashMap<String, Reducer>,
}

impl WildcardReducer {
    pub fn new(method: Method) -> Self {
        Self {
            method,
            reducers: FxHashMap::default(),
        }
    }

    pub fn method(&self) -> Method {
        self.method
    }

    /// Number of fields observed so far.
    pub fn field_count(&self) -> usize {
        self.reducers.len()
    }

    pub fn step(&mut self, entry: &Record, acc: &mut Record) {
        let method = self.method;
        for (field, current) in entry {
            let reducer = self
                .reducers
                .entry(field.clone())
                .or_insert_with(|| Reducer::new(method));
            let previous = acc.get(field).cloned();
            if let Some(next) = reducer.step(Some(current), previous) {
                acc.insert(field.clone(), next);
            }
        }
    }
}
