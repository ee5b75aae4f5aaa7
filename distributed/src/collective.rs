//! Collective operations across the replicas of one group.
//!
//! A [`CollectiveGroup`] of `size` ranks hands out one [`Participant`] per
//! rank. Each participant numbers its own calls; call `n` of every rank forms
//! round `n`. A round completes once all ranks contributed, and every rank
//! then leaves with its share of the result.
//!
//! All ranks must call the same operation with the same shape in the same
//! order. The first disagreement poisons the group: the offending call and
//! every waiting or later call fail. A rank that never calls stalls the
//! round; without a deadline that stall is permanent.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use bon::bon;
use parking_lot::{Condvar, Mutex};
use snafu::{ResultExt, ensure};
use tardy_device::{Buffer, Data, Literal};
use tardy_dtype::{CanonicalShape, DeviceSpec};
use tardy_ir::ReduceOp;
use tracing::{debug, trace, warn};

use crate::error::*;

/// Operation and operand shape every rank of a round must agree on.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Signature {
    AllGather(CanonicalShape),
    Broadcast { source: usize, shape: CanonicalShape },
    AllReduce { op: ReduceOp, shape: CanonicalShape },
    Permute { pairs: Vec<(usize, usize)>, shape: CanonicalShape },
}

impl Signature {
    fn name(&self) -> &'static str {
        match self {
            Self::AllGather(_) => "all_gather",
            Self::Broadcast { .. } => "broadcast",
            Self::AllReduce { .. } => "all_reduce",
            Self::Permute { .. } => "collective_permute",
        }
    }
}

impl std::fmt::Display for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AllGather(shape) => write!(f, "all_gather({shape})"),
            Self::Broadcast { source, shape } => write!(f, "broadcast({shape}, source={source})"),
            Self::AllReduce { op, shape } => write!(f, "all_reduce({shape}, op={op})"),
            Self::Permute { pairs, shape } => write!(f, "collective_permute({shape}, pairs={pairs:?})"),
        }
    }
}

#[derive(Debug, Clone)]
enum Poison {
    Mismatch { rank: usize, expected: String, actual: String },
    Timeout { op: String, waited_ms: u64 },
    Aborted { rank: usize, reason: String },
}

impl Poison {
    fn to_error(&self) -> Error {
        match self.clone() {
            Self::Mismatch { rank, expected, actual } => Error::CollectiveMismatch { rank, expected, actual },
            Self::Timeout { op, waited_ms } => Error::CollectiveTimeout { op, waited_ms },
            Self::Aborted { rank, reason } => Error::CollectiveAborted { rank, reason },
        }
    }
}

#[derive(Debug)]
struct Round {
    signature: Signature,
    contributions: Vec<Option<Arc<Literal>>>,
    arrived: usize,
    results: Option<Vec<Arc<Literal>>>,
    departed: usize,
}

#[derive(Debug, Default)]
struct GroupState {
    rounds: HashMap<u64, Round>,
    poison: Option<Poison>,
}

#[derive(Debug)]
struct Shared {
    size: usize,
    timeout: Option<Duration>,
    state: Mutex<GroupState>,
    changed: Condvar,
}

impl Shared {
    fn poison(&self, state: &mut GroupState, poison: Poison) -> Error {
        warn!(collective.poison = ?poison, "collective group poisoned");
        let error = poison.to_error();
        state.poison.get_or_insert(poison);
        self.changed.notify_all();
        error
    }
}

/// Factory for the participants of one collective group.
#[derive(Debug, Clone)]
pub struct CollectiveGroup {
    shared: Arc<Shared>,
}

#[bon]
impl CollectiveGroup {
    /// Group of `size` ranks. Without `timeout` a missing rank stalls the
    /// group forever.
    #[builder]
    pub fn new(size: usize, timeout: Option<Duration>) -> Self {
        Self {
            shared: Arc::new(Shared { size, timeout, state: Mutex::new(GroupState::default()), changed: Condvar::new() }),
        }
    }
}

impl CollectiveGroup {
    /// Group without a deadline.
    pub fn with_size(size: usize) -> Self {
        Self::builder().size(size).build()
    }

    pub fn size(&self) -> usize {
        self.shared.size
    }

    /// One participant per rank, in rank order.
    pub fn participants(&self) -> Vec<Participant> {
        (0..self.shared.size).map(|rank| Participant { rank, shared: Arc::clone(&self.shared), calls: AtomicU64::new(0) }).collect()
    }

    /// Participant for a single rank.
    pub fn participant(&self, rank: usize) -> Result<Participant> {
        ensure!(rank < self.shared.size, InvalidRankSnafu { rank, size: self.shared.size });
        Ok(Participant { rank, shared: Arc::clone(&self.shared), calls: AtomicU64::new(0) })
    }

    pub fn is_poisoned(&self) -> bool {
        self.shared.state.lock().poison.is_some()
    }
}

/// One rank's handle to a collective group.
#[derive(Debug)]
pub struct Participant {
    rank: usize,
    shared: Arc<Shared>,
    calls: AtomicU64,
}

impl Participant {
    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn size(&self) -> usize {
        self.shared.size
    }

    /// Concatenate every rank's buffer along axis 0, in rank order. Scalars
    /// gather into a vector.
    pub fn all_gather(&self, buffer: &Buffer) -> Result<Buffer> {
        let literal = self.contribution(buffer)?;
        let signature = Signature::AllGather(literal.shape().clone());
        self.rendezvous(signature, literal, buffer.device())
    }

    /// Every rank receives `source`'s buffer.
    pub fn broadcast(&self, source: usize, buffer: &Buffer) -> Result<Buffer> {
        ensure!(source < self.shared.size, InvalidRankSnafu { rank: source, size: self.shared.size });
        let literal = self.contribution(buffer)?;
        let signature = Signature::Broadcast { source, shape: literal.shape().clone() };
        self.rendezvous(signature, literal, buffer.device())
    }

    /// Element-wise reduction of every rank's buffer, combined in rank order.
    pub fn all_reduce(&self, op: ReduceOp, buffer: &Buffer) -> Result<Buffer> {
        let literal = self.contribution(buffer)?;
        let signature = Signature::AllReduce { op, shape: literal.shape().clone() };
        self.rendezvous(signature, literal, buffer.device())
    }

    /// Send each `(source, target)` pair's buffer from `source` to `target`.
    /// Ranks that receive nothing get zeros.
    pub fn collective_permute(&self, pairs: &[(usize, usize)], buffer: &Buffer) -> Result<Buffer> {
        validate_pairs(pairs, self.shared.size)?;
        let literal = self.contribution(buffer)?;
        let signature = Signature::Permute { pairs: pairs.to_vec(), shape: literal.shape().clone() };
        self.rendezvous(signature, literal, buffer.device())
    }

    /// Wait for the local operand. A failed operand aborts the group so the
    /// other ranks do not wait for a contribution that never comes.
    fn contribution(&self, buffer: &Buffer) -> Result<Arc<Literal>> {
        match buffer.wait() {
            Ok(literal) => Ok(literal),
            Err(err) => {
                let mut state = self.shared.state.lock();
                self.shared.poison(&mut state, Poison::Aborted { rank: self.rank, reason: err.to_string() });
                Err(err).context(DeviceSnafu)
            }
        }
    }

    fn rendezvous(&self, signature: Signature, literal: Arc<Literal>, device: DeviceSpec) -> Result<Buffer> {
        let call = self.calls.fetch_add(1, Ordering::AcqRel);
        let size = self.shared.size;
        let op = signature.name();
        let deadline = self.shared.timeout.map(|t| Instant::now() + t);

        let mut state = self.shared.state.lock();
        if let Some(poison) = &state.poison {
            return Err(poison.to_error());
        }

        let round = state.rounds.entry(call).or_insert_with(|| Round {
            signature: signature.clone(),
            contributions: vec![None; size],
            arrived: 0,
            results: None,
            departed: 0,
        });
        if round.signature != signature {
            let poison = Poison::Mismatch { rank: self.rank, expected: round.signature.to_string(), actual: signature.to_string() };
            return Err(self.shared.poison(&mut state, poison));
        }

        round.contributions[self.rank] = Some(literal);
        round.arrived += 1;
        trace!(collective.op = op, collective.round = call, rank = self.rank, arrived = round.arrived, "contributed");

        if round.arrived == size {
            let contributions: Vec<Arc<Literal>> = round.contributions.iter_mut().filter_map(Option::take).collect();
            match compute(&round.signature, &contributions) {
                Ok(results) => {
                    round.results = Some(results);
                    debug!(collective.op = op, collective.round = call, "collective round complete");
                    self.shared.changed.notify_all();
                }
                Err(reason) => {
                    return Err(self.shared.poison(&mut state, Poison::Aborted { rank: self.rank, reason }));
                }
            }
        }

        loop {
            if let Some(round) = state.rounds.get_mut(&call)
                && let Some(results) = &round.results
            {
                let result = Arc::clone(&results[self.rank]);
                round.departed += 1;
                if round.departed == size {
                    state.rounds.remove(&call);
                }
                return Ok(Buffer::ready(device, Arc::unwrap_or_clone(result)));
            }
            if let Some(poison) = &state.poison {
                return Err(poison.to_error());
            }

            match deadline {
                None => self.shared.changed.wait(&mut state),
                Some(deadline) => {
                    if self.shared.changed.wait_until(&mut state, deadline).timed_out() && state.poison.is_none() {
                        let waited_ms = self.shared.timeout.map_or(0, |t| t.as_millis() as u64);
                        let poison = Poison::Timeout { op: signature.to_string(), waited_ms };
                        return Err(self.shared.poison(&mut state, poison));
                    }
                }
            }
        }
    }
}

fn validate_pairs(pairs: &[(usize, usize)], size: usize) -> Result<()> {
    let mut sources = vec![false; size];
    let mut targets = vec![false; size];
    for &(source, target) in pairs {
        ensure!(source < size && target < size, InvalidPermutationSnafu { reason: format!("pair ({source}, {target}) outside 0..{size}") });
        ensure!(!sources[source], InvalidPermutationSnafu { reason: format!("rank {source} sends twice") });
        ensure!(!targets[target], InvalidPermutationSnafu { reason: format!("rank {target} receives twice") });
        sources[source] = true;
        targets[target] = true;
    }
    Ok(())
}

/// Per-rank results of a complete round.
fn compute(signature: &Signature, contributions: &[Arc<Literal>]) -> Result<Vec<Arc<Literal>>, String> {
    let size = contributions.len();
    match signature {
        Signature::AllGather(shape) => {
            let gathered = Arc::new(concat(shape, contributions)?);
            Ok(vec![gathered; size])
        }
        Signature::Broadcast { source, .. } => Ok(vec![Arc::clone(&contributions[*source]); size]),
        Signature::AllReduce { op, .. } => {
            let mut total = (*contributions[0]).clone();
            for next in &contributions[1..] {
                total = combine(*op, &total, next)?;
            }
            Ok(vec![Arc::new(total); size])
        }
        Signature::Permute { pairs, shape } => {
            let zeros = Arc::new(Literal::zeros(shape.clone()));
            let mut results = vec![zeros; size];
            for &(source, target) in pairs {
                results[target] = Arc::clone(&contributions[source]);
            }
            Ok(results)
        }
    }
}

fn concat(shape: &CanonicalShape, parts: &[Arc<Literal>]) -> Result<Literal, String> {
    let mut dims: Vec<usize> = shape.dims().to_vec();
    match dims.first_mut() {
        Some(leading) => *leading *= parts.len(),
        None => dims.push(parts.len()),
    }
    let gathered = CanonicalShape::new(shape.dtype(), dims);

    let mut data = parts[0].data().clone();
    for part in &parts[1..] {
        match (&mut data, part.data()) {
            (Data::Bool(out), Data::Bool(v)) => out.extend_from_slice(v),
            (Data::Signed(out), Data::Signed(v)) => out.extend_from_slice(v),
            (Data::Unsigned(out), Data::Unsigned(v)) => out.extend_from_slice(v),
            (Data::Float(out), Data::Float(v)) => out.extend_from_slice(v),
            (out, v) => return Err(format!("cannot gather {} data with {} data", out.class(), v.class())),
        }
    }
    Literal::new(gathered, data).map_err(|e| e.to_string())
}

fn combine(op: ReduceOp, acc: &Literal, next: &Literal) -> Result<Literal, String> {
    fn zip<T: Copy>(a: &[T], b: &[T], f: impl Fn(T, T) -> T) -> Vec<T> {
        a.iter().zip(b).map(|(&x, &y)| f(x, y)).collect()
    }

    let data = match (acc.data(), next.data()) {
        (Data::Float(a), Data::Float(b)) => Data::Float(match op {
            ReduceOp::Sum => zip(a, b, |x, y| x + y),
            ReduceOp::Prod => zip(a, b, |x, y| x * y),
            ReduceOp::Max => zip(a, b, f64::max),
            ReduceOp::Min => zip(a, b, f64::min),
        }),
        (Data::Signed(a), Data::Signed(b)) => Data::Signed(match op {
            ReduceOp::Sum => zip(a, b, i64::wrapping_add),
            ReduceOp::Prod => zip(a, b, i64::wrapping_mul),
            ReduceOp::Max => zip(a, b, i64::max),
            ReduceOp::Min => zip(a, b, i64::min),
        }),
        (Data::Unsigned(a), Data::Unsigned(b)) => Data::Unsigned(match op {
            ReduceOp::Sum => zip(a, b, u64::wrapping_add),
            ReduceOp::Prod => zip(a, b, u64::wrapping_mul),
            ReduceOp::Max => zip(a, b, u64::max),
            ReduceOp::Min => zip(a, b, u64::min),
        }),
        (Data::Bool(a), Data::Bool(b)) => Data::Bool(match op {
            ReduceOp::Max | ReduceOp::Sum => zip(a, b, |x, y| x || y),
            ReduceOp::Min | ReduceOp::Prod => zip(a, b, |x, y| x && y),
        }),
        (a, b) => return Err(format!("cannot reduce {} data with {} data", a.class(), b.class())),
    };
    Literal::new(acc.shape().clone(), data).map_err(|e| e.to_string())
}
