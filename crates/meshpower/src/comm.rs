//! The distribution layer.
//!
//! Every grid operation in this crate is executed SPMD-style: each worker
//! (identified by its rank) runs the same sequence of calls, owns a slab of
//! the grid, and blocks in the collective operations defined on
//! [`Communicator`] until every other worker arrives. Rank 0 is the
//! coordinating worker: it owns the catalogs (see [`scatter_inputs`]) and it
//! ends up holding reduced results.
//!
//! A backend only has to provide the point-to-point primitives
//! ([`Communicator::send`] and [`Communicator::recv`]). Messages between a
//! given pair of workers must be delivered in FIFO order. All of the
//! collectives are implemented on top of those primitives, in a fixed order,
//! so results are reproducible regardless of the backend.

use std::any::Any;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::ops::Range;

use crate::catalog::{CatalogInputs, PointSet};
use crate::error::Error;

/// The rank of the coordinating worker
pub const ROOT: usize = 0;

/// The type-erased message exchanged between workers
pub type Payload = Box<dyn Any + Send>;

fn downcast<T: 'static>(payload: Payload, source: usize) -> Result<T, Error> {
    payload
        .downcast::<T>()
        .map(|boxed| *boxed)
        .map_err(|_| Error::collective_failure(source, "received a payload of an unexpected type"))
}

pub trait Communicator {
    fn rank(&self) -> usize;

    fn size(&self) -> usize;

    /// Queue `payload` for delivery to `dest`. This never blocks.
    fn send(&self, dest: usize, payload: Payload) -> Result<(), Error>;

    /// Block until the next message from `source` arrives.
    ///
    /// This fails with a collective failure if `source` has departed.
    fn recv(&self, source: usize) -> Result<Payload, Error>;

    fn is_root(&self) -> bool {
        self.rank() == ROOT
    }

    /// Every worker provides one entry per destination rank and receives one
    /// entry per source rank (the entry addressed to itself never leaves the
    /// worker).
    fn all_to_all_v<T: Send + 'static>(&self, outgoing: Vec<T>) -> Result<Vec<T>, Error> {
        let (rank, size) = (self.rank(), self.size());
        if outgoing.len() != size {
            return Err(Error::internal(
                "all_to_all_v requires exactly one outgoing entry per rank",
            ));
        }
        let mut mine = None;
        for (dest, item) in outgoing.into_iter().enumerate() {
            if dest == rank {
                mine = Some(item);
            } else {
                self.send(dest, Box::new(item))?;
            }
        }
        let mut incoming = Vec::with_capacity(size);
        for source in 0..size {
            if source == rank {
                incoming.push(
                    mine.take()
                        .ok_or_else(|| Error::internal("lost the local all_to_all_v entry"))?,
                );
            } else {
                incoming.push(downcast::<T>(self.recv(source)?, source)?);
            }
        }
        Ok(incoming)
    }

    /// Returns once every worker has entered the barrier
    fn barrier(&self) -> Result<(), Error> {
        self.all_to_all_v(vec![(); self.size()]).map(|_| ())
    }

    /// The root's `value` is handed to every worker. The argument is ignored
    /// on every other rank (they conventionally pass `None`).
    fn broadcast<T: Clone + Send + 'static>(&self, value: Option<T>) -> Result<T, Error> {
        if self.is_root() {
            let value =
                value.ok_or_else(|| Error::internal("the root must provide the broadcast value"))?;
            for dest in 0..self.size() {
                if dest != ROOT {
                    self.send(dest, Box::new(value.clone()))?;
                }
            }
            Ok(value)
        } else {
            downcast::<T>(self.recv(ROOT)?, ROOT)
        }
    }

    /// Combines the values of every worker on the root, merging them in rank
    /// order. Only the root receives `Some`.
    fn reduce_to_root<T, F>(&self, value: T, mut merge: F) -> Result<Option<T>, Error>
    where
        T: Send + 'static,
        F: FnMut(&mut T, T) -> Result<(), Error>,
    {
        if self.is_root() {
            let mut accum = value;
            for source in 0..self.size() {
                if source != ROOT {
                    let other = downcast::<T>(self.recv(source)?, source)?;
                    merge(&mut accum, other)?;
                }
            }
            Ok(Some(accum))
        } else {
            self.send(ROOT, Box::new(value))?;
            Ok(None)
        }
    }

    /// [`Communicator::reduce_to_root`] followed by a broadcast of the result
    fn all_reduce<T, F>(&self, value: T, merge: F) -> Result<T, Error>
    where
        T: Clone + Send + 'static,
        F: FnMut(&mut T, T) -> Result<(), Error>,
    {
        let reduced = self.reduce_to_root(value, merge)?;
        self.broadcast(reduced)
    }

    /// element-wise sum across workers, available on every worker
    fn all_reduce_sum(&self, values: Vec<f64>) -> Result<Vec<f64>, Error> {
        self.all_reduce(values, |accum, other| {
            if accum.len() != other.len() {
                return Err(Error::internal("all_reduce_sum received inconsistent lengths"));
            }
            accum.iter_mut().zip(other).for_each(|(a, b)| *a += b);
            Ok(())
        })
    }
}

/// A world made of a single worker.
///
/// Messages sent to itself are queued so that the collectives work
/// unchanged, but most collectives never send anything when there's only one
/// worker.
#[derive(Default)]
pub struct SerialComm {
    queue: RefCell<VecDeque<Payload>>,
}

impl SerialComm {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Communicator for SerialComm {
    fn rank(&self) -> usize {
        ROOT
    }

    fn size(&self) -> usize {
        1
    }

    fn send(&self, dest: usize, payload: Payload) -> Result<(), Error> {
        if dest != ROOT {
            return Err(Error::collective_failure(dest, "rank doesn't exist in a serial world"));
        }
        self.queue.borrow_mut().push_back(payload);
        Ok(())
    }

    fn recv(&self, source: usize) -> Result<Payload, Error> {
        if source != ROOT {
            return Err(Error::collective_failure(source, "rank doesn't exist in a serial world"));
        }
        self.queue
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| Error::collective_failure(ROOT, "receiving would block forever"))
    }
}

/// Partitions `n` planes into contiguous slabs, one per worker.
///
/// Worker `r` owns planes `[r*n/size, (r+1)*n/size)`. When there are more
/// workers than planes, some workers own nothing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SlabDecomposition {
    n: usize,
    starts: Vec<usize>,
}

impl SlabDecomposition {
    pub fn new(n: usize, size: usize) -> Self {
        let size = size.max(1);
        let starts = (0..=size).map(|r| r * n / size).collect();
        Self { n, starts }
    }

    pub fn n_planes(&self) -> usize {
        self.n
    }

    pub fn n_workers(&self) -> usize {
        self.starts.len() - 1
    }

    pub fn range(&self, rank: usize) -> Range<usize> {
        self.starts[rank]..self.starts[rank + 1]
    }

    /// the rank owning `plane` (which must be smaller than `n_planes()`)
    pub fn owner(&self, plane: usize) -> usize {
        // the last rank whose slab starts at or before `plane`. This skips
        // empty slabs, which share their start with the following slab.
        self.starts[..self.n_workers()].partition_point(|&start| start <= plane) - 1
    }
}

/// Distributes a catalog owned by the coordinating worker: every worker
/// receives a contiguous chunk. Non-root workers pass `None`.
pub fn scatter_points<C: Communicator>(
    comm: &C,
    points: Option<PointSet>,
) -> Result<PointSet, Error> {
    if comm.is_root() {
        let points =
            points.ok_or_else(|| Error::catalog_shape("the coordinating worker has no catalog"))?;
        let mut chunks = points.split_contiguous(comm.size()).into_iter();
        let mine = chunks.next().unwrap_or_default();
        for (dest, chunk) in (1..comm.size()).zip(chunks) {
            comm.send(dest, Box::new(chunk))?;
        }
        Ok(mine)
    } else {
        if points.is_some_and(|p| !p.is_empty()) {
            tracing::debug!(rank = comm.rank(), "ignoring a catalog passed to a non-root worker");
        }
        downcast::<PointSet>(comm.recv(ROOT)?, ROOT)
    }
}

/// Two-phase input distribution: the coordinating worker passes the catalogs
/// that it loaded, every other worker passes `None` and receives its share.
pub fn scatter_inputs<C: Communicator>(
    comm: &C,
    inputs: Option<CatalogInputs>,
) -> Result<CatalogInputs, Error> {
    if comm.is_root() {
        let inputs = inputs
            .ok_or_else(|| Error::catalog_shape("the coordinating worker has no catalogs"))?;
        let size = comm.size();
        // chunked[i][r] is the piece of catalog i sent to rank r
        let mut chunked: Vec<std::vec::IntoIter<PointSet>> = inputs
            .catalogs()
            .into_iter()
            .map(|c| c.split_contiguous(size).into_iter())
            .collect();
        let mut per_rank = Vec::with_capacity(size);
        for _ in 0..size {
            let parts: Vec<PointSet> = chunked
                .iter_mut()
                .map(|it| it.next().unwrap_or_default())
                .collect();
            per_rank.push(inputs.rebuild_like(parts));
        }
        let mut per_rank = per_rank.into_iter();
        let mine = per_rank
            .next()
            .unwrap_or_else(|| inputs.empty_like());
        for (dest, part) in (1..size).zip(per_rank) {
            comm.send(dest, Box::new(part))?;
        }
        tracing::debug!(
            n_workers = size,
            n_data = inputs.data().len(),
            "scattered input catalogs"
        );
        Ok(mine)
    } else {
        downcast::<CatalogInputs>(comm.recv(ROOT)?, ROOT)
    }
}
