use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};

use rayon::prelude::*;

use crate::{
    registry::Registry,
    value::{Callable, Value},
    vm::{Vm, error::RuntimeError},
    world::World,
};

/// A cancellation token with an optional point in time after which it fires
/// by itself. Clones share the manual cancellation flag.
#[derive(Debug, Clone, Default)]
pub struct Deadline {
    at: Option<Instant>,
    cancelled: Arc<AtomicBool>,
}

impl Deadline {
    pub fn never() -> Self {
        Self::default()
    }

    pub fn after(duration: Duration) -> Self {
        Self::at(Instant::now() + duration)
    }

    pub fn at(instant: Instant) -> Self {
        Deadline {
            at: Some(instant),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_expired(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed) || self.at.is_some_and(|at| Instant::now() >= at)
    }

    pub fn check(&self) -> Result<(), RuntimeError> {
        if self.is_expired() {
            Err(RuntimeError::DeadlineExceeded)
        } else {
            Ok(())
        }
    }
}

/// Everything an evaluation shares across calls and forks.
#[derive(Clone, Copy)]
pub struct Runtime<'a> {
    pub world: &'a dyn World,
    pub registry: &'a Registry,
    pub deadline: &'a Deadline,
    pub parallelism: usize,
}

/// Handed to every host function call.
pub struct Context<'a, 'vm> {
    runtime: Runtime<'a>,
    vm: &'vm mut Vm,
}

impl<'a, 'vm> Context<'a, 'vm> {
    pub(crate) fn new(runtime: Runtime<'a>, vm: &'vm mut Vm) -> Self {
        Context { runtime, vm }
    }

    pub fn world(&self) -> &'a dyn World {
        self.runtime.world
    }

    pub fn registry(&self) -> &'a Registry {
        self.runtime.registry
    }

    pub fn runtime(&self) -> &Runtime<'a> {
        &self.runtime
    }

    pub fn deadline(&self) -> &'a Deadline {
        self.runtime.deadline
    }

    pub fn check_deadline(&self) -> Result<(), RuntimeError> {
        self.runtime.deadline.check()
    }

    pub fn parallelism(&self) -> usize {
        self.runtime.parallelism
    }

    /// Calls back into the VM with the uniform call contract.
    pub fn call(&mut self, callable: &Callable, args: Vec<Value>) -> Result<Value, RuntimeError> {
        self.vm.call(self.runtime, callable, args)
    }

    pub fn fork(&self) -> Vm {
        self.vm.fork()
    }

    /// Applies `function` to every item on forked VMs, one per chunk, and
    /// returns the results in input order.
    ///
    /// The deadline is checked before every element. A fired deadline fails
    /// the whole map rather than returning a truncated result.
    pub fn map_parallel(&self, items: Vec<Value>, function: &Callable) -> Result<Vec<Value>, RuntimeError> {
        if items.is_empty() {
            return Ok(Vec::new());
        }

        let workers = self.runtime.parallelism.max(1);
        let chunk_size = items.len().div_ceil(workers);
        let runtime = self.runtime;
        tracing::debug!(
            items = items.len(),
            chunks = items.len().div_ceil(chunk_size),
            "forking vm for parallel map"
        );

        let chunks = items
            .par_chunks(chunk_size)
            .map(|chunk| {
                let mut vm = self.vm.fork();
                chunk
                    .iter()
                    .map(|item| {
                        runtime.deadline.check()?;
                        vm.call(runtime, function, vec![item.clone()])
                    })
                    .collect::<Result<Vec<_>, _>>()
            })
            .collect::<Result<Vec<_>, _>>()?;

        tracing::debug!(chunks = chunks.len(), "joined parallel map");
        Ok(chunks.into_iter().flatten().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::never(Deadline::never(), false)]
    #[case::future(Deadline::after(Duration::from_secs(3600)), false)]
    #[case::past(Deadline::at(Instant::now() - Duration::from_millis(1)), true)]
    fn test_deadline(#[case] deadline: Deadline, #[case] expired: bool) {
        assert_eq!(deadline.is_expired(), expired);
    }

    #[test]
    fn test_cancel_is_shared_between_clones() {
        let deadline = Deadline::never();
        let clone = deadline.clone();
        clone.cancel();
        assert_eq!(deadline.check(), Err(RuntimeError::DeadlineExceeded));
    }
}
