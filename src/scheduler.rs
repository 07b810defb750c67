//! Cooperative single threaded driver for node futures.
//!
//! All node futures of one pass are polled on the calling thread. A node suspends only
//! at channel receives and a send wakes the receiver. If a full poll round leaves every
//! remaining node pending without a single wake-up, no node can make progress any more
//! and the pass fails with [Error::Stalled].

use std::{
    collections::BTreeSet,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    task::{Context, Poll},
};

use futures::{
    future::LocalBoxFuture,
    stream::{FuturesUnordered, StreamExt},
    task::{waker, ArcWake},
    FutureExt,
};
use tracing::{error, trace};

use crate::{
    error::{Error, Result},
    morton::MortonKey,
};

/// The pass a set of node futures belongs to.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Hydro exchange cycle.
    Hydro,
    /// Flux correction exchange.
    FluxCorrection,
    /// Gravity FMM pass.
    Gravity,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Phase::Hydro => "hydro exchange",
            Phase::FluxCorrection => "flux correction",
            Phase::Gravity => "gravity pass",
        };
        write!(f, "{}", name)
    }
}

#[derive(Default)]
struct WakeFlag {
    woken: AtomicBool,
}

impl ArcWake for WakeFlag {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        arc_self.woken.store(true, Ordering::SeqCst);
    }
}

/// Run the futures of all nodes of one pass to completion.
///
/// Returns the first error of any node. The remaining futures are dropped.
pub fn drive<'a>(
    phase: Phase,
    tasks: impl IntoIterator<Item = (MortonKey, LocalBoxFuture<'a, Result<()>>)>,
) -> Result<()> {
    let flag = Arc::new(WakeFlag::default());
    let waker = waker(flag.clone());
    let mut cx = Context::from_waker(&waker);

    let mut remaining = BTreeSet::new();
    let mut running = FuturesUnordered::new();
    for (key, task) in tasks {
        remaining.insert(key);
        running.push(task.map(move |result| (key, result)));
    }
    trace!(%phase, nodes = remaining.len(), "Driving pass");

    loop {
        flag.woken.store(false, Ordering::SeqCst);
        match running.poll_next_unpin(&mut cx) {
            Poll::Ready(Some((key, Ok(())))) => {
                remaining.remove(&key);
            }
            Poll::Ready(Some((key, Err(e)))) => {
                error!(%phase, location = %key, error = %e, "Node failed");
                return Err(e);
            }
            Poll::Ready(None) => return Ok(()),
            Poll::Pending => {
                if !flag.woken.load(Ordering::SeqCst) {
                    let blocked: Vec<MortonKey> = remaining.into_iter().collect();
                    error!(%phase, blocked = blocked.len(), "Pass stalled");
                    return Err(Error::Stalled { phase, blocked });
                }
            }
        }
    }
}

#[cfg(test)]
mod test {
    use futures::FutureExt;

    use super::{drive, Phase};
    use crate::{channel::CycleChannel, error::Error, morton::MortonKey};

    #[test]
    fn test_ping_pong_completes() {
        let ping = CycleChannel::new();
        let pong = CycleChannel::new();
        let [a, b] = [MortonKey::root().children()[0], MortonKey::root().children()[1]];
        let first = async {
            ping.send(0, 1)?;
            let value = pong.recv(0).await?;
            assert_eq!(value, 2);
            Ok::<(), Error>(())
        }
        .boxed_local();
        let second = async {
            let value = ping.recv(0).await?;
            pong.send(0, value + 1)?;
            Ok::<(), Error>(())
        }
        .boxed_local();
        drive(Phase::Hydro, [(a, first), (b, second)]).unwrap();
    }

    #[test]
    fn test_unanswered_wait_is_a_stall() {
        let never = CycleChannel::<i32>::new();
        let key = MortonKey::root();
        let task = async {
            never.recv(0).await?;
            Ok::<(), Error>(())
        }
        .boxed_local();
        match drive(Phase::Gravity, [(key, task)]) {
            Err(Error::Stalled { phase, blocked }) => {
                assert_eq!(phase, Phase::Gravity);
                assert_eq!(blocked, vec![key]);
            }
            _ => panic!("expected a stall"),
        }
    }

    #[test]
    fn test_first_error_aborts() {
        let key = MortonKey::root();
        let task = async { Err::<(), Error>(Error::Kernel("nan".to_string())) }.boxed_local();
        assert!(matches!(
            drive(Phase::Hydro, [(key, task)]),
            Err(Error::Kernel(_))
        ));
    }
}
