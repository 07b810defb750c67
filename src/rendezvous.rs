//! Agreement between localities after each cycle.
//!
//! Every locality owns a full tree and runs the same cycles. After each cycle all
//! localities agree on success before any of them continues, so a failure on one
//! locality stops all of them at the same point.

/// Global collectives needed by the simulation driver.
pub trait Rendezvous {
    /// True on every locality if `ok` is true on every locality.
    fn agree(&self, ok: bool) -> bool;

    /// Replace `values` by their element wise sum over all localities.
    fn sum(&self, values: &mut [f64]);
}

/// Rendezvous of a single locality.
#[derive(Copy, Clone, Debug, Default)]
pub struct LocalRendezvous;

impl Rendezvous for LocalRendezvous {
    fn agree(&self, ok: bool) -> bool {
        ok
    }

    fn sum(&self, _values: &mut [f64]) {}
}

#[cfg(feature = "mpi")]
pub use self::collective::MpiRendezvous;

#[cfg(feature = "mpi")]
mod collective {
    use mpi::{collective::SystemOperation, traits::CommunicatorCollectives};

    use super::Rendezvous;

    /// Rendezvous over the ranks of an MPI communicator.
    pub struct MpiRendezvous<'c, C: CommunicatorCollectives> {
        comm: &'c C,
    }

    impl<'c, C: CommunicatorCollectives> MpiRendezvous<'c, C> {
        /// Rendezvous over all ranks of `comm`.
        pub fn new(comm: &'c C) -> Self {
            Self { comm }
        }
    }

    impl<C: CommunicatorCollectives> Rendezvous for MpiRendezvous<'_, C> {
        fn agree(&self, ok: bool) -> bool {
            if self.comm.size() == 1 {
                return ok;
            }
            let mut global_ok = false;
            self.comm
                .all_reduce_into(&ok, &mut global_ok, SystemOperation::logical_and());
            global_ok
        }

        fn sum(&self, values: &mut [f64]) {
            let local = values.to_vec();
            self.comm
                .all_reduce_into(&local[..], values, SystemOperation::sum());
        }
    }
}
