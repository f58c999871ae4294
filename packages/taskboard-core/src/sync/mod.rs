//! Convergence between devices: the reconciler polls the store and the
//! pipeline tells it when to stay quiet.

pub mod control;
pub mod reconciler;

pub use control::{MutationGuard, PollControl};
pub use reconciler::{PollOutcome, Reconciler, ReconcilerHandle};
