//! Request tables of the collective engine.
//!
//! Every table maps a request key to a countdown and (at the originator) a
//! one-shot completion slot. Lookup-then-decrement happens in a single step
//! under the table lock; a state is removed exactly once, when it signals.
//! On job abort the pending maps are drained: dropping a sender resolves the
//! matching future with `ConnectionLost` at the waiter.

pub mod barrier;
pub mod broadcast;
pub mod bye;
pub mod gather;
pub mod join;
pub mod rma;
