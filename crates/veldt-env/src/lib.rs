//! The Veldt environment kernel.
//!
//! [`Environment`] owns every item and the four relation graphs between
//! them: the frame tree, the layer hierarchy, the operator input/output
//! graph, and the cartesian frame bindings. All mutation is routed through
//! kernel methods keyed by [`ItemId`](veldt_core::ItemId), which is how
//! invariant checks and event emission stay in one place.
//!
//! The kernel is single-threaded and cooperative: every operation is
//! synchronous and finite, and events reach handlers in the calling flow
//! of the mutator, after the post-state is installed.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

mod environment;
mod events;
mod frames;
mod layers;
mod operators;

pub use environment::Environment;
