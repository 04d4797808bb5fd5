//! GPU parallel reductions built on [vulkano](https://docs.rs/vulkano),
//! collapsing a buffer of 32-bit unsigned integers to a single scalar over
//! one or more rounds of work-group tree combines.
//!
//! [`count_if`] counts the values satisfying a predicate; the underlying
//! [`Reduce`] engine also serves sums, minima/maxima, and any/all-style
//! reductions through its [`Transform`] and [`Combine`] operators.

pub mod context;
pub mod count_if;
pub mod reduce;
mod util;

pub use context::ReduceContext;
pub use count_if::count_if;
pub use reduce::{Combine, Predicate, Reduce, Transform};
