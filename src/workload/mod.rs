//! # Workload Driver
//!
//! Generates the benchmark's insert/query phases, times them, and appends
//! one CSV row per run. The driver is generic over [`TreeIndex`], the
//! `&self` operation surface the concurrent trees implement natively and
//! the single-threaded baseline implements behind a mutex.
//!
//! - [`ticket`]: atomic work queue and the scoped worker pool
//! - [`driver`]: phase orchestration ([`Workload`])
//! - [`report`]: CSV result emission

pub mod driver;
pub mod report;
pub mod ticket;

pub use driver::{TreeIndex, Workload};
pub use report::ResultsWriter;
pub use ticket::{work, Ticket};
