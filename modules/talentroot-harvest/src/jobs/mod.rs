//! Job lifecycle and execution: the controller owns transitions and the ops
//! surface, the worker runs claimed jobs page by page.

pub mod controller;
pub mod worker;

pub use controller::{JobController, JobProgressView, NewJob};
pub use worker::{Worker, WorkerConfig};
