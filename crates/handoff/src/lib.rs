#![doc = include_str!("../README.md")]

mod counter;
mod dispatcher;
mod error;
mod handler;
mod job;
mod pool;
mod stats;
mod status;
mod worker;

pub use crate::dispatcher::*;
pub use crate::error::*;
pub use crate::handler::*;
pub use crate::job::*;
pub use crate::stats::*;
pub use crate::status::*;
