//! kubesnap collect: turns a control plane into a [`kubesnap_core::ClusterSnapshot`].

#![forbid(unsafe_code)]

mod assembler;
mod collector;

pub use assembler::{Assembler, AssemblyStats};
pub use collector::{CollectReport, Collector};
pub use tokio_util::sync::CancellationToken;
