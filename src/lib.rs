//! Device-to-host command proxy for a GPU-resident symmetric-heap
//! communication library.
//!
//! A producer (standing in for a GPU kernel's work-item) builds a
//! [`record::RequestRecord`], issues it through one of the four shapes in
//! [`issue`], and either moves on (non-blocking) or waits on a
//! [`completion::CompletionTable`] slot. The proxy ([`proxy::run_loop`])
//! drains the shared [`ring::RequestRing`] on a single host thread and
//! dispatches each record to a [`backend::Backend`].

pub mod addressing;
pub mod backend;
pub mod completion;
pub mod config;
pub mod constants;
pub mod context;
pub mod error;
pub mod insights;
pub mod issue;
pub mod messages;
pub mod metrics;
pub mod proxy;
pub mod record;
pub mod ring;
pub mod validation;
pub mod wait_strategy;
pub mod workgroup;

pub use context::Context;
pub use error::{ ProxyError, Result };
pub use record::{ Op, RequestRecord, TypeCode };
