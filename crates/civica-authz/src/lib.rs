//! Authorization resolution for the Civica access engine.
//!
//! Given a subject and a (resource, action) pair, the [`Resolver`]
//! produces an explainable [`Decision`](civica_core::Decision):
//!
//! 1. a privileged subject (per the injected [`PrivilegedPredicate`])
//!    is allowed without any store access;
//! 2. otherwise a live direct grant allows;
//! 3. otherwise a live grant owned by the subject's group allows;
//! 4. otherwise the request is denied.
//!
//! Resolution is strictly read-only. Enforcement and audit recording
//! live above this crate, in the engine.

pub mod error;
pub mod privileged;
pub mod resolver;

pub use error::{AuthzError, Result};
pub use privileged::{PrivilegedHandles, PrivilegedPredicate};
pub use resolver::{evaluate, Resolver};
