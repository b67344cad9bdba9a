//! Local working copy management.
//!
//! This module provides the git transport and the reconciler that decides,
//! per repository, whether to clone or update.

pub mod reconciler;
pub mod transport;

pub use reconciler::WorkspaceReconciler;
pub use transport::{CancelFlag, Git2Transport, GitTransport, TransportError, TransportOptions};
