//! Exertion dispatch.
//!
//! Routes tasks, jobs and blocks to executors: in-process for local
//! signatures, through a directory for remote ones, through a workspace
//! queue for PULL units. Jobs run their children sequentially or in
//! parallel with pipes between them; blocks run their steps over a shared
//! scope.

#![warn(missing_docs)]

pub mod admission;
pub mod composite;
pub mod config;
pub mod directory;
pub mod engine;
pub mod error;
pub mod pipe;
pub mod routing;
pub mod space;
pub mod traits;

pub use admission::LocalAdmissionLock;
pub use composite::CompositeExecutor;
pub use config::DispatchConfig;
pub use directory::StaticDirectory;
pub use engine::DispatchEngine;
pub use error::{AdmissionError, DispatchError, ExecutorError, Result, WorkspaceError};
pub use pipe::{PipeGraph, Resolution};
pub use routing::{corrected_signature, route, Route};
pub use space::MemorySpace;
pub use traits::{AdmissionLock, Depender, Directory, Executor, OutputPersister, Provisioner, Workspace};
