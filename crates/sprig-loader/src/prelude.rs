//! Common re-exports for working with the loader.

pub use crate::{
    Entry, EntryGroup, Loader, LoaderError, LoaderResult, ModuleSource, ReconcileOp,
    ReconcilePlan, StaticModules, plan,
};
