//! # prebake-record
//!
//! The object-graph recorder. Precompile-time code never touches live
//! objects directly: every object it sees is a handle whose operations
//! route through a [`Recorder`], which performs the underlying operation
//! and records an origin or mutation event stamped with a globally
//! monotonic sequence number. Serializing the histories of a chosen root
//! set yields the minimal, sequence-ordered event script a replayer needs
//! to recreate that subgraph.

pub mod event;
pub mod recorder;
pub mod replay;
pub mod value;

pub use event::{Event, EventKind, SourceHandle};
pub use recorder::{History, RecordError, Recorder};
pub use replay::{compact, PoolEntry, Replayer, ReplayError, ReplayScript};
pub use value::{
    Callable, HostFn, Intrinsics, LiveObject, ObjRef, PropKey, PropertyDescriptor, PropertySlot,
    Realm, SymRef, SymbolRecipe, Value,
};
