//! # mapper-rs: Client-Side Signal-Mapping Graph
//!
//! A synchronized, subscription-driven cache of the devices, signals, maps
//! and links on a distributed signal-mapping network, with a lazy query
//! algebra on top and per-signal instance tracking.
//!
//! ## Design Principles
//!
//! 1. **Trait-first**: `Transport` is the contract between the graph and the wire
//! 2. **Clean DTOs**: `Value`, `PropertyTable` and `Record` cross all boundaries
//! 3. **Identities, not pointers**: records refer to each other by `ObjectId`
//! 4. **One suspension point**: all network-driven mutation happens in `poll`
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use mapper_rs::{Graph, ObjectKind, ObjectTypes, Op, Property};
//!
//! let mut graph = Graph::open_memory();
//! graph.add_listener(ObjectTypes::DEVICE, |dev, event| {
//!     println!("{:?} {:?}", dev.name(), event);
//! });
//!
//! graph.poll(Duration::from_millis(100));
//!
//! let synths = graph
//!     .query(ObjectKind::Device)
//!     .filter(Property::Name, Op::Equal, "synth*");
//! for dev in synths.iter(&graph) {
//!     println!("{}", dev.id());
//! }
//! ```
//!
//! ## Transports
//!
//! | Transport | Description |
//! |-----------|-------------|
//! | `MemoryTransport` | In-process loopback for testing/embedding |

// ============================================================================
// Modules
// ============================================================================

pub mod config;
pub mod export;
pub mod graph;
pub mod instance;
pub mod model;
pub mod query;
pub mod transport;

// ============================================================================
// Re-exports: Model (the DTOs)
// ============================================================================

pub use model::{
    Direction, Lifecycle, ObjectId, ObjectKind, ObjectTypes, Payload, Property, PropertyDiff,
    PropertyKey, PropertyTable, Record, Slot, SlotLocation, Status, StealMode, TimedValue,
    Timetag, Value, ValueType,
};

// ============================================================================
// Re-exports: Graph, queries, instances
// ============================================================================

pub use config::GraphConfig;
pub use graph::{Graph, Lease, ListenerId, ObjectRef, Subscription, SubscriptionTarget};
pub use instance::{Instance, InstanceEvent, InstanceEventKind, InstanceManager, InstanceState};
pub use query::{Cursor, Op, Query, QueryIter};

// ============================================================================
// Re-exports: Transport
// ============================================================================

pub use transport::{
    Destination, EventType, MemoryTransport, NetworkEvent, RecordDelta, SlotDiff,
    SubscriptionRequest, Transport, ValueUpdate,
};

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Type mismatch: expected {expected}, got {got}")]
    TypeMismatch { expected: String, got: String },

    #[error("Cannot parse {input:?} as {target}")]
    Parse { input: String, target: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Malformed event: {0}")]
    MalformedEvent(String),

    #[error("Capacity exceeded: requested {requested}, capacity {capacity}")]
    CapacityExceeded { requested: usize, capacity: usize },

    #[error("Stale reference: {0} has been removed")]
    StaleReference(ObjectId),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// `NotFound`, or a reference to a record that has since been removed.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_) | Error::StaleReference(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
