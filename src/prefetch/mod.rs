//! Prefetch planner: materialize relationship trees one level at a time
//!
//! A [`RelationSpec`] names the relationships to load. [`Operation::build`]
//! resolves it against the [`RelationshipRegistry`] into a plan with one
//! [`Batch`] per depth, and [`Operation::execute`] runs the plan through a
//! [`LoadStrategy`](crate::strategy::LoadStrategy).

pub mod operation;
pub mod registry;
pub mod spec;

pub use operation::{Batch, Operation, PrefetchResult, Segment, SegmentInput, SegmentState};
pub use registry::{EntityDefinition, Relationship, RelationshipKind, RelationshipRegistry};
pub use spec::RelationSpec;
