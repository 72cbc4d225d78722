//! Core of the Sweeper agent: a throttled command lane to the remote world,
//! the layout builder that feeds it, and the checkpoint patrol.

pub mod builder;
pub mod command;
pub mod config;
pub mod error;
pub mod geometry;
pub mod layout;
pub mod patrol;
pub mod periodic;
pub mod safe_spot;
pub mod scheduler;
pub mod session;
pub mod store;
pub mod tracker;
pub mod world;

pub use builder::{BuildIo, BuildPhase, BuildReport, GeometryEngine};
pub use command::Command;
pub use config::{AnchorPolicy, EngineConfig};
pub use error::{EngineError, Result};
pub use geometry::{BlockBox, BlockPos, DerivedGeometry, Footprint, Shift, WorldBuildContext};
pub use layout::{load_or_default, DirLayoutSource, LayoutDescription, LayoutSource, DEFAULT_LAYOUT};
pub use scheduler::{Liveness, Outcome, Scheduler, Ticket, TransportChain, TransportStrategy};
pub use session::{Session, SessionParts};
pub use store::Store;
pub use world::{Pathing, WorldQuery};
