//! The map façade: typed CRUD over the opaque map backend, with per-CPU
//! aggregation for connection-tracking and rate-limit maps. Nothing outside
//! this module touches a raw byte layout; everything else works in terms of
//! the typed `xlb-wire` entities.

pub mod backend;
pub mod codec;
pub mod facade;
pub mod mock;

pub use backend::{MapBackend, MapKind};
pub use codec::{AsKeyBytes, AsValueBytes, FromKeyBytes};
pub use facade::{MapFacade, PerCpuMapFacade};
pub use mock::MockMapBackend;
