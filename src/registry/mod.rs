//! Client registry
//!
//! The live set of server-side connections eligible for broadcast.
//!
//! # Architecture
//!
//! ```text
//!                       Arc<ClientRegistry>
//!                  ┌──────────────────────────┐
//!                  │ clients: HashMap<Id,     │
//!                  │   Arc<Connection>>       │
//!                  └────────────┬─────────────┘
//!        insert ▲               │ snapshot()          ▲ remove
//!               │               ▼                     │
//!        [accept loop]    [broadcast] ──► write ──► [failure / peer close]
//! ```
//!
//! The map lock is only held for a single insert, remove or copy. Broadcast
//! iterates over a snapshot, so N client writes never run under the lock and
//! membership changes mid-broadcast cannot disturb the iteration.

pub mod store;

pub use store::{ClientInfo, ClientRegistry};
