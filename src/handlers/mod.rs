//! # HTTP Request Handlers
//!
//! The thin API surface in front of the matchmaking worker.
//!
//! ## Available Handlers
//!
//! - **Matching** (`matching`) - submit/cancel a search, poll and end matches
//! - **Queue** (`queue`) - queue depth and per-user search status
//! - **Messages** (`messages`) - room chat history
//! - **Health** (`health`) - health summary and Prometheus metrics

mod health;
mod matching;
mod messages;
mod queue;

pub use health::*;
pub use matching::*;
pub use messages::*;
pub use queue::*;
