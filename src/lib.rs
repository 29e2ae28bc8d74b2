pub mod calculator;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod holder;
pub mod inheritance;
pub mod messaging;
pub mod meta;
pub mod metrics;
pub mod node;
pub mod storage;
pub mod types;
pub mod verbose;

pub use calculator::{Tristate, TristateResult};
pub use config::Config;
pub use context::{ContextSet, QueryOptions};
pub use engine::{Engine, EngineBuilder, EngineState};
pub use error::{PermweaveError, Result};
pub use holder::PermissionHolder;
pub use node::Node;
pub use types::{CheckOrigin, HolderId};
