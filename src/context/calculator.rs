use super::set::{ContextSet, SERVER_KEY, WORLD_KEY};
use crate::error::Result;
use crate::types::HolderId;

/// Contributes situational contexts for a subject.
///
/// Implementations are supplied by the host platform (current world, game
/// mode and so on) and are consulted whenever query options are built for
/// a check.
pub trait ContextCalculator: Send + Sync {
    fn name(&self) -> &str;

    fn calculate(&self, subject: &HolderId) -> ContextSet;
}

/// Contributes the configured `server` and `world` values to every subject.
#[derive(Debug, Clone)]
pub struct StaticContextCalculator {
    contexts: ContextSet,
}

impl StaticContextCalculator {
    pub fn new(server: &str, world: Option<&str>) -> Result<Self> {
        let mut contexts = ContextSet::empty();
        if !server.trim().is_empty() && !server.eq_ignore_ascii_case("global") {
            contexts = contexts.with(SERVER_KEY, server)?;
        }
        if let Some(world) = world {
            contexts = contexts.with(WORLD_KEY, world)?;
        }
        Ok(Self { contexts })
    }
}

impl ContextCalculator for StaticContextCalculator {
    fn name(&self) -> &str {
        "static"
    }

    fn calculate(&self, _subject: &HolderId) -> ContextSet {
        self.contexts.clone()
    }
}
