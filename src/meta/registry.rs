use super::element::{MetaStackElement, StandardElement};
use crate::error::{PermweaveError, Result};
use crate::holder::TrackLookup;

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Named custom stack elements.
///
/// Populated at startup, before meta stack definitions are parsed. Custom
/// names are matched exactly (case-insensitive) after the built-in names.
#[derive(Default)]
pub struct ElementRegistry {
    custom: RwLock<HashMap<String, Arc<dyn MetaStackElement>>>,
}

impl ElementRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, name: &str, element: Arc<dyn MetaStackElement>) {
        self.custom.write().insert(name.trim().to_lowercase(), element);
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.custom.read().contains_key(&name.trim().to_lowercase())
    }

    pub fn parse(
        &self,
        definition: &str,
        tracks: Option<Arc<dyn TrackLookup>>,
    ) -> Result<Arc<dyn MetaStackElement>> {
        if let Some(element) = StandardElement::parse(definition, tracks) {
            return Ok(Arc::new(element));
        }
        self.custom
            .read()
            .get(&definition.trim().to_lowercase())
            .cloned()
            .ok_or_else(|| {
                PermweaveError::InvalidConfig(format!(
                    "unknown meta stack element '{}'",
                    definition
                ))
            })
    }

    pub fn parse_all(
        &self,
        definitions: &[String],
        tracks: Option<Arc<dyn TrackLookup>>,
    ) -> Result<Vec<Arc<dyn MetaStackElement>>> {
        definitions
            .iter()
            .map(|d| self.parse(d, tracks.clone()))
            .collect()
    }
}
