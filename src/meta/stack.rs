use super::element::{ChatMetaEntry, MetaStackElement};
use crate::node::ChatMetaType;

use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// What to do when several elements pick the same value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicateRemoval {
    #[default]
    RetainAll,
    /// Keep the first occurrence of each value.
    FirstOnly,
    /// Keep the last occurrence of each value.
    LastOnly,
}

impl DuplicateRemoval {
    fn apply<'a>(&self, values: Vec<&'a str>) -> Vec<&'a str> {
        match self {
            DuplicateRemoval::RetainAll => values,
            DuplicateRemoval::FirstOnly => {
                let mut out: Vec<&str> = Vec::with_capacity(values.len());
                for v in values {
                    if !out.contains(&v) {
                        out.push(v);
                    }
                }
                out
            }
            DuplicateRemoval::LastOnly => {
                let mut out: Vec<&str> = Vec::with_capacity(values.len());
                for v in values.into_iter().rev() {
                    if !out.contains(&v) {
                        out.push(v);
                    }
                }
                out.reverse();
                out
            }
        }
    }
}

/// Elements plus spacers. Shared by every stack built from it.
#[derive(Debug, Clone)]
pub struct MetaStackDefinition {
    elements: Vec<Arc<dyn MetaStackElement>>,
    duplicates: DuplicateRemoval,
    start_spacer: String,
    middle_spacer: String,
    end_spacer: String,
}

impl MetaStackDefinition {
    pub fn new(
        elements: Vec<Arc<dyn MetaStackElement>>,
        duplicates: DuplicateRemoval,
        start_spacer: &str,
        middle_spacer: &str,
        end_spacer: &str,
    ) -> Self {
        Self {
            elements,
            duplicates,
            start_spacer: start_spacer.to_string(),
            middle_spacer: middle_spacer.to_string(),
            end_spacer: end_spacer.to_string(),
        }
    }

    pub fn elements(&self) -> &[Arc<dyn MetaStackElement>] {
        &self.elements
    }
}

/// One in-progress stack: the current pick of each element.
#[derive(Debug, Clone)]
pub struct MetaStack {
    definition: Arc<MetaStackDefinition>,
    meta_type: ChatMetaType,
    picks: Vec<Option<ChatMetaEntry>>,
}

impl MetaStack {
    pub fn new(definition: Arc<MetaStackDefinition>, meta_type: ChatMetaType) -> Self {
        let picks = vec![None; definition.elements.len()];
        Self {
            definition,
            meta_type,
            picks,
        }
    }

    pub fn meta_type(&self) -> ChatMetaType {
        self.meta_type
    }

    /// Offers `entry` to every element. Entries must arrive highest
    /// precedence first.
    pub fn accumulate(&mut self, entry: &ChatMetaEntry) {
        if entry.meta_type != self.meta_type {
            return;
        }
        for (element, pick) in self.definition.elements.iter().zip(self.picks.iter_mut()) {
            if element.should_accumulate(self.meta_type, entry, pick.as_ref()) {
                *pick = Some(entry.clone());
            }
        }
    }

    /// Picks joined with the middle spacer and wrapped in the start and end
    /// spacers. Empty when no element picked anything.
    pub fn build(&self) -> String {
        let values: Vec<&str> = self
            .picks
            .iter()
            .flatten()
            .map(|e| e.value.as_str())
            .collect();
        let values = self.definition.duplicates.apply(values);
        if values.is_empty() {
            return String::new();
        }

        let mut out = String::new();
        out.push_str(&self.definition.start_spacer);
        out.push_str(&values.join(&self.definition.middle_spacer));
        out.push_str(&self.definition.end_spacer);
        out
    }
}
