use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::ir::EntityKind;

use super::VisualizationState;

/// Lookup tables derived from the canonical collections, valid for exactly
/// one topology version.
#[derive(Debug)]
pub(crate) struct StateIndex {
    pub(crate) version: u64,
    pub(crate) parents: HashMap<String, String>,
    pub(crate) search_keys: Vec<SearchKey>,
}

#[derive(Debug, Clone)]
pub(crate) struct SearchKey {
    pub(crate) id: String,
    pub(crate) kind: EntityKind,
    pub(crate) label: String,
    /// Lowercased label variants the query is matched against.
    pub(crate) haystacks: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct IndexCache {
    slot: RefCell<Option<Rc<StateIndex>>>,
}

impl IndexCache {
    pub(crate) fn get_or_build(
        &self,
        version: u64,
        build: impl FnOnce() -> StateIndex,
    ) -> Rc<StateIndex> {
        if let Some(index) = self.slot.borrow().as_ref() {
            if index.version == version {
                return Rc::clone(index);
            }
        }
        let index = Rc::new(build());
        *self.slot.borrow_mut() = Some(Rc::clone(&index));
        index
    }

    #[cfg(test)]
    pub(crate) fn cached_version(&self) -> Option<u64> {
        self.slot.borrow().as_ref().map(|index| index.version)
    }
}

pub(crate) fn build_index(state: &VisualizationState) -> StateIndex {
    let mut parents = HashMap::new();
    for container in state.containers() {
        for child in &container.children {
            // First claim wins; double claims are reported by validation.
            parents
                .entry(child.clone())
                .or_insert_with(|| container.id.clone());
        }
    }

    let mut search_keys = Vec::with_capacity(state.node_count() + state.container_count());
    for node in state.nodes() {
        let mut haystacks = vec![node.label.to_lowercase()];
        if let Some(full) = &node.full_label {
            haystacks.push(full.to_lowercase());
        }
        search_keys.push(SearchKey {
            id: node.id.clone(),
            kind: EntityKind::Node,
            label: node.display_label(state.show_full_labels()).to_string(),
            haystacks,
        });
    }
    for container in state.containers() {
        search_keys.push(SearchKey {
            id: container.id.clone(),
            kind: EntityKind::Container,
            label: container.label.clone(),
            haystacks: vec![container.label.to_lowercase()],
        });
    }

    StateIndex {
        version: state.topology_version(),
        parents,
        search_keys,
    }
}
