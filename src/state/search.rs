use std::collections::BTreeSet;

use regex::RegexBuilder;
use serde::Serialize;

use crate::ir::EntityKind;

use super::VisualizationState;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchMatch {
    pub id: String,
    pub kind: EntityKind,
    pub label: String,
}

enum Matcher {
    Literal(String),
    Pattern(regex::Regex),
}

impl Matcher {
    fn parse(query: &str) -> Self {
        if let Some(pattern) = query
            .strip_prefix('/')
            .and_then(|rest| rest.strip_suffix('/'))
            .filter(|pattern| !pattern.is_empty())
        {
            match RegexBuilder::new(pattern).case_insensitive(true).build() {
                Ok(re) => return Matcher::Pattern(re),
                Err(err) => {
                    tracing::debug!(query, error = %err, "search pattern invalid, matching literally");
                }
            }
        }
        Matcher::Literal(query.to_lowercase())
    }

    fn is_match(&self, haystack: &str) -> bool {
        match self {
            Matcher::Literal(needle) => haystack.contains(needle.as_str()),
            Matcher::Pattern(re) => re.is_match(haystack),
        }
    }
}

impl VisualizationState {
    /// Case-insensitive label search over nodes and containers, hidden ones
    /// included. `/pattern/` is matched as a regular expression.
    pub fn search(&self, query: &str) -> Vec<SearchMatch> {
        let query = query.trim();
        if query.is_empty() {
            return Vec::new();
        }
        let matcher = Matcher::parse(query);
        let index = self.index();
        index
            .search_keys
            .iter()
            .filter(|key| key.haystacks.iter().any(|h| matcher.is_match(h)))
            .map(|key| SearchMatch {
                id: key.id.clone(),
                kind: key.kind,
                label: key.label.clone(),
            })
            .collect()
    }

    /// Collapsed containers that must be expanded for every match to be
    /// visible, outermost first. A matched container itself stays as is.
    pub fn containers_to_reveal(&self, matches: &[SearchMatch]) -> Vec<String> {
        let mut needed: BTreeSet<(usize, String)> = BTreeSet::new();
        for found in matches {
            let ancestors = self.ancestors(&found.id);
            let depth = ancestors.len();
            for (distance, ancestor) in ancestors.into_iter().enumerate() {
                let collapsed = self
                    .container(&ancestor)
                    .map(|c| c.collapsed)
                    .unwrap_or(false);
                if collapsed {
                    needed.insert((depth - distance - 1, ancestor));
                }
            }
        }
        needed.into_iter().map(|(_, id)| id).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{ContainerSpec, NodeSpec};

    fn sample() -> VisualizationState {
        let mut state = VisualizationState::new();
        state
            .add_node(NodeSpec::new("n1").with_label("map").with_full_label("map(|x| x * 2)"))
            .unwrap();
        state.add_node(NodeSpec::new("n2").with_label("Filter")).unwrap();
        state.add_node(NodeSpec::new("n3").with_label("sink")).unwrap();
        state
            .add_container(ContainerSpec::new("inner", ["n1", "n2"]).with_label("Stage"))
            .unwrap();
        state
            .add_container(ContainerSpec::new("outer", ["inner"]).with_label("Cluster"))
            .unwrap();
        state
    }

    #[test]
    fn literal_search_is_case_insensitive_and_covers_full_labels() {
        let state = sample();
        let ids: Vec<String> = state.search("FILT").into_iter().map(|m| m.id).collect();
        assert_eq!(ids, vec!["n2"]);
        let ids: Vec<String> = state.search("x * 2").into_iter().map(|m| m.id).collect();
        assert_eq!(ids, vec!["n1"]);
        assert!(state.search("   ").is_empty());
    }

    #[test]
    fn slashes_select_regex_matching() {
        let state = sample();
        let found = state.search("/^s(tage|ink)$/");
        let ids: Vec<&str> = found.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["n3", "inner"]);
        assert_eq!(found[1].kind, EntityKind::Container);
    }

    #[test]
    fn broken_regex_falls_back_to_literal() {
        let mut state = sample();
        state.add_node(NodeSpec::new("odd").with_label("/(/")).unwrap();
        let ids: Vec<String> = state.search("/(/").into_iter().map(|m| m.id).collect();
        assert_eq!(ids, vec!["odd"]);
    }

    #[test]
    fn reveal_lists_collapsed_ancestors_outermost_first() {
        let mut state = sample();
        state.collapse_container("inner").unwrap();
        state.collapse_container("outer").unwrap();
        let matches = state.search("filter");
        assert_eq!(state.containers_to_reveal(&matches), vec!["outer", "inner"]);

        state.expand_container("outer").unwrap();
        state.expand_container("inner").unwrap();
        assert!(state.containers_to_reveal(&matches).is_empty());
    }
}
