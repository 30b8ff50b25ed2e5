//! Segment trie for route matching.
//!
//! Nodes are keyed by segment *shape* (literal text, or param kind + matcher),
//! never by param name, so `/[a]` and `/[b]` share a node and collide at the
//! terminal. Siblings are kept sorted by segment rank (stable, so declaration
//! order breaks ties). A depth-first search that tries siblings in that order
//! returns the most specific route first, backtracking when a branch fails.
//!
//! Matching cost is O(segments) for the common case; backtracking only revisits
//! nodes where a dynamic alternative exists.

use crate::matchers::ParamMatcher;
use crate::routes::SegmentSpec;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Shape {
    Literal(String),
    Param {
        matcher: Option<String>,
        optional: bool,
        rest: bool,
    },
}

impl Shape {
    fn of(spec: &SegmentSpec) -> Self {
        match spec {
            SegmentSpec::Literal(s) => Shape::Literal(s.clone()),
            SegmentSpec::Param(p) => Shape::Param {
                matcher: p.matcher.clone(),
                optional: p.optional,
                rest: p.rest,
            },
        }
    }
}

#[derive(Debug, Clone)]
struct Edge {
    shape: Shape,
    rank: u8,
    matcher: Option<ParamMatcher>,
    node: TrieNode,
}

impl Edge {
    fn accepts(&self, value: &str) -> bool {
        self.matcher.as_ref().is_none_or(|m| m.test(value))
    }
}

#[derive(Debug, Clone, Default)]
struct TrieNode {
    /// Index of the route that ends here
    terminal: Option<usize>,
    children: Vec<Edge>,
}

/// Values bound while walking the trie, one per dynamic segment in pattern order.
/// `None` marks an absent optional param.
pub(crate) type Bindings = Vec<Option<String>>;

/// Decision structure of a route table.
#[derive(Debug, Clone, Default)]
pub(crate) struct RouteTrie {
    root: TrieNode,
}

impl RouteTrie {
    /// Insert a route. Returns the index of an already-registered route when the
    /// pattern is structurally identical to it.
    pub(crate) fn insert(
        &mut self,
        pattern: &[SegmentSpec],
        matchers: &HashMap<String, ParamMatcher>,
        index: usize,
    ) -> Result<(), usize> {
        let mut node = &mut self.root;
        for spec in pattern {
            let shape = Shape::of(spec);
            let pos = match node.children.iter().position(|e| e.shape == shape) {
                Some(pos) => pos,
                None => {
                    let rank = spec.rank();
                    let matcher = spec.param().and_then(|p| matchers.get(&p.name).cloned());
                    // after the last sibling of equal or higher rank
                    let pos = node
                        .children
                        .iter()
                        .position(|e| e.rank < rank)
                        .unwrap_or(node.children.len());
                    node.children.insert(
                        pos,
                        Edge {
                            shape,
                            rank,
                            matcher,
                            node: TrieNode::default(),
                        },
                    );
                    pos
                }
            };
            node = &mut node.children[pos].node;
        }
        match node.terminal {
            Some(existing) => Err(existing),
            None => {
                node.terminal = Some(index);
                Ok(())
            }
        }
    }

    /// Find the most specific route for already-decoded segments.
    pub(crate) fn find(&self, segments: &[String]) -> Option<(usize, Bindings)> {
        let mut bindings = Vec::new();
        let index = search(&self.root, segments, &mut bindings)?;
        Some((index, bindings))
    }
}

fn search(node: &TrieNode, segments: &[String], bindings: &mut Bindings) -> Option<usize> {
    if segments.is_empty() {
        if let Some(index) = node.terminal {
            return Some(index);
        }
    }

    for edge in &node.children {
        match &edge.shape {
            Shape::Literal(text) => {
                if segments.first().is_some_and(|s| s == text) {
                    if let Some(found) = search(&edge.node, &segments[1..], bindings) {
                        return Some(found);
                    }
                }
            }
            Shape::Param {
                optional,
                rest: false,
                ..
            } => {
                if let Some(first) = segments.first() {
                    if !first.is_empty() && edge.accepts(first) {
                        bindings.push(Some(first.clone()));
                        if let Some(found) = search(&edge.node, &segments[1..], bindings) {
                            return Some(found);
                        }
                        bindings.pop();
                    }
                }
                if *optional {
                    bindings.push(None);
                    if let Some(found) = search(&edge.node, segments, bindings) {
                        return Some(found);
                    }
                    bindings.pop();
                }
            }
            Shape::Param {
                optional,
                rest: true,
                ..
            } => {
                // rest is terminal, so the child must end a route
                let Some(index) = edge.node.terminal else {
                    continue;
                };
                if segments.is_empty() {
                    if *optional && edge.accepts("") {
                        bindings.push(Some(String::new()));
                        return Some(index);
                    }
                    continue;
                }
                let joined = segments.join("/");
                if edge.accepts(&joined) {
                    bindings.push(Some(joined));
                    return Some(index);
                }
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::pattern::parse_route_id;

    fn trie(ids: &[&str]) -> RouteTrie {
        let mut t = RouteTrie::default();
        for (i, id) in ids.iter().enumerate() {
            let pattern = parse_route_id(id).unwrap().pattern();
            t.insert(&pattern, &HashMap::new(), i).unwrap();
        }
        t
    }

    fn segs(path: &str) -> Vec<String> {
        path.split('/').skip(1).map(str::to_string).collect()
    }

    #[test]
    fn test_literal_beats_param_regardless_of_order() {
        let t = trie(&["/a/[b]", "/a/literal"]);
        assert_eq!(t.find(&segs("/a/literal")).unwrap().0, 1);
        assert_eq!(t.find(&segs("/a/other")).unwrap().0, 0);
    }

    #[test]
    fn test_backtracks_out_of_dead_end() {
        let t = trie(&["/a/[b]/c", "/[x]/b/d"]);
        let (index, bindings) = t.find(&segs("/a/b/d")).unwrap();
        assert_eq!(index, 1);
        assert_eq!(bindings, vec![Some("a".to_string())]);
    }

    #[test]
    fn test_identical_shapes_collide() {
        let mut t = trie(&["/[a]"]);
        let pattern = parse_route_id("/[b]").unwrap().pattern();
        assert_eq!(t.insert(&pattern, &HashMap::new(), 1), Err(0));
    }

    #[test]
    fn test_optional_absent_and_present() {
        let t = trie(&["/[[lang]]/about"]);
        assert_eq!(t.find(&segs("/about")).unwrap().1, vec![None]);
        assert_eq!(t.find(&segs("/de/about")).unwrap().1, vec![Some("de".to_string())]);
    }

    #[test]
    fn test_rest_requires_a_segment_unless_optional() {
        let t = trie(&["/docs/[...path]"]);
        assert!(t.find(&segs("/docs")).is_none());
        assert_eq!(
            t.find(&segs("/docs/a/b")).unwrap().1,
            vec![Some("a/b".to_string())]
        );

        let t = trie(&["/files/[[...path]]"]);
        assert_eq!(t.find(&segs("/files")).unwrap().1, vec![Some(String::new())]);
    }

    #[test]
    fn test_rest_absorbs_empty_segments() {
        let t = trie(&["/[...all]"]);
        assert_eq!(t.find(&segs("/a//b")).unwrap().1, vec![Some("a//b".to_string())]);
    }
}
