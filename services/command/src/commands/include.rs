//! Include graph validation.
//!
//! An execution may include other executions. Before a new target list is
//! committed, the include graph reachable from the execution must be acyclic
//! and no deeper than the configured bound.

use std::collections::HashMap;

use async_trait::async_trait;
use futures_util::future::{BoxFuture, FutureExt};
use tracing::debug;

use crate::error::CommandError;

pub const DEFAULT_MAX_INCLUDE_DEPTH: usize = 3;

/// Resolves an execution ID to the IDs it includes.
///
/// Implementations must stay within the tenant of the execution being
/// validated.
#[async_trait]
pub trait IncludeResolver: Send + Sync {
    async fn includes(&self, id: &str) -> Result<Vec<String>, CommandError>;
}

/// Include lists resolved during one validation call.
///
/// Never reuse a cache across commands: the lists it holds are only valid
/// for the log state the command loaded.
#[derive(Debug, Default)]
pub struct IncludeCache {
    entries: HashMap<String, Vec<String>>,
}

impl IncludeCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<&[String]> {
        self.entries.get(id).map(Vec::as_slice)
    }

    pub fn insert(&mut self, id: impl Into<String>, includes: Vec<String>) {
        self.entries.insert(id.into(), includes);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn circular(id: &str) -> CommandError {
    CommandError::precondition_failed(
        "include_circular",
        format!("circular include of execution {id}"),
    )
}

fn max_levels(max_depth: usize) -> CommandError {
    CommandError::precondition_failed(
        "include_max_levels",
        format!("includes are nested deeper than {max_depth} levels"),
    )
}

/// Validates the include graph of `root` given its proposed `includes`.
///
/// Fails with code `include_circular` if a path from `root` returns to any
/// execution already on that path, and with `include_max_levels` if a chain
/// reaches `max_depth`. Each execution is resolved at most once per `cache`.
pub async fn check_for_include_cycles(
    root: &str,
    includes: &[String],
    resolver: &dyn IncludeResolver,
    cache: &mut IncludeCache,
    max_depth: usize,
) -> Result<(), CommandError> {
    let ancestors = vec![root.to_string()];
    for include in includes {
        if include == root {
            debug!(root, "Execution includes itself");
            return Err(circular(root));
        }
        visit(resolver, cache, &ancestors, include, 0, max_depth).await?;
    }
    Ok(())
}

fn visit<'a>(
    resolver: &'a dyn IncludeResolver,
    cache: &'a mut IncludeCache,
    ancestors: &'a [String],
    node: &'a str,
    depth: usize,
    max_depth: usize,
) -> BoxFuture<'a, Result<(), CommandError>> {
    async move {
        let children = match cache.get(node) {
            Some(children) => children.to_vec(),
            None => {
                let children = resolver.includes(node).await?;
                cache.insert(node, children.clone());
                children
            }
        };

        let next_depth = depth + 1;
        if next_depth >= max_depth {
            debug!(node, depth = next_depth, max_depth, "Include chain too deep");
            return Err(max_levels(max_depth));
        }

        let mut path = ancestors.to_vec();
        path.push(node.to_string());
        for child in &children {
            if child == node || ancestors.contains(child) {
                debug!(node, child = %child, "Include cycle detected");
                return Err(circular(child));
            }
            visit(resolver, &mut *cache, &path, child, next_depth, max_depth).await?;
        }
        Ok(())
    }
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct MapResolver {
        graph: HashMap<String, Vec<String>>,
        calls: AtomicUsize,
    }

    impl MapResolver {
        fn new(edges: &[(&str, &[&str])]) -> Self {
            Self {
                graph: edges
                    .iter()
                    .map(|(id, includes)| {
                        (
                            id.to_string(),
                            includes.iter().map(|s| s.to_string()).collect(),
                        )
                    })
                    .collect(),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl IncludeResolver for MapResolver {
        async fn includes(&self, id: &str) -> Result<Vec<String>, CommandError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.graph.get(id).cloned().ok_or_else(|| {
                CommandError::precondition_failed("include_resolve_failed", "cache failed")
            })
        }
    }

    async fn check(
        root: &str,
        includes: &[&str],
        resolver: &MapResolver,
    ) -> Result<(), CommandError> {
        let includes: Vec<String> = includes.iter().map(|s| s.to_string()).collect();
        let mut cache = IncludeCache::new();
        check_for_include_cycles(root, &includes, resolver, &mut cache, 3).await
    }

    #[rstest]
    #[case::unresolvable(&["notexistent"], &[][..], Some("include_resolve_failed"))]
    #[case::single(&["id2"], &[("id2", &[][..])], None)]
    #[case::self_include(&["id1"], &[][..], Some("include_circular"))]
    #[case::chain_of_three(&["id2"], &[("id2", &["id3"][..]), ("id3", &[][..])], None)]
    #[case::chain_back_to_root(&["id2"], &[("id2", &["id3"][..]), ("id3", &["id1"][..])], Some("include_circular"))]
    #[case::tree(
        &["id11", "id12"],
        &[("id11", &["id21", "id23"][..]), ("id12", &["id22"][..]), ("id21", &[][..]), ("id22", &[][..]), ("id23", &[][..])],
        None
    )]
    #[case::tree_leaf_to_root(
        &["id11", "id12"],
        &[("id11", &["id21", "id23"][..]), ("id12", &["id22"][..]), ("id21", &[][..]), ("id22", &[][..]), ("id23", &["id1"][..])],
        Some("include_circular")
    )]
    #[case::tree_leaf_to_parent(
        &["id11", "id12"],
        &[("id11", &["id21", "id23"][..]), ("id12", &["id22"][..]), ("id21", &[][..]), ("id22", &[][..]), ("id23", &["id11"][..])],
        Some("include_circular")
    )]
    #[case::tree_first_leaf_to_parent(
        &["id11", "id12"],
        &[("id11", &["id21", "id23"][..]), ("id12", &["id22"][..]), ("id21", &["id11"][..]), ("id22", &[][..]), ("id23", &[][..])],
        Some("include_circular")
    )]
    #[case::tree_second_branch_to_parent(
        &["id11", "id12"],
        &[("id11", &["id21", "id23"][..]), ("id12", &["id22"][..]), ("id21", &[][..]), ("id22", &["id12"][..]), ("id23", &[][..])],
        Some("include_circular")
    )]
    #[case::chain_of_four(
        &["id2"],
        &[("id2", &["id3"][..]), ("id3", &["id4"][..]), ("id4", &[][..])],
        Some("include_max_levels")
    )]
    #[tokio::test]
    async fn test_include_graph(
        #[case] includes: &[&str],
        #[case] graph: &[(&str, &[&str])],
        #[case] expected: Option<&str>,
    ) {
        let resolver = MapResolver::new(graph);
        let result = check("id1", includes, &resolver).await;
        match expected {
            None => assert!(result.is_ok(), "unexpected error: {result:?}"),
            Some(code) => {
                let err = result.unwrap_err();
                assert!(err.is_precondition_failed());
                assert_eq!(err.code(), code);
            }
        }
    }

    #[tokio::test]
    async fn test_back_edge_is_circular() {
        let resolver = MapResolver::new(&[("B", &["A"])]);
        let err = check("A", &["B"], &resolver).await.unwrap_err();
        assert_eq!(err.code(), "include_circular");
    }

    #[tokio::test]
    async fn test_long_chain_hits_depth_before_anything_else() {
        let resolver = MapResolver::new(&[
            ("B", &["C"]),
            ("C", &["D"]),
            ("D", &["E"]),
            ("E", &[]),
        ]);
        let err = check("A", &["B"], &resolver).await.unwrap_err();
        assert_eq!(err.code(), "include_max_levels");
    }

    #[tokio::test]
    async fn test_deeper_bound_allows_longer_chains() {
        let resolver = MapResolver::new(&[("B", &["C"]), ("C", &["D"]), ("D", &[])]);
        let includes = vec!["B".to_string()];
        let mut cache = IncludeCache::new();
        check_for_include_cycles("A", &includes, &resolver, &mut cache, 4)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_shared_include_resolved_once() {
        let resolver = MapResolver::new(&[("B", &["D"]), ("C", &["D"]), ("D", &[])]);
        let includes = vec!["B".to_string(), "C".to_string()];
        let mut cache = IncludeCache::new();

        check_for_include_cycles("A", &includes, &resolver, &mut cache, 3)
            .await
            .unwrap();

        assert_eq!(resolver.calls.load(Ordering::SeqCst), 3);
        assert_eq!(cache.len(), 3);
        assert_eq!(cache.get("D"), Some(&[][..]));
    }
}
