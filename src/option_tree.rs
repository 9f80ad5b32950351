//! In-memory index over an attribute's option hierarchy.
//!
//! Options arrive as a flat list with parent references and are stored in an
//! arena. Construction never recurses: parents are resolved through an id map,
//! reachability is computed with a work queue, and every cycle found in the
//! input is cut by promoting one of its nodes to the top level.

use catalogue_types::attribute::AttributeOption;
use std::cmp::Reverse;
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use uuid::Uuid;

#[derive(Clone, Debug)]
struct OptionNode {
    option: AttributeOption,
    parent: Option<usize>,
    children: Vec<usize>,
    depth: usize,
}

#[derive(Clone, Debug, Default)]
pub struct OptionTree {
    nodes: Vec<OptionNode>,
    roots: Vec<usize>,
    by_slug: HashMap<String, usize>,
}

impl OptionTree {
    pub fn build(options: Vec<AttributeOption>) -> Self {
        let mut nodes: Vec<OptionNode> = Vec::with_capacity(options.len());
        let mut by_slug = HashMap::with_capacity(options.len());
        let mut by_id: HashMap<Uuid, usize> = HashMap::with_capacity(options.len());
        for option in options {
            if by_slug.contains_key(&option.slug) || by_id.contains_key(&option.id) {
                log::warn!(
                    "Duplicate option {} ({}) in attribute {}, keeping the first one",
                    option.slug,
                    option.id,
                    option.attribute_id
                );
                continue;
            }
            by_slug.insert(option.slug.clone(), nodes.len());
            by_id.insert(option.id, nodes.len());
            nodes.push(OptionNode {
                option,
                parent: None,
                children: vec![],
                depth: 0,
            });
        }

        for idx in 0..nodes.len() {
            let Some(parent_id) = nodes[idx].option.parent_id else {
                continue;
            };
            match by_id.get(&parent_id) {
                Some(&parent) => {
                    nodes[idx].parent = Some(parent);
                    nodes[parent].children.push(idx);
                }
                None => log::warn!(
                    "Option {} references missing parent {parent_id}, treating it as top level",
                    nodes[idx].option.slug
                ),
            }
        }

        let mut reached = vec![false; nodes.len()];
        let mut queue: VecDeque<usize> = (0..nodes.len())
            .filter(|&i| nodes[i].parent.is_none())
            .collect();
        mark_reachable(&nodes, &mut reached, &mut queue);

        // Whatever is still unreached hangs on a cycle, every node has one parent at most.
        for start in 0..nodes.len() {
            if reached[start] {
                continue;
            }
            let cut = find_cycle_node(&nodes, start);
            log::warn!(
                "Option {} is part of a parent cycle, treating it as top level",
                nodes[cut].option.slug
            );
            if let Some(parent) = nodes[cut].parent.take() {
                nodes[parent].children.retain(|&c| c != cut);
            }
            queue.push_back(cut);
            mark_reachable(&nodes, &mut reached, &mut queue);
        }

        let mut roots: Vec<usize> = (0..nodes.len())
            .filter(|&i| nodes[i].parent.is_none())
            .collect();
        sort_by_priority(&nodes, &mut roots);
        for idx in 0..nodes.len() {
            let mut children = std::mem::take(&mut nodes[idx].children);
            sort_by_priority(&nodes, &mut children);
            nodes[idx].children = children;
        }

        let mut stack: Vec<(usize, usize)> = roots.iter().map(|&r| (r, 0)).collect();
        while let Some((idx, depth)) = stack.pop() {
            nodes[idx].depth = depth;
            stack.extend(nodes[idx].children.iter().map(|&c| (c, depth + 1)));
        }

        Self {
            nodes,
            roots,
            by_slug,
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn find_by_slug(&self, slug: &str) -> Option<&AttributeOption> {
        self.by_slug.get(slug).map(|&i| &self.nodes[i].option)
    }

    pub fn is_leaf(&self, slug: &str) -> bool {
        self.by_slug
            .get(slug)
            .is_some_and(|&i| self.nodes[i].children.is_empty())
    }

    /// The option itself and its whole subtree, empty for unknown slugs.
    pub fn descendant_slugs(&self, slug: &str) -> BTreeSet<String> {
        let mut res = BTreeSet::new();
        let Some(&start) = self.by_slug.get(slug) else {
            return res;
        };
        let mut stack = vec![start];
        while let Some(idx) = stack.pop() {
            res.insert(self.nodes[idx].option.slug.clone());
            stack.extend(self.nodes[idx].children.iter().copied());
        }
        res
    }

    /// Options from the top level down to `slug` inclusive.
    pub fn ancestor_path(&self, slug: &str) -> Vec<&AttributeOption> {
        let mut path = vec![];
        let mut current = self.by_slug.get(slug).copied();
        while let Some(idx) = current {
            path.push(&self.nodes[idx].option);
            current = self.nodes[idx].parent;
        }
        path.reverse();
        path
    }

    /// Every option in display order with its depth.
    pub fn preorder(&self) -> Vec<(&AttributeOption, usize)> {
        let mut res = Vec::with_capacity(self.nodes.len());
        let mut stack: Vec<usize> = self.roots.iter().rev().copied().collect();
        while let Some(idx) = stack.pop() {
            res.push((&self.nodes[idx].option, self.nodes[idx].depth));
            stack.extend(self.nodes[idx].children.iter().rev().copied());
        }
        res
    }
}

fn mark_reachable(nodes: &[OptionNode], reached: &mut [bool], queue: &mut VecDeque<usize>) {
    while let Some(idx) = queue.pop_front() {
        if reached[idx] {
            continue;
        }
        reached[idx] = true;
        queue.extend(nodes[idx].children.iter().copied());
    }
}

fn find_cycle_node(nodes: &[OptionNode], start: usize) -> usize {
    let mut seen = HashSet::new();
    let mut current = start;
    while seen.insert(current) {
        match nodes[current].parent {
            Some(parent) => current = parent,
            None => return current,
        }
    }
    current
}

fn sort_by_priority(nodes: &[OptionNode], list: &mut [usize]) {
    list.sort_by_key(|&i| (Reverse(nodes[i].option.priority), i));
}

#[cfg(test)]
mod tests {
    use super::*;
    use catalogue_types::LocalizedName;

    fn option(slug: &str, id: u128, parent: Option<u128>, priority: i64) -> AttributeOption {
        AttributeOption {
            id: Uuid::from_u128(id),
            attribute_id: Uuid::from_u128(999),
            parent_id: parent.map(Uuid::from_u128),
            slug: slug.to_string(),
            name: LocalizedName::new("en", slug),
            priority,
        }
    }

    fn regions() -> OptionTree {
        OptionTree::build(vec![
            option("france", 1, None, 0),
            option("bordeaux", 2, Some(1), 0),
            option("medoc", 3, Some(2), 0),
            option("pauillac", 4, Some(3), 0),
            option("burgundy", 5, Some(1), 10),
            option("spain", 6, None, 5),
            option("rioja", 7, Some(6), 0),
        ])
    }

    fn slugs(list: &BTreeSet<String>) -> Vec<&str> {
        list.iter().map(String::as_str).collect()
    }

    #[test]
    fn descendants_include_self_and_subtree() {
        let tree = regions();
        assert_eq!(
            slugs(&tree.descendant_slugs("bordeaux")),
            vec!["bordeaux", "medoc", "pauillac"]
        );
        assert_eq!(slugs(&tree.descendant_slugs("rioja")), vec!["rioja"]);
        assert!(tree.descendant_slugs("missing").is_empty());
    }

    #[test]
    fn descendants_contain_every_child_subtree() {
        let tree = regions();
        for (option, _) in tree.preorder() {
            let own = tree.descendant_slugs(&option.slug);
            assert!(own.contains(&option.slug));
            let idx = tree.by_slug[&option.slug];
            for &child in &tree.nodes[idx].children {
                let child_set = tree.descendant_slugs(&tree.nodes[child].option.slug);
                assert!(child_set.is_subset(&own));
            }
        }
    }

    #[test]
    fn ancestor_path_runs_from_root() {
        let tree = regions();
        let path: Vec<_> = tree
            .ancestor_path("pauillac")
            .into_iter()
            .map(|o| o.slug.as_str())
            .collect();
        assert_eq!(path, vec!["france", "bordeaux", "medoc", "pauillac"]);
        assert!(tree.ancestor_path("missing").is_empty());
    }

    #[test]
    fn preorder_follows_priority() {
        let tree = regions();
        let order: Vec<_> = tree
            .preorder()
            .into_iter()
            .map(|(o, depth)| (o.slug.as_str(), depth))
            .collect();
        assert_eq!(
            order,
            vec![
                ("spain", 0),
                ("rioja", 1),
                ("france", 0),
                ("burgundy", 1),
                ("bordeaux", 1),
                ("medoc", 2),
                ("pauillac", 3),
            ]
        );
    }

    #[test]
    fn orphan_becomes_top_level() {
        let tree = OptionTree::build(vec![
            option("merlot", 1, None, 0),
            option("lost", 2, Some(42), 0),
        ]);
        assert_eq!(tree.len(), 2);
        assert_eq!(tree.ancestor_path("lost").len(), 1);
        assert!(tree.preorder().iter().any(|(o, d)| o.slug == "lost" && *d == 0));
    }

    #[test]
    fn cycles_are_cut() {
        let tree = OptionTree::build(vec![
            option("a", 1, Some(3), 0),
            option("b", 2, Some(1), 0),
            option("c", 3, Some(2), 0),
            option("d", 4, Some(3), 0),
            option("self", 5, Some(5), 0),
        ]);
        assert_eq!(tree.preorder().len(), 5);
        assert_eq!(slugs(&tree.descendant_slugs("self")), vec!["self"]);
        let path = tree.ancestor_path("d");
        assert!(path.len() <= 4);
        assert_eq!(path.last().map(|o| o.slug.as_str()), Some("d"));
        // every node reachable exactly once from the top level
        let mut seen: Vec<_> = tree.preorder().into_iter().map(|(o, _)| &o.slug).collect();
        seen.sort();
        seen.dedup();
        assert_eq!(seen.len(), 5);
    }

    #[test]
    fn duplicate_slug_keeps_first() {
        let tree = OptionTree::build(vec![
            option("merlot", 1, None, 0),
            option("merlot", 2, None, 0),
        ]);
        assert_eq!(tree.len(), 1);
        assert_eq!(tree.find_by_slug("merlot").map(|o| o.id), Some(Uuid::from_u128(1)));
        assert!(tree.is_leaf("merlot"));
    }
}
