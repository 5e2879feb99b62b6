//! Static kd-tree over node locations.

use serde::{Deserialize, Serialize};
use smallvec::{SmallVec, smallvec};
use tracing::debug;

use crate::geodata::NodeId;
use crate::geometry::{Coord, FixedPoint, FixedRect};

/// Maximum number of points stored in a single leaf.
const LEAF_CAPACITY: usize = 1024;

/// Extent covering every representable point, the root's search bounds.
const UNIVERSE: FixedRect =
    FixedRect { min_x: Coord::MIN, min_y: Coord::MIN, max_x: Coord::MAX, max_y: Coord::MAX };

/// Balanced 2D kd-tree answering rectangular range queries over points.
///
/// The tree is built once and never modified. Nodes live in a single arena
/// and reference their children by index; all traversals use explicit
/// worklists, so tree depth never bounds stack usage.
#[derive(Serialize, Deserialize, Debug)]
pub(crate) struct NodeKdTree {
    nodes: Vec<KdNode>,
}

#[derive(Serialize, Deserialize, Default, Debug)]
struct KdNode {
    /// Split coordinate; X at even depths, Y at odd depths.
    key: Coord,
    left: Option<u32>,
    right: Option<u32>,

    /// Leaf payload, parallel arrays.
    ids: Vec<NodeId>,
    points: Vec<FixedPoint>,
}

impl KdNode {
    fn is_leaf(&self) -> bool {
        self.left.is_none() && self.right.is_none()
    }
}

impl NodeKdTree {
    /// Build the tree over a sequence of node locations.
    ///
    /// The id of each point is its position in the slice. Identical input
    /// produces a structurally identical tree, which keeps the persisted
    /// artifact stable.
    pub fn build(points: &[FixedPoint]) -> Self {
        debug!("indexing {} nodes", points.len());

        let items: Vec<_> =
            points.iter().enumerate().map(|(i, p)| (NodeId::new(i as u32), *p)).collect();
        if items.is_empty() {
            return Self { nodes: Vec::new() };
        }

        let mut nodes = vec![KdNode::default()];
        let mut stack = vec![(0u32, items, 0u32)];

        while let Some((slot, mut items, depth)) = stack.pop() {
            // Groups of identical points cannot be split and become an
            // oversized leaf.
            if items.len() <= LEAF_CAPACITY || items.iter().all(|(_, p)| *p == items[0].1) {
                let node = &mut nodes[slot as usize];
                node.ids = items.iter().map(|(id, _)| *id).collect();
                node.points = items.into_iter().map(|(_, p)| p).collect();
                continue;
            }

            // Median split along the current axis.
            let mid = items.len() / 2;
            let x_axis = depth % 2 == 0;
            let median = if x_axis {
                items.select_nth_unstable_by_key(mid, |(_, p)| p.x);
                items[mid].1.x
            } else {
                items.select_nth_unstable_by_key(mid, |(_, p)| p.y);
                items[mid].1.y
            };

            let mut left = Vec::with_capacity(mid + 1);
            let mut right = Vec::with_capacity(items.len() - mid);
            for item in items {
                let coord = if x_axis { item.1.x } else { item.1.y };
                if coord <= median { left.push(item) } else { right.push(item) }
            }

            nodes[slot as usize].key = median;

            if !left.is_empty() {
                let child = nodes.len() as u32;
                nodes.push(KdNode::default());
                nodes[slot as usize].left = Some(child);
                stack.push((child, left, depth + 1));
            }

            if !right.is_empty() {
                let child = nodes.len() as u32;
                nodes.push(KdNode::default());
                nodes[slot as usize].right = Some(child);
                stack.push((child, right, depth + 1));
            }
        }

        Self { nodes }
    }

    /// Get all ids whose point lies inside the rectangle, in no particular
    /// order.
    pub fn search(&self, rect: &FixedRect) -> Vec<NodeId> {
        let mut result = Vec::new();
        self.search_impl(rect, false, &mut result);
        result
    }

    /// Check if any indexed point lies inside the rectangle.
    pub fn contains(&self, rect: &FixedRect) -> bool {
        self.search_impl(rect, true, &mut Vec::new())
    }

    fn search_impl(&self, rect: &FixedRect, first_only: bool, result: &mut Vec<NodeId>) -> bool {
        if self.nodes.is_empty() {
            return false;
        }

        let mut stack: SmallVec<[(u32, FixedRect, u32); 32]> = smallvec![(0, UNIVERSE, 0)];

        while let Some((index, bounds, depth)) = stack.pop() {
            let node = &self.nodes[index as usize];

            if node.is_leaf() {
                for (i, point) in node.points.iter().enumerate() {
                    if rect.contains(*point) {
                        if first_only {
                            return true;
                        }
                        result.push(node.ids[i]);
                    }
                }
                continue;
            }

            // Derive the child extents by slicing at the split coordinate.
            let (mut left_bounds, mut right_bounds) = (bounds, bounds);
            if depth % 2 == 0 {
                left_bounds.max_x = node.key;
                right_bounds.min_x = node.key;
            } else {
                left_bounds.max_y = node.key;
                right_bounds.min_y = node.key;
            }

            for (child, child_bounds) in [(node.left, left_bounds), (node.right, right_bounds)] {
                let Some(child) = child else { continue };

                if rect.contains_rect(&child_bounds) {
                    // Every point below this child is inside the query.
                    if first_only {
                        return true;
                    }
                    self.collect_subtree(child, result);
                } else if rect.intersects(&child_bounds) {
                    stack.push((child, child_bounds, depth + 1));
                }
            }
        }

        false
    }

    /// Drain all leaf ids below a node.
    fn collect_subtree(&self, start: u32, result: &mut Vec<NodeId>) {
        let mut stack: SmallVec<[u32; 32]> = smallvec![start];

        while let Some(index) = stack.pop() {
            let node = &self.nodes[index as usize];

            if node.is_leaf() {
                result.extend_from_slice(&node.ids);
                continue;
            }

            stack.extend(node.left);
            stack.extend(node.right);
        }
    }
}
