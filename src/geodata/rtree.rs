//! Bulk-loaded bounding-box tree for ways and relations.

use serde::{Deserialize, Serialize};
use smallvec::{SmallVec, smallvec};
use tracing::debug;

use crate::geodata::FeatureId;
use crate::geometry::{Coord, FixedPoint, FixedRect};

/// Maximum number of ids stored in a single leaf.
const LEAF_CAPACITY: usize = 100;

/// Static tree over feature bounding boxes answering intersection queries.
///
/// Bulk-loaded by splitting at the median bounding-box center, alternating
/// axes per level. Every tree node stores the enclosing rectangle of its
/// subtree; leaf candidates are re-tested against their own bounding box
/// since the node rectangle is a union, not a per-id predicate.
///
/// Features with the empty sentinel rectangle are left out at build time.
/// Each remaining id ends up in exactly one leaf, so query results are free
/// of duplicates by construction.
#[derive(Serialize, Deserialize, Debug)]
pub(crate) struct RTree<T> {
    /// Bounding box of every feature, indexed by raw id.
    rects: Vec<FixedRect>,
    nodes: Vec<RNode<T>>,
}

#[derive(Serialize, Deserialize, Debug)]
struct RNode<T> {
    /// Enclosing rectangle of all ids below this node.
    bounds: FixedRect,
    left: Option<u32>,
    right: Option<u32>,

    /// Leaf payload.
    ids: Vec<T>,
}

impl<T> RNode<T> {
    fn new() -> Self {
        Self { bounds: FixedRect::EMPTY, left: None, right: None, ids: Vec::new() }
    }

    fn is_leaf(&self) -> bool {
        self.left.is_none() && self.right.is_none()
    }
}

impl<T: FeatureId> RTree<T> {
    /// Build the tree over per-feature bounding boxes, indexed by raw id.
    pub fn build(rects: Vec<FixedRect>) -> Self {
        let ids: Vec<T> = (0..rects.len())
            .filter(|i| !rects[*i].is_empty())
            .map(T::from_index)
            .collect();
        debug!("indexing {} of {} feature rectangles", ids.len(), rects.len());

        if ids.is_empty() {
            return Self { rects, nodes: Vec::new() };
        }

        // Precomputed rectangle centers for the median search.
        let centers: Vec<FixedPoint> = rects.iter().map(FixedRect::center).collect();

        let mut nodes = vec![RNode::new()];
        let mut stack = vec![(0u32, ids, 0u32)];

        while let Some((slot, mut ids, depth)) = stack.pop() {
            nodes[slot as usize].bounds = enclosing_bounds(&rects, &ids);

            // Groups with identical centers cannot be split and become an
            // oversized leaf.
            let first_center = centers[ids[0].index()];
            if ids.len() <= LEAF_CAPACITY
                || ids.iter().all(|id| centers[id.index()] == first_center)
            {
                nodes[slot as usize].ids = ids;
                continue;
            }

            // Median split by rectangle center along the current axis.
            let mid = ids.len() / 2;
            let x_axis = depth % 2 == 0;
            let coord = |id: &T| -> Coord {
                let center = centers[id.index()];
                if x_axis { center.x } else { center.y }
            };
            ids.select_nth_unstable_by_key(mid, coord);
            let median = coord(&ids[mid]);

            let mut left = Vec::with_capacity(mid + 1);
            let mut right = Vec::with_capacity(ids.len() - mid);
            for id in ids {
                if coord(&id) <= median { left.push(id) } else { right.push(id) }
            }

            if !left.is_empty() {
                let child = nodes.len() as u32;
                nodes.push(RNode::new());
                nodes[slot as usize].left = Some(child);
                stack.push((child, left, depth + 1));
            }

            if !right.is_empty() {
                let child = nodes.len() as u32;
                nodes.push(RNode::new());
                nodes[slot as usize].right = Some(child);
                stack.push((child, right, depth + 1));
            }
        }

        Self { rects, nodes }
    }

    /// Get all ids whose bounding box intersects the rectangle, in no
    /// particular order.
    pub fn search(&self, rect: &FixedRect) -> Vec<T> {
        let mut result = Vec::new();
        self.search_impl(rect, false, &mut result);
        result
    }

    /// Check if any indexed bounding box intersects the rectangle.
    pub fn contains(&self, rect: &FixedRect) -> bool {
        self.search_impl(rect, true, &mut Vec::new())
    }

    fn search_impl(&self, rect: &FixedRect, first_only: bool, result: &mut Vec<T>) -> bool {
        if self.nodes.is_empty() {
            return false;
        }

        let mut stack: SmallVec<[u32; 32]> = smallvec![0];

        while let Some(index) = stack.pop() {
            let node = &self.nodes[index as usize];

            if node.is_leaf() {
                for id in &node.ids {
                    if self.rects[id.index()].intersects(rect) {
                        if first_only {
                            return true;
                        }
                        result.push(*id);
                    }
                }
                continue;
            }

            for child in [node.left, node.right] {
                let Some(child) = child else { continue };
                let bounds = &self.nodes[child as usize].bounds;

                if rect.contains_rect(bounds) {
                    // Every id below this child intersects the query.
                    if first_only {
                        return true;
                    }
                    self.collect_subtree(child, result);
                } else if rect.intersects(bounds) {
                    stack.push(child);
                }
            }
        }

        false
    }

    /// Drain all leaf ids below a node.
    fn collect_subtree(&self, start: u32, result: &mut Vec<T>) {
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

/// Enclosing rectangle of a non-empty id set.
fn enclosing_bounds<T: FeatureId>(rects: &[FixedRect], ids: &[T]) -> FixedRect {
    let mut bounds = rects[ids[0].index()];
    for id in &ids[1..] {
        bounds.enclose(&rects[id.index()]);
    }
    bounds
}
