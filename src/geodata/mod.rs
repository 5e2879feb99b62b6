//! Immutable spatial store of OSM-shaped features.

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::info;

use crate::Error;
use crate::geodata::kdtree::NodeKdTree;
use crate::geodata::rtree::RTree;
use crate::geometry::{Coord, FixedPoint, FixedRect};

mod kdtree;
mod rtree;

/// Leading bytes of the on-disk geodata format.
const MAGIC: &[u8; 8] = b"ATLASGEO";

/// Version of the on-disk geodata format.
const VERSION: u32 = 1;

/// Feature tags, ordered by insertion for deterministic serialization.
pub type Tags = IndexMap<String, String>;

/// Index addressing a feature array of the store.
pub(crate) trait FeatureId: Copy {
    fn from_index(index: usize) -> Self;
    fn index(self) -> usize;
}

macro_rules! feature_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(
            Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, Copy, Clone, Debug,
        )]
        pub struct $name(u32);

        impl $name {
            pub fn new(raw: u32) -> Self {
                Self(raw)
            }

            pub fn raw(self) -> u32 {
                self.0
            }
        }

        impl FeatureId for $name {
            fn from_index(index: usize) -> Self {
                Self(index as u32)
            }

            fn index(self) -> usize {
                self.0 as usize
            }
        }
    };
}

feature_id! {
    /// Identifier of a node in the store.
    NodeId
}
feature_id! {
    /// Identifier of a way in the store.
    WayId
}
feature_id! {
    /// Identifier of a relation in the store.
    RelId
}

/// A tagged point feature.
#[derive(Serialize, Deserialize, PartialEq, Clone, Debug)]
pub struct Node {
    location: FixedPoint,
    tags: Tags,
}

impl Node {
    pub fn new(location: FixedPoint, tags: Tags) -> Self {
        Self { location, tags }
    }

    pub fn location(&self) -> FixedPoint {
        self.location
    }

    pub fn tags(&self) -> &Tags {
        &self.tags
    }
}

/// Connectivity of a way's endpoints within the store.
#[derive(Serialize, Deserialize, Default, PartialEq, Eq, Copy, Clone, Debug)]
pub enum WayKind {
    #[default]
    Unconnected,
    ConnectedStart,
    ConnectedEnd,
    ConnectedBoth,
    Closed,
}

/// An ordered polyline or polygon ring over nodes.
#[derive(Serialize, Deserialize, PartialEq, Clone, Debug)]
pub struct Way {
    node_ids: Vec<NodeId>,
    tags: Tags,
    kind: WayKind,
}

impl Way {
    pub fn new(node_ids: Vec<NodeId>, tags: Tags) -> Self {
        Self { node_ids, tags, kind: WayKind::Unconnected }
    }

    /// Member nodes in polyline order.
    pub fn node_ids(&self) -> &[NodeId] {
        &self.node_ids
    }

    pub fn tags(&self) -> &Tags {
        &self.tags
    }

    pub fn kind(&self) -> WayKind {
        self.kind
    }

    /// Check if first and last node coincide.
    pub fn is_closed(&self) -> bool {
        self.kind == WayKind::Closed
    }
}

/// A group of nodes and ways with per-member roles.
#[derive(Serialize, Deserialize, PartialEq, Clone, Debug)]
pub struct Relation {
    node_ids: Vec<NodeId>,
    way_ids: Vec<WayId>,
    node_roles: IndexMap<NodeId, String>,
    way_roles: IndexMap<WayId, String>,
    tags: Tags,
}

impl Relation {
    pub fn new(
        node_ids: Vec<NodeId>,
        node_roles: IndexMap<NodeId, String>,
        way_ids: Vec<WayId>,
        way_roles: IndexMap<WayId, String>,
        tags: Tags,
    ) -> Self {
        Self { node_ids, way_ids, node_roles, way_roles, tags }
    }

    pub fn node_ids(&self) -> &[NodeId] {
        &self.node_ids
    }

    pub fn way_ids(&self) -> &[WayId] {
        &self.way_ids
    }

    pub fn node_role(&self, id: NodeId) -> Option<&str> {
        self.node_roles.get(&id).map(String::as_str)
    }

    pub fn way_role(&self, id: WayId) -> Option<&str> {
        self.way_roles.get(&id).map(String::as_str)
    }

    pub fn tags(&self) -> &Tags {
        &self.tags
    }

    /// Check if this is a multipolygon relation, the only relation kind the
    /// style cascade renders.
    pub fn is_multipolygon(&self) -> bool {
        self.tags.get("type").is_some_and(|value| value == "multipolygon")
    }
}

/// Immutable feature store with spatial indices.
///
/// Built once from the ingester's feature vectors or reconstituted from a
/// previously saved artifact; read-only afterwards. Queries take no locks and
/// may run from any number of threads.
#[derive(Serialize, Deserialize, Debug)]
pub struct Geodata {
    nodes: Vec<Node>,
    ways: Vec<Way>,
    relations: Vec<Relation>,

    node_tree: NodeKdTree,
    way_tree: RTree<WayId>,
    relation_tree: RTree<RelId>,
}

impl Geodata {
    /// Build the store and its indices from owned feature vectors.
    ///
    /// Every id referenced by a way or relation must be in range for the
    /// corresponding array; a dangling reference fails the whole build.
    pub fn build(
        nodes: Vec<Node>,
        mut ways: Vec<Way>,
        relations: Vec<Relation>,
    ) -> Result<Self, Error> {
        info!(
            "building geodata store from {} nodes, {} ways, {} relations",
            nodes.len(),
            ways.len(),
            relations.len()
        );

        validate_references(&nodes, &ways, &relations)?;
        classify_ways(&mut ways);

        let way_rects: Vec<_> = ways.iter().map(|way| way_bounds(&nodes, way)).collect();
        let relation_rects: Vec<_> = relations
            .iter()
            .map(|relation| relation_bounds(&nodes, &way_rects, relation))
            .collect();

        let locations: Vec<_> = nodes.iter().map(Node::location).collect();
        let node_tree = NodeKdTree::build(&locations);
        let way_tree = RTree::build(way_rects);
        let relation_tree = RTree::build(relation_rects);

        Ok(Self { nodes, ways, relations, node_tree, way_tree, relation_tree })
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    pub fn way(&self, id: WayId) -> &Way {
        &self.ways[id.index()]
    }

    pub fn relation(&self, id: RelId) -> &Relation {
        &self.relations[id.index()]
    }

    /// Get all nodes located inside a rectangle, in no particular order.
    pub fn node_ids(&self, rect: &FixedRect) -> Vec<NodeId> {
        self.node_tree.search(rect)
    }

    /// Get all ways whose bounding box intersects a rectangle, in no
    /// particular order.
    pub fn way_ids(&self, rect: &FixedRect) -> Vec<WayId> {
        self.way_tree.search(rect)
    }

    /// Get all relations whose bounding box intersects a rectangle, in no
    /// particular order.
    pub fn relation_ids(&self, rect: &FixedRect) -> Vec<RelId> {
        self.relation_tree.search(rect)
    }

    /// Check if any feature touches a rectangle.
    pub fn contains_data(&self, rect: &FixedRect) -> bool {
        self.node_tree.contains(rect)
            || self.way_tree.contains(rect)
            || self.relation_tree.contains(rect)
    }

    /// Write the store to disk as a single binary artifact.
    ///
    /// The file is written next to the target and moved into place
    /// atomically.
    pub fn save(&self, path: &Path) -> Result<(), Error> {
        info!("saving geodata store to {path:?}");

        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let file = NamedTempFile::new_in(dir)?;

        let mut writer = BufWriter::new(file);
        writer.write_all(MAGIC)?;
        writer.write_all(&VERSION.to_le_bytes())?;
        bincode::serde::encode_into_std_write(self, &mut writer, bincode::config::standard())
            .map_err(io::Error::other)?;

        let file = writer.into_inner().map_err(|err| err.into_error())?;
        file.persist(path)?;

        Ok(())
    }

    /// Reconstitute a store written by [`Self::save`].
    ///
    /// Queries against the loaded store return the same results as against
    /// the original.
    pub fn load(path: &Path) -> Result<Self, Error> {
        info!("loading geodata store from {path:?}");

        let mut reader = BufReader::new(File::open(path)?);

        let mut magic = [0; 8];
        let mut version = [0; 4];
        reader.read_exact(&mut magic).map_err(|_| Error::CorruptStore)?;
        reader.read_exact(&mut version).map_err(|_| Error::CorruptStore)?;

        if &magic != MAGIC {
            return Err(Error::CorruptStore);
        }
        let version = u32::from_le_bytes(version);
        if version != VERSION {
            return Err(Error::IncompatibleStore(version));
        }

        bincode::serde::decode_from_std_read(&mut reader, bincode::config::standard())
            .map_err(|_| Error::CorruptStore)
    }
}

/// Ensure all referenced ids are in range for their feature arrays.
fn validate_references(
    nodes: &[Node],
    ways: &[Way],
    relations: &[Relation],
) -> Result<(), Error> {
    let check_nodes = |ids: &[NodeId]| match ids.iter().find(|id| id.index() >= nodes.len()) {
        Some(id) => Err(Error::DanglingReference("node", id.raw())),
        None => Ok(()),
    };

    for way in ways {
        check_nodes(&way.node_ids)?;
    }

    for relation in relations {
        check_nodes(&relation.node_ids)?;
        if let Some(id) = relation.way_ids.iter().find(|id| id.index() >= ways.len()) {
            return Err(Error::DanglingReference("way", id.raw()));
        }
    }

    Ok(())
}

/// Derive every way's endpoint connectivity.
fn classify_ways(ways: &mut [Way]) {
    let mut endpoint_uses: HashMap<NodeId, u32> = HashMap::new();
    for way in ways.iter() {
        let Some((&first, &last)) = way.node_ids.first().zip(way.node_ids.last()) else {
            continue;
        };

        *endpoint_uses.entry(first).or_default() += 1;
        if first != last {
            *endpoint_uses.entry(last).or_default() += 1;
        }
    }

    for way in ways.iter_mut() {
        let Some((&first, &last)) = way.node_ids.first().zip(way.node_ids.last()) else {
            way.kind = WayKind::Unconnected;
            continue;
        };

        way.kind = if first == last {
            WayKind::Closed
        } else {
            match (endpoint_uses[&first] > 1, endpoint_uses[&last] > 1) {
                (true, true) => WayKind::ConnectedBoth,
                (true, false) => WayKind::ConnectedStart,
                (false, true) => WayKind::ConnectedEnd,
                (false, false) => WayKind::Unconnected,
            }
        };
    }
}

/// Enclosing rectangle of a node id sequence, or the empty sentinel.
fn nodes_bounds(nodes: &[Node], ids: &[NodeId]) -> FixedRect {
    let mut min_x = Coord::MAX;
    let mut min_y = Coord::MAX;
    let mut max_x = Coord::MIN;
    let mut max_y = Coord::MIN;

    for id in ids {
        let location = nodes[id.index()].location;
        min_x = min_x.min(location.x);
        min_y = min_y.min(location.y);
        max_x = max_x.max(location.x);
        max_y = max_y.max(location.y);
    }

    if max_x < min_x || max_y < min_y {
        return FixedRect::EMPTY;
    }

    FixedRect::new(min_x, min_y, max_x, max_y)
}

/// Bounding box of a way, or the empty sentinel for node-less ways.
fn way_bounds(nodes: &[Node], way: &Way) -> FixedRect {
    nodes_bounds(nodes, &way.node_ids)
}

/// Bounding box of a relation from its member nodes and ways.
fn relation_bounds(nodes: &[Node], way_rects: &[FixedRect], relation: &Relation) -> FixedRect {
    let mut bounds = nodes_bounds(nodes, &relation.node_ids);

    for id in &relation.way_ids {
        let rect = way_rects[id.index()];
        if rect.is_empty() {
            continue;
        }

        if bounds.is_empty() { bounds = rect } else { bounds.enclose(&rect) }
    }

    bounds
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::geometry::Point;

    fn tags(entries: &[(&str, &str)]) -> Tags {
        entries.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    fn node(x: Coord, y: Coord) -> Node {
        Node::new(Point::new(x, y), Tags::new())
    }

    fn way(ids: &[u32]) -> Way {
        Way::new(ids.iter().map(|id| NodeId::new(*id)).collect(), Tags::new())
    }

    fn test_store() -> Geodata {
        let nodes = vec![node(0, 0), node(10, 0), node(0, 10), node(10, 10), node(100, 100)];
        let ways = vec![way(&[0, 1, 3]), way(&[1, 2, 3, 1]), way(&[4, 3]), way(&[0, 2])];
        let relations = vec![Relation::new(
            vec![NodeId::new(0)],
            IndexMap::new(),
            vec![WayId::new(0), WayId::new(2)],
            IndexMap::new(),
            tags(&[("type", "multipolygon")]),
        )];

        Geodata::build(nodes, ways, relations).unwrap()
    }

    #[test]
    fn point_queries() {
        let geodata = test_store();

        let mut ids = geodata.node_ids(&FixedRect::new(-1, -1, 11, 11));
        ids.sort_unstable();
        assert_eq!(ids, (0..4).map(NodeId::new).collect::<Vec<_>>());

        assert!(geodata.node_ids(&FixedRect::new(20, 20, 90, 90)).is_empty());
        assert!(geodata.contains_data(&FixedRect::new(20, 20, 90, 90)));
        assert!(!geodata.contains_data(&FixedRect::new(200, 200, 300, 300)));
    }

    #[test]
    fn way_and_relation_queries() {
        let geodata = test_store();

        let mut ids = geodata.way_ids(&FixedRect::new(-1, -1, 11, 11));
        ids.sort_unstable();
        assert_eq!(ids, (0..4).map(WayId::new).collect::<Vec<_>>());

        // Way 2 spans (10, 10) to (100, 100).
        assert_eq!(geodata.way_ids(&FixedRect::new(40, 40, 60, 60)), vec![WayId::new(2)]);

        assert_eq!(geodata.relation_ids(&FixedRect::new(-1, -1, 1, 1)), vec![RelId::new(0)]);
        assert!(geodata.relation_ids(&FixedRect::new(200, 200, 300, 300)).is_empty());
    }

    #[test]
    fn way_classification() {
        let geodata = test_store();

        // Way 0 shares both endpoints, way 1 is a ring, way 2 joins way 0's
        // end but dangles at node 4, way 3 joins way 0's start.
        assert_eq!(geodata.way(WayId::new(0)).kind(), WayKind::ConnectedBoth);
        assert_eq!(geodata.way(WayId::new(1)).kind(), WayKind::Closed);
        assert_eq!(geodata.way(WayId::new(2)).kind(), WayKind::ConnectedEnd);
        assert_eq!(geodata.way(WayId::new(3)).kind(), WayKind::ConnectedStart);

        assert!(geodata.way(WayId::new(1)).is_closed());
        assert!(!geodata.way(WayId::new(0)).is_closed());
    }

    #[test]
    fn bounding_boxes() {
        let nodes = vec![node(-5, 3), node(7, -2), node(1, 1)];

        let way = way(&[0, 1, 2]);
        assert_eq!(way_bounds(&nodes, &way), FixedRect::new(-5, -2, 7, 3));

        let empty = Way::new(Vec::new(), Tags::new());
        assert_eq!(way_bounds(&nodes, &empty), FixedRect::EMPTY);

        let way_rects = [FixedRect::new(-5, -2, 7, 3), FixedRect::EMPTY];
        let relation = Relation::new(
            vec![NodeId::new(2)],
            IndexMap::new(),
            vec![WayId::new(0), WayId::new(1)],
            IndexMap::new(),
            Tags::new(),
        );
        assert_eq!(relation_bounds(&nodes, &way_rects, &relation), FixedRect::new(-5, -2, 7, 3));

        let empty_relation =
            Relation::new(Vec::new(), IndexMap::new(), Vec::new(), IndexMap::new(), Tags::new());
        assert_eq!(relation_bounds(&nodes, &way_rects, &empty_relation), FixedRect::EMPTY);
    }

    #[test]
    fn dangling_references_fail_the_build() {
        let err = Geodata::build(vec![node(0, 0)], vec![way(&[0, 7])], Vec::new()).unwrap_err();
        assert!(matches!(err, Error::DanglingReference("node", 7)));

        let relations = vec![Relation::new(
            Vec::new(),
            IndexMap::new(),
            vec![WayId::new(3)],
            IndexMap::new(),
            Tags::new(),
        )];
        let err = Geodata::build(vec![node(0, 0)], Vec::new(), relations).unwrap_err();
        assert!(matches!(err, Error::DanglingReference("way", 3)));
    }

    #[test]
    fn save_load_round_trip() {
        let geodata = test_store();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.bin");

        geodata.save(&path).unwrap();
        let loaded = Geodata::load(&path).unwrap();

        for rect in [
            FixedRect::new(-1, -1, 11, 11),
            FixedRect::new(40, 40, 60, 60),
            FixedRect::new(200, 200, 300, 300),
            FixedRect::WORLD,
        ] {
            assert_eq!(geodata.node_ids(&rect), loaded.node_ids(&rect));
            assert_eq!(geodata.way_ids(&rect), loaded.way_ids(&rect));
            assert_eq!(geodata.relation_ids(&rect), loaded.relation_ids(&rect));
            assert_eq!(geodata.contains_data(&rect), loaded.contains_data(&rect));
        }
    }

    #[test]
    fn save_is_deterministic() {
        let geodata = test_store();
        let dir = tempfile::tempdir().unwrap();
        let (a, b) = (dir.path().join("a.bin"), dir.path().join("b.bin"));

        geodata.save(&a).unwrap();
        geodata.save(&b).unwrap();

        assert_eq!(fs::read(&a).unwrap(), fs::read(&b).unwrap());
    }

    #[test]
    fn load_rejects_truncated_store() {
        let geodata = test_store();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.bin");

        geodata.save(&path).unwrap();
        let data = fs::read(&path).unwrap();

        for len in [0, 4, 12, data.len() / 2] {
            fs::write(&path, &data[..len]).unwrap();
            assert!(matches!(Geodata::load(&path), Err(Error::CorruptStore)), "length {len}");
        }
    }

    #[test]
    fn load_rejects_incompatible_version() {
        let geodata = test_store();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.bin");

        geodata.save(&path).unwrap();
        let mut data = fs::read(&path).unwrap();
        data[8..12].copy_from_slice(&99u32.to_le_bytes());
        fs::write(&path, &data).unwrap();

        assert!(matches!(Geodata::load(&path), Err(Error::IncompatibleStore(99))));

        data[..4].copy_from_slice(b"NOPE");
        fs::write(&path, &data).unwrap();
        assert!(matches!(Geodata::load(&path), Err(Error::CorruptStore)));
    }
}
