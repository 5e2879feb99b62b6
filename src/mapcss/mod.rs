//! MapCSS-style cascade over a tile's candidate features.

use std::path::{Path, PathBuf};

use indexmap::IndexMap;

use crate::assets::AssetCache;
use crate::geodata::{Geodata, NodeId, RelId, WayId};
use crate::geometry::FixedRect;
use crate::mapcss::rule::Rule;
use crate::mapcss::style::{Style, StyleTemplate};
use crate::tile::TileId;

pub mod rule;
pub mod selector;
pub mod style;

/// Ids of the features touching a tile, before any rule matching.
#[derive(Default, Clone, Debug)]
pub struct Candidates {
    pub nodes: Vec<NodeId>,
    pub ways: Vec<WayId>,
    pub relations: Vec<RelId>,
}

impl Candidates {
    /// Query all three indices for the features touching a rectangle.
    pub fn query(geodata: &Geodata, rect: &FixedRect) -> Self {
        Self {
            nodes: geodata.node_ids(rect),
            ways: geodata.way_ids(rect),
            relations: geodata.relation_ids(rect),
        }
    }
}

/// Styles computed for one render job.
///
/// Every feature holds at most one style, shared by all rules that match it;
/// the canvas style covers the tile background. Owned by a single job and
/// never shared across threads.
#[derive(Default, Clone, Debug)]
pub struct RenderAttributes {
    nodes: IndexMap<NodeId, Style>,
    ways: IndexMap<WayId, Style>,
    relations: IndexMap<RelId, Style>,
    canvas: Style,
}

impl RenderAttributes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a node's style entry, creating the default style if absent.
    pub fn node_style(&mut self, id: NodeId) -> &mut Style {
        self.nodes.entry(id).or_default()
    }

    /// Get a way's style entry, creating the default style if absent.
    pub fn way_style(&mut self, id: WayId) -> &mut Style {
        self.ways.entry(id).or_default()
    }

    /// Get a relation's style entry, creating the default style if absent.
    pub fn relation_style(&mut self, id: RelId) -> &mut Style {
        self.relations.entry(id).or_default()
    }

    pub fn nodes(&self) -> &IndexMap<NodeId, Style> {
        &self.nodes
    }

    pub fn ways(&self) -> &IndexMap<WayId, Style> {
        &self.ways
    }

    pub fn relations(&self) -> &IndexMap<RelId, Style> {
        &self.relations
    }

    pub fn canvas(&self) -> &Style {
        &self.canvas
    }
}

/// A parsed stylesheet: rules in declaration order plus an optional canvas
/// style.
///
/// Immutable after parsing; any number of concurrent render jobs may apply
/// it to their candidate sets.
#[derive(Debug)]
pub struct Stylesheet {
    rules: Vec<Rule>,
    canvas: Option<StyleTemplate>,
    path: PathBuf,
    assets: AssetCache,
}

impl Stylesheet {
    /// Create a stylesheet from its on-disk location and parsed rules.
    ///
    /// Asset references inside styles resolve relative to the stylesheet's
    /// directory.
    pub fn new(path: PathBuf, rules: Vec<Rule>, canvas: Option<StyleTemplate>) -> Self {
        Self { rules, canvas, path, assets: AssetCache::new() }
    }

    /// Location of the stylesheet file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Compute the styles for a tile's candidate features.
    ///
    /// Rules run in declaration order, so later rules overwrite the
    /// attributes they set. Afterwards every accumulated style is finished
    /// against its feature and the canvas template is merged in.
    pub fn apply(
        &self,
        geodata: &Geodata,
        candidates: &Candidates,
        tile: &TileId,
    ) -> RenderAttributes {
        let mut attrs = RenderAttributes::new();

        for rule in &self.rules {
            rule.match_candidates(geodata, candidates, tile, &mut attrs);
        }

        for (id, style) in attrs.nodes.iter_mut() {
            style.finish(Some(geodata.node(*id).tags()), self);
        }
        for (id, style) in attrs.ways.iter_mut() {
            style.finish(Some(geodata.way(*id).tags()), self);
        }
        for (id, style) in attrs.relations.iter_mut() {
            style.finish(Some(geodata.relation(*id).tags()), self);
        }

        if let Some(canvas) = &self.canvas {
            attrs.canvas.overmerge(None, canvas);
            attrs.canvas.finish(None, self);
        }

        attrs
    }

    /// Resolve a style-relative asset path, caching the lookup.
    pub(crate) fn resolve_asset(&self, relative: &str) -> Option<PathBuf> {
        let dir = self.path.parent().unwrap_or(Path::new(""));
        self.assets.resolve(dir, relative)
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::geodata::{Node, Tags, Way};
    use crate::geometry::Point;
    use crate::mapcss::selector::Selector;
    use crate::mapcss::style::{Color, Eval};
    use crate::tile::ImageFormat;

    fn tags(entries: &[(&str, &str)]) -> Tags {
        entries.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    fn tile(z: i32) -> TileId {
        TileId::new(0, 0, z, ImageFormat::Png, String::from("default"))
    }

    /// Store with a single primary highway way between two nodes.
    fn highway_store(way_tags: Tags) -> Geodata {
        let nodes = vec![
            Node::new(Point::new(0, 0), Tags::new()),
            Node::new(Point::new(10, 10), Tags::new()),
        ];
        let ways = vec![Way::new(vec![NodeId::new(0), NodeId::new(1)], way_tags)];
        Geodata::build(nodes, ways, Vec::new()).unwrap()
    }

    fn highway_rule(template: StyleTemplate) -> Rule {
        let selector = Selector::TagEquals {
            key: String::from("highway"),
            value: String::from("primary"),
            next: Box::new(Selector::Apply),
        };
        Rule::new(selector, template).with_zoom(10, 14)
    }

    #[test]
    fn selector_chain_scenario() {
        let geodata = highway_store(tags(&[("highway", "primary")]));
        let template = StyleTemplate { width: Some(Eval::Value(3.)), ..Default::default() };
        let stylesheet =
            Stylesheet::new(PathBuf::from("style.mapcss"), vec![highway_rule(template)], None);

        let candidates = Candidates::query(&geodata, &FixedRect::new(-1, -1, 11, 11));
        assert_eq!(candidates.nodes.len(), 2);
        assert_eq!(candidates.ways.len(), 1);

        let attrs = stylesheet.apply(&geodata, &candidates, &tile(12));
        assert_eq!(attrs.ways()[&WayId::new(0)].width, 3.);
        assert!(attrs.nodes().is_empty());

        // Outside the rule's zoom interval nothing is touched.
        let attrs = stylesheet.apply(&geodata, &candidates, &tile(5));
        assert!(attrs.ways().is_empty());
    }

    #[test]
    fn overmerge_follows_rule_order() {
        let geodata = highway_store(tags(&[("highway", "primary")]));
        let first = StyleTemplate { width: Some(Eval::Value(1.)), ..Default::default() };
        let second = StyleTemplate { width: Some(Eval::Value(5.)), ..Default::default() };

        let candidates = Candidates::query(&geodata, &FixedRect::new(-1, -1, 11, 11));

        let stylesheet = Stylesheet::new(
            PathBuf::from("style.mapcss"),
            vec![highway_rule(first.clone()), highway_rule(second.clone())],
            None,
        );
        let attrs = stylesheet.apply(&geodata, &candidates, &tile(12));
        assert_eq!(attrs.ways()[&WayId::new(0)].width, 5.);

        let stylesheet = Stylesheet::new(
            PathBuf::from("style.mapcss"),
            vec![highway_rule(second), highway_rule(first)],
            None,
        );
        let attrs = stylesheet.apply(&geodata, &candidates, &tile(12));
        assert_eq!(attrs.ways()[&WayId::new(0)].width, 1.);
    }

    #[test]
    fn finish_resolves_tags_and_layers() {
        let geodata =
            highway_store(tags(&[("highway", "primary"), ("name", "Karlsruhe"), ("layer", "2")]));
        let template = StyleTemplate {
            text: Some(Eval::Value(String::from("name"))),
            z_index: Some(Eval::Value(5)),
            ..Default::default()
        };
        let stylesheet =
            Stylesheet::new(PathBuf::from("style.mapcss"), vec![highway_rule(template)], None);

        let candidates = Candidates::query(&geodata, &FixedRect::new(-1, -1, 11, 11));
        let attrs = stylesheet.apply(&geodata, &candidates, &tile(12));

        let style = &attrs.ways()[&WayId::new(0)];
        assert_eq!(style.text, "Karlsruhe");
        assert_eq!(style.z_index, 205);
    }

    #[test]
    fn finish_resolves_assets_against_stylesheet_dir() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("icon.png"), b"png").unwrap();

        let geodata = highway_store(tags(&[("highway", "primary")]));
        let template = StyleTemplate {
            icon_image: Some(Eval::Value(String::from("icon.png"))),
            image: Some(Eval::Value(String::from("missing.png"))),
            ..Default::default()
        };
        let stylesheet = Stylesheet::new(
            dir.path().join("style.mapcss"),
            vec![highway_rule(template)],
            None,
        );

        let candidates = Candidates::query(&geodata, &FixedRect::new(-1, -1, 11, 11));
        let attrs = stylesheet.apply(&geodata, &candidates, &tile(12));

        let style = &attrs.ways()[&WayId::new(0)];
        assert_eq!(style.icon_image, dir.path().join("icon.png").to_string_lossy());
        assert_eq!(style.image, "");
    }

    #[test]
    fn canvas_template_is_merged_and_finished() {
        let geodata = highway_store(Tags::new());
        let canvas = StyleTemplate {
            fill_color: Some(Eval::Value(Color::new(0.9, 0.9, 0.8, 1.))),
            fill_image: Some(Eval::Value(String::from("missing.png"))),
            ..Default::default()
        };
        let stylesheet =
            Stylesheet::new(PathBuf::from("style.mapcss"), Vec::new(), Some(canvas));

        let attrs = stylesheet.apply(&geodata, &Candidates::default(), &tile(12));

        assert_eq!(attrs.canvas().fill_color, Color::new(0.9, 0.9, 0.8, 1.));
        assert_eq!(attrs.canvas().fill_image, "");
    }

    #[test]
    fn styles_are_shared_across_rules_per_feature() {
        let geodata = highway_store(tags(&[("highway", "primary")]));
        let width = StyleTemplate { width: Some(Eval::Value(2.)), ..Default::default() };
        let color = StyleTemplate {
            color: Some(Eval::Value(Color::new(1., 0., 0., 1.))),
            ..Default::default()
        };
        let stylesheet = Stylesheet::new(
            PathBuf::from("style.mapcss"),
            vec![highway_rule(width), highway_rule(color)],
            None,
        );

        let candidates = Candidates::query(&geodata, &FixedRect::new(-1, -1, 11, 11));
        let attrs = stylesheet.apply(&geodata, &candidates, &tile(12));

        // One entry carrying both rules' attributes.
        assert_eq!(attrs.ways().len(), 1);
        let style = &attrs.ways()[&WayId::new(0)];
        assert_eq!(style.width, 2.);
        assert_eq!(style.color, Color::new(1., 0., 0., 1.));
    }
}
