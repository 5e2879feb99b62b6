//! Selector chains filtering candidate features.

use regex::Regex;

use crate::Error;
use crate::geodata::{Geodata, NodeId, RelId, Tags, WayId};
use crate::mapcss::RenderAttributes;
use crate::mapcss::style::StyleTemplate;

/// Shared state of one rule's match pass.
pub struct MatchContext<'a> {
    pub geodata: &'a Geodata,
    pub template: &'a StyleTemplate,
}

/// Comparison applied by the numeric tag selectors.
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
pub enum NumericOp {
    Less,
    LessEquals,
    Greater,
    GreaterEquals,
}

impl NumericOp {
    fn holds(self, value: i64, reference: i64) -> bool {
        match self {
            Self::Less => value < reference,
            Self::LessEquals => value <= reference,
            Self::Greater => value > reference,
            Self::GreaterEquals => value >= reference,
        }
    }
}

/// A single link of a rule's selector chain.
///
/// Every selector either filters the feature and forwards it to `next`, fans
/// out to `next` over derived child features, or terminally applies the
/// rule's style ([`Selector::Apply`]). Feature kinds a variant cannot handle
/// are silently dropped.
#[derive(Clone, Debug)]
pub enum Selector {
    /// Ways drawn as open lines.
    Line { next: Box<Selector> },
    /// Closed ways drawn as filled areas.
    Area { next: Box<Selector> },
    /// Fan out to the member nodes of a way or relation.
    ChildNodes { next: Box<Selector> },
    /// Fan out to the member ways of a relation.
    ChildWays { next: Box<Selector> },
    HasTag { key: String, next: Box<Selector> },
    HasNotTag { key: String, next: Box<Selector> },
    TagEquals { key: String, value: String, next: Box<Selector> },
    TagUnequals { key: String, value: String, next: Box<Selector> },
    TagMatches { key: String, regex: Regex, next: Box<Selector> },
    TagCompare { key: String, op: NumericOp, reference: i64, next: Box<Selector> },
    /// Chain terminal, merging the rule's style into the feature's entry.
    Apply,
}

impl Selector {
    /// Create a regex tag selector, failing on an invalid pattern.
    pub fn tag_matches(key: String, pattern: &str, next: Selector) -> Result<Self, Error> {
        let regex = Regex::new(pattern)?;
        Ok(Self::TagMatches { key, regex, next: Box::new(next) })
    }

    pub fn match_node(&self, ctx: &MatchContext<'_>, id: NodeId, attrs: &mut RenderAttributes) {
        match self {
            Self::Line { .. } | Self::Area { .. } | Self::ChildNodes { .. }
            | Self::ChildWays { .. } => (),
            Self::Apply => {
                let tags = ctx.geodata.node(id).tags();
                attrs.node_style(id).overmerge(Some(tags), ctx.template);
            },
            selector => {
                if let Some(next) = selector.forward(ctx.geodata.node(id).tags()) {
                    next.match_node(ctx, id, attrs);
                }
            },
        }
    }

    pub fn match_way(&self, ctx: &MatchContext<'_>, id: WayId, attrs: &mut RenderAttributes) {
        match self {
            Self::ChildWays { .. } => (),
            Self::Line { next } => {
                let way = ctx.geodata.way(id);
                // Open ways are lines, as are rings explicitly tagged area=no.
                if !way.is_closed() || way.tags().get("area").is_some_and(|v| v == "no") {
                    next.match_way(ctx, id, attrs);
                }
            },
            Self::Area { next } => {
                let way = ctx.geodata.way(id);
                if way.is_closed() && way.tags().get("area").is_none_or(|v| v == "yes") {
                    next.match_way(ctx, id, attrs);
                }
            },
            Self::ChildNodes { next } => {
                for node_id in ctx.geodata.way(id).node_ids() {
                    next.match_node(ctx, *node_id, attrs);
                }
            },
            Self::Apply => {
                let tags = ctx.geodata.way(id).tags();
                attrs.way_style(id).overmerge(Some(tags), ctx.template);
            },
            selector => {
                if let Some(next) = selector.forward(ctx.geodata.way(id).tags()) {
                    next.match_way(ctx, id, attrs);
                }
            },
        }
    }

    pub fn match_relation(&self, ctx: &MatchContext<'_>, id: RelId, attrs: &mut RenderAttributes) {
        match self {
            Self::Line { .. } | Self::Area { .. } => (),
            Self::ChildNodes { next } => {
                for node_id in ctx.geodata.relation(id).node_ids() {
                    next.match_node(ctx, *node_id, attrs);
                }
            },
            Self::ChildWays { next } => {
                for way_id in ctx.geodata.relation(id).way_ids() {
                    next.match_way(ctx, *way_id, attrs);
                }
            },
            Self::Apply => {
                let tags = ctx.geodata.relation(id).tags();
                attrs.relation_style(id).overmerge(Some(tags), ctx.template);
            },
            selector => {
                if let Some(next) = selector.forward(ctx.geodata.relation(id).tags()) {
                    next.match_relation(ctx, id, attrs);
                }
            },
        }
    }

    /// Apply the tag predicate, yielding the chain tail on a match.
    ///
    /// Structural selectors have no tag predicate and never forward from
    /// here.
    fn forward(&self, tags: &Tags) -> Option<&Selector> {
        let (matches, next) = match self {
            Self::Line { .. }
            | Self::Area { .. }
            | Self::ChildNodes { .. }
            | Self::ChildWays { .. }
            | Self::Apply => return None,
            Self::HasTag { key, next } => (tags.contains_key(key), next),
            // A tag explicitly negated counts as absent.
            Self::HasNotTag { key, next } => {
                let absent = match tags.get(key) {
                    Some(value) => value == "no" || value == "false",
                    None => true,
                };
                (absent, next)
            },
            Self::TagEquals { key, value, next } => (tags.get(key) == Some(value), next),
            // An absent tag is not unequal to anything.
            Self::TagUnequals { key, value, next } => {
                (tags.get(key).is_some_and(|v| v != value), next)
            },
            Self::TagMatches { key, regex, next } => {
                (tags.get(key).is_some_and(|v| regex.is_match(v)), next)
            },
            // Unparseable values never compare.
            Self::TagCompare { key, op, reference, next } => {
                let value = tags.get(key).and_then(|v| v.parse::<i64>().ok());
                (value.is_some_and(|v| op.holds(v, *reference)), next)
            },
        };

        matches.then(|| next.as_ref())
    }
}
