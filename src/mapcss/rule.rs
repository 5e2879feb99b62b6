//! Styling rules and their gates.

use bitflags::bitflags;

use crate::geodata::Geodata;
use crate::mapcss::selector::{MatchContext, Selector};
use crate::mapcss::style::StyleTemplate;
use crate::mapcss::{Candidates, RenderAttributes};
use crate::tile::{MAX_ZOOM, TileId};

bitflags! {
    /// Feature kinds accepted by a rule's selector chain.
    #[derive(PartialEq, Eq, Copy, Clone, Debug)]
    pub struct AcceptedKinds: u8 {
        const NODE = 0b001;
        const WAY = 0b010;
        const RELATION = 0b100;
    }
}

impl Default for AcceptedKinds {
    fn default() -> Self {
        Self::all()
    }
}

/// A single stylesheet rule.
///
/// Bundles a zoom interval, the accepted feature kinds, the head of a
/// selector chain and the style block to merge on a match.
#[derive(Clone, Debug)]
pub struct Rule {
    selector: Selector,
    template: StyleTemplate,
    zoom_bottom: i32,
    zoom_top: i32,
    accepts: AcceptedKinds,
}

impl Rule {
    /// Create a rule matching all kinds on every zoom level.
    pub fn new(selector: Selector, template: StyleTemplate) -> Self {
        Self {
            selector,
            template,
            zoom_bottom: 0,
            zoom_top: MAX_ZOOM as i32,
            accepts: AcceptedKinds::all(),
        }
    }

    /// Restrict the rule to an inclusive zoom interval.
    pub fn with_zoom(mut self, bottom: i32, top: i32) -> Self {
        self.zoom_bottom = bottom;
        self.zoom_top = top;
        self
    }

    /// Restrict the feature kinds fed into the selector chain.
    pub fn with_accepts(mut self, accepts: AcceptedKinds) -> Self {
        self.accepts = accepts;
        self
    }

    /// Feed a tile's candidate features through the selector chain.
    ///
    /// Tiles outside the rule's zoom interval are left untouched. Candidate
    /// vectors are walked in order; relations other than multipolygons never
    /// take part in styling.
    pub fn match_candidates(
        &self,
        geodata: &Geodata,
        candidates: &Candidates,
        tile: &TileId,
        attrs: &mut RenderAttributes,
    ) {
        if tile.z < self.zoom_bottom || self.zoom_top < tile.z {
            return;
        }

        let ctx = MatchContext { geodata, template: &self.template };

        if self.accepts.contains(AcceptedKinds::NODE) {
            for id in &candidates.nodes {
                self.selector.match_node(&ctx, *id, attrs);
            }
        }

        if self.accepts.contains(AcceptedKinds::WAY) {
            for id in &candidates.ways {
                self.selector.match_way(&ctx, *id, attrs);
            }
        }

        if self.accepts.contains(AcceptedKinds::RELATION) {
            for id in &candidates.relations {
                if !geodata.relation(*id).is_multipolygon() {
                    continue;
                }
                self.selector.match_relation(&ctx, *id, attrs);
            }
        }
    }
}
