//! Concrete styles and the templates they are merged from.

use smallvec::SmallVec;

use crate::geodata::Tags;
use crate::mapcss::Stylesheet;

/// Dash pattern of a stroked line.
pub type Dashes = SmallVec<[f64; 4]>;

/// RGBA color with straight alpha.
#[derive(PartialEq, Copy, Clone, Debug)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Color {
    pub const BLACK: Self = Self::new(0., 0., 0., 1.);
    pub const WHITE: Self = Self::new(1., 1., 1., 1.);
    /// Fully transparent white, the "not drawn" fill.
    pub const TRANSPARENT: Self = Self::new(1., 1., 1., 0.);

    pub const fn new(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }
}

/// Placement of a feature's text label.
#[derive(Default, PartialEq, Eq, Copy, Clone, Debug)]
pub enum TextPosition {
    Line,
    #[default]
    Center,
}

/// Stroke endcap shape.
#[derive(Default, PartialEq, Eq, Copy, Clone, Debug)]
pub enum LineCap {
    #[default]
    Butt,
    Round,
    Square,
}

/// Stroke corner shape.
#[derive(Default, PartialEq, Eq, Copy, Clone, Debug)]
pub enum LineJoin {
    #[default]
    Miter,
    Bevel,
    Round,
}

#[derive(Default, PartialEq, Eq, Copy, Clone, Debug)]
pub enum FontWeight {
    #[default]
    Normal,
    Bold,
}

#[derive(Default, PartialEq, Eq, Copy, Clone, Debug)]
pub enum FontStyle {
    #[default]
    Normal,
    Italic,
}

/// Outline shape of a route shield.
#[derive(Default, PartialEq, Eq, Copy, Clone, Debug)]
pub enum ShieldShape {
    #[default]
    Rounded,
    Rectangular,
}

/// Attribute values parseable from a feature tag.
pub trait StyleValue: Sized {
    fn parse(value: &str) -> Option<Self>;
}

impl StyleValue for String {
    fn parse(value: &str) -> Option<Self> {
        Some(value.to_owned())
    }
}

impl StyleValue for f64 {
    fn parse(value: &str) -> Option<Self> {
        value.parse().ok()
    }
}

impl StyleValue for i32 {
    fn parse(value: &str) -> Option<Self> {
        value.parse().ok()
    }
}

impl StyleValue for Color {
    /// Parse a `#rrggbb` or `#rrggbbaa` hex color.
    fn parse(value: &str) -> Option<Self> {
        let hex = value.strip_prefix('#')?;
        if hex.len() != 6 && hex.len() != 8 {
            return None;
        }

        let channel = |i: usize| -> Option<f32> {
            let byte = u8::from_str_radix(hex.get(i..i + 2)?, 16).ok()?;
            Some(byte as f32 / 255.)
        };

        let a = if hex.len() == 8 { channel(6)? } else { 1. };
        Some(Self::new(channel(0)?, channel(2)?, channel(4)?, a))
    }
}

impl StyleValue for Dashes {
    fn parse(value: &str) -> Option<Self> {
        value.split(',').map(|part| part.trim().parse().ok()).collect()
    }
}

impl StyleValue for TextPosition {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "line" => Some(Self::Line),
            "center" => Some(Self::Center),
            _ => None,
        }
    }
}

impl StyleValue for LineCap {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "none" => Some(Self::Butt),
            "round" => Some(Self::Round),
            "square" => Some(Self::Square),
            _ => None,
        }
    }
}

impl StyleValue for LineJoin {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "miter" => Some(Self::Miter),
            "bevel" => Some(Self::Bevel),
            "round" => Some(Self::Round),
            _ => None,
        }
    }
}

impl StyleValue for FontWeight {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "normal" => Some(Self::Normal),
            "bold" => Some(Self::Bold),
            _ => None,
        }
    }
}

impl StyleValue for FontStyle {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "normal" => Some(Self::Normal),
            "italic" => Some(Self::Italic),
            _ => None,
        }
    }
}

impl StyleValue for ShieldShape {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "rounded" => Some(Self::Rounded),
            "rectangular" => Some(Self::Rectangular),
            _ => None,
        }
    }
}

/// Lazily evaluated style expression.
///
/// The stylesheet parser emits either literal values or `tag()` lookups which
/// resolve against the matched feature's tags. A lookup whose tag is missing
/// or unparseable yields nothing and leaves the style attribute untouched.
#[derive(PartialEq, Clone, Debug)]
pub enum Eval<T> {
    Value(T),
    Tag(String),
}

impl<T: StyleValue + Clone> Eval<T> {
    fn evaluate(&self, tags: Option<&Tags>) -> Option<T> {
        match self {
            Self::Value(value) => Some(value.clone()),
            Self::Tag(key) => T::parse(tags?.get(key)?),
        }
    }
}

macro_rules! style_attributes {
    ($($attr:ident: $ty:ty),+ $(,)?) => {
        /// The unevaluated style block of a single rule.
        ///
        /// Only attributes the rule explicitly sets are present; merging a
        /// template into a [`Style`] overwrites exactly those.
        #[derive(Default, PartialEq, Clone, Debug)]
        pub struct StyleTemplate {
            $(pub $attr: Option<Eval<$ty>>,)+
        }

        /// Fully evaluated render properties of a single feature.
        #[derive(PartialEq, Clone, Debug)]
        pub struct Style {
            $(pub $attr: $ty,)+
        }

        impl Style {
            /// Overwrite every attribute the template sets, evaluated against
            /// the feature's tags.
            ///
            /// Canvas styles have no feature and evaluate with empty tags.
            pub fn overmerge(&mut self, tags: Option<&Tags>, template: &StyleTemplate) {
                $(
                    if let Some(eval) = &template.$attr
                        && let Some(value) = eval.evaluate(tags)
                    {
                        self.$attr = value;
                    }
                )+
            }
        }
    };
}

style_attributes! {
    color: Color,
    fill_color: Color,

    image: String,
    fill_image: String,

    width: f64,
    casing_width: f64,
    casing_color: Color,

    text: String,
    text_position: TextPosition,
    text_color: Color,
    text_offset: f64,
    font_size: f64,
    font_family: String,
    font_weight: FontWeight,
    font_style: FontStyle,

    text_halo_color: Color,
    text_halo_radius: f64,

    linecap: LineCap,
    linejoin: LineJoin,
    casing_linecap: LineCap,
    casing_linejoin: LineJoin,

    icon_image: String,
    icon_width: f64,
    icon_height: f64,
    icon_opacity: f64,

    shield_color: Color,
    shield_opacity: f64,
    shield_frame_color: Color,
    shield_frame_width: f64,
    shield_casing_color: Color,
    shield_casing_width: f64,
    shield_text: String,
    shield_image: String,
    shield_shape: ShieldShape,

    dashes: Dashes,
    casing_dashes: Dashes,

    z_index: i32,
}

impl Default for Style {
    fn default() -> Self {
        Self {
            color: Color::BLACK,
            fill_color: Color::TRANSPARENT,

            image: String::new(),
            fill_image: String::new(),

            width: 0.,
            casing_width: 0.,
            casing_color: Color::WHITE,

            text: String::new(),
            text_position: TextPosition::Center,
            text_color: Color::BLACK,
            text_offset: 0.,
            font_size: 0.,
            font_family: String::from("sans"),
            font_weight: FontWeight::Normal,
            font_style: FontStyle::Normal,

            text_halo_color: Color::TRANSPARENT,
            text_halo_radius: 0.,

            linecap: LineCap::Butt,
            linejoin: LineJoin::Miter,
            casing_linecap: LineCap::Butt,
            casing_linejoin: LineJoin::Miter,

            icon_image: String::new(),
            // Negative icon dimensions select the image's natural size.
            icon_width: -1.,
            icon_height: -1.,
            icon_opacity: 1.,

            shield_color: Color::TRANSPARENT,
            shield_opacity: 0.,
            shield_frame_color: Color::TRANSPARENT,
            shield_frame_width: 0.,
            shield_casing_color: Color::TRANSPARENT,
            shield_casing_width: 0.,
            shield_text: String::new(),
            shield_image: String::new(),
            shield_shape: ShieldShape::Rounded,

            dashes: Dashes::new(),
            casing_dashes: Dashes::new(),

            z_index: 0,
        }
    }
}

impl Style {
    /// Final fixup pass after all rules have merged.
    ///
    /// Image paths are resolved against the stylesheet and cleared when the
    /// file is missing, degenerate dash lists are dropped, text attributes
    /// are reinterpreted as tag keys and the feature's `layer` tag is folded
    /// into the z-index. Canvas styles have no feature and skip the
    /// tag-dependent steps.
    pub fn finish(&mut self, tags: Option<&Tags>, stylesheet: &Stylesheet) {
        let images =
            [&mut self.icon_image, &mut self.shield_image, &mut self.image, &mut self.fill_image];
        for image in images {
            if image.is_empty() {
                continue;
            }

            // Resolve the path so every non-empty path reaching the renderer
            // is valid.
            *image = match stylesheet.resolve_asset(image) {
                Some(path) => path.to_string_lossy().into_owned(),
                None => String::new(),
            };
        }

        for dashes in [&mut self.dashes, &mut self.casing_dashes] {
            let all_zero = dashes.iter().all(|dash| *dash == 0.);
            let negative = dashes.iter().any(|dash| *dash < 0.);
            if !dashes.is_empty() && (all_zero || negative) {
                dashes.clear();
            }
        }

        let Some(tags) = tags else { return };

        // Text attributes name the tag whose value gets displayed; features
        // without the tag display nothing.
        if !self.text.is_empty() {
            self.text = tags.get(self.text.as_str()).cloned().unwrap_or_default();
        }
        if !self.shield_text.is_empty() {
            self.shield_text = tags.get(self.shield_text.as_str()).cloned().unwrap_or_default();
        }

        if let Some(layer) = tags.get("layer").and_then(|value| value.parse::<i32>().ok()) {
            self.z_index += layer * 100;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use smallvec::smallvec;

    use super::*;

    fn tags(entries: &[(&str, &str)]) -> Tags {
        entries.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    fn stylesheet() -> Stylesheet {
        Stylesheet::new(PathBuf::from("/nonexistent/style.mapcss"), Vec::new(), None)
    }

    #[test]
    fn overmerge_overwrites_present_attributes_only() {
        let mut style = Style::default();
        let first = StyleTemplate {
            width: Some(Eval::Value(1.)),
            z_index: Some(Eval::Value(3)),
            ..Default::default()
        };
        let second = StyleTemplate { width: Some(Eval::Value(5.)), ..Default::default() };

        style.overmerge(None, &first);
        style.overmerge(None, &second);

        assert_eq!(style.width, 5.);
        assert_eq!(style.z_index, 3);
        assert_eq!(style.color, Color::BLACK);
    }

    #[test]
    fn tag_expressions_evaluate_against_the_feature() {
        let feature = tags(&[("lanes", "4"), ("colour", "#ff0000")]);
        let template = StyleTemplate {
            width: Some(Eval::Tag(String::from("lanes"))),
            color: Some(Eval::Tag(String::from("colour"))),
            casing_width: Some(Eval::Tag(String::from("missing"))),
            ..Default::default()
        };

        let mut style = Style::default();
        style.overmerge(Some(&feature), &template);

        assert_eq!(style.width, 4.);
        assert_eq!(style.color, Color::new(1., 0., 0., 1.));
        // Missing tag leaves the previous value alone.
        assert_eq!(style.casing_width, 0.);
    }

    #[test]
    fn unparseable_tag_value_is_ignored() {
        let feature = tags(&[("lanes", "many")]);
        let template = StyleTemplate {
            width: Some(Eval::Tag(String::from("lanes"))),
            ..Default::default()
        };

        let mut style = Style::default();
        style.width = 2.;
        style.overmerge(Some(&feature), &template);

        assert_eq!(style.width, 2.);
    }

    #[test]
    fn color_parsing() {
        assert_eq!(Color::parse("#000000"), Some(Color::BLACK));
        assert_eq!(Color::parse("#ffffff"), Some(Color::WHITE));
        assert_eq!(Color::parse("#ff000080"), Some(Color::new(1., 0., 0., 128. / 255.)));
        assert_eq!(Color::parse("red"), None);
        assert_eq!(Color::parse("#12345"), None);
    }

    #[test]
    fn finish_resolves_text_through_tags() {
        let feature = tags(&[("name", "Karlsruhe")]);
        let mut style = Style::default();
        style.text = String::from("name");

        style.finish(Some(&feature), &stylesheet());
        assert_eq!(style.text, "Karlsruhe");

        let mut style = Style::default();
        style.text = String::from("name");
        style.finish(Some(&Tags::new()), &stylesheet());
        assert_eq!(style.text, "");
    }

    #[test]
    fn finish_folds_layer_into_z_index() {
        let feature = tags(&[("layer", "2")]);
        let mut style = Style::default();
        style.z_index = 5;

        style.finish(Some(&feature), &stylesheet());
        assert_eq!(style.z_index, 205);

        // Unparseable layers are ignored.
        let feature = tags(&[("layer", "upper")]);
        let mut style = Style::default();
        style.z_index = 5;
        style.finish(Some(&feature), &stylesheet());
        assert_eq!(style.z_index, 5);
    }

    #[test]
    fn finish_sanitizes_dashes() {
        let mut style = Style::default();
        style.dashes = smallvec![0., 0.];
        style.casing_dashes = smallvec![4., -2.];
        style.finish(None, &stylesheet());

        assert!(style.dashes.is_empty());
        assert!(style.casing_dashes.is_empty());

        let mut style = Style::default();
        style.dashes = smallvec![4., 2.];
        style.finish(None, &stylesheet());
        assert_eq!(style.dashes.as_slice(), [4., 2.]);
    }

    #[test]
    fn finish_clears_missing_images() {
        let mut style = Style::default();
        style.icon_image = String::from("icons/missing.png");
        style.finish(None, &stylesheet());

        assert_eq!(style.icon_image, "");
    }

    #[test]
    fn canvas_finish_skips_tag_steps() {
        let mut style = Style::default();
        style.text = String::from("name");
        style.z_index = 5;

        style.finish(None, &stylesheet());

        // Without a feature the text stays a literal and no layer applies.
        assert_eq!(style.text, "name");
        assert_eq!(style.z_index, 5);
    }

    #[test]
    fn dash_list_parsing() {
        assert_eq!(Dashes::parse("4, 2").unwrap().as_slice(), [4., 2.]);
        assert_eq!(Dashes::parse("1").unwrap().as_slice(), [1.]);
        assert_eq!(Dashes::parse("4, two"), None);
    }
}
