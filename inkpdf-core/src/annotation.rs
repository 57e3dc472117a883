use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::AnnotationError;
use crate::geometry::{
    length_to_render, rect_to_render, to_render_space, Point, Rect, RenderScale,
};

/// Width of the box a text note is laid out in, in document units.
pub const TEXT_BOX_WIDTH: f64 = 200.0;
pub const TEXT_LINE_FACTOR: f64 = 1.5;
/// Radius of the marker drawn for a comment, in document units.
pub const COMMENT_MARKER_RADIUS: f64 = 4.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Color {
    pub r: f64,
    pub g: f64,
    pub b: f64,
    pub a: f64,
}

impl Color {
    pub const BLACK: Color = Color::rgb(0.0, 0.0, 0.0);
    pub const YELLOW: Color = Color::rgb(1.0, 1.0, 0.0);

    pub const fn rgb(r: f64, g: f64, b: f64) -> Self {
        Self { r, g, b, a: 1.0 }
    }

    pub fn from_components(rgb: [f64; 3], alpha: Option<f64>) -> Self {
        Self {
            r: rgb[0].clamp(0.0, 1.0),
            g: rgb[1].clamp(0.0, 1.0),
            b: rgb[2].clamp(0.0, 1.0),
            a: alpha.unwrap_or(1.0).clamp(0.0, 1.0),
        }
    }

    pub fn with_alpha(self, a: f64) -> Self {
        Self { a, ..self }
    }

    pub fn components(&self) -> [f64; 3] {
        [self.r, self.g, self.b]
    }

    pub fn is_opaque(&self) -> bool {
        self.a >= 1.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StrokeStyle {
    pub color: Color,
    /// Document units.
    pub width: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FreehandPath {
    pub strokes: Vec<Vec<Point>>,
    pub style: StrokeStyle,
}

impl FreehandPath {
    pub fn starting_at(point: Point, style: StrokeStyle) -> Self {
        Self {
            strokes: vec![vec![point]],
            style,
        }
    }

    pub fn point_count(&self) -> usize {
        self.strokes.iter().map(Vec::len).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineShape {
    pub start: Point,
    pub end: Point,
    pub style: StrokeStyle,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoxShape {
    pub rect: Rect,
    pub style: StrokeStyle,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextNote {
    pub anchor: Point,
    pub body: String,
    /// Document units.
    pub font_size: f64,
    pub color: Color,
}

impl TextNote {
    pub fn text_box(&self) -> Rect {
        Rect::new(
            self.anchor.x,
            self.anchor.y,
            TEXT_BOX_WIDTH,
            self.font_size * TEXT_LINE_FACTOR,
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommentMarker {
    pub anchor: Point,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Annotation {
    Freehand(FreehandPath),
    Line(LineShape),
    Rect(BoxShape),
    Ellipse(BoxShape),
    Text(TextNote),
    Comment(CommentMarker),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AnnotationKind {
    Path,
    Line,
    Rect,
    Ellipse,
    Text,
    Comment,
}

impl AnnotationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            AnnotationKind::Path => "path",
            AnnotationKind::Line => "line",
            AnnotationKind::Rect => "rect",
            AnnotationKind::Ellipse => "ellipse",
            AnnotationKind::Text => "text",
            AnnotationKind::Comment => "comment",
        }
    }
}

impl fmt::Display for AnnotationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GeometryEdit {
    BeginStroke(Point),
    ExtendStroke(Point),
    SetEnd(Point),
    SetCorners { anchor: Point, corner: Point },
    MoveAnchor(Point),
}

impl GeometryEdit {
    fn name(&self) -> &'static str {
        match self {
            GeometryEdit::BeginStroke(_) => "begin-stroke",
            GeometryEdit::ExtendStroke(_) => "extend-stroke",
            GeometryEdit::SetEnd(_) => "set-end",
            GeometryEdit::SetCorners { .. } => "set-corners",
            GeometryEdit::MoveAnchor(_) => "move-anchor",
        }
    }
}

impl Annotation {
    pub fn kind(&self) -> AnnotationKind {
        match self {
            Annotation::Freehand(_) => AnnotationKind::Path,
            Annotation::Line(_) => AnnotationKind::Line,
            Annotation::Rect(_) => AnnotationKind::Rect,
            Annotation::Ellipse(_) => AnnotationKind::Ellipse,
            Annotation::Text(_) => AnnotationKind::Text,
            Annotation::Comment(_) => AnnotationKind::Comment,
        }
    }

    pub fn stroke(&self) -> Option<&StrokeStyle> {
        match self {
            Annotation::Freehand(path) => Some(&path.style),
            Annotation::Line(line) => Some(&line.style),
            Annotation::Rect(shape) | Annotation::Ellipse(shape) => Some(&shape.style),
            Annotation::Text(_) | Annotation::Comment(_) => None,
        }
    }

    pub fn bounds(&self) -> Rect {
        let half_width = self.stroke().map_or(0.0, |style| style.width / 2.0);
        let raw = match self {
            Annotation::Freehand(path) => {
                Rect::bounding(path.strokes.iter().flatten().copied()).unwrap_or_default()
            }
            Annotation::Line(line) => Rect::from_corners(line.start, line.end),
            Annotation::Rect(shape) | Annotation::Ellipse(shape) => shape.rect,
            Annotation::Text(note) => note.text_box(),
            Annotation::Comment(marker) => Rect::centered(marker.anchor, COMMENT_MARKER_RADIUS),
        };
        raw.inflate(half_width)
    }

    /// Whether the drawn shape touches the square of half-size `radius` centered on `point`.
    ///
    /// Paths and lines are tested segment by segment against the square grown by half the
    /// stroke width. Every other kind is tested through its bounding box.
    pub fn hit_test(&self, point: Point, radius: f64) -> bool {
        let probe = Rect::centered(point, radius.max(0.0));
        match self {
            Annotation::Freehand(path) => {
                let probe = probe.inflate(path.style.width / 2.0);
                path.strokes.iter().any(|stroke| match stroke.as_slice() {
                    [] => false,
                    [only] => probe.contains(*only),
                    points => points
                        .windows(2)
                        .any(|pair| probe.intersects_segment(pair[0], pair[1])),
                })
            }
            Annotation::Line(line) => probe
                .inflate(line.style.width / 2.0)
                .intersects_segment(line.start, line.end),
            _ => self.bounds().intersects(&probe),
        }
    }

    pub fn apply_edit(&mut self, edit: GeometryEdit) -> Result<(), AnnotationError> {
        match (self, edit) {
            (Annotation::Freehand(path), GeometryEdit::BeginStroke(point)) => {
                path.strokes.push(vec![point]);
            }
            (Annotation::Freehand(path), GeometryEdit::ExtendStroke(point)) => {
                match path.strokes.last_mut() {
                    Some(stroke) => stroke.push(point),
                    None => path.strokes.push(vec![point]),
                }
            }
            (Annotation::Line(line), GeometryEdit::SetEnd(point)) => line.end = point,
            (
                Annotation::Rect(shape) | Annotation::Ellipse(shape),
                GeometryEdit::SetCorners { anchor, corner },
            ) => shape.rect = Rect::from_corners(anchor, corner),
            (Annotation::Text(note), GeometryEdit::MoveAnchor(point)) => note.anchor = point,
            (Annotation::Comment(marker), GeometryEdit::MoveAnchor(point)) => {
                marker.anchor = point
            }
            (annotation, edit) => {
                return Err(AnnotationError::GeometryMismatch {
                    edit: edit.name(),
                    kind: annotation.kind(),
                })
            }
        }
        Ok(())
    }

    pub fn to_render_space(&self, scale: RenderScale) -> Annotation {
        let point = |p: Point| to_render_space(p, scale);
        let style = |s: &StrokeStyle| StrokeStyle {
            color: s.color,
            width: length_to_render(s.width, scale),
        };
        match self {
            Annotation::Freehand(path) => Annotation::Freehand(FreehandPath {
                strokes: path
                    .strokes
                    .iter()
                    .map(|stroke| stroke.iter().copied().map(point).collect())
                    .collect(),
                style: style(&path.style),
            }),
            Annotation::Line(line) => Annotation::Line(LineShape {
                start: point(line.start),
                end: point(line.end),
                style: style(&line.style),
            }),
            Annotation::Rect(shape) => Annotation::Rect(BoxShape {
                rect: rect_to_render(shape.rect, scale),
                style: style(&shape.style),
            }),
            Annotation::Ellipse(shape) => Annotation::Ellipse(BoxShape {
                rect: rect_to_render(shape.rect, scale),
                style: style(&shape.style),
            }),
            Annotation::Text(note) => Annotation::Text(TextNote {
                anchor: point(note.anchor),
                body: note.body.clone(),
                font_size: length_to_render(note.font_size, scale),
                color: note.color,
            }),
            Annotation::Comment(marker) => Annotation::Comment(CommentMarker {
                anchor: point(marker.anchor),
                body: marker.body.clone(),
            }),
        }
    }

    pub fn approx_eq(&self, other: &Annotation, tolerance: f64) -> bool {
        let close = |a: f64, b: f64| (a - b).abs() <= tolerance;
        let color = |a: &Color, b: &Color| {
            close(a.r, b.r) && close(a.g, b.g) && close(a.b, b.b) && close(a.a, b.a)
        };
        let style =
            |a: &StrokeStyle, b: &StrokeStyle| color(&a.color, &b.color) && close(a.width, b.width);
        match (self, other) {
            (Annotation::Freehand(a), Annotation::Freehand(b)) => {
                style(&a.style, &b.style)
                    && a.strokes.len() == b.strokes.len()
                    && a.strokes.iter().zip(&b.strokes).all(|(sa, sb)| {
                        sa.len() == sb.len()
                            && sa.iter().zip(sb).all(|(pa, pb)| pa.approx_eq(*pb, tolerance))
                    })
            }
            (Annotation::Line(a), Annotation::Line(b)) => {
                style(&a.style, &b.style)
                    && a.start.approx_eq(b.start, tolerance)
                    && a.end.approx_eq(b.end, tolerance)
            }
            (Annotation::Rect(a), Annotation::Rect(b))
            | (Annotation::Ellipse(a), Annotation::Ellipse(b)) => {
                style(&a.style, &b.style) && a.rect.approx_eq(&b.rect, tolerance)
            }
            (Annotation::Text(a), Annotation::Text(b)) => {
                a.body == b.body
                    && color(&a.color, &b.color)
                    && close(a.font_size, b.font_size)
                    && a.anchor.approx_eq(b.anchor, tolerance)
            }
            (Annotation::Comment(a), Annotation::Comment(b)) => {
                a.body == b.body && a.anchor.approx_eq(b.anchor, tolerance)
            }
            _ => false,
        }
    }
}
