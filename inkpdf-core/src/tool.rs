use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::annotation::{
    Annotation, BoxShape, Color, CommentMarker, FreehandPath, GeometryEdit, LineShape,
    StrokeStyle, TextNote,
};
use crate::error::AnnotationError;
use crate::geometry::{length_to_document, to_document_space, Point, Rect, RenderScale};
use crate::model::{AnnotationHandle, AnnotationModel};

pub const PAGE_GAP_PX: f64 = 20.0;
pub const HIGHLIGHTER_ALPHA: f64 = 120.0 / 255.0;
pub const MIN_TEXT_SIZE_PX: f64 = 8.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tool {
    Pen,
    Highlighter,
    Line,
    Arrow,
    Rectangle,
    Ellipse,
    Text,
    Comment,
    Eraser,
    Pan,
}

impl Tool {
    pub fn is_drawable(self) -> bool {
        !matches!(self, Tool::Text | Tool::Comment | Tool::Pan)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PenSettings {
    pub color: Color,
    /// Render pixels; divided by the render scale when stored.
    pub width_px: f64,
    /// Side of the eraser square, in render pixels.
    pub eraser_size_px: f64,
}

impl Default for PenSettings {
    fn default() -> Self {
        Self {
            color: Color::YELLOW,
            width_px: 4.0,
            eraser_size_px: 20.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageFrame {
    pub origin: Point,
    pub width: f64,
    pub height: f64,
    /// `false` when the page failed to rasterize; such pages take space but accept no input.
    pub rendered: bool,
}

impl PageFrame {
    pub fn bounds(&self) -> Rect {
        Rect::new(self.origin.x, self.origin.y, self.width, self.height)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PageLayout {
    scale: RenderScale,
    frames: Vec<PageFrame>,
}

impl PageLayout {
    pub fn new(scale: RenderScale) -> Self {
        Self {
            scale,
            frames: Vec::new(),
        }
    }

    pub fn push_page(&mut self, width: f64, height: f64, rendered: bool) {
        let y = self
            .frames
            .last()
            .map_or(0.0, |last| last.origin.y + last.height + PAGE_GAP_PX);
        self.frames.push(PageFrame {
            origin: Point::new(0.0, y),
            width,
            height,
            rendered,
        });
    }

    pub fn scale(&self) -> RenderScale {
        self.scale
    }

    pub fn frames(&self) -> &[PageFrame] {
        &self.frames
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn page_at(&self, point: Point) -> Option<usize> {
        self.frames
            .iter()
            .position(|frame| frame.bounds().contains(point))
    }

    fn interactive_page_at(&self, point: Point) -> Option<usize> {
        self.page_at(point).filter(|page| self.frames[*page].rendered)
    }

    pub fn to_document(&self, page: usize, point: Point) -> Option<Point> {
        let frame = self.frames.get(page)?;
        let local = Point::new(point.x - frame.origin.x, point.y - frame.origin.y);
        Some(to_document_space(local, self.scale))
    }
}

/// Answers the text prompt shown by the text and comment tools. `None` or an empty string
/// cancels.
pub trait TextPrompt {
    fn request_text(&mut self, tool: Tool) -> Option<String>;
}

impl<F> TextPrompt for F
where
    F: FnMut(Tool) -> Option<String>,
{
    fn request_text(&mut self, tool: Tool) -> Option<String> {
        self(tool)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Stroke {
    Shape {
        handle: AnnotationHandle,
        anchor: Point,
    },
    Eraser,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ToolState {
    Idle,
    Drawing { page: usize, stroke: Stroke },
}

#[derive(Debug, Clone, PartialEq)]
pub enum GestureOutcome {
    Ignored,
    Started { page: usize },
    Created(AnnotationHandle),
    Updated,
    Erased(Vec<AnnotationHandle>),
    Finished,
}

#[derive(Debug, Clone)]
pub struct ToolSession {
    tool: Tool,
    pen: PenSettings,
    state: ToolState,
}

impl Default for ToolSession {
    fn default() -> Self {
        Self::new(PenSettings::default())
    }
}

impl ToolSession {
    pub fn new(pen: PenSettings) -> Self {
        Self {
            tool: Tool::Pen,
            pen,
            state: ToolState::Idle,
        }
    }

    pub fn tool(&self) -> Tool {
        self.tool
    }

    pub fn state(&self) -> ToolState {
        self.state
    }

    pub fn is_drawing(&self) -> bool {
        matches!(self.state, ToolState::Drawing { .. })
    }

    pub fn pen(&self) -> &PenSettings {
        &self.pen
    }

    pub fn pen_mut(&mut self) -> &mut PenSettings {
        &mut self.pen
    }

    pub fn select_tool(&mut self, tool: Tool) {
        self.state = ToolState::Idle;
        self.tool = tool;
    }

    pub fn pointer_down(
        &mut self,
        model: &mut AnnotationModel,
        layout: &PageLayout,
        point: Point,
        prompt: &mut dyn TextPrompt,
    ) -> Result<GestureOutcome, AnnotationError> {
        self.state = ToolState::Idle;
        if self.tool == Tool::Pan {
            return Ok(GestureOutcome::Ignored);
        }
        let Some(page) = layout.interactive_page_at(point) else {
            return Ok(GestureOutcome::Ignored);
        };
        let Some(doc) = layout.to_document(page, point) else {
            return Ok(GestureOutcome::Ignored);
        };
        let scale = layout.scale();

        let annotation = match self.tool {
            Tool::Pen | Tool::Highlighter => {
                Annotation::Freehand(FreehandPath::starting_at(doc, self.stroke_style(scale)))
            }
            Tool::Line | Tool::Arrow => Annotation::Line(LineShape {
                start: doc,
                end: doc,
                style: self.stroke_style(scale),
            }),
            Tool::Rectangle => Annotation::Rect(BoxShape {
                rect: Rect::new(doc.x, doc.y, 0.0, 0.0),
                style: self.stroke_style(scale),
            }),
            Tool::Ellipse => Annotation::Ellipse(BoxShape {
                rect: Rect::new(doc.x, doc.y, 0.0, 0.0),
                style: self.stroke_style(scale),
            }),
            Tool::Text => {
                let Some(body) = non_empty(prompt.request_text(Tool::Text)) else {
                    return Ok(GestureOutcome::Ignored);
                };
                let size_px = (self.pen.width_px * 2.0).max(MIN_TEXT_SIZE_PX);
                let handle = model.add_to_active_layer(
                    Annotation::Text(TextNote {
                        anchor: doc,
                        body,
                        font_size: length_to_document(size_px, scale),
                        color: self.pen.color,
                    }),
                    page,
                )?;
                return Ok(GestureOutcome::Created(handle));
            }
            Tool::Comment => {
                let Some(body) = non_empty(prompt.request_text(Tool::Comment)) else {
                    return Ok(GestureOutcome::Ignored);
                };
                let handle = model.add_to_active_layer(
                    Annotation::Comment(CommentMarker { anchor: doc, body }),
                    page,
                )?;
                return Ok(GestureOutcome::Created(handle));
            }
            Tool::Eraser => {
                self.state = ToolState::Drawing {
                    page,
                    stroke: Stroke::Eraser,
                };
                return Ok(GestureOutcome::Started { page });
            }
            Tool::Pan => return Ok(GestureOutcome::Ignored),
        };

        let handle = model.add_to_active_layer(annotation, page)?;
        self.state = ToolState::Drawing {
            page,
            stroke: Stroke::Shape {
                handle,
                anchor: doc,
            },
        };
        debug!(tool = ?self.tool, page, handle = handle.index(), "gesture started");
        Ok(GestureOutcome::Started { page })
    }

    pub fn pointer_move(
        &mut self,
        model: &mut AnnotationModel,
        layout: &PageLayout,
        point: Point,
    ) -> Result<GestureOutcome, AnnotationError> {
        let ToolState::Drawing { page, stroke } = self.state else {
            return Ok(GestureOutcome::Ignored);
        };
        match stroke {
            Stroke::Eraser => {
                let Some(under) = layout.interactive_page_at(point) else {
                    return Ok(GestureOutcome::Ignored);
                };
                let Some(doc) = layout.to_document(under, point) else {
                    return Ok(GestureOutcome::Ignored);
                };
                let radius = length_to_document(self.pen.eraser_size_px / 2.0, layout.scale());
                let erased = model.erase_at(doc, radius, under)?;
                Ok(GestureOutcome::Erased(erased))
            }
            Stroke::Shape { handle, anchor } => {
                if layout.interactive_page_at(point) != Some(page) {
                    return Ok(GestureOutcome::Ignored);
                }
                let Some(doc) = layout.to_document(page, point) else {
                    return Ok(GestureOutcome::Ignored);
                };
                let edit = match self.tool {
                    Tool::Pen | Tool::Highlighter => GeometryEdit::ExtendStroke(doc),
                    Tool::Line | Tool::Arrow => GeometryEdit::SetEnd(doc),
                    Tool::Rectangle | Tool::Ellipse => GeometryEdit::SetCorners {
                        anchor,
                        corner: doc,
                    },
                    Tool::Text | Tool::Comment | Tool::Eraser | Tool::Pan => {
                        return Ok(GestureOutcome::Ignored)
                    }
                };
                if model.update_geometry(handle, edit)? {
                    Ok(GestureOutcome::Updated)
                } else {
                    Ok(GestureOutcome::Ignored)
                }
            }
        }
    }

    pub fn pointer_up(&mut self) -> GestureOutcome {
        match std::mem::replace(&mut self.state, ToolState::Idle) {
            ToolState::Idle => GestureOutcome::Ignored,
            ToolState::Drawing { .. } => GestureOutcome::Finished,
        }
    }

    fn stroke_style(&self, scale: RenderScale) -> StrokeStyle {
        let color = if self.tool == Tool::Highlighter {
            self.pen.color.with_alpha(HIGHLIGHTER_ALPHA)
        } else {
            self.pen.color
        };
        StrokeStyle {
            color,
            width: length_to_document(self.pen.width_px, scale),
        }
    }
}

fn non_empty(text: Option<String>) -> Option<String> {
    text.filter(|t| !t.is_empty())
}
