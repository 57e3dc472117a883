use std::path::Path;

use anyhow::{Context, Result};
use tracing::{debug, instrument};

use crate::annotation::{Annotation, Color, COMMENT_MARKER_RADIUS};
use crate::geometry::{Point, Rect};
use crate::model::ModelSnapshot;

/// Target of a burn-in: an open copy of the source document that accepts native annotation
/// objects. All geometry is in document space (top-left origin, y down) and widths are in
/// document units.
pub trait DocumentSink {
    fn add_freehand(&mut self, page: usize, strokes: &[Vec<Point>], color: Color, width: f64)
        -> Result<()>;
    fn add_line(&mut self, page: usize, start: Point, end: Point, color: Color, width: f64)
        -> Result<()>;
    fn add_rect(&mut self, page: usize, rect: Rect, color: Color, width: f64) -> Result<()>;
    fn add_ellipse(&mut self, page: usize, rect: Rect, color: Color, width: f64) -> Result<()>;
    fn add_free_text(
        &mut self,
        page: usize,
        rect: Rect,
        text: &str,
        font_size: f64,
        color: Color,
    ) -> Result<()>;
    fn add_point_note(&mut self, page: usize, point: Point, text: &str) -> Result<()>;
    fn commit(&mut self, destination: &Path) -> Result<()>;
}

pub trait SinkProvider: Send + Sync {
    fn open(&self, source: &Path) -> Result<Box<dyn DocumentSink>>;
}

pub fn comment_marker_box(anchor: Point) -> Rect {
    Rect::centered(anchor, COMMENT_MARKER_RADIUS)
}

pub fn burn_in(snapshot: &ModelSnapshot, sink: &mut dyn DocumentSink) -> Result<usize> {
    for (index, entry) in snapshot.entries.iter().enumerate() {
        let page = entry.page;
        let added = match &entry.annotation {
            Annotation::Freehand(path) => {
                sink.add_freehand(page, &path.strokes, path.style.color, path.style.width)
            }
            Annotation::Line(line) => sink.add_line(
                page,
                line.start,
                line.end,
                line.style.color,
                line.style.width,
            ),
            Annotation::Rect(shape) => {
                sink.add_rect(page, shape.rect, shape.style.color, shape.style.width)
            }
            Annotation::Ellipse(shape) => {
                sink.add_ellipse(page, shape.rect, shape.style.color, shape.style.width)
            }
            Annotation::Text(note) => {
                sink.add_free_text(page, note.text_box(), &note.body, note.font_size, note.color)
            }
            Annotation::Comment(marker) => sink.add_point_note(page, marker.anchor, &marker.body),
        };
        added.with_context(|| {
            format!(
                "failed to export {} annotation #{index} on page {page}",
                entry.annotation.kind()
            )
        })?;
    }
    debug!(count = snapshot.len(), "annotations emitted");
    Ok(snapshot.len())
}

#[instrument(skip(provider, snapshot), fields(count = snapshot.len()))]
pub fn export_to(
    provider: &dyn SinkProvider,
    source: &Path,
    snapshot: &ModelSnapshot,
    destination: &Path,
) -> Result<()> {
    let mut sink = provider
        .open(source)
        .with_context(|| format!("failed to open {:?} for export", source))?;
    burn_in(snapshot, sink.as_mut())?;
    sink.commit(destination)
        .with_context(|| format!("failed to write export to {:?}", destination))?;
    Ok(())
}

#[cfg(test)]
pub(crate) mod testing {
    use std::path::PathBuf;
    use std::sync::Arc;

    use parking_lot::Mutex;

    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    pub enum SinkCall {
        Freehand { page: usize, strokes: Vec<Vec<Point>>, color: Color, width: f64 },
        Line { page: usize, start: Point, end: Point, color: Color, width: f64 },
        Rect { page: usize, rect: Rect, color: Color, width: f64 },
        Ellipse { page: usize, rect: Rect, color: Color, width: f64 },
        FreeText { page: usize, rect: Rect, text: String, font_size: f64, color: Color },
        PointNote { page: usize, point: Point, text: String },
    }

    #[derive(Debug, Default)]
    pub struct RecordingSink {
        pub calls: Vec<SinkCall>,
        pub exports: Arc<Mutex<Vec<(PathBuf, Vec<SinkCall>)>>>,
    }

    impl DocumentSink for RecordingSink {
        fn add_freehand(
            &mut self,
            page: usize,
            strokes: &[Vec<Point>],
            color: Color,
            width: f64,
        ) -> Result<()> {
            self.calls.push(SinkCall::Freehand {
                page,
                strokes: strokes.to_vec(),
                color,
                width,
            });
            Ok(())
        }

        fn add_line(
            &mut self,
            page: usize,
            start: Point,
            end: Point,
            color: Color,
            width: f64,
        ) -> Result<()> {
            self.calls.push(SinkCall::Line { page, start, end, color, width });
            Ok(())
        }

        fn add_rect(&mut self, page: usize, rect: Rect, color: Color, width: f64) -> Result<()> {
            self.calls.push(SinkCall::Rect { page, rect, color, width });
            Ok(())
        }

        fn add_ellipse(&mut self, page: usize, rect: Rect, color: Color, width: f64) -> Result<()> {
            self.calls.push(SinkCall::Ellipse { page, rect, color, width });
            Ok(())
        }

        fn add_free_text(
            &mut self,
            page: usize,
            rect: Rect,
            text: &str,
            font_size: f64,
            color: Color,
        ) -> Result<()> {
            self.calls.push(SinkCall::FreeText {
                page,
                rect,
                text: text.to_owned(),
                font_size,
                color,
            });
            Ok(())
        }

        fn add_point_note(&mut self, page: usize, point: Point, text: &str) -> Result<()> {
            self.calls.push(SinkCall::PointNote {
                page,
                point,
                text: text.to_owned(),
            });
            Ok(())
        }

        fn commit(&mut self, destination: &Path) -> Result<()> {
            if destination.as_os_str().is_empty() {
                anyhow::bail!("empty destination");
            }
            self.exports
                .lock()
                .push((destination.to_path_buf(), std::mem::take(&mut self.calls)));
            Ok(())
        }
    }

    #[derive(Debug, Default, Clone)]
    pub struct RecordingProvider {
        pub exports: Arc<Mutex<Vec<(PathBuf, Vec<SinkCall>)>>>,
    }

    impl SinkProvider for RecordingProvider {
        fn open(&self, _source: &Path) -> Result<Box<dyn DocumentSink>> {
            Ok(Box::new(RecordingSink {
                calls: Vec::new(),
                exports: Arc::clone(&self.exports),
            }))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::testing::{RecordingProvider, RecordingSink, SinkCall};
    use super::*;
    use crate::annotation::{
        BoxShape, CommentMarker, FreehandPath, LineShape, StrokeStyle, TextNote,
    };
    use crate::model::AnnotationModel;

    fn model() -> AnnotationModel {
        let mut model = AnnotationModel::new(2);
        let style = StrokeStyle {
            color: Color::rgb(1.0, 0.0, 0.0),
            width: 2.0,
        };
        model
            .add_annotation(
                Annotation::Freehand(FreehandPath {
                    strokes: vec![vec![Point::new(0.0, 0.0), Point::new(5.0, 5.0)]],
                    style,
                }),
                0,
                "Default",
            )
            .unwrap();
        model
            .add_annotation(
                Annotation::Line(LineShape {
                    start: Point::new(1.0, 1.0),
                    end: Point::new(9.0, 1.0),
                    style,
                }),
                1,
                "Default",
            )
            .unwrap();
        model
            .add_annotation(
                Annotation::Ellipse(BoxShape {
                    rect: Rect::new(10.0, 10.0, 4.0, 2.0),
                    style,
                }),
                1,
                "Default",
            )
            .unwrap();
        model
            .add_annotation(
                Annotation::Text(TextNote {
                    anchor: Point::new(30.0, 40.0),
                    body: "Hello".into(),
                    font_size: 6.0,
                    color: Color::BLACK,
                }),
                0,
                "Default",
            )
            .unwrap();
        model
            .add_annotation(
                Annotation::Comment(CommentMarker {
                    anchor: Point::new(7.0, 8.0),
                    body: "why?".into(),
                }),
                1,
                "Default",
            )
            .unwrap();
        model
    }

    #[test]
    fn every_kind_maps_to_its_sink_primitive() {
        let mut sink = RecordingSink::default();
        let count = burn_in(&model().snapshot(), &mut sink).unwrap();
        assert_eq!(count, 5);
        assert!(matches!(sink.calls[0], SinkCall::Freehand { page: 0, width, .. } if width == 2.0));
        assert!(matches!(sink.calls[1], SinkCall::Line { page: 1, .. }));
        assert!(matches!(sink.calls[2], SinkCall::Ellipse { page: 1, .. }));
        assert_eq!(
            sink.calls[3],
            SinkCall::FreeText {
                page: 0,
                rect: Rect::new(30.0, 40.0, 200.0, 9.0),
                text: "Hello".into(),
                font_size: 6.0,
                color: Color::BLACK,
            }
        );
        assert_eq!(
            sink.calls[4],
            SinkCall::PointNote {
                page: 1,
                point: Point::new(7.0, 8.0),
                text: "why?".into(),
            }
        );
    }

    #[test]
    fn export_is_idempotent_and_leaves_the_model_alone() {
        let model = model();
        let before = model.snapshot();
        let undo_before = model.history().undo_len();
        let provider = RecordingProvider::default();

        export_to(&provider, Path::new("in.pdf"), &model.snapshot(), Path::new("a.pdf")).unwrap();
        export_to(&provider, Path::new("in.pdf"), &model.snapshot(), Path::new("b.pdf")).unwrap();

        let exports = provider.exports.lock();
        assert_eq!(exports.len(), 2);
        assert_eq!(exports[0].0, PathBuf::from("a.pdf"));
        assert_eq!(exports[0].1, exports[1].1);
        assert_eq!(model.snapshot(), before);
        assert_eq!(model.history().undo_len(), undo_before);
    }

    #[test]
    fn commit_failure_carries_the_destination() {
        let provider = RecordingProvider::default();
        let err = export_to(&provider, Path::new("in.pdf"), &model().snapshot(), Path::new(""))
            .unwrap_err();
        assert!(format!("{err:#}").contains("empty destination"));
    }

    #[test]
    fn marker_box_surrounds_the_anchor() {
        assert_eq!(
            comment_marker_box(Point::new(10.0, 10.0)),
            Rect::new(6.0, 6.0, 8.0, 8.0)
        );
    }
}
