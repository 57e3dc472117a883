//! JSON annotation store kept next to the document (`paper.pdf` -> `paper.annotations.json`).
//!
//! One array element per annotation, geometry and widths in document units. Colours are stored
//! as `[r, g, b]`; a translucent colour adds an `opacity` field that older readers skip.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::annotation::{
    Annotation, BoxShape, Color, CommentMarker, FreehandPath, LineShape, StrokeStyle, TextNote,
};
use crate::error::AnnotationError;
use crate::geometry::{Point, Rect};
use crate::model::{ModelSnapshot, SnapshotEntry};

pub const STORE_EXTENSION: &str = "annotations.json";

pub fn store_path_for(document: &Path) -> PathBuf {
    document.with_extension(STORE_EXTENSION)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct StoredRecord {
    layer: String,
    page: usize,
    #[serde(flatten)]
    shape: StoredShape,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum StoredShape {
    Path {
        strokes: Vec<Vec<[f64; 2]>>,
        color: [f64; 3],
        width: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        opacity: Option<f64>,
    },
    Line {
        points: [f64; 4],
        color: [f64; 3],
        width: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        opacity: Option<f64>,
    },
    Rect {
        rect: [f64; 4],
        color: [f64; 3],
        width: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        opacity: Option<f64>,
    },
    Ellipse {
        rect: [f64; 4],
        color: [f64; 3],
        width: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        opacity: Option<f64>,
    },
    Text {
        data: (f64, f64, String, f64),
        color: [f64; 3],
        #[serde(default, skip_serializing_if = "Option::is_none")]
        opacity: Option<f64>,
    },
    Comment {
        data: (f64, f64, String),
    },
}

fn opacity_of(color: &Color) -> Option<f64> {
    (!color.is_opaque()).then_some(color.a)
}

fn rect_fields(rect: &Rect) -> [f64; 4] {
    [rect.x, rect.y, rect.width, rect.height]
}

impl From<&SnapshotEntry> for StoredRecord {
    fn from(entry: &SnapshotEntry) -> Self {
        let shape = match &entry.annotation {
            Annotation::Freehand(path) => StoredShape::Path {
                strokes: path
                    .strokes
                    .iter()
                    .map(|stroke| stroke.iter().map(|p| [p.x, p.y]).collect())
                    .collect(),
                color: path.style.color.components(),
                width: path.style.width,
                opacity: opacity_of(&path.style.color),
            },
            Annotation::Line(line) => StoredShape::Line {
                points: [line.start.x, line.start.y, line.end.x, line.end.y],
                color: line.style.color.components(),
                width: line.style.width,
                opacity: opacity_of(&line.style.color),
            },
            Annotation::Rect(shape) => StoredShape::Rect {
                rect: rect_fields(&shape.rect),
                color: shape.style.color.components(),
                width: shape.style.width,
                opacity: opacity_of(&shape.style.color),
            },
            Annotation::Ellipse(shape) => StoredShape::Ellipse {
                rect: rect_fields(&shape.rect),
                color: shape.style.color.components(),
                width: shape.style.width,
                opacity: opacity_of(&shape.style.color),
            },
            Annotation::Text(note) => StoredShape::Text {
                data: (note.anchor.x, note.anchor.y, note.body.clone(), note.font_size),
                color: note.color.components(),
                opacity: opacity_of(&note.color),
            },
            Annotation::Comment(marker) => StoredShape::Comment {
                data: (marker.anchor.x, marker.anchor.y, marker.body.clone()),
            },
        };
        Self {
            layer: entry.layer.clone(),
            page: entry.page,
            shape,
        }
    }
}

impl From<StoredRecord> for SnapshotEntry {
    fn from(record: StoredRecord) -> Self {
        let style = |color: [f64; 3], width: f64, opacity: Option<f64>| StrokeStyle {
            color: Color::from_components(color, opacity),
            width,
        };
        let boxed = |rect: [f64; 4]| Rect::new(rect[0], rect[1], rect[2], rect[3]);
        let annotation = match record.shape {
            StoredShape::Path {
                strokes,
                color,
                width,
                opacity,
            } => Annotation::Freehand(FreehandPath {
                strokes: strokes
                    .into_iter()
                    .map(|stroke| stroke.into_iter().map(|[x, y]| Point::new(x, y)).collect())
                    .collect(),
                style: style(color, width, opacity),
            }),
            StoredShape::Line {
                points: [x1, y1, x2, y2],
                color,
                width,
                opacity,
            } => Annotation::Line(LineShape {
                start: Point::new(x1, y1),
                end: Point::new(x2, y2),
                style: style(color, width, opacity),
            }),
            StoredShape::Rect {
                rect,
                color,
                width,
                opacity,
            } => Annotation::Rect(BoxShape {
                rect: boxed(rect),
                style: style(color, width, opacity),
            }),
            StoredShape::Ellipse {
                rect,
                color,
                width,
                opacity,
            } => Annotation::Ellipse(BoxShape {
                rect: boxed(rect),
                style: style(color, width, opacity),
            }),
            StoredShape::Text {
                data: (x, y, body, font_size),
                color,
                opacity,
            } => Annotation::Text(TextNote {
                anchor: Point::new(x, y),
                body,
                font_size,
                color: Color::from_components(color, opacity),
            }),
            StoredShape::Comment { data: (x, y, body) } => {
                Annotation::Comment(CommentMarker {
                    anchor: Point::new(x, y),
                    body,
                })
            }
        };
        Self {
            layer: record.layer,
            page: record.page,
            annotation,
        }
    }
}

pub fn encode(snapshot: &ModelSnapshot) -> serde_json::Result<String> {
    let records: Vec<StoredRecord> = snapshot.entries.iter().map(StoredRecord::from).collect();
    serde_json::to_string_pretty(&records)
}

pub fn decode(
    payload: &[u8],
    page_count: usize,
    origin: &Path,
) -> Result<Vec<SnapshotEntry>, AnnotationError> {
    let records: Vec<StoredRecord> =
        serde_json::from_slice(payload).map_err(|err| AnnotationError::corrupt(origin, err))?;
    for (index, record) in records.iter().enumerate() {
        if record.page >= page_count {
            return Err(AnnotationError::corrupt(
                origin,
                format!(
                    "record {index} targets page {} but the document has {page_count} pages",
                    record.page
                ),
            ));
        }
        if record.layer.is_empty() {
            return Err(AnnotationError::corrupt(
                origin,
                format!("record {index} has an empty layer name"),
            ));
        }
    }
    Ok(records.into_iter().map(SnapshotEntry::from).collect())
}

pub(crate) fn write_atomic(path: &Path, payload: &[u8]) -> io::Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    let mut file = File::create(&tmp)?;
    file.write_all(payload)?;
    file.flush()?;
    fs::rename(&tmp, path)
}

pub trait AnnotationStore: Send + Sync {
    fn load(&self, document: &Path, page_count: usize)
        -> Result<Vec<SnapshotEntry>, AnnotationError>;

    fn save(&self, document: &Path, snapshot: &ModelSnapshot) -> Result<PathBuf, AnnotationError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FileAnnotationStore;

impl AnnotationStore for FileAnnotationStore {
    #[instrument(skip(self))]
    fn load(
        &self,
        document: &Path,
        page_count: usize,
    ) -> Result<Vec<SnapshotEntry>, AnnotationError> {
        let path = store_path_for(document);
        let payload = match fs::read(&path) {
            Ok(payload) => payload,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                debug!(?path, "no annotation store yet");
                return Ok(Vec::new());
            }
            Err(err) => return Err(AnnotationError::io(path, err)),
        };
        let entries = decode(&payload, page_count, &path)?;
        info!(?path, count = entries.len(), "annotation store loaded");
        Ok(entries)
    }

    #[instrument(skip(self, snapshot), fields(count = snapshot.len()))]
    fn save(&self, document: &Path, snapshot: &ModelSnapshot) -> Result<PathBuf, AnnotationError> {
        let path = store_path_for(document);
        let payload = encode(snapshot).map_err(|err| AnnotationError::io(&path, err.into()))?;
        write_atomic(&path, payload.as_bytes()).map_err(|err| AnnotationError::io(&path, err))?;
        info!(?path, "annotation store saved");
        Ok(path)
    }
}

#[derive(Debug, Default)]
pub struct MemoryAnnotationStore {
    inner: Mutex<HashMap<PathBuf, String>>,
}

impl MemoryAnnotationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raw(&self, document: &Path) -> Option<String> {
        self.inner.lock().get(document).cloned()
    }

    pub fn insert_raw(&self, document: &Path, payload: impl Into<String>) {
        self.inner
            .lock()
            .insert(document.to_path_buf(), payload.into());
    }
}

impl AnnotationStore for MemoryAnnotationStore {
    fn load(
        &self,
        document: &Path,
        page_count: usize,
    ) -> Result<Vec<SnapshotEntry>, AnnotationError> {
        match self.inner.lock().get(document) {
            Some(payload) => decode(payload.as_bytes(), page_count, &store_path_for(document)),
            None => Ok(Vec::new()),
        }
    }

    fn save(&self, document: &Path, snapshot: &ModelSnapshot) -> Result<PathBuf, AnnotationError> {
        let path = store_path_for(document);
        let payload = encode(snapshot).map_err(|err| AnnotationError::io(&path, err.into()))?;
        self.insert_raw(document, payload);
        Ok(path)
    }
}
