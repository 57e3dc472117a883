pub mod annotation;
pub mod error;
pub mod export;
pub mod geometry;
pub mod history;
pub mod layers;
pub mod model;
pub mod session;
pub mod settings;
pub mod store;
pub mod tasks;
pub mod tool;

pub use annotation::{
    Annotation, AnnotationKind, BoxShape, Color, CommentMarker, FreehandPath, GeometryEdit,
    LineShape, StrokeStyle, TextNote,
};
pub use error::AnnotationError;
pub use export::{burn_in, export_to, DocumentSink, SinkProvider};
pub use geometry::{Point, Rect, RenderScale};
pub use history::{History, HistoryAction, HistoryEntry};
pub use layers::{LayerRegistry, DEFAULT_LAYER};
pub use model::{AnnotationHandle, AnnotationModel, ModelSnapshot, PlacedAnnotation, SnapshotEntry};
pub use session::{
    document_id_for_path, DocumentId, DocumentInfo, DocumentProvider, DocumentSession, Editor,
    PageRenderer, RenderImage,
};
pub use settings::{RecentFiles, Settings};
pub use store::{store_path_for, AnnotationStore, FileAnnotationStore, MemoryAnnotationStore};
pub use tasks::{Autosave, BackgroundTasks, TaskId, TaskKind, TaskOutcome};
pub use tool::{GestureOutcome, PageLayout, PenSettings, TextPrompt, Tool, ToolSession};
