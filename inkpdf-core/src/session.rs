use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use once_cell::sync::Lazy;
use tokio::time::Instant;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::error::AnnotationError;
use crate::export::{export_to, SinkProvider};
use crate::geometry::{Point, RenderScale};
use crate::model::AnnotationModel;
use crate::settings::{RecentFiles, Settings};
use crate::store::{store_path_for, AnnotationStore};
use crate::tasks::{Autosave, BackgroundTasks, TaskId, TaskKind, TaskOutcome};
use crate::tool::{GestureOutcome, PageLayout, PenSettings, TextPrompt, Tool, ToolSession};

pub type DocumentId = Uuid;

static DOCUMENT_NAMESPACE: Lazy<Uuid> =
    Lazy::new(|| Uuid::new_v5(&Uuid::NAMESPACE_URL, b"https://inkpdf.org/documents"));

pub fn document_id_for_path(path: &Path) -> DocumentId {
    let resolved = path
        .canonicalize()
        .or_else(|_| {
            if path.is_absolute() {
                Ok(path.to_path_buf())
            } else {
                std::env::current_dir().map(|cwd| cwd.join(path))
            }
        })
        .unwrap_or_else(|_| path.to_path_buf());
    let rendered = resolved.to_string_lossy();
    Uuid::new_v5(&DOCUMENT_NAMESPACE, rendered.as_bytes())
}

/// US Letter in document units; the size given to a page that failed to render when no
/// earlier page provides one.
const FALLBACK_PAGE_SIZE: (f64, f64) = (612.0, 792.0);

#[derive(Debug, Clone)]
pub struct RenderImage {
    pub width: u32,
    pub height: u32,
    /// RGBA8, row-major.
    pub pixels: Vec<u8>,
}

pub trait PageRenderer: Send + Sync {
    fn page_count(&self) -> usize;
    fn render_page(&self, page: usize, scale: RenderScale) -> Result<RenderImage>;
}

#[async_trait::async_trait]
pub trait DocumentProvider: Send + Sync {
    async fn open(&self, path: &Path) -> Result<Arc<dyn PageRenderer>>;
}

#[derive(Debug, Clone)]
pub struct DocumentInfo {
    pub id: DocumentId,
    pub path: PathBuf,
    pub page_count: usize,
}

pub struct DocumentSession {
    info: DocumentInfo,
    renderer: Arc<dyn PageRenderer>,
    pages: Vec<Option<RenderImage>>,
    layout: PageLayout,
    model: AnnotationModel,
    tools: ToolSession,
}

impl DocumentSession {
    #[instrument(skip(provider, pen))]
    pub async fn open(
        provider: &dyn DocumentProvider,
        path: &Path,
        scale: RenderScale,
        pen: PenSettings,
    ) -> Result<Self> {
        let renderer = provider.open(path).await?;
        let page_count = renderer.page_count();
        let mut pages = Vec::with_capacity(page_count);
        let mut layout = PageLayout::new(scale);
        let mut last_size = (
            FALLBACK_PAGE_SIZE.0 * scale.get(),
            FALLBACK_PAGE_SIZE.1 * scale.get(),
        );

        for page in 0..page_count {
            match renderer.render_page(page, scale) {
                Ok(image) => {
                    last_size = (f64::from(image.width), f64::from(image.height));
                    layout.push_page(last_size.0, last_size.1, true);
                    pages.push(Some(image));
                }
                Err(err) => {
                    let failure = AnnotationError::RenderFailure {
                        page,
                        reason: format!("{err:#}"),
                    };
                    warn!(%failure, "page skipped");
                    layout.push_page(last_size.0, last_size.1, false);
                    pages.push(None);
                }
            }
        }

        let info = DocumentInfo {
            id: document_id_for_path(path),
            path: path.to_path_buf(),
            page_count,
        };
        info!(path = ?info.path, page_count, "document opened");
        Ok(Self {
            info,
            renderer,
            pages,
            layout,
            model: AnnotationModel::new(page_count),
            tools: ToolSession::new(pen),
        })
    }

    pub fn info(&self) -> &DocumentInfo {
        &self.info
    }

    pub fn renderer(&self) -> &Arc<dyn PageRenderer> {
        &self.renderer
    }

    pub fn page_image(&self, page: usize) -> Option<&RenderImage> {
        self.pages.get(page).and_then(Option::as_ref)
    }

    pub fn rendered_pages(&self) -> usize {
        self.pages.iter().filter(|page| page.is_some()).count()
    }

    pub fn layout(&self) -> &PageLayout {
        &self.layout
    }

    pub fn scale(&self) -> RenderScale {
        self.layout.scale()
    }

    pub fn model(&self) -> &AnnotationModel {
        &self.model
    }

    pub fn model_mut(&mut self) -> &mut AnnotationModel {
        &mut self.model
    }

    pub fn tools(&self) -> &ToolSession {
        &self.tools
    }

    pub fn tools_mut(&mut self) -> &mut ToolSession {
        &mut self.tools
    }

    pub fn select_tool(&mut self, tool: Tool) {
        self.tools.select_tool(tool);
    }

    pub fn pointer_down(
        &mut self,
        point: Point,
        prompt: &mut dyn TextPrompt,
    ) -> Result<GestureOutcome, AnnotationError> {
        self.tools
            .pointer_down(&mut self.model, &self.layout, point, prompt)
    }

    pub fn pointer_move(&mut self, point: Point) -> Result<GestureOutcome, AnnotationError> {
        self.tools.pointer_move(&mut self.model, &self.layout, point)
    }

    pub fn pointer_up(&mut self) -> GestureOutcome {
        self.tools.pointer_up()
    }
}

pub struct Editor {
    session: DocumentSession,
    store: Arc<dyn AnnotationStore>,
    sinks: Arc<dyn SinkProvider>,
    tasks: BackgroundTasks,
    autosave: Autosave,
    recent: Option<RecentFiles>,
    load_warning: Option<AnnotationError>,
}

impl Editor {
    pub fn new(
        session: DocumentSession,
        store: Arc<dyn AnnotationStore>,
        sinks: Arc<dyn SinkProvider>,
        tasks: BackgroundTasks,
        autosave_interval: std::time::Duration,
    ) -> Self {
        let mut editor = Self {
            session,
            store,
            sinks,
            tasks,
            autosave: Autosave::new(autosave_interval, Instant::now()),
            recent: None,
            load_warning: None,
        };
        editor.load_store();
        editor
    }

    pub async fn open(
        provider: &dyn DocumentProvider,
        path: &Path,
        settings: &Settings,
        store: Arc<dyn AnnotationStore>,
        sinks: Arc<dyn SinkProvider>,
        tasks: BackgroundTasks,
    ) -> Result<Self> {
        let session =
            DocumentSession::open(provider, path, settings.render_scale, settings.pen).await?;
        Ok(Self::new(
            session,
            store,
            sinks,
            tasks,
            settings.autosave_interval(),
        ))
    }

    pub fn with_recent_files(mut self, recent: RecentFiles) -> Self {
        self.recent = Some(recent);
        self.remember_current();
        self
    }

    pub async fn reopen(&mut self, provider: &dyn DocumentProvider, path: &Path) -> Result<()> {
        let pen = *self.session.tools().pen();
        let session = DocumentSession::open(provider, path, self.session.scale(), pen).await?;
        self.session = session;
        self.load_store();
        self.remember_current();
        Ok(())
    }

    pub fn session(&self) -> &DocumentSession {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut DocumentSession {
        &mut self.session
    }

    pub fn model(&self) -> &AnnotationModel {
        self.session.model()
    }

    pub fn model_mut(&mut self) -> &mut AnnotationModel {
        self.session.model_mut()
    }

    pub fn recent_files(&self) -> Option<&RecentFiles> {
        self.recent.as_ref()
    }

    pub fn load_warning(&self) -> Option<&AnnotationError> {
        self.load_warning.as_ref()
    }

    pub fn store_path(&self) -> PathBuf {
        store_path_for(&self.session.info().path)
    }

    pub fn save(&mut self) -> Option<TaskId> {
        let snapshot = self.session.model().snapshot();
        let document = self.session.info().path.clone();
        let store = Arc::clone(&self.store);
        self.autosave.reset(Instant::now());
        self.tasks
            .submit(TaskKind::Save, store_path_for(&document), move || {
                Ok(store.save(&document, &snapshot)?)
            })
    }

    pub fn export(&mut self, destination: PathBuf) -> Option<TaskId> {
        let snapshot = self.session.model().snapshot();
        let source = self.session.info().path.clone();
        let sinks = Arc::clone(&self.sinks);
        let target = destination.clone();
        self.tasks.submit(TaskKind::Export, destination, move || {
            export_to(sinks.as_ref(), &source, &snapshot, &target)?;
            Ok(target)
        })
    }

    pub fn poll(&mut self, now: Instant) -> Vec<TaskOutcome> {
        if self.autosave.poll(now) {
            info!("autosave");
            self.save();
        }
        self.tasks.drain()
    }

    pub async fn wait_for_tasks(&mut self) -> Vec<TaskOutcome> {
        self.tasks.wait_all().await
    }

    pub fn clear_all(&mut self) {
        self.session.model_mut().clear_all();
        info!("all annotations cleared");
    }

    fn load_store(&mut self) {
        let info = self.session.info().clone();
        self.load_warning = None;
        let loaded = self
            .store
            .load(&info.path, info.page_count)
            .and_then(|entries| self.session.model_mut().load_entries(entries));
        if let Err(err) = loaded {
            warn!(%err, path = ?info.path, "annotation store not loaded");
            self.session.model_mut().clear_all();
            self.load_warning = Some(err);
        }
    }

    fn remember_current(&mut self) {
        let Some(recent) = self.recent.as_mut() else {
            return;
        };
        recent.touch(&self.session.info.path);
        if let Err(err) = recent.save() {
            warn!(?err, "failed to update recent files");
        }
    }
}
