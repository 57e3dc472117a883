mod sink;

pub use sink::{LopdfSink, LopdfSinkProvider, SinkError};

#[cfg(feature = "pdf")]
pub use pdfium::{PdfiumDocument, PdfiumProvider};

#[cfg(feature = "pdf")]
mod pdfium {
    use std::convert::TryFrom;
    use std::mem;
    use std::path::{Path, PathBuf};
    use std::sync::Arc;

    use anyhow::{anyhow, Context, Result};
    use async_trait::async_trait;
    use inkpdf_core::{DocumentProvider, PageRenderer, RenderImage, RenderScale};
    use parking_lot::Mutex;
    use pdfium_render::prelude::*;
    use tracing::{debug, instrument, warn};

    pub struct PdfiumProvider {
        pdfium: Arc<Pdfium>,
    }

    impl PdfiumProvider {
        pub fn new() -> Result<Self> {
            let pdfium = match bind_pdfium_from_env() {
                Some(pdfium) => pdfium,
                None => bind_pdfium_default()?,
            };
            Ok(Self {
                pdfium: Arc::new(pdfium),
            })
        }
    }

    #[async_trait]
    impl DocumentProvider for PdfiumProvider {
        async fn open(&self, path: &Path) -> Result<Arc<dyn PageRenderer>> {
            let absolute = path
                .canonicalize()
                .with_context(|| format!("failed to resolve path for {:?}", path))?;
            let document = PdfiumDocument::open(Arc::clone(&self.pdfium), absolute)?;
            Ok(Arc::new(document))
        }
    }

    pub struct PdfiumDocument {
        path: PathBuf,
        page_count: usize,
        document: Mutex<PdfDocument<'static>>,
        // Must stay after `document`: fields drop in declaration order.
        _pdfium: Arc<Pdfium>,
    }

    impl PdfiumDocument {
        pub fn open(pdfium: Arc<Pdfium>, path: PathBuf) -> Result<Self> {
            let document = pdfium
                .load_pdf_from_file(&path, None)
                .with_context(|| format!("failed to open {:?}", path))?;
            // SAFETY: the document borrows the bindings owned by `pdfium`. The Arc is stored in
            // `_pdfium`, declared after `document`, so the bindings outlive the document.
            let document =
                unsafe { mem::transmute::<PdfDocument<'_>, PdfDocument<'static>>(document) };
            let page_count = usize::try_from(document.pages().len()).unwrap_or_default();
            debug!(?path, page_count, "pdf parsed");
            Ok(Self {
                path,
                page_count,
                document: Mutex::new(document),
                _pdfium: pdfium,
            })
        }

        pub fn path(&self) -> &Path {
            &self.path
        }
    }

    impl PageRenderer for PdfiumDocument {
        fn page_count(&self) -> usize {
            self.page_count
        }

        #[instrument(skip(self), fields(path = %self.path.display()))]
        fn render_page(&self, page: usize, scale: RenderScale) -> Result<RenderImage> {
            let document = self.document.lock();
            let page_index: PdfPageIndex = page
                .try_into()
                .map_err(|_| anyhow!("page {} is out of supported range", page))?;
            let pdf_page = document
                .pages()
                .get(page_index)
                .with_context(|| format!("page {} out of range", page))?;

            let config = PdfRenderConfig::new().scale_page_by_factor(scale.get() as f32);
            let bitmap = pdf_page
                .render_with_config(&config)
                .with_context(|| format!("failed to render page {}", page))?;
            let pixels = bitmap.as_image().to_rgba8().into_raw();

            Ok(RenderImage {
                width: u32::try_from(bitmap.width()).unwrap_or_default(),
                height: u32::try_from(bitmap.height()).unwrap_or_default(),
                pixels,
            })
        }
    }

    fn bind_pdfium_from_env() -> Option<Pdfium> {
        match std::env::var("INKPDF_PDFIUM_LIBRARY") {
            Ok(path) if !path.is_empty() => match Pdfium::bind_to_library(&path) {
                Ok(bindings) => Some(Pdfium::new(bindings)),
                Err(err) => {
                    warn!("failed to load Pdfium from {}: {}", path, err);
                    None
                }
            },
            _ => None,
        }
    }

    fn bind_pdfium_default() -> Result<Pdfium> {
        let mut errors = Vec::new();

        let cwd_path = Pdfium::pdfium_platform_library_name_at_path("./");

        match Pdfium::bind_to_library(&cwd_path) {
            Ok(bindings) => return Ok(Pdfium::new(bindings)),
            Err(err) => {
                errors.push(format!("{}: {}", cwd_path.display(), err));
            }
        }

        match Pdfium::bind_to_system_library() {
            Ok(bindings) => Ok(Pdfium::new(bindings)),
            Err(err) => {
                errors.push(format!("system: {err}"));
                Err(anyhow!(
                    "failed to bind to a pdfium library; ensure it is installed or set \
                     INKPDF_PDFIUM_LIBRARY ({})",
                    errors.join(", ")
                ))
            }
        }
    }
}
