use std::path::Path;

use anyhow::{Context, Result};
use inkpdf_core::export::comment_marker_box;
use inkpdf_core::{Color, DocumentSink, Point, Rect, SinkProvider};
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream, StringFormat};
use thiserror::Error;
use tracing::{debug, info, instrument};

const MAX_INHERITANCE_DEPTH: usize = 32;
const LETTER: [f64; 4] = [0.0, 0.0, 612.0, 792.0];
const KAPPA: f64 = 0.5523;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("page {page} does not exist in a document with {count} pages")]
    MissingPage { page: usize, count: usize },
    #[error(transparent)]
    Pdf(#[from] lopdf::Error),
}

/// Where one page's document space sits in PDF user space. Document space is the rendered view:
/// the crop box, turned by `/Rotate`, measured from its top-left corner with y pointing down.
#[derive(Debug, Clone, Copy)]
struct PageTarget {
    id: ObjectId,
    crop: [f64; 4],
    rotate: u16,
}

impl PageTarget {
    fn to_pdf(&self, point: Point) -> (f64, f64) {
        let [x0, y0, x1, y1] = self.crop;
        match self.rotate {
            90 => (x0 + point.y, y0 + point.x),
            180 => (x1 - point.x, y0 + point.y),
            270 => (x1 - point.y, y1 - point.x),
            _ => (x0 + point.x, y1 - point.y),
        }
    }

    fn rect_to_pdf(&self, rect: Rect) -> [f64; 4] {
        let (ax, ay) = self.to_pdf(Point::new(rect.x, rect.y));
        let (bx, by) = self.to_pdf(Point::new(rect.right(), rect.bottom()));
        [ax.min(bx), ay.min(by), ax.max(bx), ay.max(by)]
    }
}

pub struct LopdfSink {
    document: Document,
    pages: Vec<PageTarget>,
}

impl LopdfSink {
    pub fn new(document: Document) -> Self {
        let pages = document
            .get_pages()
            .into_values()
            .map(|id| PageTarget {
                id,
                crop: crop_box(&document, id),
                rotate: rotation(&document, id),
            })
            .collect();
        Self { document, pages }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let document =
            Document::load(path).with_context(|| format!("failed to open {:?}", path))?;
        Ok(Self::new(document))
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    fn page(&self, page: usize) -> Result<PageTarget, SinkError> {
        self.pages.get(page).copied().ok_or(SinkError::MissingPage {
            page,
            count: self.pages.len(),
        })
    }

    fn attach(&mut self, page: PageTarget, mut annot: Dictionary) -> Result<(), SinkError> {
        annot.set("P", Object::Reference(page.id));
        let annot_id = self.document.add_object(Object::Dictionary(annot));

        let shared_list = self
            .document
            .get_dictionary(page.id)?
            .get(b"Annots")
            .and_then(Object::as_reference)
            .ok();
        if let Some(list_id) = shared_list {
            if let Ok(annots) = self
                .document
                .get_object_mut(list_id)
                .and_then(Object::as_array_mut)
            {
                annots.push(Object::Reference(annot_id));
                return Ok(());
            }
        }

        let page_dict = self.document.get_object_mut(page.id)?.as_dict_mut()?;
        match page_dict.get_mut(b"Annots") {
            Ok(Object::Array(annots)) => annots.push(Object::Reference(annot_id)),
            _ => page_dict.set("Annots", Object::Array(vec![Object::Reference(annot_id)])),
        }
        Ok(())
    }

    fn appearance(
        &mut self,
        bbox: [f64; 4],
        operations: Vec<Operation>,
        resources: Option<Dictionary>,
    ) -> Result<Object, SinkError> {
        let mut form = dictionary! {
            "Type" => "XObject",
            "Subtype" => "Form",
            "BBox" => reals(&bbox),
        };
        if let Some(resources) = resources {
            form.set("Resources", Object::Dictionary(resources));
        }
        let content = Content { operations }.encode()?;
        let stream_id = self.document.add_object(Stream::new(form, content));
        Ok(Object::Dictionary(dictionary! {
            "N" => Object::Reference(stream_id),
        }))
    }

    fn add_stroked(
        &mut self,
        page: usize,
        subtype: &str,
        bbox: [f64; 4],
        color: Color,
        width: f64,
        path: Vec<Operation>,
        extra: Dictionary,
    ) -> Result<()> {
        let target = self.page(page)?;
        let mut operations = stroke_state(color, width);
        operations.extend(path);
        operations.push(Operation::new("S", vec![]));
        let appearance = self.appearance(bbox, operations, None)?;

        let mut annot = base_annotation(subtype, bbox);
        annot.set("C", reals(&color.components()));
        annot.set("BS", dictionary! { "W" => real(width) });
        if !color.is_opaque() {
            annot.set("CA", real(color.a));
        }
        for (key, value) in extra.iter() {
            annot.set(key.clone(), value.clone());
        }
        annot.set("AP", appearance);
        self.attach(target, annot)?;
        debug!(page, subtype, "annotation written");
        Ok(())
    }
}

impl DocumentSink for LopdfSink {
    fn add_freehand(
        &mut self,
        page: usize,
        strokes: &[Vec<Point>],
        color: Color,
        width: f64,
    ) -> Result<()> {
        let target = self.page(page)?;
        let Some(bounds) = Rect::bounding(strokes.iter().flatten().copied()) else {
            return Ok(());
        };
        let bbox = target.rect_to_pdf(bounds.inflate(width / 2.0));

        let mut ink_list = Vec::with_capacity(strokes.len());
        let mut path = Vec::new();
        for stroke in strokes.iter().filter(|stroke| !stroke.is_empty()) {
            let mut coords = Vec::with_capacity(stroke.len() * 2);
            for (index, point) in stroke.iter().enumerate() {
                let (x, y) = target.to_pdf(*point);
                coords.extend([real(x), real(y)]);
                let operator = if index == 0 { "m" } else { "l" };
                path.push(Operation::new(operator, vec![real(x), real(y)]));
            }
            if stroke.len() == 1 {
                let (x, y) = target.to_pdf(stroke[0]);
                path.push(Operation::new("l", vec![real(x), real(y)]));
            }
            ink_list.push(Object::Array(coords));
        }

        self.add_stroked(
            page,
            "Ink",
            bbox,
            color,
            width,
            path,
            dictionary! { "InkList" => Object::Array(ink_list) },
        )
    }

    fn add_line(
        &mut self,
        page: usize,
        start: Point,
        end: Point,
        color: Color,
        width: f64,
    ) -> Result<()> {
        let target = self.page(page)?;
        let bbox = target.rect_to_pdf(Rect::from_corners(start, end).inflate(width / 2.0));
        let (x1, y1) = target.to_pdf(start);
        let (x2, y2) = target.to_pdf(end);
        let path = vec![
            Operation::new("m", vec![real(x1), real(y1)]),
            Operation::new("l", vec![real(x2), real(y2)]),
        ];
        self.add_stroked(
            page,
            "Line",
            bbox,
            color,
            width,
            path,
            dictionary! { "L" => reals(&[x1, y1, x2, y2]) },
        )
    }

    fn add_rect(&mut self, page: usize, rect: Rect, color: Color, width: f64) -> Result<()> {
        let target = self.page(page)?;
        let bbox = target.rect_to_pdf(rect.inflate(width / 2.0));
        let [x0, y0, x1, y1] = target.rect_to_pdf(rect);
        let path = vec![Operation::new(
            "re",
            vec![real(x0), real(y0), real(x1 - x0), real(y1 - y0)],
        )];
        self.add_stroked(page, "Square", bbox, color, width, path, Dictionary::new())
    }

    fn add_ellipse(&mut self, page: usize, rect: Rect, color: Color, width: f64) -> Result<()> {
        let target = self.page(page)?;
        let bbox = target.rect_to_pdf(rect.inflate(width / 2.0));
        let path = ellipse_path(target.rect_to_pdf(rect));
        self.add_stroked(page, "Circle", bbox, color, width, path, Dictionary::new())
    }

    fn add_free_text(
        &mut self,
        page: usize,
        rect: Rect,
        text: &str,
        font_size: f64,
        color: Color,
    ) -> Result<()> {
        let target = self.page(page)?;
        let bbox = target.rect_to_pdf(rect);
        let [r, g, b] = color.components();
        let da = format!("/Helv {font_size:.2} Tf {r:.3} {g:.3} {b:.3} rg");

        let resources = dictionary! {
            "Font" => dictionary! {
                "Helv" => dictionary! {
                    "Type" => "Font",
                    "Subtype" => "Type1",
                    "BaseFont" => "Helvetica",
                    "Encoding" => "WinAnsiEncoding",
                },
            },
        };
        let baseline = bbox[3] - font_size;
        let operations = vec![
            Operation::new("BT", vec![]),
            Operation::new("Tf", vec![Object::Name(b"Helv".to_vec()), real(font_size)]),
            Operation::new("rg", vec![real(r), real(g), real(b)]),
            Operation::new("Td", vec![real(bbox[0]), real(baseline)]),
            Operation::new(
                "Tj",
                vec![Object::String(win_ansi_bytes(text), StringFormat::Literal)],
            ),
            Operation::new("ET", vec![]),
        ];
        let appearance = self.appearance(bbox, operations, Some(resources))?;

        let mut annot = base_annotation("FreeText", bbox);
        annot.set("Contents", text_string(text));
        annot.set("DA", Object::String(da.into_bytes(), StringFormat::Literal));
        annot.set("BS", dictionary! { "W" => Object::Integer(0) });
        if !color.is_opaque() {
            annot.set("CA", real(color.a));
        }
        annot.set("AP", appearance);
        self.attach(target, annot)?;
        Ok(())
    }

    fn add_point_note(&mut self, page: usize, point: Point, text: &str) -> Result<()> {
        let target = self.page(page)?;
        let bbox = target.rect_to_pdf(comment_marker_box(point));
        let mut annot = base_annotation("Text", bbox);
        annot.set("Contents", text_string(text));
        annot.set("Name", Object::Name(b"Comment".to_vec()));
        annot.set("Open", Object::Boolean(false));
        annot.set("C", reals(&Color::YELLOW.components()));
        self.attach(target, annot)?;
        Ok(())
    }

    #[instrument(skip(self))]
    fn commit(&mut self, destination: &Path) -> Result<()> {
        self.document
            .save(destination)
            .with_context(|| format!("failed to write {:?}", destination))?;
        info!(?destination, "annotated document written");
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LopdfSinkProvider;

impl SinkProvider for LopdfSinkProvider {
    fn open(&self, source: &Path) -> Result<Box<dyn DocumentSink>> {
        Ok(Box::new(LopdfSink::load(source)?))
    }
}

fn real(value: f64) -> Object {
    Object::Real(value as f32)
}

fn reals(values: &[f64]) -> Object {
    Object::Array(values.iter().copied().map(real).collect())
}

/// PDF text string: plain bytes for ASCII, otherwise UTF-16BE behind a byte order mark.
fn text_string(text: &str) -> Object {
    if text.is_ascii() {
        return Object::String(text.as_bytes().to_vec(), StringFormat::Literal);
    }
    let mut bytes = vec![0xFE, 0xFF];
    for unit in text.encode_utf16() {
        bytes.extend_from_slice(&unit.to_be_bytes());
    }
    Object::String(bytes, StringFormat::Hexadecimal)
}

/// Glyph codes for the WinAnsi-encoded Helvetica of free-text appearances. Latin-1 maps onto the
/// same codes; anything else shows as `?`.
fn win_ansi_bytes(text: &str) -> Vec<u8> {
    text.chars()
        .map(|ch| match u8::try_from(u32::from(ch)) {
            Ok(code) if code < 0x80 || code >= 0xA0 => code,
            _ => b'?',
        })
        .collect()
}

fn base_annotation(subtype: &str, rect: [f64; 4]) -> Dictionary {
    let mut annot = Dictionary::new();
    annot.set("Type", Object::Name(b"Annot".to_vec()));
    annot.set("Subtype", Object::Name(subtype.as_bytes().to_vec()));
    annot.set("Rect", reals(&rect));
    // Print flag.
    annot.set("F", Object::Integer(4));
    annot
}

fn stroke_state(color: Color, width: f64) -> Vec<Operation> {
    let [r, g, b] = color.components();
    vec![
        Operation::new("w", vec![real(width)]),
        Operation::new("J", vec![Object::Integer(1)]),
        Operation::new("j", vec![Object::Integer(1)]),
        Operation::new("RG", vec![real(r), real(g), real(b)]),
    ]
}

fn ellipse_path([x0, y0, x1, y1]: [f64; 4]) -> Vec<Operation> {
    let (cx, cy) = ((x0 + x1) / 2.0, (y0 + y1) / 2.0);
    let (rx, ry) = ((x1 - x0) / 2.0, (y1 - y0) / 2.0);
    let (kx, ky) = (rx * KAPPA, ry * KAPPA);
    let curve = |values: [f64; 6]| Operation::new("c", values.iter().copied().map(real).collect());
    vec![
        Operation::new("m", vec![real(cx + rx), real(cy)]),
        curve([cx + rx, cy + ky, cx + kx, cy + ry, cx, cy + ry]),
        curve([cx - kx, cy + ry, cx - rx, cy + ky, cx - rx, cy]),
        curve([cx - rx, cy - ky, cx - kx, cy - ry, cx, cy - ry]),
        curve([cx + kx, cy - ry, cx + rx, cy - ky, cx + rx, cy]),
        Operation::new("h", vec![]),
    ]
}

fn inherited<'a>(document: &'a Document, page: ObjectId, key: &[u8]) -> Option<&'a Object> {
    let mut current = Some(page);
    for _ in 0..MAX_INHERITANCE_DEPTH {
        let dict = document.get_dictionary(current?).ok()?;
        if let Ok(value) = dict.get(key) {
            return match value {
                Object::Reference(id) => document.get_object(*id).ok(),
                other => Some(other),
            };
        }
        current = dict.get(b"Parent").and_then(Object::as_reference).ok();
    }
    None
}

fn page_box(document: &Document, page: ObjectId, key: &[u8]) -> Option<[f64; 4]> {
    inherited(document, page, key)
        .and_then(|obj| obj.as_array().ok())
        .and_then(|array| parse_box(array))
}

fn crop_box(document: &Document, page: ObjectId) -> [f64; 4] {
    let media = page_box(document, page, b"MediaBox").unwrap_or(LETTER);
    let Some([x0, y0, x1, y1]) = page_box(document, page, b"CropBox") else {
        return media;
    };
    let clipped = [
        x0.max(media[0]),
        y0.max(media[1]),
        x1.min(media[2]),
        y1.min(media[3]),
    ];
    if clipped[0] < clipped[2] && clipped[1] < clipped[3] {
        clipped
    } else {
        media
    }
}

/// `/Rotate` normalized to 0, 90, 180 or 270. Values that are not a multiple of 90 count as 0.
fn rotation(document: &Document, page: ObjectId) -> u16 {
    let degrees = inherited(document, page, b"Rotate")
        .and_then(|obj| obj.as_i64().ok())
        .unwrap_or(0)
        .rem_euclid(360);
    match degrees {
        90 => 90,
        180 => 180,
        270 => 270,
        _ => 0,
    }
}

fn parse_box(array: &[Object]) -> Option<[f64; 4]> {
    if array.len() != 4 {
        return None;
    }
    let mut values = [0.0; 4];
    for (slot, obj) in values.iter_mut().zip(array) {
        *slot = f64::from(obj.as_float().ok()?);
    }
    let [x0, y0, x1, y1] = values;
    Some([x0.min(x1), y0.min(y1), x0.max(x1), y0.max(y1)])
}
