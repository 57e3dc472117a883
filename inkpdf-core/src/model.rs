use tracing::{debug, warn};

use crate::annotation::{Annotation, GeometryEdit};
use crate::error::AnnotationError;
use crate::geometry::{Point, RenderScale};
use crate::history::{History, HistoryAction, HistoryEntry};
use crate::layers::LayerRegistry;

/// Stable index into the model's annotation arena. Handles stay valid after removal so the
/// history can put the same annotation back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AnnotationHandle(usize);

impl AnnotationHandle {
    pub(crate) const fn new(index: usize) -> Self {
        Self(index)
    }

    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone)]
struct Record {
    annotation: Annotation,
    page: usize,
    layer: String,
    attached: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct PlacedAnnotation<'a> {
    pub handle: AnnotationHandle,
    pub annotation: &'a Annotation,
    pub page: usize,
    pub layer: &'a str,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotEntry {
    pub layer: String,
    pub page: usize,
    pub annotation: Annotation,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ModelSnapshot {
    pub page_count: usize,
    pub entries: Vec<SnapshotEntry>,
}

impl ModelSnapshot {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct AnnotationModel {
    page_count: usize,
    arena: Vec<Record>,
    layers: LayerRegistry,
    history: History,
}

impl AnnotationModel {
    pub fn new(page_count: usize) -> Self {
        Self {
            page_count,
            arena: Vec::new(),
            layers: LayerRegistry::new(),
            history: History::new(),
        }
    }

    pub fn page_count(&self) -> usize {
        self.page_count
    }

    pub fn layers(&self) -> &LayerRegistry {
        &self.layers
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn active_layer(&self) -> &str {
        self.layers.active()
    }

    pub fn add_annotation(
        &mut self,
        annotation: Annotation,
        page: usize,
        layer: &str,
    ) -> Result<AnnotationHandle, AnnotationError> {
        self.check_page(page)?;
        if !self.layers.contains(layer) {
            return Err(AnnotationError::InvalidLayer(layer.to_owned()));
        }

        let handle = AnnotationHandle::new(self.arena.len());
        let kind = annotation.kind();
        self.arena.push(Record {
            annotation,
            page,
            layer: layer.to_owned(),
            attached: true,
        });
        self.layers.append(layer, handle)?;
        let position = self
            .layers
            .get(layer)
            .map_or(0, |l| l.entries().len().saturating_sub(1));
        self.history.record(HistoryEntry {
            action: HistoryAction::Add,
            handle,
            page,
            layer: layer.to_owned(),
            position,
        });
        debug!(handle = handle.0, %kind, page, layer, "annotation added");
        Ok(handle)
    }

    pub fn add_to_active_layer(
        &mut self,
        annotation: Annotation,
        page: usize,
    ) -> Result<AnnotationHandle, AnnotationError> {
        let layer = self.layers.active().to_owned();
        self.add_annotation(annotation, page, &layer)
    }

    /// Mutates an attached annotation in place while it is being drawn. This is not a history
    /// action; the gesture is represented by the `Add` recorded when it began. Returns `false`
    /// for a detached handle.
    pub fn update_geometry(
        &mut self,
        handle: AnnotationHandle,
        edit: GeometryEdit,
    ) -> Result<bool, AnnotationError> {
        match self.arena.get_mut(handle.0) {
            Some(record) if record.attached => {
                record.annotation.apply_edit(edit)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    pub fn remove_annotation(&mut self, handle: AnnotationHandle) -> bool {
        let Some(record) = self.arena.get_mut(handle.0) else {
            return false;
        };
        if !record.attached {
            return false;
        }
        let Some(position) = self.layers.detach(&record.layer, handle) else {
            warn!(handle = handle.0, layer = %record.layer, "attached annotation missing from its layer");
            return false;
        };
        record.attached = false;
        let entry = HistoryEntry {
            action: HistoryAction::Remove,
            handle,
            page: record.page,
            layer: record.layer.clone(),
            position,
        };
        debug!(handle = handle.0, page = entry.page, layer = %entry.layer, "annotation removed");
        self.history.record(entry);
        true
    }

    /// Removes every annotation on `page` touched by the square of half-size `radius` around
    /// `point`, topmost (most recently created) first. Each removal is its own history entry.
    pub fn erase_at(
        &mut self,
        point: Point,
        radius: f64,
        page: usize,
    ) -> Result<Vec<AnnotationHandle>, AnnotationError> {
        self.check_page(page)?;
        let hits: Vec<AnnotationHandle> = self
            .arena
            .iter()
            .enumerate()
            .rev()
            .filter(|(_, record)| {
                record.attached && record.page == page && record.annotation.hit_test(point, radius)
            })
            .map(|(index, _)| AnnotationHandle::new(index))
            .collect();
        for handle in &hits {
            self.remove_annotation(*handle);
        }
        Ok(hits)
    }

    pub fn create_layer(&mut self, name: &str) -> Result<(), AnnotationError> {
        self.layers.create(name)
    }

    pub fn set_active_layer(&mut self, name: &str) -> Result<(), AnnotationError> {
        self.layers.set_active(name)
    }

    pub fn clear_all(&mut self) {
        self.arena.clear();
        self.layers.reset();
        self.history.clear();
    }

    pub fn undo(&mut self) -> bool {
        let Some(entry) = self.history.pop_undo() else {
            return false;
        };
        match entry.action {
            HistoryAction::Add => self.detach(entry.handle),
            HistoryAction::Remove => self.reattach(&entry),
        }
        self.history.push_redo(entry);
        true
    }

    pub fn redo(&mut self) -> bool {
        let Some(entry) = self.history.pop_redo() else {
            return false;
        };
        match entry.action {
            HistoryAction::Add => self.reattach(&entry),
            HistoryAction::Remove => self.detach(entry.handle),
        }
        self.history.push_undo(entry);
        true
    }

    pub fn get(&self, handle: AnnotationHandle) -> Option<&Annotation> {
        self.arena
            .get(handle.0)
            .filter(|record| record.attached)
            .map(|record| &record.annotation)
    }

    pub fn is_attached(&self, handle: AnnotationHandle) -> bool {
        self.get(handle).is_some()
    }

    pub fn len(&self) -> usize {
        self.layers.iter().map(|layer| layer.entries().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = PlacedAnnotation<'_>> {
        self.layers.iter().flat_map(move |layer| {
            layer.entries().iter().map(move |handle| {
                let record = &self.arena[handle.0];
                PlacedAnnotation {
                    handle: *handle,
                    annotation: &record.annotation,
                    page: record.page,
                    layer: layer.name(),
                }
            })
        })
    }

    pub fn on_page(&self, page: usize) -> impl Iterator<Item = PlacedAnnotation<'_>> {
        self.iter().filter(move |placed| placed.page == page)
    }

    pub fn display_list(
        &self,
        page: usize,
        scale: RenderScale,
    ) -> Vec<(AnnotationHandle, Annotation)> {
        self.on_page(page)
            .map(|placed| (placed.handle, placed.annotation.to_render_space(scale)))
            .collect()
    }

    pub fn snapshot(&self) -> ModelSnapshot {
        ModelSnapshot {
            page_count: self.page_count,
            entries: self
                .iter()
                .map(|placed| SnapshotEntry {
                    layer: placed.layer.to_owned(),
                    page: placed.page,
                    annotation: placed.annotation.clone(),
                })
                .collect(),
        }
    }

    /// Appends previously persisted annotations without touching history, creating layers on
    /// the fly. Every entry is validated first so a bad entry leaves the model unchanged.
    pub fn load_entries(&mut self, entries: Vec<SnapshotEntry>) -> Result<usize, AnnotationError> {
        for entry in &entries {
            self.check_page(entry.page)?;
            if entry.layer.is_empty() {
                return Err(AnnotationError::EmptyLayerName);
            }
        }

        let count = entries.len();
        for entry in entries {
            self.layers.ensure(&entry.layer)?;
            let handle = AnnotationHandle::new(self.arena.len());
            self.layers.append(&entry.layer, handle)?;
            self.arena.push(Record {
                annotation: entry.annotation,
                page: entry.page,
                layer: entry.layer,
                attached: true,
            });
        }
        self.history.clear();
        Ok(count)
    }

    fn check_page(&self, page: usize) -> Result<(), AnnotationError> {
        if page >= self.page_count {
            return Err(AnnotationError::InvalidPage {
                page,
                page_count: self.page_count,
            });
        }
        Ok(())
    }

    fn detach(&mut self, handle: AnnotationHandle) {
        if let Some(record) = self.arena.get_mut(handle.0) {
            if record.attached {
                self.layers.detach(&record.layer, handle);
                record.attached = false;
            }
        }
    }

    fn reattach(&mut self, entry: &HistoryEntry) {
        let Some(record) = self.arena.get_mut(entry.handle.0) else {
            return;
        };
        if record.attached {
            return;
        }
        if let Err(err) = self.layers.insert(&entry.layer, entry.position, entry.handle) {
            warn!(?err, handle = entry.handle.0, "cannot restore annotation");
            return;
        }
        record.attached = true;
        record.page = entry.page;
        record.layer = entry.layer.clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotation::{BoxShape, Color, CommentMarker, FreehandPath, LineShape, StrokeStyle};
    use crate::geometry::Rect;
    use crate::layers::DEFAULT_LAYER;

    fn style() -> StrokeStyle {
        StrokeStyle {
            color: Color::rgb(0.2, 0.4, 0.6),
            width: 2.0,
        }
    }

    fn rect(x: f64, y: f64, w: f64, h: f64) -> Annotation {
        Annotation::Rect(BoxShape {
            rect: Rect::new(x, y, w, h),
            style: style(),
        })
    }

    fn line(x: f64) -> Annotation {
        Annotation::Line(LineShape {
            start: Point::new(x, 0.0),
            end: Point::new(x, 50.0),
            style: style(),
        })
    }

    fn state(model: &AnnotationModel) -> Vec<(String, usize, Annotation)> {
        model
            .iter()
            .map(|p| (p.layer.to_owned(), p.page, p.annotation.clone()))
            .collect()
    }

    #[test]
    fn add_validates_page_and_layer_without_recording_history() {
        let mut model = AnnotationModel::new(3);
        assert!(matches!(
            model.add_annotation(line(0.0), 3, DEFAULT_LAYER),
            Err(AnnotationError::InvalidPage { page: 3, page_count: 3 })
        ));
        assert!(matches!(
            model.add_annotation(line(0.0), 0, "Missing"),
            Err(AnnotationError::InvalidLayer(_))
        ));
        assert_eq!(model.history().undo_len(), 0);
        assert!(model.is_empty());
    }

    #[test]
    fn add_undo_redo_undo_ends_empty_with_one_redo() {
        let mut model = AnnotationModel::new(1);
        model.add_annotation(line(1.0), 0, DEFAULT_LAYER).unwrap();
        assert!(model.undo());
        assert!(model.redo());
        assert_eq!(model.len(), 1);
        assert!(model.undo());
        assert!(model.is_empty());
        assert_eq!(model.history().undo_len(), 0);
        assert_eq!(model.history().redo_len(), 1);
    }

    #[test]
    fn fresh_edit_discards_redo_branch() {
        let mut model = AnnotationModel::new(1);
        model.add_annotation(line(1.0), 0, DEFAULT_LAYER).unwrap();
        model.undo();
        model.add_annotation(line(2.0), 0, DEFAULT_LAYER).unwrap();
        assert!(!model.redo());
        assert_eq!(model.len(), 1);
    }

    #[test]
    fn undoing_every_action_restores_the_prior_state_exactly() {
        let mut model = AnnotationModel::new(2);
        model.create_layer("Review").unwrap();
        let a = model.add_annotation(line(1.0), 0, DEFAULT_LAYER).unwrap();
        model.add_annotation(rect(0.0, 0.0, 5.0, 5.0), 1, "Review").unwrap();
        model.add_annotation(line(3.0), 0, DEFAULT_LAYER).unwrap();
        let before = state(&model);
        let active_before = model.active_layer().to_owned();
        let depth = model.history().undo_len();

        model.remove_annotation(a);
        let c = model.add_annotation(line(9.0), 1, "Review").unwrap();
        model.erase_at(Point::new(3.0, 25.0), 1.0, 0).unwrap();
        model.remove_annotation(c);
        let actions = model.history().undo_len() - depth;
        assert_eq!(actions, 4);

        for _ in 0..actions {
            assert!(model.undo());
        }
        assert_eq!(state(&model), before);
        assert_eq!(model.active_layer(), active_before);

        for _ in 0..actions {
            assert!(model.redo());
        }
        assert!(model.iter().all(|p| p.page == 1));
        assert_eq!(model.len(), 1);
    }

    #[test]
    fn erase_records_one_entry_per_hit_and_undo_restores_in_reverse() {
        let mut model = AnnotationModel::new(2);
        let first = model.add_annotation(rect(0.0, 0.0, 20.0, 20.0), 1, DEFAULT_LAYER).unwrap();
        let second = model.add_annotation(rect(10.0, 10.0, 20.0, 20.0), 1, DEFAULT_LAYER).unwrap();
        let elsewhere = model.add_annotation(rect(10.0, 10.0, 20.0, 20.0), 0, DEFAULT_LAYER).unwrap();

        let erased = model.erase_at(Point::new(15.0, 15.0), 2.0, 1).unwrap();
        assert_eq!(erased, vec![second, first]);
        assert_eq!(model.history().undo_len(), 5);
        assert!(model
            .history()
            .undo_entries()
            .take(2)
            .all(|e| e.action == HistoryAction::Remove));
        assert!(model.is_attached(elsewhere));

        model.undo();
        assert!(model.is_attached(first));
        assert!(!model.is_attached(second));
        model.undo();
        assert!(model.is_attached(second));
        let order: Vec<_> = model.on_page(1).map(|p| p.handle).collect();
        assert_eq!(order, vec![first, second]);
    }

    #[test]
    fn removing_twice_is_a_silent_no_op() {
        let mut model = AnnotationModel::new(1);
        let handle = model.add_annotation(line(1.0), 0, DEFAULT_LAYER).unwrap();
        assert!(model.remove_annotation(handle));
        assert!(!model.remove_annotation(handle));
        assert_eq!(model.history().undo_len(), 2);
    }

    #[test]
    fn geometry_updates_are_not_history_actions() {
        let mut model = AnnotationModel::new(1);
        let handle = model
            .add_annotation(
                Annotation::Freehand(FreehandPath::starting_at(Point::new(0.0, 0.0), style())),
                0,
                DEFAULT_LAYER,
            )
            .unwrap();
        for i in 1..4 {
            let applied = model
                .update_geometry(handle, GeometryEdit::ExtendStroke(Point::new(i as f64, 0.0)))
                .unwrap();
            assert!(applied);
        }
        assert_eq!(model.history().undo_len(), 1);
        let Some(Annotation::Freehand(path)) = model.get(handle) else {
            panic!("expected a freehand path");
        };
        assert_eq!(path.point_count(), 4);

        model.remove_annotation(handle);
        let applied = model
            .update_geometry(handle, GeometryEdit::ExtendStroke(Point::new(9.0, 9.0)))
            .unwrap();
        assert!(!applied);
    }

    #[test]
    fn clear_all_resets_layers_and_history() {
        let mut model = AnnotationModel::new(1);
        model.create_layer("Ink").unwrap();
        model.set_active_layer("Ink").unwrap();
        model.add_to_active_layer(line(1.0), 0).unwrap();
        model.clear_all();
        assert!(model.is_empty());
        assert_eq!(model.layers().len(), 1);
        assert_eq!(model.active_layer(), DEFAULT_LAYER);
        assert!(!model.history().can_undo());
        assert!(!model.undo());
    }

    #[test]
    fn load_entries_is_all_or_nothing_and_skips_history() {
        let mut model = AnnotationModel::new(2);
        let good = SnapshotEntry {
            layer: "Imported".into(),
            page: 1,
            annotation: Annotation::Comment(CommentMarker {
                anchor: Point::new(5.0, 5.0),
                body: "hi".into(),
            }),
        };
        let bad = SnapshotEntry {
            page: 7,
            ..good.clone()
        };
        assert!(model.load_entries(vec![good.clone(), bad]).is_err());
        assert!(model.is_empty());
        assert!(!model.layers().contains("Imported"));

        assert_eq!(model.load_entries(vec![good]).unwrap(), 1);
        assert_eq!(model.len(), 1);
        assert!(model.layers().contains("Imported"));
        assert!(!model.history().can_undo());
    }

    #[test]
    fn snapshot_is_detached_from_later_edits() {
        let mut model = AnnotationModel::new(1);
        model.add_annotation(line(1.0), 0, DEFAULT_LAYER).unwrap();
        let snapshot = model.snapshot();
        model.add_annotation(line(2.0), 0, DEFAULT_LAYER).unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(model.snapshot().len(), 2);
    }

    #[test]
    fn display_list_is_in_render_space() {
        let mut model = AnnotationModel::new(1);
        model.add_annotation(rect(1.0, 2.0, 3.0, 4.0), 0, DEFAULT_LAYER).unwrap();
        let list = model.display_list(0, RenderScale::new(2.0).unwrap());
        let Annotation::Rect(shape) = &list[0].1 else {
            panic!("expected a rect");
        };
        assert_eq!(shape.rect, Rect::new(2.0, 4.0, 6.0, 8.0));
    }
}
