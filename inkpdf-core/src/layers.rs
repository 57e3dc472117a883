use crate::error::AnnotationError;
use crate::model::AnnotationHandle;

pub const DEFAULT_LAYER: &str = "Default";

#[derive(Debug, Clone, PartialEq)]
pub struct Layer {
    name: String,
    entries: Vec<AnnotationHandle>,
}

impl Layer {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn entries(&self) -> &[AnnotationHandle] {
        &self.entries
    }
}

#[derive(Debug, Clone)]
pub struct LayerRegistry {
    layers: Vec<Layer>,
    active: usize,
}

impl Default for LayerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl LayerRegistry {
    pub fn new() -> Self {
        Self {
            layers: vec![Layer::new(DEFAULT_LAYER)],
            active: 0,
        }
    }

    pub fn create(&mut self, name: &str) -> Result<(), AnnotationError> {
        if name.is_empty() {
            return Err(AnnotationError::EmptyLayerName);
        }
        if self.contains(name) {
            return Err(AnnotationError::DuplicateLayer(name.to_owned()));
        }
        self.layers.push(Layer::new(name));
        Ok(())
    }

    pub fn ensure(&mut self, name: &str) -> Result<(), AnnotationError> {
        match self.create(name) {
            Err(AnnotationError::DuplicateLayer(_)) => Ok(()),
            other => other,
        }
    }

    pub fn set_active(&mut self, name: &str) -> Result<(), AnnotationError> {
        let index = self
            .position(name)
            .ok_or_else(|| AnnotationError::UnknownLayer(name.to_owned()))?;
        self.active = index;
        Ok(())
    }

    pub fn active(&self) -> &str {
        &self.layers[self.active].name
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    pub fn get(&self, name: &str) -> Option<&Layer> {
        self.layers.iter().find(|layer| layer.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Layer> {
        self.layers.iter()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.layers.iter().map(|layer| layer.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub(crate) fn append(&mut self, name: &str, handle: AnnotationHandle) -> Result<(), AnnotationError> {
        let layer = self.layer_mut(name)?;
        layer.entries.push(handle);
        Ok(())
    }

    pub(crate) fn insert(
        &mut self,
        name: &str,
        position: usize,
        handle: AnnotationHandle,
    ) -> Result<(), AnnotationError> {
        let layer = self.layer_mut(name)?;
        let position = position.min(layer.entries.len());
        layer.entries.insert(position, handle);
        Ok(())
    }

    pub(crate) fn detach(&mut self, name: &str, handle: AnnotationHandle) -> Option<usize> {
        let layer = self.layer_mut(name).ok()?;
        let position = layer.entries.iter().position(|entry| *entry == handle)?;
        layer.entries.remove(position);
        Some(position)
    }

    pub(crate) fn reset(&mut self) {
        *self = Self::new();
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.layers.iter().position(|layer| layer.name == name)
    }

    fn layer_mut(&mut self, name: &str) -> Result<&mut Layer, AnnotationError> {
        self.layers
            .iter_mut()
            .find(|layer| layer.name == name)
            .ok_or_else(|| AnnotationError::InvalidLayer(name.to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_layer_exists_and_is_active() {
        let registry = LayerRegistry::new();
        assert_eq!(registry.active(), DEFAULT_LAYER);
        assert_eq!(registry.names().collect::<Vec<_>>(), vec![DEFAULT_LAYER]);
    }

    #[test]
    fn create_rejects_duplicates_and_empty_names() {
        let mut registry = LayerRegistry::new();
        assert!(matches!(
            registry.create("Default"),
            Err(AnnotationError::DuplicateLayer(name)) if name == "Default"
        ));
        assert!(matches!(
            registry.create(""),
            Err(AnnotationError::EmptyLayerName)
        ));
        registry.create("Notes").unwrap();
        assert!(matches!(
            registry.create("Notes"),
            Err(AnnotationError::DuplicateLayer(_))
        ));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn unknown_active_layer_leaves_selection_untouched() {
        let mut registry = LayerRegistry::new();
        registry.create("Ink").unwrap();
        registry.set_active("Ink").unwrap();
        assert!(matches!(
            registry.set_active("Nope"),
            Err(AnnotationError::UnknownLayer(_))
        ));
        assert_eq!(registry.active(), "Ink");
    }

    #[test]
    fn ensure_is_idempotent() {
        let mut registry = LayerRegistry::new();
        registry.ensure("Review").unwrap();
        registry.ensure("Review").unwrap();
        assert_eq!(
            registry.names().collect::<Vec<_>>(),
            vec![DEFAULT_LAYER, "Review"]
        );
    }

    #[test]
    fn reset_keeps_only_an_empty_default() {
        let mut registry = LayerRegistry::new();
        registry.create("Ink").unwrap();
        registry.set_active("Ink").unwrap();
        registry.append(DEFAULT_LAYER, AnnotationHandle::new(0)).unwrap();
        registry.reset();
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.active(), DEFAULT_LAYER);
        assert!(registry.get(DEFAULT_LAYER).unwrap().entries().is_empty());
    }
}
