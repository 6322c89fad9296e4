use crate::models::{MergeOutcome, Renderer, RendererDescription, RetireOutcome, SelectedRenderers};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

/// Shared uuid-keyed table of known renderers
///
/// Every accessor takes the lock for a single short section and never hands
/// out references into the map: reads return copies, writes merge in place.
#[derive(Clone, Default)]
pub struct RendererRegistry {
    renderers: Arc<Mutex<HashMap<String, Renderer>>>,
}

impl RendererRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Renderer>> {
        // A panic while holding the lock can't leave a half-written Renderer behind
        self.renderers.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Point-in-time copy of every renderer, ordered by uuid
    pub fn snapshot(&self) -> Vec<Renderer> {
        let mut renderers: Vec<Renderer> = self.lock().values().cloned().collect();
        renderers.sort_by(|a, b| a.uuid.cmp(&b.uuid));
        renderers
    }

    /// Point-in-time copy of the selected renderers
    pub fn selected(&self) -> Vec<Renderer> {
        let mut renderers: Vec<Renderer> = self
            .lock()
            .values()
            .filter(|r| r.selected)
            .cloned()
            .collect();
        renderers.sort_by(|a, b| a.uuid.cmp(&b.uuid));
        renderers
    }

    pub fn get(&self, uuid: &str) -> Option<Renderer> {
        self.lock().get(uuid).cloned()
    }

    pub fn is_selected(&self, uuid: &str) -> bool {
        self.lock().get(uuid).is_some_and(|r| r.selected)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Insert or update a renderer from a parsed description.
    ///
    /// Name, control URL and icon URL are overwritten; the `selected` flag of an
    /// existing entry is left alone.
    pub fn merge(&self, description: RendererDescription) -> MergeOutcome {
        let mut renderers = self.lock();

        match renderers.get_mut(&description.uuid) {
            Some(existing) => {
                let control_url = Some(description.control_url);
                if existing.name == description.name
                    && existing.control_url == control_url
                    && existing.icon_url == description.icon_url
                {
                    return MergeOutcome::Unchanged;
                }

                existing.name = description.name;
                existing.control_url = control_url;
                existing.icon_url = description.icon_url;
                MergeOutcome::Updated
            }
            None => {
                let renderer = Renderer::from_description(description);
                renderers.insert(renderer.uuid.clone(), renderer);
                MergeOutcome::Inserted
            }
        }
    }

    /// Handle a renderer announcing its departure.
    ///
    /// A selected renderer stays in the table so the selection is not lost,
    /// but it can no longer be controlled until it is discovered again.
    pub fn retire(&self, uuid: &str) -> RetireOutcome {
        let mut renderers = self.lock();

        match renderers.get_mut(uuid) {
            Some(renderer) if renderer.selected => {
                renderer.control_url = None;
                renderer.icon_url = None;
                RetireOutcome::Detached
            }
            Some(_) => {
                renderers.remove(uuid);
                RetireOutcome::Removed
            }
            None => RetireOutcome::Unknown,
        }
    }

    /// Replace the selection with exactly the uuids in `selection`.
    ///
    /// Uuids that haven't been discovered yet get a placeholder entry so the
    /// selection survives until the device answers a search.
    pub fn apply_selection(&self, selection: &SelectedRenderers) {
        let mut renderers = self.lock();

        for renderer in renderers.values_mut() {
            renderer.selected = false;
        }

        for (uuid, name) in selection {
            let renderer = renderers.entry(uuid.clone()).or_insert_with(|| {
                debug!("Creating placeholder for undiscovered renderer {} ({})", name, uuid);
                Renderer::placeholder(uuid.clone(), name.clone())
            });
            renderer.selected = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn description(uuid: &str, name: &str) -> RendererDescription {
        RendererDescription {
            uuid: uuid.to_string(),
            name: name.to_string(),
            control_url: format!("http://192.168.1.20:1400/{}/control", uuid),
            icon_url: None,
        }
    }

    #[test]
    fn test_merge_is_idempotent() {
        let registry = RendererRegistry::new();

        assert_eq!(registry.merge(description("a", "Kitchen")), MergeOutcome::Inserted);
        assert_eq!(registry.merge(description("a", "Kitchen")), MergeOutcome::Unchanged);

        let renderers = registry.snapshot();
        assert_eq!(renderers.len(), 1);
        assert!(!renderers[0].selected);
    }

    #[test]
    fn test_merge_preserves_selection() {
        let registry = RendererRegistry::new();
        registry.merge(description("a", "Kitchen"));

        let selection = SelectedRenderers::from([("a".to_string(), "Kitchen".to_string())]);
        registry.apply_selection(&selection);

        assert_eq!(registry.merge(description("a", "Living Room")), MergeOutcome::Updated);
        assert_eq!(registry.merge(description("a", "Living Room")), MergeOutcome::Unchanged);

        let renderer = registry.get("a").unwrap();
        assert_eq!(renderer.name, "Living Room");
        assert!(renderer.selected);
    }

    #[test]
    fn test_selection_fully_replaces_previous_set() {
        let registry = RendererRegistry::new();
        registry.merge(description("a", "Kitchen"));
        registry.merge(description("b", "Office"));

        registry.apply_selection(&SelectedRenderers::from([
            ("a".to_string(), "Kitchen".to_string()),
            ("b".to_string(), "Office".to_string()),
        ]));
        assert_eq!(registry.selected().len(), 2);

        registry.apply_selection(&SelectedRenderers::from([
            ("b".to_string(), "Office".to_string()),
            ("c".to_string(), "Garage".to_string()),
        ]));

        let selected: Vec<String> = registry.selected().into_iter().map(|r| r.uuid).collect();
        assert_eq!(selected, vec!["b".to_string(), "c".to_string()]);
        assert!(!registry.is_selected("a"));

        // Undiscovered selections become bare placeholders
        let garage = registry.get("c").unwrap();
        assert_eq!(garage.name, "Garage");
        assert!(garage.control_url.is_none());
    }

    #[test]
    fn test_discovery_fills_in_placeholder() {
        let registry = RendererRegistry::new();
        registry.apply_selection(&SelectedRenderers::from([(
            "a".to_string(),
            "Kitchen".to_string(),
        )]));
        assert!(!registry.get("a").unwrap().is_controllable());

        assert_eq!(registry.merge(description("a", "Kitchen")), MergeOutcome::Updated);

        let renderer = registry.get("a").unwrap();
        assert!(renderer.is_controllable());
        assert!(renderer.selected);
    }

    #[test]
    fn test_retire_keeps_selected_renderers() {
        let registry = RendererRegistry::new();
        registry.merge(description("a", "Kitchen"));
        registry.merge(description("b", "Office"));
        registry.apply_selection(&SelectedRenderers::from([(
            "a".to_string(),
            "Kitchen".to_string(),
        )]));

        assert_eq!(registry.retire("a"), RetireOutcome::Detached);
        assert_eq!(registry.retire("b"), RetireOutcome::Removed);
        assert_eq!(registry.retire("zzz"), RetireOutcome::Unknown);

        let kitchen = registry.get("a").unwrap();
        assert!(kitchen.selected);
        assert!(!kitchen.is_controllable());
        assert!(registry.get("b").is_none());

        // Coming back restores control
        assert_eq!(registry.merge(description("a", "Kitchen")), MergeOutcome::Updated);
        assert!(registry.get("a").unwrap().is_controllable());
    }

    #[test]
    fn test_empty_selection_clears_everything() {
        let registry = RendererRegistry::new();
        registry.merge(description("a", "Kitchen"));
        registry.apply_selection(&SelectedRenderers::from([(
            "a".to_string(),
            "Kitchen".to_string(),
        )]));

        registry.apply_selection(&SelectedRenderers::new());
        assert!(registry.selected().is_empty());
        assert_eq!(registry.len(), 1);
    }
}
