use std::collections::HashMap;
use std::sync::Arc;

use crate::config::{ProviderKind, ProviderSettings};
use crate::detect::backends::{ReplayProvider, ScriptedSceneProvider};
use crate::error::{ProctorError, ProctorResult};

use super::provider::{LandmarkProvider, ObjectSignalProvider};

/// Process-wide registry of detector providers.
///
/// Built once at startup, then shared read-only (`Arc<ProviderRegistry>`)
/// by every session. Providers are warmed up at registration; one that fails
/// to warm up is never registered, which leaves the registry not ready.
pub struct ProviderRegistry {
    landmarks: HashMap<String, Arc<dyn LandmarkProvider>>,
    objects: HashMap<String, Arc<dyn ObjectSignalProvider>>,
    default_landmarks: Option<String>,
    default_objects: Option<String>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self {
            landmarks: HashMap::new(),
            objects: HashMap::new(),
            default_landmarks: None,
            default_objects: None,
        }
    }

    /// Build the registry described by the configuration.
    pub fn from_settings(settings: &ProviderSettings) -> ProctorResult<Self> {
        let mut registry = Self::new();
        match &settings.kind {
            ProviderKind::Scripted { seed } => {
                let provider = Arc::new(ScriptedSceneProvider::new(*seed));
                registry.register_landmarks_arc(provider.clone())?;
                registry.register_objects_arc(provider)?;
            }
            ProviderKind::Replay { path } => {
                let provider = ReplayProvider::open(path).map_err(|e| {
                    ProctorError::ProviderUnavailable(format!(
                        "replay log {}: {:#}",
                        path.display(),
                        e
                    ))
                })?;
                let provider = Arc::new(provider);
                registry.register_landmarks_arc(provider.clone())?;
                registry.register_objects_arc(provider)?;
            }
        }
        registry.ensure_ready()?;
        Ok(registry)
    }

    /// Register a landmark provider. The first one registered becomes the default.
    pub fn register_landmarks<P: LandmarkProvider + 'static>(
        &mut self,
        provider: P,
    ) -> ProctorResult<()> {
        self.register_landmarks_arc(Arc::new(provider))
    }

    pub fn register_landmarks_arc(&mut self, provider: Arc<dyn LandmarkProvider>) -> ProctorResult<()> {
        let name = provider.name().to_string();
        provider.warm_up().map_err(|e| {
            ProctorError::ProviderUnavailable(format!("landmark provider '{}': {:#}", name, e))
        })?;
        if self.default_landmarks.is_none() {
            self.default_landmarks = Some(name.clone());
        }
        log::info!("landmark provider '{}' ready", name);
        self.landmarks.insert(name, provider);
        Ok(())
    }

    /// Register an object provider. The first one registered becomes the default.
    pub fn register_objects<P: ObjectSignalProvider + 'static>(
        &mut self,
        provider: P,
    ) -> ProctorResult<()> {
        self.register_objects_arc(Arc::new(provider))
    }

    pub fn register_objects_arc(&mut self, provider: Arc<dyn ObjectSignalProvider>) -> ProctorResult<()> {
        let name = provider.name().to_string();
        provider.warm_up().map_err(|e| {
            ProctorError::ProviderUnavailable(format!("object provider '{}': {:#}", name, e))
        })?;
        if self.default_objects.is_none() {
            self.default_objects = Some(name.clone());
        }
        log::info!("object provider '{}' ready", name);
        self.objects.insert(name, provider);
        Ok(())
    }

    /// Set default landmark provider by name.
    pub fn set_default_landmarks(&mut self, name: &str) -> ProctorResult<()> {
        if !self.landmarks.contains_key(name) {
            return Err(ProctorError::ProviderUnavailable(format!(
                "landmark provider '{}' not registered",
                name
            )));
        }
        self.default_landmarks = Some(name.to_string());
        Ok(())
    }

    /// Set default object provider by name.
    pub fn set_default_objects(&mut self, name: &str) -> ProctorResult<()> {
        if !self.objects.contains_key(name) {
            return Err(ProctorError::ProviderUnavailable(format!(
                "object provider '{}' not registered",
                name
            )));
        }
        self.default_objects = Some(name.to_string());
        Ok(())
    }

    pub fn landmarks(&self) -> ProctorResult<Arc<dyn LandmarkProvider>> {
        self.default_landmarks
            .as_ref()
            .and_then(|name| self.landmarks.get(name))
            .cloned()
            .ok_or_else(|| ProctorError::ProviderUnavailable("no landmark provider registered".into()))
    }

    pub fn objects(&self) -> ProctorResult<Arc<dyn ObjectSignalProvider>> {
        self.default_objects
            .as_ref()
            .and_then(|name| self.objects.get(name))
            .cloned()
            .ok_or_else(|| ProctorError::ProviderUnavailable("no object provider registered".into()))
    }

    /// Both signal sources are available.
    pub fn is_ready(&self) -> bool {
        self.ensure_ready().is_ok()
    }

    pub fn ensure_ready(&self) -> ProctorResult<()> {
        self.landmarks()?;
        self.objects()?;
        Ok(())
    }

    /// List registered providers as `(landmark names, object names)`.
    pub fn list(&self) -> (Vec<String>, Vec<String>) {
        let mut landmarks: Vec<String> = self.landmarks.keys().cloned().collect();
        let mut objects: Vec<String> = self.objects.keys().cloned().collect();
        landmarks.sort();
        objects.sort();
        (landmarks, objects)
    }

    /// Drop every provider handle held by the registry.
    ///
    /// Sessions still holding an `Arc` keep their provider alive until they close.
    pub fn shutdown(&mut self) {
        let (landmarks, objects) = self.list();
        self.landmarks.clear();
        self.objects.clear();
        self.default_landmarks = None;
        self.default_objects = None;
        log::info!(
            "provider registry shut down (landmarks={:?}, objects={:?})",
            landmarks,
            objects
        );
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::backends::StaticProvider;
    use crate::detect::result::DetectionBox;
    use crate::frame::RgbView;
    use crate::landmarks::LandmarkSet;

    struct BrokenModel;

    impl LandmarkProvider for BrokenModel {
        fn name(&self) -> &'static str {
            "broken"
        }

        fn detect(&self, _frame: &RgbView<'_>) -> anyhow::Result<Vec<LandmarkSet>> {
            Ok(Vec::new())
        }

        fn warm_up(&self) -> anyhow::Result<()> {
            Err(anyhow::anyhow!("weights file missing"))
        }
    }

    #[test]
    fn empty_registry_is_not_ready() {
        let registry = ProviderRegistry::new();
        assert!(!registry.is_ready());
        assert!(matches!(
            registry.landmarks(),
            Err(ProctorError::ProviderUnavailable(_))
        ));
    }

    #[test]
    fn failed_warm_up_is_provider_unavailable() {
        let mut registry = ProviderRegistry::new();
        let err = registry.register_landmarks(BrokenModel).unwrap_err();
        assert!(matches!(err, ProctorError::ProviderUnavailable(_)));
        assert!(registry.list().0.is_empty());
    }

    #[test]
    fn registry_is_ready_with_both_sources() {
        let mut registry = ProviderRegistry::new();
        let provider = StaticProvider::new(
            vec![],
            vec![DetectionBox::new("book", 0.9, [0.0, 0.0, 1.0, 1.0])],
        );
        registry.register_landmarks(provider.clone()).unwrap();
        assert!(!registry.is_ready());
        registry.register_objects(provider).unwrap();
        assert!(registry.is_ready());
        assert!(registry.set_default_objects("missing").is_err());
        registry.shutdown();
        assert!(!registry.is_ready());
    }
}
