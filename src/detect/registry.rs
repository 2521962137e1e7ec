use std::path::Path;

use anyhow::{anyhow, Result};

use super::backend::InferenceBackend;
use super::network::NetworkConfig;

/// Builds a backend from the weights file, the network config file and the
/// parsed network config.
pub type BackendFactory = fn(&Path, &Path, &NetworkConfig) -> Result<Box<dyn InferenceBackend>>;

struct Registration {
    name: &'static str,
    extension: &'static str,
    factory: BackendFactory,
}

/// Registry of inference backends, keyed by weights file extension.
///
/// The first backend registered for an extension wins.
pub struct BackendRegistry {
    registrations: Vec<Registration>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self {
            registrations: Vec::new(),
        }
    }

    /// Registry with every backend compiled into this build.
    pub fn with_defaults() -> Self {
        #[allow(unused_mut)]
        let mut registry = Self::new();
        #[cfg(feature = "backend-opencv")]
        registry.register("opencv", "weights", super::backends::darknet::build_darknet_backend);
        #[cfg(feature = "backend-tract")]
        registry.register("tract", "onnx", super::backends::tract::build_tract_backend);
        registry
    }

    /// Register a backend for weights files ending in `extension`.
    pub fn register(&mut self, name: &'static str, extension: &'static str, factory: BackendFactory) {
        self.registrations.push(Registration {
            name,
            extension,
            factory,
        });
    }

    /// List registered backends as `name (.ext)`.
    pub fn list(&self) -> Vec<String> {
        self.registrations
            .iter()
            .map(|r| format!("{} (.{})", r.name, r.extension))
            .collect()
    }

    /// Whether some registered backend accepts `weights` by its extension.
    /// The file itself does not need to exist.
    pub fn supports(&self, weights: &Path) -> bool {
        self.lookup(weights).is_ok()
    }

    /// Fail unless a registered backend accepts `weights`.
    pub fn ensure_supported(&self, weights: &Path) -> Result<()> {
        self.lookup(weights).map(|_| ())
    }

    /// Build the backend responsible for `weights`.
    pub fn build(
        &self,
        weights: &Path,
        config: &Path,
        network: &NetworkConfig,
    ) -> Result<Box<dyn InferenceBackend>> {
        let registration = self.lookup(weights)?;
        if !weights.exists() {
            return Err(anyhow!("weights file {} not found", weights.display()));
        }

        log::debug!(
            "building {} backend for {}",
            registration.name,
            weights.display()
        );
        (registration.factory)(weights, config, network)
    }

    fn lookup(&self, weights: &Path) -> Result<&Registration> {
        let extension = weights
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_lowercase)
            .unwrap_or_default();

        self.registrations
            .iter()
            .find(|r| r.extension == extension)
            .ok_or_else(|| {
                let available = self.list();
                let available = if available.is_empty() {
                    "none".to_string()
                } else {
                    available.join(", ")
                };
                match feature_hint(&extension) {
                    Some(feature) => anyhow!(
                        "no inference backend for '.{}' weights (available: {}); rebuild with the {} feature",
                        extension,
                        available,
                        feature
                    ),
                    None => anyhow!(
                        "no inference backend for '.{}' weights (available: {})",
                        extension,
                        available
                    ),
                }
            })
    }
}

/// Cargo feature that adds a backend for `extension`, when this build lacks it.
fn feature_hint(extension: &str) -> Option<&'static str> {
    match extension {
        "weights" if !cfg!(feature = "backend-opencv") => Some("backend-opencv"),
        "onnx" if !cfg!(feature = "backend-tract") => Some("backend-tract"),
        _ => None,
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::backends::ScriptedBackend;
    use std::io::Write;

    fn scripted(_: &Path, _: &Path, _: &NetworkConfig) -> Result<Box<dyn InferenceBackend>> {
        Ok(Box::new(ScriptedBackend::new(vec![])))
    }

    fn network() -> NetworkConfig {
        NetworkConfig::parse("[net]\n[yolo]\n").unwrap()
    }

    #[test]
    fn builds_backend_by_extension() -> Result<()> {
        let mut file = tempfile::Builder::new().suffix(".TEST").tempfile()?;
        file.write_all(b"weights")?;

        let mut registry = BackendRegistry::new();
        registry.register("scripted", "test", scripted);
        let backend = registry.build(file.path(), Path::new("model.cfg"), &network())?;
        assert_eq!(backend.name(), "scripted");
        Ok(())
    }

    #[test]
    fn unknown_extension_names_available_backends() -> Result<()> {
        let file = tempfile::Builder::new().suffix(".weights").tempfile()?;
        let mut registry = BackendRegistry::new();
        registry.register("scripted", "test", scripted);

        let err = registry
            .build(file.path(), Path::new("model.cfg"), &network())
            .err()
            .expect("no backend");
        let message = err.to_string();
        assert!(message.contains(".weights"), "{}", message);
        assert!(message.contains("scripted (.test)"), "{}", message);
        assert!(!message.contains("backend-tract"), "{}", message);
        Ok(())
    }

    #[test]
    fn feature_hint_matches_the_extension() {
        let registry = BackendRegistry::new();
        let weights = registry
            .ensure_supported(Path::new("yolov3.weights"))
            .err()
            .expect("empty registry")
            .to_string();
        assert!(!weights.contains("backend-tract"), "{}", weights);
        assert_eq!(
            weights.contains("backend-opencv"),
            !cfg!(feature = "backend-opencv"),
            "{}",
            weights
        );

        let onnx = registry
            .ensure_supported(Path::new("yolov3.onnx"))
            .err()
            .expect("empty registry")
            .to_string();
        assert!(!onnx.contains("backend-opencv"), "{}", onnx);
        assert_eq!(onnx.contains("backend-tract"), !cfg!(feature = "backend-tract"), "{}", onnx);

        let other = registry
            .ensure_supported(Path::new("model.bin"))
            .err()
            .expect("empty registry")
            .to_string();
        assert!(!other.contains("rebuild"), "{}", other);
    }

    #[test]
    fn support_is_decided_by_extension_alone() {
        let mut registry = BackendRegistry::new();
        registry.register("scripted", "weights", scripted);
        assert!(registry.supports(Path::new("/not/downloaded/yet/yolov3.weights")));
        assert!(registry.supports(Path::new("YOLOV3.WEIGHTS")));
        assert!(!registry.supports(Path::new("yolov3.onnx")));
        assert!(!registry.supports(Path::new("yolov3")));
    }

    #[test]
    fn missing_weights_file_fails() {
        let mut registry = BackendRegistry::new();
        registry.register("scripted", "onnx", scripted);
        assert!(registry
            .build(Path::new("/nonexistent/model.onnx"), Path::new("model.cfg"), &network())
            .is_err());
    }
}
