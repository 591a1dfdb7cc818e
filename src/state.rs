//! Shared application state.

use std::sync::Arc;

use axum::body::Bytes;
use tokio::sync::Mutex;
use tokio::task;
use tracing::{error, info};

use crate::config::ServiceConfig;
use crate::error::{Error, Result};
use crate::model::{resolve_labels, try_load, Classification, Classifier};
use crate::preprocess;
use crate::relay::BackendClient;

pub struct AppState {
    pub config: ServiceConfig,
    pub backend: BackendClient,
    classifier: Arc<Mutex<Classifier>>,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    pub fn new(config: ServiceConfig, classifier: Classifier) -> Self {
        let backend = BackendClient::new(
            config.backend_url.clone(),
            config.backend_api_key.clone(),
            config.send_to_backend,
        );
        AppState {
            config,
            backend,
            classifier: Arc::new(Mutex::new(classifier)),
        }
    }

    /// Loads the model named by `config`, falling back to demo mode.
    pub fn from_config(config: ServiceConfig) -> Self {
        let labels = resolve_labels(&config.class_list_path);
        let classifier = Classifier::load(config.model_path.clone(), labels);
        Self::new(config, classifier)
    }

    pub async fn model_loaded(&self) -> bool {
        self.classifier.lock().await.is_loaded()
    }

    /// Decodes `image_data` and classifies it on the blocking pool.
    pub async fn classify(&self, image_data: Bytes) -> Result<Classification> {
        let classifier = Arc::clone(&self.classifier);
        task::spawn_blocking(move || {
            let image = preprocess::normalize(&image_data)?;
            let classifier = classifier.blocking_lock();
            classifier.classify(&image)
        })
        .await
        .map_err(|err| Error::Model(format!("classification task failed: {}", err)))?
    }

    /// Re-reads the model from disk. The new model is built before the lock is
    /// taken, so in-flight requests finish on the old one.
    pub async fn reload_model(&self) -> bool {
        let model_path = self.config.model_path.clone();
        let class_list_path = self.config.class_list_path.clone();
        let loaded = task::spawn_blocking(move || {
            (try_load(&model_path), resolve_labels(&class_list_path))
        })
        .await;

        match loaded {
            Ok((model, labels)) => {
                let loaded = self.classifier.lock().await.replace(model, labels);
                info!("Model reload finished, loaded: {}", loaded);
                loaded
            }
            Err(err) => {
                error!("Model reload task failed: {}", err);
                self.model_loaded().await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use image::{DynamicImage, Rgb, RgbImage};

    use super::*;
    use crate::annotate::ModelSource;
    use crate::preprocess::tests::encode_png;

    fn demo_state() -> AppState {
        let vars: HashMap<&str, &str> = [
            ("MODEL_PATH", "/nonexistent/tomato_disease_model"),
            ("SEND_TO_BACKEND", "false"),
        ]
        .into_iter()
        .collect();
        let config =
            ServiceConfig::from_lookup(|key| vars.get(key).map(|v| v.to_string())).unwrap();
        AppState::from_config(config)
    }

    #[tokio::test]
    async fn concurrent_requests_share_the_classifier() {
        let state = Arc::new(demo_state());
        let png = Bytes::from(encode_png(&DynamicImage::ImageRgb8(RgbImage::from_pixel(
            64,
            48,
            Rgb([30, 140, 50]),
        ))));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let state = Arc::clone(&state);
                let png = png.clone();
                tokio::spawn(async move { state.classify(png).await })
            })
            .collect();

        for handle in handles {
            let classification = handle.await.unwrap().unwrap();
            assert_eq!(classification.source, ModelSource::Placeholder);
        }
    }

    #[tokio::test]
    async fn decode_errors_come_back_from_the_blocking_pool() {
        let state = demo_state();
        let err = state
            .classify(Bytes::from_static(b"not an image"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Decode(_)));
    }

    #[tokio::test]
    async fn reload_keeps_demo_mode_without_a_model() {
        let state = demo_state();
        assert!(!state.reload_model().await);
        assert!(!state.model_loaded().await);
    }
}
