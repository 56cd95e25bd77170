//! Concrete extraction backends and their construction from settings.

pub mod instaloader;
pub mod opengraph;
pub mod ytdlp;

use std::sync::Arc;
use thiserror::Error;

use super::backend::ExtractionBackend;
use crate::config::Settings;

pub use instaloader::InstaloaderBackend;
pub use opengraph::OpenGraphBackend;
pub use ytdlp::YtdlpBackend;

/// Errors while building the backend list
#[derive(Error, Debug)]
pub enum BackendConfigError {
    /// Name in `backend_order` is not a known backend
    #[error("Unknown backend: {0}")]
    UnknownBackend(String),
    /// `backend_order` resolved to nothing
    #[error("No backends configured")]
    Empty,
    /// HTTP client construction failed
    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),
}

/// Builds backends in the configured priority order
///
/// # Errors
///
/// Returns an error for unknown or missing backend names.
pub fn build(settings: &Settings) -> Result<Vec<Arc<dyn ExtractionBackend>>, BackendConfigError> {
    let mut backends: Vec<Arc<dyn ExtractionBackend>> = Vec::new();

    for name in settings.backend_names() {
        let backend: Arc<dyn ExtractionBackend> = match name.as_str() {
            "ytdlp" | "yt-dlp" => Arc::new(YtdlpBackend::new(
                settings.ytdlp_binary.clone(),
                settings.ytdlp_cookies_path.clone(),
            )),
            "opengraph" | "og" => Arc::new(OpenGraphBackend::new()?),
            "instaloader" => Arc::new(InstaloaderBackend::new(
                settings.instaloader_binary.clone(),
                settings.instagram_username.clone(),
                settings.instaloader_session_path.clone(),
            )),
            other => return Err(BackendConfigError::UnknownBackend(other.to_string())),
        };
        backends.push(backend);
    }

    if backends.is_empty() {
        return Err(BackendConfigError::Empty);
    }
    Ok(backends)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(order: &str) -> Settings {
        Settings {
            telegram_token: "dummy".to_string(),
            admin_ids_str: None,
            backend_order: order.to_string(),
            ytdlp_binary: "yt-dlp".to_string(),
            ytdlp_cookies_path: None,
            instaloader_binary: "instaloader".to_string(),
            instagram_username: None,
            instaloader_session_path: None,
            instagram_password: None,
            python_binary: "python3".to_string(),
            cache_path: None,
            workspace_root: None,
            worker_pool_size: 2,
            request_timeout_secs: 300,
        }
    }

    #[test]
    fn test_build_keeps_configured_order() {
        let backends = build(&settings("instaloader, yt-dlp, og")).unwrap();
        let names: Vec<_> = backends.iter().map(|b| b.name()).collect();
        assert_eq!(names, vec!["instaloader", "ytdlp", "opengraph"]);
    }

    #[test]
    fn test_build_rejects_unknown_and_empty() {
        assert!(matches!(
            build(&settings("ytdlp,gallery-dl")),
            Err(BackendConfigError::UnknownBackend(name)) if name == "gallery-dl"
        ));
        assert!(matches!(build(&settings(" , ")), Err(BackendConfigError::Empty)));
    }
}
