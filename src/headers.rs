//! Response headers selected by file extension.

use std::collections::HashMap;
use std::path::Path;

use axum::http::{header, HeaderMap, HeaderName, HeaderValue};
use serde::de::DeserializeOwned;
use tracing::{info, warn};

use crate::error::ConfigError;

/// Key of the entry used when the extension has no entry of its own.
pub const DEFAULT_KEY: &str = "default";

/// `{".m3u8": {"cache-control": "max-age=2"}, "default": {...}}`
pub type ExtensionHeaders = HashMap<String, HashMap<String, String>>;

/// `{"access-control-allow-origin": "*"}`
pub type CorsHeaders = HashMap<String, String>;

/// Immutable lookup from extension to the full response header set.
#[derive(Debug, Clone, Default)]
pub struct HeaderTable {
    by_extension: HashMap<String, HeaderMap>,
    default: Option<HeaderMap>,
    cors: HeaderMap,
    guess_content_type: bool,
}

impl HeaderTable {
    /// Validate raw tables. Extension keys are matched case-insensitively.
    pub fn new(by_extension: ExtensionHeaders, cors: CorsHeaders) -> Result<Self, ConfigError> {
        let mut table = HeaderTable {
            cors: parse_headers(&cors)?,
            ..HeaderTable::default()
        };

        for (key, headers) in &by_extension {
            let headers = parse_headers(headers)?;
            if key == DEFAULT_KEY {
                table.default = Some(headers);
            } else {
                table.by_extension.insert(key.to_lowercase(), headers);
            }
        }

        Ok(table)
    }

    /// Load the extension table and the CORS table from JSON files.
    pub fn from_files(
        headers_file: Option<&Path>,
        cors_file: Option<&Path>,
    ) -> Result<Self, ConfigError> {
        let by_extension: ExtensionHeaders = match headers_file {
            Some(path) => read_json(path)?,
            None => ExtensionHeaders::new(),
        };
        let cors: CorsHeaders = match cors_file {
            Some(path) => read_json(path)?,
            None => CorsHeaders::new(),
        };

        if !by_extension.is_empty() {
            info!("Loaded headers for {} extension keys", by_extension.len());
        }
        if !cors.is_empty() {
            info!("Loaded {} CORS headers", cors.len());
        }

        Self::new(by_extension, cors)
    }

    /// Fill in Content-Type from the extension when no entry provides it.
    pub fn with_content_type_guess(mut self, enabled: bool) -> Self {
        self.guess_content_type = enabled;
        self
    }

    /// Headers for a response serving `request_path`.
    ///
    /// Extension entry, else the default entry, then CORS on top.
    pub fn for_path(&self, request_path: &str) -> HeaderMap {
        let mut headers = extension_key(request_path)
            .and_then(|ext| self.by_extension.get(&ext))
            .or(self.default.as_ref())
            .cloned()
            .unwrap_or_default();

        for (name, value) in &self.cors {
            headers.insert(name.clone(), value.clone());
        }

        if self.guess_content_type && !headers.contains_key(header::CONTENT_TYPE) {
            let mime = mime_guess::from_path(request_path).first_or_octet_stream();
            if let Ok(value) = HeaderValue::from_str(mime.as_ref()) {
                headers.insert(header::CONTENT_TYPE, value);
            }
        }

        headers
    }
}

/// Lowercased extension with its leading dot, as used for table keys.
pub fn extension_key(request_path: &str) -> Option<String> {
    Path::new(request_path)
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy().to_lowercase()))
}

fn parse_headers(raw: &HashMap<String, String>) -> Result<HeaderMap, ConfigError> {
    let mut headers = HeaderMap::with_capacity(raw.len());

    for (name, value) in raw {
        let header_name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| ConfigError::HeaderName(name.clone()))?;

        // Bodies are framed by the transport; a fixed length would be wrong
        // for growing files.
        if header_name == header::CONTENT_LENGTH || header_name == header::TRANSFER_ENCODING {
            warn!("Ignoring configured framing header {}", header_name);
            continue;
        }

        let header_value =
            HeaderValue::from_str(value).map_err(|_| ConfigError::HeaderValue {
                name: name.clone(),
                value: value.clone(),
            })?;
        headers.insert(header_name, header_value);
    }

    Ok(headers)
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&content).map_err(|source| ConfigError::Json {
        path: path.to_path_buf(),
        source,
    })
}
