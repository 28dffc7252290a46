//! Stub payloads and bundled redirect resources.

use std::collections::HashMap;
use std::path::Path;

use bytes::Bytes;

/// Transparent 1x1 GIF.
pub const TRANSPARENT_GIF: &[u8] = &[
    0x47, 0x49, 0x46, 0x38, 0x39, 0x61, 0x01, 0x00, 0x01, 0x00, 0x80, 0x00, 0x00, 0x00, 0x00,
    0x00, 0xff, 0xff, 0xff, 0x21, 0xf9, 0x04, 0x01, 0x00, 0x00, 0x00, 0x00, 0x2c, 0x00, 0x00,
    0x00, 0x00, 0x01, 0x00, 0x01, 0x00, 0x00, 0x02, 0x02, 0x44, 0x01, 0x00, 0x3b,
];

/// Transparent 2x2 PNG.
pub const TRANSPARENT_PNG: &[u8] = &[
    0x89, 0x50, 0x4e, 0x47, 0x0d, 0x0a, 0x1a, 0x0a, 0x00, 0x00, 0x00, 0x0d, 0x49, 0x48, 0x44,
    0x52, 0x00, 0x00, 0x00, 0x02, 0x00, 0x00, 0x00, 0x02, 0x08, 0x06, 0x00, 0x00, 0x00, 0x72,
    0xb6, 0x0d, 0x24, 0x00, 0x00, 0x00, 0x0b, 0x49, 0x44, 0x41, 0x54, 0x78, 0xda, 0x63, 0x60,
    0x40, 0x07, 0x00, 0x00, 0x12, 0x00, 0x01, 0xe4, 0x55, 0x8d, 0xe7, 0x00, 0x00, 0x00, 0x00,
    0x49, 0x45, 0x4e, 0x44, 0xae, 0x42, 0x60, 0x82,
];

pub const NOOP_JS: &str = "(function() {})();\n";

pub const NOOP_HTML: &str = "<!DOCTYPE html><html><head></head><body></body></html>\n";

/// A single silent MPEG-1 layer III frame (128 kbit/s, 44.1 kHz).
pub static SILENT_MP3: [u8; 417] = silent_mp3_frame();

const fn silent_mp3_frame() -> [u8; 417] {
    let mut frame = [0u8; 417];
    frame[0] = 0xff;
    frame[1] = 0xfb;
    frame[2] = 0x90;
    frame[3] = 0x64;
    frame
}

/// A named payload with its MIME type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    pub mime_type: String,
    pub body: Bytes,
}

impl Resource {
    fn new(mime_type: &str, body: Bytes) -> Self {
        Self {
            mime_type: mime_type.to_string(),
            body,
        }
    }
}

/// Resolves redirect resources by name: files from the resource directory
/// first, then the built-in table.
#[derive(Debug, Clone, Default)]
pub struct ResourceLibrary {
    files: HashMap<String, Resource>,
}

impl ResourceLibrary {
    /// Read every regular file directly inside `dir`.
    ///
    /// Unreadable entries are skipped with a warning; a missing directory
    /// leaves only the built-in resources.
    #[must_use]
    pub fn new(dir: Option<&Path>) -> Self {
        let Some(dir) = dir else {
            return Self::default();
        };

        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(err) => {
                tracing::warn!(path = ?dir, error = %err, "resource directory unavailable");
                return Self::default();
            }
        };

        let mut files = HashMap::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
                continue;
            };
            match std::fs::read(&path) {
                Ok(body) => {
                    files.insert(
                        name.to_string(),
                        Resource::new(&mime_type_for(name), Bytes::from(body)),
                    );
                }
                Err(err) => {
                    tracing::warn!(path = ?path, error = %err, "failed to read resource file");
                }
            }
        }
        tracing::debug!(path = ?dir, count = files.len(), "loaded redirect resources");
        Self { files }
    }

    /// Look up `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Resource> {
        self.files.get(name).cloned().or_else(|| builtin(name))
    }
}

/// Built-in resources, keyed by the names filter lists use in `redirect=`.
#[must_use]
pub fn builtin(name: &str) -> Option<Resource> {
    let (mime_type, body) = match name {
        "1x1.gif" | "1x1-transparent.gif" => ("image/gif", Bytes::from_static(TRANSPARENT_GIF)),
        "2x2.png" | "2x2-transparent.png" => ("image/png", Bytes::from_static(TRANSPARENT_PNG)),
        "noop.js" | "noopjs" => ("application/javascript", Bytes::from_static(NOOP_JS.as_bytes())),
        "noop.html" | "noopframe" => ("text/html", Bytes::from_static(NOOP_HTML.as_bytes())),
        "noop.txt" | "nooptext" => ("text/plain", Bytes::new()),
        "noop.json" => ("application/json", Bytes::from_static(b"{}")),
        "noop.css" => ("text/css", Bytes::new()),
        "noop-0.1s.mp3" | "noopmp3-0.1s" | "noop-1s.mp4" | "noopmp4-1s" => {
            ("audio/mpeg", Bytes::from_static(&SILENT_MP3))
        }
        _ => return None,
    };
    Some(Resource::new(mime_type, body))
}

/// MIME type for a resource file name.
#[must_use]
pub fn mime_type_for(name: &str) -> String {
    let extension = Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);
    match extension.as_deref() {
        Some("js" | "mjs") => "application/javascript".into(),
        Some("json") => "application/json".into(),
        Some("mhtml" | "mht") => "multipart/related".into(),
        _ => mime_guess::from_path(name)
            .first_or_octet_stream()
            .essence_str()
            .to_string(),
    }
}
