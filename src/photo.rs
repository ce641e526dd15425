use anyhow::{Context, Result, anyhow};
use base64::{Engine as _, engine::general_purpose};
use std::path::Path;

fn mime_for(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        "bmp" => Some("image/bmp"),
        _ => None,
    }
}

/// Reads an image file into a `data:` URL, the payload a photo card carries.
pub fn encode_file(path: &Path) -> Result<String> {
    let mime = mime_for(path)
        .ok_or_else(|| anyhow!("{} is not a supported image type", path.display()))?;
    let bytes = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    if bytes.is_empty() {
        return Err(anyhow!("{} is empty", path.display()));
    }
    Ok(format!(
        "data:{};base64,{}",
        mime,
        general_purpose::STANDARD.encode(bytes)
    ))
}

/// One-line description of a photo payload for the card footer.
pub fn describe(image_url: &str) -> String {
    let Some(rest) = image_url.strip_prefix("data:") else {
        return "linked image".to_string();
    };
    let Some((meta, payload)) = rest.split_once(',') else {
        return "unreadable image".to_string();
    };
    let mime = meta.split(';').next().filter(|m| !m.is_empty()).unwrap_or("image");

    if !meta.ends_with(";base64") {
        return format!("{} · {}", mime, format_size(payload.len()));
    }
    match general_purpose::STANDARD.decode(payload.trim()) {
        Ok(bytes) => format!("{} · {}", mime, format_size(bytes.len())),
        Err(_) => "unreadable image".to_string(),
    }
}

pub fn format_size(bytes: usize) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
