use std::path::Path;

const FALLBACK: &str = "text/plain; charset=utf-8";

/// Resolve the `Content-Type` header value for a file from its extension.
///
/// Site content types are fixed; anything else goes through `mime_guess`.
/// Textual types carry `charset=utf-8`, images and other binaries do not.
pub fn content_type_for(path: &Path) -> String {
    let Some(ext) = path.extension().and_then(|ext| ext.to_str()) else {
        return FALLBACK.to_string();
    };
    let ext = ext.to_ascii_lowercase();

    let essence = match ext.as_str() {
        "html" | "mdhtml" => "text/html",
        "json" => "application/json",
        "js" => "text/javascript",
        "css" => "text/css",
        "md" => "text/markdown",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        other => match mime_guess::from_ext(other).first() {
            Some(guess) => return with_charset(guess.essence_str()),
            None => return FALLBACK.to_string(),
        },
    };

    with_charset(essence)
}

fn with_charset(essence: &str) -> String {
    if is_textual(essence) {
        format!("{essence}; charset=utf-8")
    } else {
        essence.to_string()
    }
}

fn is_textual(essence: &str) -> bool {
    essence.starts_with("text/")
        || matches!(
            essence,
            "application/json" | "application/javascript" | "application/xml" | "image/svg+xml"
        )
}
