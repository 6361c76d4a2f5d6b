//! Presentation helpers for CLI output.

/// Display name for a known retail partner id; unknown ids pass through.
pub fn platform_display_name(id: &str) -> &str {
    match id {
        "zepto" => "Zepto",
        "swiggy-instamart" => "Swiggy Instamart",
        "bigbasket" => "BigBasket",
        "flipkart-minutes" => "Flipkart Minutes",
        "blinkit" => "Blinkit",
        other => other,
    }
}

/// Humanized file size, matching the upload form's rendering.
pub fn format_file_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.2} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
