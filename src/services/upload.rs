use image::ImageFormat;

/// File extensions accepted for seed images.
pub const ALLOWED_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg"];

/// Check the uploaded file name has an allowed extension (case-insensitive).
pub fn allowed_file(filename: &str) -> bool {
    match filename.rsplit_once('.') {
        Some((_, ext)) => ALLOWED_EXTENSIONS
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(ext)),
        None => false,
    }
}

/// Sniff the content and return the detected image format, if any.
pub fn detect_image(bytes: &[u8]) -> Option<ImageFormat> {
    image::guess_format(bytes).ok()
}
