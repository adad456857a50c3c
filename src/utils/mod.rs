//! Utilities (package-name sanitizing, host detection).

/// Keep only `[A-Za-z0-9._-]`. Every other character is dropped, never escaped.
pub fn sanitize_package_name(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        .collect()
}

/// Platform string reported to the UI, using the desktop shell's names.
pub fn host_platform() -> &'static str {
    match std::env::consts::OS {
        "macos" => "darwin",
        "windows" => "win32",
        other => other,
    }
}
