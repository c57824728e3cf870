/// Rewrites loopback spellings of a network serial to the one adb itself
/// reports, so `localhost:5555` and `[::1]:5555` address the same device.
pub fn canonicalize_adb_serial(addr: &str) -> String {
    let addr = addr.trim();
    for prefix in ["localhost:", "0.0.0.0:", "[::1]:", "[::]:"] {
        if let Some(rest) = addr.strip_prefix(prefix) {
            return format!("127.0.0.1:{rest}");
        }
    }
    addr.to_string()
}

/// Android package names are dotted Java identifiers.
pub fn is_valid_package_name(name: &str) -> bool {
    let mut segments = 0;
    for segment in name.split('.') {
        let mut chars = segment.chars();
        match chars.next() {
            Some(first) if first.is_ascii_alphabetic() || first == '_' => {}
            _ => return false,
        }
        if !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return false;
        }
        segments += 1;
    }
    segments >= 2
}
