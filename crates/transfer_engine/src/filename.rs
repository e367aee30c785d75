use std::path::Path;

/// Lowercase hex of the UTF-8 bytes, so names with any characters survive
/// transports that mangle non-ASCII.
pub fn encode_filename(name: &str) -> String {
    name.bytes().map(|byte| format!("{byte:02x}")).collect()
}

/// Inverse of [`encode_filename`]. `None` for odd-length input, non-hex
/// digits, or bytes that are not UTF-8.
pub fn decode_filename(encoded: &str) -> Option<String> {
    if encoded.len() % 2 != 0 {
        return None;
    }
    let bytes = encoded
        .as_bytes()
        .chunks(2)
        .map(|pair| {
            let digits = std::str::from_utf8(pair).ok()?;
            u8::from_str_radix(digits, 16).ok()
        })
        .collect::<Option<Vec<u8>>>()?;
    String::from_utf8(bytes).ok()
}

/// Final path component, or `"upload.zip"` when the path has none.
pub(crate) fn upload_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .filter(|name| !name.trim().is_empty())
        .unwrap_or_else(|| "upload.zip".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_utf8_bytes_as_hex() {
        assert_eq!(encode_filename("a b.zip"), "6120622e7a6970");
        assert_eq!(encode_filename("é"), "c3a9");
    }

    #[test]
    fn decodes_back_including_non_ascii() {
        let name = "曲 - Ünïcode (v2).zip";
        assert_eq!(decode_filename(&encode_filename(name)).as_deref(), Some(name));
    }

    #[test]
    fn rejects_malformed_hex() {
        assert_eq!(decode_filename("abc"), None);
        assert_eq!(decode_filename("zz"), None);
        assert_eq!(decode_filename("ff"), None);
    }

    #[test]
    fn upload_name_falls_back() {
        assert_eq!(upload_name(Path::new("/tmp/level.zip")), "level.zip");
        assert_eq!(upload_name(Path::new("/")), "upload.zip");
    }
}
