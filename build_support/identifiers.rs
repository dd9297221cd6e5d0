//! Source scanning shared by the build script and its tests.

/// Whether an underscore-prefixed identifier occurs outside string literals and
/// line comments. Matches inside a string do not hide ones elsewhere on the line.
pub fn has_code_match(line: &str) -> bool {
    let bytes = line.as_bytes();
    let is_word = |b: u8| b.is_ascii_alphanumeric() || b == b'_';
    let mut in_string = false;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        if in_string {
            match b {
                b'\\' => i += 1,
                b'"' => in_string = false,
                _ => {}
            }
        } else if b == b'\'' && bytes.get(i + 1) == Some(&b'"') {
            // Char literal '"'.
            i += 2;
        } else if b == b'"' {
            in_string = true;
        } else if b == b'/' && bytes.get(i + 1) == Some(&b'/') {
            return false;
        } else if b == b'_'
            && (i == 0 || !is_word(bytes[i - 1]))
            && bytes.get(i + 1).is_some_and(|&next| is_word(next))
        {
            return true;
        }
        i += 1;
    }
    false
}
