/// Compare program output with expected output
///
/// Leading and trailing whitespace of the whole text is ignored. Everything
/// in between, including runs of spaces and line breaks, must match exactly.
pub fn compare_output(actual: &str, expected: &str) -> bool {
    actual.trim() == expected.trim()
}

/// Input handed to a program always ends with a newline
pub fn normalize_input(input: &str) -> String {
    if input.ends_with('\n') {
        input.to_string()
    } else {
        format!("{}\n", input)
    }
}

/// Lossy UTF-8 view of at most `max_bytes` of `bytes`
pub fn output_preview(bytes: &[u8], max_bytes: usize) -> String {
    let end = bytes.len().min(max_bytes);
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compare_output_exact_match() {
        assert!(compare_output("hello\nworld\n", "hello\nworld\n"));
    }

    #[test]
    fn test_compare_output_outer_whitespace() {
        assert!(compare_output("  3\n\n", "3"));
        assert!(compare_output("\t\nhello\nworld", "hello\nworld\n\n\n"));
    }

    #[test]
    fn test_compare_output_interior_whitespace_is_significant() {
        assert!(!compare_output("a  b", "a b"));
        assert!(!compare_output("hello  \nworld", "hello\nworld"));
    }

    #[test]
    fn test_compare_output_is_idempotent_under_trim() {
        let cases = [("  x y \n", "x y"), ("1\n2\n", "1 2"), ("", "   ")];
        for (out, exp) in cases {
            assert_eq!(
                compare_output(out, exp),
                compare_output(out.trim(), exp.trim())
            );
        }
    }

    #[test]
    fn test_compare_output_different() {
        assert!(!compare_output("hello\nworld\n", "hello\nearth\n"));
    }

    #[test]
    fn test_normalize_input() {
        assert_eq!(normalize_input("a\nasdasdasd"), "a\nasdasdasd\n");
        assert_eq!(normalize_input("1 2\n"), "1 2\n");
        assert_eq!(normalize_input(""), "\n");
    }

    #[test]
    fn test_output_preview_truncates() {
        assert_eq!(output_preview(b"abcdef", 3), "abc");
        assert_eq!(output_preview(b"ab", 10), "ab");
    }
}
