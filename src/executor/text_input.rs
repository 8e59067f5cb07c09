// `adb shell input text` goes through the device shell and only types ASCII.

/// Characters the device shell would otherwise interpret.
const SHELL_SPECIAL: &[char] = &[
    '\\', '"', '\'', '`', '$', '(', ')', '<', '>', '|', ';', '&', '*', '~', '!', '?', '[', ']',
    '{', '}', '#',
];

/// True if every character can be typed by `input text`.
pub fn is_typeable(text: &str) -> bool {
    text.chars().all(|c| c.is_ascii() && !c.is_ascii_control())
}

/// Escape `text` for `input text`: shell metacharacters get a backslash and
/// spaces become `%s`.
pub fn escape_for_input(text: &str) -> String {
    let mut out = String::with_capacity(text.len() * 2);
    for c in text.chars() {
        if c == ' ' {
            out.push_str("%s");
        } else {
            if SHELL_SPECIAL.contains(&c) {
                out.push('\\');
            }
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spaces_become_percent_s() {
        assert_eq!(escape_for_input("hello world"), "hello%sworld");
    }

    #[test]
    fn test_shell_characters_escaped() {
        assert_eq!(escape_for_input("it's $5 & (more)"), r"it\'s%s\$5%s\&%s\(more\)");
        assert_eq!(escape_for_input(r"a\b"), r"a\\b");
        assert_eq!(escape_for_input("user@example.com"), "user@example.com");
    }

    #[test]
    fn test_typeable() {
        assert!(is_typeable("Pizza near me"));
        assert!(!is_typeable("café"));
        assert!(!is_typeable("你好"));
        assert!(!is_typeable("line\nbreak"));
    }
}
