//! Body text normalization for previews and prompts.

/// Maximum length of a cleaned body, in characters.
pub const PREVIEW_CHARS: usize = 300;

/// Normalize a message body into a single-line preview.
///
/// `\r` is dropped, each `\n` becomes one space, other control characters
/// (tab excepted) are dropped, the result is trimmed and cut to
/// [`PREVIEW_CHARS`] characters. `None` is treated as empty.
pub fn clean(text: Option<&str>) -> String {
    let Some(text) = text else {
        return String::new();
    };

    let flattened: String = text
        .chars()
        .filter_map(|c| match c {
            '\n' => Some(' '),
            '\t' => Some(c),
            c if c.is_ascii_control() => None,
            c => Some(c),
        })
        .collect();

    flattened.trim().chars().take(PREVIEW_CHARS).collect()
}
