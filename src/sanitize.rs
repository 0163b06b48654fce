//! File name cleanup for titles reported by the external tool.

/// Bytes, not characters: a timestamp and extension are appended later and
/// the whole name has to fit the usual 255-byte limit.
pub const MAX_FILENAME_BYTES: usize = 200;

/// Used by callers when a title sanitizes down to nothing.
pub const PLACEHOLDER_FILENAME: &str = "download";

const RESERVED_CHARACTERS: [char; 9] = ['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Maps an arbitrary title to a name that is safe on common filesystems.
///
/// Reserved characters become `_`, whitespace runs collapse to one space, the
/// result is cut to at most [`MAX_FILENAME_BYTES`] bytes on a character
/// boundary and only then trimmed of spaces and periods. Trimming after the
/// cut means a long title can end up shorter than the limit. The result may
/// be empty.
pub fn sanitize_filename(input: &str) -> String {
    let mut collapsed = String::with_capacity(input.len());
    let mut in_whitespace = false;

    for character in input.chars() {
        if character.is_whitespace() {
            if !in_whitespace {
                collapsed.push(' ');
            }
            in_whitespace = true;
            continue;
        }

        in_whitespace = false;
        if RESERVED_CHARACTERS.contains(&character) {
            collapsed.push('_');
        } else {
            collapsed.push(character);
        }
    }

    let cut = collapsed
        .char_indices()
        .take_while(|(index, character)| index + character.len_utf8() <= MAX_FILENAME_BYTES)
        .last()
        .map_or(0, |(index, character)| index + character.len_utf8());
    let truncated = &collapsed[..cut];

    truncated.trim_matches(|c| c == ' ' || c == '.').to_string()
}

/// ASCII-only rendition of a file name for the quoted `filename` header parameter.
pub fn sanitize_ascii_filename(value: &str) -> String {
    let sanitized: String = value
        .chars()
        .map(|character| {
            if character.is_ascii_graphic() && !matches!(character, '"' | '\\') || character == ' '
            {
                character
            } else {
                '_'
            }
        })
        .collect();

    let compact = sanitized.trim();
    if compact.is_empty() {
        PLACEHOLDER_FILENAME.to_string()
    } else {
        compact.to_string()
    }
}
