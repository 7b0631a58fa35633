//! Local filename sanitization for entries coming from remote listings.

/// Make a remote name safe to create under the task's save path.
///
/// Path separators, NUL and control characters become `_`; leading dots and
/// surrounding whitespace are dropped so a listing cannot escape the target
/// directory or create hidden files. Length is capped at 255 bytes.
pub fn sanitize_filename(name: &str) -> String {
    const NAME_MAX: usize = 255;

    let replaced: String = name
        .chars()
        .map(|c| {
            if c == '/' || c == '\\' || c == '\0' || c.is_control() {
                '_'
            } else {
                c
            }
        })
        .collect();

    let trimmed = replaced.trim().trim_start_matches('.').trim_end();

    if trimmed.len() > NAME_MAX {
        let mut take = NAME_MAX;
        while take > 0 && !trimmed.is_char_boundary(take) {
            take -= 1;
        }
        trimmed[..take].to_string()
    } else {
        trimmed.to_string()
    }
}
