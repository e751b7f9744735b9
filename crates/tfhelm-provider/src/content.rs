//! Path-or-contents attribute values

use tfhelm_repo::expand_path;

use crate::error::Result;

/// Read `value` as a file when it names one, otherwise return it literally
///
/// The flag reports whether a file was read.
pub fn read_path_or_contents(value: &str) -> Result<(String, bool)> {
    if value.is_empty() {
        return Ok((String::new(), false));
    }

    let path = expand_path(value);
    if path.is_file() {
        return Ok((std::fs::read_to_string(&path)?, true));
    }

    Ok((value.to_string(), false))
}

/// Resolved content, `None` when empty or equal to the attribute default
pub fn get_content(value: &str, default: &str) -> Result<Option<String>> {
    let (content, _) = read_path_or_contents(value)?;
    if content.is_empty() || content == default {
        return Ok(None);
    }
    Ok(Some(content))
}
