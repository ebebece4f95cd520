const MAX_KEY_BYTES: usize = 32 * 1024;
const MAX_COMPONENTS: usize = 4096;
const MAX_COMPONENT_BYTES: usize = 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyError {
    Empty,
    EscapesRoot,
    TooLong,
}

/// Canonical remote key for a path below the remote-forced namespace.
///
/// Empty and `.` components are dropped and `..` pops the previous component.
/// The result never starts or ends with `/`.
pub fn canonical_key(stripped: &str) -> Result<String, KeyError> {
    if stripped.len() > MAX_KEY_BYTES {
        return Err(KeyError::TooLong);
    }
    let mut components: Vec<&str> = Vec::new();
    for part in stripped.split('/') {
        if part.is_empty() || part == "." {
            continue;
        }
        if part == ".." {
            if components.pop().is_none() {
                return Err(KeyError::EscapesRoot);
            }
            continue;
        }
        if part.len() > MAX_COMPONENT_BYTES {
            return Err(KeyError::TooLong);
        }
        components.push(part);
        if components.len() > MAX_COMPONENTS {
            return Err(KeyError::TooLong);
        }
    }
    if components.is_empty() {
        return Err(KeyError::Empty);
    }
    Ok(components.join("/"))
}

/// Prefix normalized to `/name/` form; an empty or root-only prefix is rejected.
pub fn normalize_prefix(prefix: &str) -> Option<String> {
    let trimmed = prefix.trim().trim_matches('/');
    if trimmed.is_empty() {
        return None;
    }
    Some(format!("/{trimmed}/"))
}

/// Last path component, used to give materialized files a readable name.
pub fn basename(key: &str) -> &str {
    let trimmed = key.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(idx) => &trimmed[idx + 1..],
        None => trimmed,
    }
}
