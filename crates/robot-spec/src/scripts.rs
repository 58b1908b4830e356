//! Script name resolution.

/// Qualify declared script names with an optional root.
///
/// An absent or empty root leaves names untouched; otherwise each name
/// becomes `root/name`. Order is preserved.
pub fn resolve_scripts<S: AsRef<str>>(root: Option<&str>, scripts: &[S]) -> Vec<String> {
    let root = root.map(|r| r.trim_end_matches('/')).filter(|r| !r.is_empty());

    scripts
        .iter()
        .map(|script| match root {
            Some(root) => format!("{}/{}", root, script.as_ref()),
            None => script.as_ref().to_string(),
        })
        .collect()
}
