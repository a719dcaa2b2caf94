use crate::store::{ContainerFile, Group};

/// Split a slash-separated dataset path into its segments, discarding
/// empty ones ("/a//b/" resolves the same as "a/b").
pub fn split_path(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

/// Group at the given path, creating each missing intermediate group and
/// skipping existing ones. Idempotent.
pub fn ensure_group<'a>(file: &'a mut ContainerFile, path: &str) -> &'a mut Group {
    file.ensure_group(path)
}

/// Existence probe for any node. Failures from the underlying lookup are
/// reported as "does not exist", never as an error.
pub fn exists(file: &ContainerFile, path: &str) -> bool {
    file.exists(path)
}

/// Join a group path and a child name into a canonical dataset path.
pub fn join(path: &str, name: &str) -> String {
    let mut out = String::new();
    for seg in split_path(path) {
        out.push('/');
        out.push_str(seg);
    }
    for seg in split_path(name) {
        out.push('/');
        out.push_str(seg);
    }
    out
}
