use std::path::{Component, Path, PathBuf};

/// Lexically resolves `.` and `..` components without touching the filesystem, so that an include
/// spelled `../common/lighting.hlsli` lands on the same path the directory scan produced.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match normalized.components().next_back() {
                Some(Component::Normal(_)) => {
                    normalized.pop();
                }
                // `/..` is `/`.
                Some(Component::RootDir | Component::Prefix(_)) => {}
                Some(Component::ParentDir | Component::CurDir) | None => {
                    normalized.push(component);
                }
            },
            _ => normalized.push(component),
        }
    }
    normalized
}

/// Stable identity of a shader file, used as the cache key. Changes only when the file moves.
pub fn path_hash(path: &Path) -> u32 {
    let normalized = normalize_path(path);
    let text = normalized.to_string_lossy().replace('\\', "/");
    content_hash(text.as_bytes())
}

pub fn content_hash(bytes: &[u8]) -> u32 {
    crc32fast::hash(bytes)
}

#[test]
fn identity_is_stable() {
    let a = path_hash(Path::new("/shaders/lighting/a.hlsl"));
    let b = path_hash(Path::new("/shaders/lighting/a.hlsl"));
    assert_eq!(a, b);
}

#[test]
fn identity_follows_path() {
    let a = path_hash(Path::new("/shaders/a.hlsl"));
    let b = path_hash(Path::new("/shaders/b.hlsl"));
    assert_ne!(a, b);
}

#[test]
fn identity_ignores_dot_components() {
    let a = path_hash(Path::new("/shaders/common/../a.hlsl"));
    let b = path_hash(Path::new("/shaders/./a.hlsl"));
    let c = path_hash(Path::new("/shaders/a.hlsl"));
    assert_eq!(a, c);
    assert_eq!(b, c);
}

#[test]
fn leading_parent_components_are_kept() {
    assert_eq!(
        normalize_path(Path::new("../../engine/Shaders/a.hlsl")),
        Path::new("../../engine/Shaders/a.hlsl")
    );
    assert_eq!(normalize_path(Path::new("a/../../b")), Path::new("../b"));
    assert_eq!(normalize_path(Path::new("../a/./../b")), Path::new("../b"));
    assert_eq!(normalize_path(Path::new("/../a")), Path::new("/a"));
}

#[test]
fn crc32_matches_reference() {
    assert_eq!(content_hash(b"123456789"), 0xCBF4_3926);
}
