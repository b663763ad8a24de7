//! Recursive asset discovery through directories and nested containers
//!
//! [`walk`] returns a lazy iterator. Containers are extracted into staging
//! directories as the walk reaches them, and each staging directory is held
//! by the frame that walks it, so it is removed as soon as that frame is
//! exhausted or the iterator is dropped. Symbolic links found inside a
//! container are only followed when they resolve within its staging
//! directory.

mod container;
mod iso;

pub use container::ContainerKind;

use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, warn};

use crate::error::IndexError;
use crate::model::{Asset, Reference, ReferenceItem};

struct Frame {
    entries: std::vec::IntoIter<PathBuf>,
    /// Paths in this frame are named relative to `base`
    base: PathBuf,
    reference: Reference,
    /// Set for frames below an extracted container
    contained: bool,
    _staging: Option<TempDir>,
}

/// Depth-first iterator over the leaf files below a root
///
/// Yields `Err` for containers or directories that could not be read; the
/// walk continues with the next sibling.
pub struct Walk {
    stack: Vec<Frame>,
    staging_root: Option<PathBuf>,
    pending: Option<IndexError>,
}

/// Walk `root`, prefixing every yielded reference with `prefix`
///
/// `root` may be a directory or a single file (possibly a container).
pub fn walk(root: &Path, prefix: Reference) -> Walk {
    let mut walk = Walk {
        stack: Vec::new(),
        staging_root: None,
        pending: None,
    };

    if root.is_dir() {
        match sorted_children(root) {
            Ok(entries) => walk.stack.push(Frame {
                entries: entries.into_iter(),
                base: root.to_path_buf(),
                reference: prefix,
                contained: false,
                _staging: None,
            }),
            Err(e) => walk.pending = Some(IndexError::io(root, e)),
        }
    } else {
        let base = root.parent().map(Path::to_path_buf).unwrap_or_default();
        walk.stack.push(Frame {
            entries: vec![root.to_path_buf()].into_iter(),
            base,
            reference: prefix,
            contained: false,
            _staging: None,
        });
    }
    walk
}

impl Walk {
    /// Create staging directories below `root` instead of the system temp dir
    pub fn staging_in(mut self, root: impl Into<PathBuf>) -> Self {
        self.staging_root = Some(root.into());
        self
    }
}

impl Iterator for Walk {
    type Item = Result<Asset, IndexError>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(error) = self.pending.take() {
            return Some(Err(error));
        }

        loop {
            let frame = self.stack.last_mut()?;
            let Some(path) = frame.entries.next() else {
                // Dropping the frame removes its staging directory.
                self.stack.pop();
                continue;
            };

            let metadata = match fs::symlink_metadata(&path) {
                Ok(metadata) => metadata,
                Err(e) => return Some(Err(IndexError::io(path, e))),
            };

            if metadata.file_type().is_symlink() {
                // Links inside images are kept as links; only file targets are walked.
                if !path.is_file() {
                    debug!(path = %path.display(), "Skipping symbolic link to non-file");
                    continue;
                }
                if frame.contained && !resolves_within(&path, &frame.base) {
                    warn!(path = %path.display(), "Skipping symbolic link leaving its container");
                    continue;
                }
            } else if metadata.is_dir() {
                match sorted_children(&path) {
                    Ok(entries) => {
                        let base = frame.base.clone();
                        let reference = frame.reference.clone();
                        let contained = frame.contained;
                        self.stack.push(Frame {
                            entries: entries.into_iter(),
                            base,
                            reference,
                            contained,
                            _staging: None,
                        });
                        continue;
                    }
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "Failed to read directory");
                        return Some(Err(IndexError::io(path, e)));
                    }
                }
            }

            let relative = relative_name(&path, &frame.base);

            let Some(kind) = ContainerKind::for_path(&path) else {
                return Some(Ok(Asset {
                    path,
                    reference: frame.reference.clone(),
                    filename: relative,
                }));
            };

            match kind.extract(&path, self.staging_root.as_deref()) {
                Ok(staging) => {
                    let reference = frame.reference.join(ReferenceItem::new(relative));
                    match sorted_children(staging.path()) {
                        Ok(entries) => self.stack.push(Frame {
                            entries: entries.into_iter(),
                            base: staging.path().to_path_buf(),
                            reference,
                            contained: true,
                            _staging: Some(staging),
                        }),
                        Err(e) => return Some(Err(IndexError::io(path, e))),
                    }
                }
                Err(error) => {
                    warn!(path = %path.display(), error = %error, "Skipping container");
                    return Some(Err(error));
                }
            }
        }
    }
}

fn sorted_children(directory: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut entries = fs::read_dir(directory)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<std::io::Result<Vec<_>>>()?;
    entries.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(entries)
}

fn resolves_within(path: &Path, base: &Path) -> bool {
    match (fs::canonicalize(path), fs::canonicalize(base)) {
        (Ok(target), Ok(base)) => target.starts_with(base),
        _ => false,
    }
}

fn relative_name(path: &Path, base: &Path) -> String {
    let relative = path.strip_prefix(base).unwrap_or(path);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Case-insensitive lookup of `name` next to `path`; first match in sorted order wins
pub fn find_sibling(path: &Path, name: &str) -> Option<PathBuf> {
    let directory = path.parent()?;
    let wanted = name.to_lowercase();
    sorted_children(directory).ok()?.into_iter().find(|candidate| {
        candidate
            .file_name()
            .map(|n| n.to_string_lossy().to_lowercase() == wanted)
            .unwrap_or(false)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs::File;
    use std::io::Write;

    fn zip_bytes(entries: &[(&str, Vec<u8>)]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
        for (name, bytes) in entries {
            writer
                .start_file(*name, zip::write::SimpleFileOptions::default())
                .unwrap();
            writer.write_all(bytes).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    fn collect(walk: Walk) -> (Vec<Asset>, Vec<IndexError>) {
        let mut assets = Vec::new();
        let mut errors = Vec::new();
        for item in walk {
            match item {
                Ok(asset) => assets.push(asset),
                Err(e) => errors.push(e),
            }
        }
        (assets, errors)
    }

    #[test]
    fn test_nested_containers_extend_reference() {
        let dir = TempDir::new().unwrap();
        let inner = zip_bytes(&[("Apps/Game.sis", b"leaf".to_vec())]);
        let outer = zip_bytes(&[("inner.zip", inner)]);
        fs::write(dir.path().join("outer.zip"), outer).unwrap();

        let (assets, errors) = collect(walk(dir.path(), Reference::new()));

        assert!(errors.is_empty());
        assert_eq!(assets.len(), 1);
        let names: Vec<_> = assets[0]
            .reference
            .items()
            .iter()
            .map(|i| i.name.as_str())
            .collect();
        assert_eq!(names, vec!["outer.zip", "inner.zip"]);
        assert_eq!(assets[0].filename, "Apps/Game.sis");
    }

    #[test]
    fn test_staging_cleaned_after_walk() {
        let dir = TempDir::new().unwrap();
        let staging = TempDir::new().unwrap();
        fs::write(
            dir.path().join("a.zip"),
            zip_bytes(&[("x.app", b"x".to_vec())]),
        )
        .unwrap();

        let mut iter = walk(dir.path(), Reference::new()).staging_in(staging.path());
        let first = iter.next().unwrap().unwrap();
        assert!(first.path.exists());
        assert_eq!(fs::read_dir(staging.path()).unwrap().count(), 1);

        assert!(iter.next().is_none());
        assert_eq!(fs::read_dir(staging.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_dropping_walk_removes_staging() {
        let dir = TempDir::new().unwrap();
        let staging = TempDir::new().unwrap();
        fs::write(
            dir.path().join("a.zip"),
            zip_bytes(&[("x.app", b"x".to_vec()), ("y.app", b"y".to_vec())]),
        )
        .unwrap();

        let mut iter = walk(dir.path(), Reference::new()).staging_in(staging.path());
        iter.next().unwrap().unwrap();
        drop(iter);
        assert_eq!(fs::read_dir(staging.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_corrupt_container_does_not_stop_siblings() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.zip"), zip_bytes(&[("one.sis", b"1".to_vec())])).unwrap();
        fs::write(dir.path().join("b.zip"), b"garbage").unwrap();
        fs::write(dir.path().join("c.zip"), zip_bytes(&[("two.sis", b"2".to_vec())])).unwrap();

        let (assets, errors) = collect(walk(dir.path(), Reference::new()));

        let files: Vec<_> = assets.iter().map(|a| a.filename.as_str()).collect();
        assert_eq!(files, vec!["one.sis", "two.sis"]);
        assert_eq!(errors.len(), 1);
        assert!(matches!(errors[0], IndexError::ContainerExtraction { .. }));
    }

    #[test]
    fn test_plain_tree_is_sorted_with_relative_names() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("b/c")).unwrap();
        File::create(dir.path().join("b/c/z.app")).unwrap();
        File::create(dir.path().join("a.sis")).unwrap();
        File::create(dir.path().join("b/m.opa")).unwrap();

        let (assets, _) = collect(walk(dir.path(), Reference::new()));
        let files: Vec<_> = assets.iter().map(|a| a.filename.as_str()).collect();
        assert_eq!(files, vec!["a.sis", "b/c/z.app", "b/m.opa"]);
        assert!(assets.iter().all(|a| a.reference.is_empty()));
    }

    #[test]
    fn test_walking_a_single_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("Game.SIS");
        fs::write(&path, b"x").unwrap();

        let prefix = Reference::new().join(ReferenceItem::new("source"));
        let (assets, _) = collect(walk(&path, prefix.clone()));
        assert_eq!(assets.len(), 1);
        assert_eq!(assets[0].filename, "Game.SIS");
        assert_eq!(assets[0].reference, prefix);
    }

    #[test]
    fn test_disk_image_symlink_to_file_is_a_leaf() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("cd.iso"), iso::tests::build_image(true)).unwrap();

        let (assets, errors) = collect(walk(dir.path(), Reference::new()));
        assert!(errors.is_empty());
        let files: Vec<_> = assets.iter().map(|a| a.filename.as_str()).collect();
        assert_eq!(files, vec!["ReadMe.txt", "Sub/inner.txt", "link.txt"]);
        assert!(assets.iter().all(|a| a.reference.items()[0].name == "cd.iso"));
    }

    #[cfg(unix)]
    #[test]
    fn test_disk_image_links_resolving_outside_staging_are_skipped() {
        use super::iso::tests::{build_image_with, nm, record, sl, Extra};

        let dir = TempDir::new().unwrap();
        let staging = TempDir::new().unwrap();
        fs::write(staging.path().join("secret.sis"), b"host file").unwrap();
        // Each link stays inside on its own; chained they climb out of the image.
        let extra = Extra {
            root: vec![record(
                0,
                0,
                0,
                b"LEAK.;1",
                &[nm("leak.sis"), sl(&["Sub", "up", "..", "secret.sis"])].concat(),
            )],
            sub: vec![record(0, 0, 0, b"UP.;1", &[nm("up"), sl(&[".."])].concat())],
            sectors: Vec::new(),
        };
        fs::write(dir.path().join("cd.iso"), build_image_with(true, extra)).unwrap();

        let (assets, errors) = collect(walk(dir.path(), Reference::new()).staging_in(staging.path()));

        assert!(errors.is_empty());
        let files: Vec<_> = assets.iter().map(|a| a.filename.as_str()).collect();
        assert_eq!(files, vec!["ReadMe.txt", "Sub/inner.txt", "link.txt"]);
    }

    #[cfg(unix)]
    #[test]
    fn test_links_in_plain_sources_are_followed() {
        let dir = TempDir::new().unwrap();
        let elsewhere = TempDir::new().unwrap();
        let target = elsewhere.path().join("Game.sis");
        fs::write(&target, b"x").unwrap();
        std::os::unix::fs::symlink(&target, dir.path().join("Game.sis")).unwrap();

        let (assets, _) = collect(walk(dir.path(), Reference::new()));
        assert_eq!(assets.len(), 1);
        assert_eq!(assets[0].filename, "Game.sis");
    }

    #[test]
    fn test_find_sibling_ignores_case() {
        let dir = TempDir::new().unwrap();
        let app = dir.path().join("Game.app");
        File::create(&app).unwrap();
        File::create(dir.path().join("GAME.AIF")).unwrap();

        assert_eq!(
            find_sibling(&app, "game.aif"),
            Some(dir.path().join("GAME.AIF"))
        );
        assert_eq!(find_sibling(&app, "readme.txt"), None);
    }
}
