//! Paired sample index over `root/syn/<class>/...` and `root/real/<class>/...`
//!
//! Class indices come from the sorted folder names under `root/real` and are
//! shared by both streams. Traversal is fully sorted so repeated builds over an
//! unchanged tree yield identical orderings.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::pose::{parse_pose_annotation, PoseAnnotation};
use crate::error::{Error, Result};

/// Image extensions accepted by default
pub const IMG_EXTENSIONS: [&str; 6] = [".jpg", ".jpeg", ".png", ".ppm", ".bmp", ".pgm"];

/// Sub-directory holding rendered foregrounds
pub const SYNTHETIC_DIR: &str = "syn";
/// Sub-directory holding real backgrounds
pub const REAL_DIR: &str = "real";

/// Rendered foreground with its viewpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyntheticSample {
    pub path: PathBuf,
    pub class_index: usize,
    pub pose: PoseAnnotation,
}

/// Real background photograph
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RealSample {
    pub path: PathBuf,
    pub class_index: usize,
}

/// Case-insensitive suffix match against the allowed extensions
pub fn has_allowed_extension(file_name: &str, extensions: &[String]) -> bool {
    let lower = file_name.to_lowercase();
    extensions
        .iter()
        .any(|ext| lower.ends_with(&ext.to_lowercase()))
}

/// Dense class indices assigned in sorted folder-name order
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ClassTaxonomy {
    classes: Vec<String>,
    class_to_idx: BTreeMap<String, usize>,
}

impl ClassTaxonomy {
    /// Read the class folders directly under `dir`
    pub fn from_dir(dir: &Path) -> Result<Self> {
        let mut classes: Vec<String> = sorted_entries(dir)?
            .into_iter()
            .map(|e| e.path())
            .filter(|p| p.is_dir())
            .filter_map(|p| p.file_name().and_then(|n| n.to_str()).map(str::to_string))
            .collect();
        classes.sort();
        Ok(Self::from_names(classes))
    }

    pub fn from_names(mut classes: Vec<String>) -> Self {
        classes.sort();
        classes.dedup();
        let class_to_idx = classes
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect();
        Self {
            classes,
            class_to_idx,
        }
    }

    pub fn index_of(&self, class: &str) -> Option<usize> {
        self.class_to_idx.get(class).copied()
    }

    pub fn name_of(&self, index: usize) -> Option<&str> {
        self.classes.get(index).map(String::as_str)
    }

    pub fn names(&self) -> &[String] {
        &self.classes
    }

    pub fn class_to_idx(&self) -> &BTreeMap<String, usize> {
        &self.class_to_idx
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}

/// Two parallel sample lists sharing one class taxonomy
#[derive(Debug, Clone)]
pub struct PairedSampleIndex {
    root: PathBuf,
    extensions: Vec<String>,
    taxonomy: ClassTaxonomy,
    synthetic: Vec<SyntheticSample>,
    real: Vec<RealSample>,
}

impl PairedSampleIndex {
    /// Scan `root/syn` and `root/real`
    ///
    /// # Errors
    ///
    /// * `UnknownClassError` if a synthetic class folder is not a real class
    /// * `FormatError` if a synthetic filename carries no pose annotation
    /// * `EmptyDatasetError` if either stream yields no qualifying file
    pub fn build<S: AsRef<str>>(root: impl AsRef<Path>, extensions: &[S]) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let extensions: Vec<String> = extensions.iter().map(|e| e.as_ref().to_string()).collect();
        let syn_root = root.join(SYNTHETIC_DIR);
        let real_root = root.join(REAL_DIR);

        let taxonomy = ClassTaxonomy::from_dir(&real_root)?;
        debug!("Found {} classes under {}", taxonomy.len(), real_root.display());

        let mut synthetic = Vec::new();
        for (class, files) in class_files(&syn_root, &extensions)? {
            let class_index = taxonomy
                .index_of(&class)
                .ok_or_else(|| Error::UnknownClassError {
                    class: class.clone(),
                    root: syn_root.clone(),
                })?;
            for path in files {
                let name = path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
                let pose = parse_pose_annotation(&name).map_err(|e| match e {
                    Error::FormatError { reason, .. } => Error::FormatError {
                        file: path.display().to_string(),
                        reason,
                    },
                    other => other,
                })?;
                synthetic.push(SyntheticSample {
                    path,
                    class_index,
                    pose,
                });
            }
        }

        let mut real = Vec::new();
        for (class, files) in class_files(&real_root, &extensions)? {
            // Every real folder is in the taxonomy by construction
            let Some(class_index) = taxonomy.index_of(&class) else {
                continue;
            };
            real.extend(files.into_iter().map(|path| RealSample { path, class_index }));
        }

        if synthetic.is_empty() {
            return Err(Error::EmptyDatasetError {
                root: syn_root,
                extensions,
            });
        }
        if real.is_empty() {
            return Err(Error::EmptyDatasetError {
                root: real_root,
                extensions,
            });
        }

        Ok(Self {
            root,
            extensions,
            taxonomy,
            synthetic,
            real,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn extensions(&self) -> &[String] {
        &self.extensions
    }

    pub fn taxonomy(&self) -> &ClassTaxonomy {
        &self.taxonomy
    }

    pub fn num_classes(&self) -> usize {
        self.taxonomy.len()
    }

    pub fn synthetic(&self) -> &[SyntheticSample] {
        &self.synthetic
    }

    pub fn real(&self) -> &[RealSample] {
        &self.real
    }

    /// Per-class `(name, synthetic count, real count)`
    pub fn class_counts(&self) -> Vec<(String, usize, usize)> {
        self.taxonomy
            .names()
            .iter()
            .enumerate()
            .map(|(idx, name)| {
                let syn = self.synthetic.iter().filter(|s| s.class_index == idx).count();
                let real = self.real.iter().filter(|s| s.class_index == idx).count();
                (name.clone(), syn, real)
            })
            .collect()
    }

    pub fn into_parts(self) -> (Vec<SyntheticSample>, Vec<RealSample>, BTreeMap<String, usize>) {
        let class_to_idx = self.taxonomy.class_to_idx().clone();
        (self.synthetic, self.real, class_to_idx)
    }
}

/// Directory entries sorted by file name
fn sorted_entries(dir: &Path) -> Result<Vec<fs::DirEntry>> {
    let mut entries = fs::read_dir(dir)
        .map_err(|e| Error::io(dir, e))?
        .collect::<std::io::Result<Vec<_>>>()
        .map_err(|e| Error::io(dir, e))?;
    entries.sort_by_key(|e| e.file_name());
    Ok(entries)
}

/// Qualifying files per class folder, classes and files both sorted
fn class_files(root: &Path, extensions: &[String]) -> Result<Vec<(String, Vec<PathBuf>)>> {
    let mut out = Vec::new();
    for dir in sorted_entries(root)?.into_iter().map(|e| e.path()).filter(|p| p.is_dir()) {
        let Some(class) = dir.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
            continue;
        };
        let mut files = Vec::new();
        walk_sorted(&dir, extensions, &mut files)?;
        out.push((class, files));
    }
    Ok(out)
}

/// Top-down walk: a directory's files first, then its sub-directories
///
/// Symlinked directories are not descended into; symlinked files are kept.
fn walk_sorted(dir: &Path, extensions: &[String], files: &mut Vec<PathBuf>) -> Result<()> {
    let mut dirs = Vec::new();
    for entry in sorted_entries(dir)? {
        let path = entry.path();
        let file_type = entry.file_type().map_err(|e| Error::io(&path, e))?;
        if file_type.is_dir() {
            dirs.push(path);
        } else if file_type.is_symlink() && path.is_dir() {
            debug!("Skipping symlinked directory {}", path.display());
        } else if has_allowed_extension(&entry.file_name().to_string_lossy(), extensions) {
            files.push(path);
        }
    }

    for sub in dirs {
        walk_sorted(&sub, extensions, files)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use tempfile::TempDir;

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        File::create(path).unwrap();
    }

    fn fixture() -> TempDir {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        for class in ["car", "airplane"] {
            for i in 0..3 {
                let pose = PoseAnnotation::new(i * 30, -10, 0, 2);
                touch(&root.join("syn").join(class).join(pose.file_name("c", &format!("i{i}"), "png")));
                touch(&root.join("real").join(class).join(format!("img_{i}.jpg")));
            }
        }
        touch(&root.join("real").join("car").join("notes.txt"));
        touch(&root.join("syn").join("car").join("nested").join("c_z_a001_e002_t003_d004.PNG"));
        tmp
    }

    fn exts() -> Vec<String> {
        IMG_EXTENSIONS.iter().map(|e| e.to_string()).collect()
    }

    #[test]
    fn test_extension_filter() {
        assert!(has_allowed_extension("a.PNG", &exts()));
        assert!(has_allowed_extension("a.jpeg", &exts()));
        assert!(!has_allowed_extension("a.txt", &exts()));
    }

    #[test]
    fn test_build_assigns_sorted_class_indices() {
        let tmp = fixture();
        let index = PairedSampleIndex::build(tmp.path(), &IMG_EXTENSIONS).unwrap();

        assert_eq!(index.taxonomy().names(), &["airplane".to_string(), "car".to_string()]);
        assert_eq!(index.synthetic().len(), 7);
        assert_eq!(index.real().len(), 6);
        assert_eq!(index.synthetic()[0].class_index, 0);
        assert_eq!(index.synthetic()[3].class_index, 1);
        assert_eq!(index.real()[5].class_index, 1);

        // nested files come after the class folder's own files
        let last = index.synthetic().last().unwrap();
        assert_eq!(last.pose, PoseAnnotation::new(1, 2, 3, 4));
    }

    #[test]
    fn test_build_is_deterministic() {
        let tmp = fixture();
        let a = PairedSampleIndex::build(tmp.path(), &IMG_EXTENSIONS).unwrap();
        let b = PairedSampleIndex::build(tmp.path(), &IMG_EXTENSIONS).unwrap();
        assert_eq!(a.synthetic(), b.synthetic());
        assert_eq!(a.real(), b.real());
    }

    #[test]
    fn test_into_parts() {
        let tmp = fixture();
        let (syn, real, class_to_idx) = PairedSampleIndex::build(tmp.path(), &IMG_EXTENSIONS)
            .unwrap()
            .into_parts();
        assert_eq!(syn.len(), 7);
        assert_eq!(real.len(), 6);
        assert_eq!(class_to_idx.get("car"), Some(&1));
    }

    #[test]
    fn test_empty_after_filtering_is_error() {
        let tmp = fixture();
        let err = PairedSampleIndex::build(tmp.path(), &[".bmp"]).unwrap_err();
        match err {
            Error::EmptyDatasetError { root, extensions } => {
                assert!(root.ends_with("syn"));
                assert_eq!(extensions, vec![".bmp".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_empty_real_root_is_error() {
        let tmp = TempDir::new().unwrap();
        touch(&tmp.path().join("syn/car/c_i_a001_e002_t003_d004.png"));
        fs::create_dir_all(tmp.path().join("real/car")).unwrap();
        let err = PairedSampleIndex::build(tmp.path(), &IMG_EXTENSIONS).unwrap_err();
        assert!(matches!(err, Error::EmptyDatasetError { ref root, .. } if root.ends_with("real")));
    }

    #[test]
    fn test_unknown_synthetic_class_is_error() {
        let tmp = fixture();
        touch(&tmp.path().join("syn/boat/c_i_a001_e002_t003_d004.png"));
        let err = PairedSampleIndex::build(tmp.path(), &IMG_EXTENSIONS).unwrap_err();
        assert!(matches!(err, Error::UnknownClassError { ref class, .. } if class == "boat"));
    }

    #[test]
    fn test_bad_pose_name_is_format_error() {
        let tmp = fixture();
        touch(&tmp.path().join("syn/car/render.png"));
        let err = PairedSampleIndex::build(tmp.path(), &IMG_EXTENSIONS).unwrap_err();
        assert!(matches!(err, Error::FormatError { .. }));
    }

    #[test]
    fn test_format_error_names_full_path() {
        let tmp = fixture();
        touch(&tmp.path().join("syn/car/render.png"));
        match PairedSampleIndex::build(tmp.path(), &IMG_EXTENSIONS).unwrap_err() {
            Error::FormatError { file, .. } => {
                assert!(file.ends_with("render.png"));
                assert!(file.contains("syn"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_non_utf8_name_is_reported() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let tmp = fixture();
        let name = OsStr::from_bytes(b"bad\xff.png");
        if File::create(tmp.path().join("syn/car").join(name)).is_err() {
            // filesystem rejects non-UTF-8 names
            return;
        }
        match PairedSampleIndex::build(tmp.path(), &IMG_EXTENSIONS).unwrap_err() {
            Error::FormatError { file, .. } => assert!(file.contains("bad")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinked_directories_are_not_followed() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        let pose = PoseAnnotation::new(0, 0, 0, 1);
        touch(&root.join("syn/car").join(pose.file_name("c", "i", "png")));
        touch(&root.join("real/car/x.png"));
        std::os::unix::fs::symlink("..", root.join("real/car/loop")).unwrap();
        std::os::unix::fs::symlink("..", root.join("syn/car/loop")).unwrap();

        let index = PairedSampleIndex::build(root, &IMG_EXTENSIONS).unwrap();
        assert_eq!(index.real().len(), 1);
        assert_eq!(index.synthetic().len(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinked_files_are_kept() {
        let tmp = fixture();
        let target = tmp.path().join("real/car/img_0.jpg");
        std::os::unix::fs::symlink(&target, tmp.path().join("real/car/alias.jpg")).unwrap();

        let index = PairedSampleIndex::build(tmp.path(), &IMG_EXTENSIONS).unwrap();
        assert_eq!(index.real().len(), 7);
    }

    #[test]
    fn test_class_counts() {
        let tmp = fixture();
        let index = PairedSampleIndex::build(tmp.path(), &IMG_EXTENSIONS).unwrap();
        let counts = index.class_counts();
        assert_eq!(counts[0], ("airplane".to_string(), 3, 3));
        assert_eq!(counts[1], ("car".to_string(), 4, 3));
    }
}
