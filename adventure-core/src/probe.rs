use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::instrument;

use crate::config::ViewerConfig;
use crate::{PageHandle, PageIndex};

/// Looks up the on-disk resources that back each node of the adventure graph.
pub trait ResourceProbe: Send + Sync {
    fn has_page(&self, index: PageIndex) -> bool;
    fn has_branches(&self, index: PageIndex) -> bool;
    fn open_page(&self, index: PageIndex) -> Result<PageHandle>;
    /// Raw text of the branch options resource.
    fn open_branches(&self, index: PageIndex) -> Result<String>;
}

/// Resources laid out as `<index>.<document_extension>` and
/// `<index>.<branch_extension>` inside one directory.
#[derive(Debug, Clone)]
pub struct DirectoryProbe {
    root: PathBuf,
    document_extension: String,
    branch_extension: String,
}

impl DirectoryProbe {
    pub fn new(root: PathBuf) -> Self {
        Self::with_extensions(root, "pdf", "txt")
    }

    pub fn with_extensions(
        root: PathBuf,
        document_extension: &str,
        branch_extension: &str,
    ) -> Self {
        Self {
            root,
            document_extension: document_extension.trim_start_matches('.').to_owned(),
            branch_extension: branch_extension.trim_start_matches('.').to_owned(),
        }
    }

    pub fn from_config(root: PathBuf, config: &ViewerConfig) -> Self {
        Self::with_extensions(root, &config.document_extension, &config.branch_extension)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn page_path(&self, index: PageIndex) -> PathBuf {
        self.root
            .join(format!("{}.{}", index.value(), self.document_extension))
    }

    pub fn branch_path(&self, index: PageIndex) -> PathBuf {
        self.root
            .join(format!("{}.{}", index.value(), self.branch_extension))
    }
}

impl ResourceProbe for DirectoryProbe {
    fn has_page(&self, index: PageIndex) -> bool {
        index.is_known() && self.page_path(index).is_file()
    }

    fn has_branches(&self, index: PageIndex) -> bool {
        index.is_known() && self.branch_path(index).is_file()
    }

    #[instrument(skip(self))]
    fn open_page(&self, index: PageIndex) -> Result<PageHandle> {
        let path = self.page_path(index);
        fs::File::open(&path).with_context(|| format!("failed to open page {:?}", path))?;
        Ok(PageHandle::new(path, 0))
    }

    #[instrument(skip(self))]
    fn open_branches(&self, index: PageIndex) -> Result<String> {
        let path = self.branch_path(index);
        fs::read_to_string(&path)
            .with_context(|| format!("failed to read branch options {:?}", path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tempfile::tempdir;

    fn idx(value: u32) -> PageIndex {
        PageIndex::new(value).unwrap()
    }

    #[test]
    fn directory_probe_finds_pages_and_branches() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("0.pdf"), b"%PDF-1.4").unwrap();
        std::fs::write(dir.path().join("0.txt"), b"1 2").unwrap();
        std::fs::write(dir.path().join("1.pdf"), b"%PDF-1.4").unwrap();

        let probe = DirectoryProbe::new(dir.path().to_path_buf());

        assert!(probe.has_page(idx(0)));
        assert!(probe.has_branches(idx(0)));
        assert!(probe.has_page(idx(1)));
        assert!(!probe.has_branches(idx(1)));
        assert!(!probe.has_page(idx(2)));
        assert!(!probe.has_page(PageIndex::UNKNOWN));

        assert_eq!(probe.open_branches(idx(0)).unwrap(), "1 2");
        let handle = probe.open_page(idx(1)).unwrap();
        assert_eq!(handle.page, 0);
        assert!(handle.path.ends_with("1.pdf"));
    }

    #[test]
    fn directory_probe_honours_custom_extensions() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("3.PDF"), b"%PDF-1.4").unwrap();
        std::fs::write(dir.path().join("3.opts"), b"4").unwrap();

        let probe = DirectoryProbe::with_extensions(dir.path().to_path_buf(), ".PDF", "opts");
        assert!(probe.has_page(idx(3)));
        assert!(probe.has_branches(idx(3)));
    }

    #[test]
    fn opening_a_missing_resource_is_an_error() {
        let dir = tempdir().unwrap();
        let probe = DirectoryProbe::new(dir.path().to_path_buf());
        let err = probe.open_branches(idx(7)).unwrap_err();
        assert!(err.to_string().contains("7.txt"));
        assert!(probe.open_page(idx(7)).is_err());
    }
}
