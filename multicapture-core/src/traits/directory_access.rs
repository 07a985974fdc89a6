use std::path::PathBuf;

/// Access to the user-granted export directory.
///
/// The grant itself (security-scoped bookmark or similar) is persisted by the
/// host. The engine acquires it for the lifetime of one recording.
pub trait DirectoryAccess: Send {
    /// Begin using the grant. Returns `false` if access could not be obtained.
    fn acquire(&mut self) -> bool;

    /// The writable directory, or `None` if unavailable.
    fn resolve(&self) -> Option<PathBuf>;

    fn release(&mut self);
}

/// A plain directory that needs no grant.
#[derive(Debug, Clone)]
pub struct FixedDirectory {
    path: PathBuf,
}

impl FixedDirectory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl DirectoryAccess for FixedDirectory {
    fn acquire(&mut self) -> bool {
        self.path.is_dir()
    }

    fn resolve(&self) -> Option<PathBuf> {
        self.path.is_dir().then(|| self.path.clone())
    }

    fn release(&mut self) {}
}
