//! Per-test artifact namespaces.
//!
//! Every test gets its own directory `build/<test-id>/`, so concurrent pipelines for distinct ids never share a
//! path. Allocation always starts from an empty directory: a stale object or image from an earlier run can never be
//! picked up in place of one that failed to build this time.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use rct_core::TestId;

/// Intermediate files for one pipeline run. Owned by exactly one in-flight pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineArtifacts {
    pub id: TestId,
    pub dir: PathBuf,
    pub assembly: PathBuf,
    pub ir: PathBuf,
    pub object: PathBuf,
    /// Linked macro program (interpreter backend)
    pub macro_program: PathBuf,
    /// Flat program produced by macro expansion (interpreter backend)
    pub expanded: PathBuf,
    /// Linked binary image (virtual machine backend)
    pub image: PathBuf,
    pub disassembly: PathBuf,
}

impl PipelineArtifacts {
    fn new(id: &TestId, dir: PathBuf) -> Self {
        let file = |suffix: &str| dir.join(format!("{id}{suffix}"));
        Self {
            assembly: file(".asm"),
            ir: file(".ir"),
            object: file(".pobj"),
            macro_program: file(".bfm"),
            expanded: file("_expanded.bf"),
            image: file(".bin"),
            disassembly: file(".disassembly.asm"),
            id: id.clone(),
            dir,
        }
    }
}

/// Hands out and tears down artifact namespaces under one build directory.
#[derive(Debug, Clone)]
pub struct ArtifactManager {
    build_dir: PathBuf,
}

impl ArtifactManager {
    pub fn new(build_dir: impl Into<PathBuf>) -> Self {
        Self {
            build_dir: build_dir.into(),
        }
    }

    pub fn build_dir(&self) -> &Path {
        &self.build_dir
    }

    /// Where artifacts for `id` live, without touching the filesystem.
    pub fn layout_for(&self, id: &TestId) -> PipelineArtifacts {
        PipelineArtifacts::new(id, self.build_dir.join(id.as_str()))
    }

    /// Erase anything left under `id` and create a fresh, empty namespace.
    pub async fn allocate(&self, id: &TestId) -> io::Result<PipelineArtifacts> {
        let artifacts = self.layout_for(id);
        match tokio::fs::remove_dir_all(&artifacts.dir).await {
            Ok(()) => tracing::debug!(%id, "removed stale artifacts"),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(err),
        }
        tokio::fs::create_dir_all(&artifacts.dir).await?;
        Ok(artifacts)
    }

    /// End of a pipeline run: keep the namespace for inspection or purge it.
    pub async fn release(&self, artifacts: PipelineArtifacts, keep: bool) -> io::Result<()> {
        if keep {
            return Ok(());
        }
        match tokio::fs::remove_dir_all(&artifacts.dir).await {
            Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err),
            _ => Ok(()),
        }
    }

    /// Remove every generated file under the build directory. Returns how many files were deleted.
    pub fn clean_all(&self) -> io::Result<usize> {
        if !self.build_dir.is_dir() {
            return Ok(0);
        }
        let removed = remove_contents(&self.build_dir)?;
        tracing::debug!(dir = %self.build_dir.display(), removed, "cleaned build directory");
        Ok(removed)
    }
}

fn remove_contents(dir: &Path) -> io::Result<usize> {
    let mut removed = 0;
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            removed += remove_contents(&path)?;
            fs::remove_dir(&path)?;
        } else {
            fs::remove_file(&path)?;
            removed += 1;
        }
    }
    Ok(removed)
}
