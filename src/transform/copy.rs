// src/transform/copy.rs

use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing::debug;

use super::{Outputs, Transform, TransformFuture, TransformInput, TransformSettings};
use crate::errors::TransformError;

/// Copies every source into the output directory.
///
/// The path below `base` is preserved (`app/fonts/a/b.woff` with base `app`
/// lands in `<output>/fonts/a/b.woff`). Without an explicit base, the
/// literal directory prefix of the matching glob is used.
#[derive(Debug)]
pub struct CopyTransform {
    name: String,
    settings: TransformSettings,
    base: Option<PathBuf>,
}

impl CopyTransform {
    pub fn new(name: impl Into<String>, settings: TransformSettings, base: Option<String>) -> Self {
        Self {
            name: name.into(),
            settings,
            base: base.map(PathBuf::from),
        }
    }

    fn destination(&self, source: &Path) -> PathBuf {
        let suffix = self.strip_base(source);
        self.settings.output_path().join(suffix)
    }

    fn strip_base<'p>(&self, source: &'p Path) -> &'p Path {
        if let Some(base) = &self.base {
            if let Ok(rest) = source.strip_prefix(base) {
                return rest;
            }
        }
        // Longest glob base that contains the source wins.
        let mut best: Option<&'p Path> = None;
        for base in self.settings.sources().bases() {
            if let Ok(rest) = source.strip_prefix(base) {
                if best.is_none_or(|b| rest.components().count() < b.components().count()) {
                    best = Some(rest);
                }
            }
        }
        best.unwrap_or(source)
    }
}

impl Transform for CopyTransform {
    fn name(&self) -> &str {
        &self.name
    }

    fn settings(&self) -> &TransformSettings {
        &self.settings
    }

    fn run<'a>(&'a self, input: TransformInput<'a>) -> TransformFuture<'a> {
        Box::pin(async move {
            let mut outputs = Outputs::new();
            for source in input.sources {
                let dest = self.destination(source);
                let copied = input
                    .fs
                    .read(&input.root.join(source))
                    .and_then(|bytes| input.fs.write(&input.root.join(&dest), &bytes))
                    .with_context(|| format!("copying {source:?} to {dest:?}"));
                if let Err(err) = copied {
                    return Err(TransformError::from_anyhow(&self.name, "copy", &err));
                }
                debug!(transform = %self.name, from = ?source, to = ?dest, "copied");
                outputs.insert(dest);
            }
            Ok(outputs)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::FileSystem;
    use crate::fs::mock::MockFileSystem;

    fn settings(globs: &[&str], out: &str) -> TransformSettings {
        let globs: Vec<String> = globs.iter().map(|s| s.to_string()).collect();
        TransformSettings::new(&globs, out).unwrap()
    }

    #[tokio::test]
    async fn preserves_path_below_glob_base() {
        let fs = MockFileSystem::new();
        fs.add_file("./app/images/icons/a.png", "png");
        let t = CopyTransform::new("images", settings(&["app/images/**/*.png"], "dist/images"), None);

        let sources = vec![PathBuf::from("app/images/icons/a.png")];
        let out = t
            .run(TransformInput { root: Path::new("."), sources: &sources, fs: &fs })
            .await
            .unwrap();

        assert_eq!(
            out.into_iter().collect::<Vec<_>>(),
            vec![PathBuf::from("dist/images/icons/a.png")]
        );
        assert_eq!(fs.read(Path::new("./dist/images/icons/a.png")).unwrap(), b"png");
    }

    #[tokio::test]
    async fn explicit_base_overrides_glob_base() {
        let fs = MockFileSystem::new();
        fs.add_file("./app/css/style.min.css", "css");
        let t = CopyTransform::new(
            "dist",
            settings(&["app/css/style.min.css"], "dist"),
            Some("app".to_string()),
        );

        let sources = vec![PathBuf::from("app/css/style.min.css")];
        let out = t
            .run(TransformInput { root: Path::new("."), sources: &sources, fs: &fs })
            .await
            .unwrap();
        assert!(out.contains(Path::new("dist/css/style.min.css")));
    }

    #[tokio::test]
    async fn missing_source_reports_copy_stage() {
        let fs = MockFileSystem::new();
        let t = CopyTransform::new("images", settings(&["app/*.png"], "dist"), None);
        let sources = vec![PathBuf::from("app/gone.png")];

        let err = t
            .run(TransformInput { root: Path::new("."), sources: &sources, fs: &fs })
            .await
            .unwrap_err();
        assert_eq!(err.transform, "images");
        assert_eq!(err.stage, "copy");
    }
}
