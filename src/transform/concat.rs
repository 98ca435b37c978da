// src/transform/concat.rs

use std::path::PathBuf;

use anyhow::Context;

use super::{Outputs, Transform, TransformFuture, TransformInput, TransformSettings};
use crate::errors::{AssetflowError, Result, TransformError};

/// Concatenates all sources, in sorted path order, into
/// `<output_path>/<output_file>`.
#[derive(Debug)]
pub struct ConcatTransform {
    name: String,
    settings: TransformSettings,
    separator: String,
    target: PathBuf,
}

impl ConcatTransform {
    pub fn new(name: impl Into<String>, settings: TransformSettings, separator: String) -> Result<Self> {
        let name = name.into();
        if settings.output_file().is_none() {
            return Err(AssetflowError::config(format!(
                "transform '{name}': concat requires `output_file`"
            )));
        }
        let target = settings.declared_output();
        Ok(Self {
            name,
            settings,
            separator,
            target,
        })
    }
}

impl Transform for ConcatTransform {
    fn name(&self) -> &str {
        &self.name
    }

    fn settings(&self) -> &TransformSettings {
        &self.settings
    }

    fn run<'a>(&'a self, input: TransformInput<'a>) -> TransformFuture<'a> {
        Box::pin(async move {
            let mut buf: Vec<u8> = Vec::new();
            for (i, source) in input.sources.iter().enumerate() {
                if i > 0 {
                    buf.extend_from_slice(self.separator.as_bytes());
                }
                let bytes = input
                    .fs
                    .read(&input.root.join(source))
                    .map_err(|e| TransformError::from_anyhow(&self.name, "read", &e))?;
                buf.extend_from_slice(&bytes);
            }

            input
                .fs
                .write(&input.root.join(&self.target), &buf)
                .with_context(|| format!("writing {:?}", self.target))
                .map_err(|e| TransformError::from_anyhow(&self.name, "write", &e))?;

            Ok(Outputs::from([self.target.clone()]))
        })
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;
    use crate::fs::FileSystem;
    use crate::fs::mock::MockFileSystem;

    #[tokio::test]
    async fn joins_sources_with_separator() {
        let fs = MockFileSystem::new();
        fs.add_file("./app/css/a.css", "a{}");
        fs.add_file("./app/css/b.css", "b{}");
        let settings = TransformSettings::new(&["app/css/*.css".to_string()], "app/build")
            .unwrap()
            .with_output_file("all.css");
        let t = ConcatTransform::new("css", settings, "\n".to_string()).unwrap();

        let sources = vec![PathBuf::from("app/css/a.css"), PathBuf::from("app/css/b.css")];
        let out = t
            .run(TransformInput { root: Path::new("."), sources: &sources, fs: &fs })
            .await
            .unwrap();

        assert!(out.contains(Path::new("app/build/all.css")));
        assert_eq!(
            fs.read_to_string(Path::new("./app/build/all.css")).unwrap(),
            "a{}\nb{}"
        );
    }

    #[test]
    fn requires_output_file() {
        let settings = TransformSettings::new(&["a/*.js".to_string()], "out").unwrap();
        let err = ConcatTransform::new("js", settings, String::new()).unwrap_err();
        assert!(matches!(err, AssetflowError::Configuration(_)));
    }
}
