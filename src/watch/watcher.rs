// src/watch/watcher.rs

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use notify::event::{ModifyKind, RenameMode};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::dag::Pipeline;
use crate::engine::RuntimeEvent;
use crate::fs::{FileSystem, RealFileSystem};
use crate::types::WatchEventKind;
use crate::watch::hash::{ContentHashes, compute_file_hash};
use crate::watch::patterns::{collect_matching_files, rel_string};

/// Handle for the filesystem watcher.
///
/// Keeps the underlying `RecommendedWatcher` alive. Dropping this handle
/// stops file watching.
pub struct WatcherHandle {
    _inner: RecommendedWatcher,
}

impl std::fmt::Debug for WatcherHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatcherHandle").finish()
    }
}

/// Spawn a filesystem watcher on `root` that sends
/// `RuntimeEvent::FileChanged` for every change under a path some watch rule
/// of `pipeline` could match.
///
/// With `use_hash`, modifications that leave a file's content unchanged are
/// dropped.
pub fn spawn_watcher(
    root: impl Into<PathBuf>,
    pipeline: Arc<Pipeline>,
    runtime_tx: mpsc::Sender<RuntimeEvent>,
    use_hash: bool,
) -> Result<WatcherHandle> {
    let root = root.into();
    // Canonicalize once so event paths can be stripped reliably.
    let root = root.canonicalize().unwrap_or(root);

    // Channel from the blocking notify callback into the async world.
    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<Event>();

    let mut watcher = RecommendedWatcher::new(
        move |res: notify::Result<Event>| match res {
            Ok(event) => {
                if let Err(err) = event_tx.send(event) {
                    warn!(error = %err, "failed to forward notify event");
                }
            }
            Err(err) => {
                warn!(error = %err, "file watch error");
            }
        },
        Config::default(),
    )?;

    watcher.watch(&root, RecursiveMode::Recursive)?;
    info!("file watcher started on {:?}", root);

    tokio::spawn(async move {
        let fs = RealFileSystem;
        let mut hashes = ContentHashes::new();
        if use_hash {
            prime_hashes(&fs, &root, &pipeline, &mut hashes);
        }

        while let Some(event) = event_rx.recv().await {
            debug!(?event, "received notify event");

            for (path, kind) in classify(&event, &fs) {
                let Some(rel) = relative_to(&root, &path) else {
                    debug!(?path, "event outside the project root");
                    continue;
                };
                if !pipeline.rules().iter().any(|r| r.patterns().matches(&rel)) {
                    continue;
                }
                if use_hash && !content_changed(&fs, &mut hashes, &path, &rel, kind) {
                    continue;
                }

                if runtime_tx
                    .send(RuntimeEvent::FileChanged { path: rel, kind })
                    .await
                    .is_err()
                {
                    debug!("runtime channel closed; stopping watcher loop");
                    return;
                }
            }
        }
        debug!("watcher event loop finished");
    });

    Ok(WatcherHandle { _inner: watcher })
}

/// Map a notify event onto `(path, kind)` pairs. Access and metadata-only
/// events are ignored; renames become a delete of the old path and a create
/// of the new one.
pub fn classify(event: &Event, fs: &dyn FileSystem) -> Vec<(PathBuf, WatchEventKind)> {
    let all = |kind: WatchEventKind| -> Vec<(PathBuf, WatchEventKind)> {
        event.paths.iter().map(|p| (p.clone(), kind)).collect()
    };

    match &event.kind {
        EventKind::Create(_) => all(WatchEventKind::Created),
        EventKind::Remove(_) => all(WatchEventKind::Deleted),
        EventKind::Modify(ModifyKind::Metadata(_)) => Vec::new(),
        EventKind::Modify(ModifyKind::Name(mode)) => match mode {
            RenameMode::From => all(WatchEventKind::Deleted),
            RenameMode::To => all(WatchEventKind::Created),
            RenameMode::Both => {
                let mut out = Vec::new();
                if let Some(from) = event.paths.first() {
                    out.push((from.clone(), WatchEventKind::Deleted));
                }
                if let Some(to) = event.paths.get(1) {
                    out.push((to.clone(), WatchEventKind::Created));
                }
                out
            }
            _ => event
                .paths
                .iter()
                .map(|p| {
                    let kind = if fs.exists(p) {
                        WatchEventKind::Created
                    } else {
                        WatchEventKind::Deleted
                    };
                    (p.clone(), kind)
                })
                .collect(),
        },
        EventKind::Modify(_) => all(WatchEventKind::Modified),
        _ => Vec::new(),
    }
}

/// `path` relative to `root` with forward slashes, or `None` if it is not
/// below `root`. Falls back to canonical paths (macOS reports
/// `/private/var/...` for `/var/...`).
fn relative_to(root: &Path, path: &Path) -> Option<String> {
    if let Ok(rel) = path.strip_prefix(root) {
        return Some(rel_string(rel));
    }
    let canon = canonicalize_lenient(path)?;
    canon.strip_prefix(root).ok().map(rel_string)
}

/// Deleted files cannot be canonicalized; use their parent instead.
fn canonicalize_lenient(path: &Path) -> Option<PathBuf> {
    if let Ok(canon) = path.canonicalize() {
        return Some(canon);
    }
    let parent = path.parent()?.canonicalize().ok()?;
    Some(parent.join(path.file_name()?))
}

fn content_changed(
    fs: &dyn FileSystem,
    hashes: &mut ContentHashes,
    path: &Path,
    rel: &str,
    kind: WatchEventKind,
) -> bool {
    if kind == WatchEventKind::Deleted {
        hashes.forget(rel);
        return true;
    }
    match compute_file_hash(fs, path) {
        Ok(hash) => hashes.changed(rel, hash),
        Err(e) => {
            debug!(path = rel, error = %e, "could not hash; treating as changed");
            true
        }
    }
}

fn prime_hashes(fs: &dyn FileSystem, root: &Path, pipeline: &Pipeline, hashes: &mut ContentHashes) {
    let mut primed = 0usize;
    for rule in pipeline.rules() {
        let files = match collect_matching_files(fs, root, rule.patterns()) {
            Ok(files) => files,
            Err(e) => {
                warn!(rule = rule.name(), "failed to prime content hashes: {e:#}");
                continue;
            }
        };
        for rel in files {
            if let Ok(hash) = compute_file_hash(fs, &root.join(&rel)) {
                hashes.changed(&rel_string(&rel), hash);
                primed += 1;
            }
        }
    }
    debug!(files = primed, "primed content hashes");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::mock::MockFileSystem;
    use notify::event::{CreateKind, DataChange, MetadataKind};

    fn event(kind: EventKind, paths: &[&str]) -> Event {
        paths
            .iter()
            .fold(Event::new(kind), |ev, p| ev.add_path(PathBuf::from(p)))
    }

    #[test]
    fn classifies_notify_events() {
        let fs = MockFileSystem::new();

        let created = event(EventKind::Create(CreateKind::File), &["/p/app/a.js"]);
        assert_eq!(
            classify(&created, &fs),
            vec![(PathBuf::from("/p/app/a.js"), WatchEventKind::Created)]
        );

        let written = event(
            EventKind::Modify(ModifyKind::Data(DataChange::Content)),
            &["/p/app/a.js"],
        );
        assert_eq!(classify(&written, &fs)[0].1, WatchEventKind::Modified);

        let touched = event(
            EventKind::Modify(ModifyKind::Metadata(MetadataKind::WriteTime)),
            &["/p/app/a.js"],
        );
        assert!(classify(&touched, &fs).is_empty());

        let renamed = event(
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
            &["/p/app/old.js", "/p/app/new.js"],
        );
        assert_eq!(
            classify(&renamed, &fs),
            vec![
                (PathBuf::from("/p/app/old.js"), WatchEventKind::Deleted),
                (PathBuf::from("/p/app/new.js"), WatchEventKind::Created),
            ]
        );
    }

    #[test]
    fn relative_paths_use_forward_slashes() {
        let root = Path::new("/project");
        assert_eq!(
            relative_to(root, Path::new("/project/app/scss/main.scss")).as_deref(),
            Some("app/scss/main.scss")
        );
        assert_eq!(relative_to(root, Path::new("/elsewhere/x.css")), None);
    }
}
