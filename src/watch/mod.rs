//! Watch loop.
//!
//! Observes the source tree and turns file changes into compiles, hash
//! propagation and live-reload events.
//!
//! ```text
//! notify ─▶ bridge thread ─▶ scope filter ─▶ Debouncer (per specifier)
//!                                                 │ deadline
//!                                                 ▼
//!                               handler: add / modify / remove ─▶ EventHub
//! ```

// Path filtering (hidden, temp, build dir, configured patterns).
mod classifier;
// Per-specifier deadline map.
mod debouncer;
// Fire-time classification and side effects.
mod handler;
// Watch root attach/re-attach lifecycle.
mod roots;
// Change kinds.
mod types;

#[cfg(test)]
mod tests;

pub(crate) use classifier::is_ignored_file;

use std::time::Instant;

use notify::{EventKind, RecommendedWatcher};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::engine::Engine;
use crate::{debug, log};
use classifier::WatchScope;
use debouncer::Debouncer;
use roots::WatchRoots;

/// Running watch loop. Dropping the handle also stops the loop, without
/// waiting for it.
pub struct WatchHandle {
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl WatchHandle {
    /// Signal shutdown and wait for the loop to exit. Pending debounced
    /// changes are dropped.
    pub async fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        let _ = self.task.await;
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Start watching the engine's source directory.
///
/// The watcher is attached before this returns, so changes made right
/// after are not lost.
pub(crate) fn spawn(engine: Engine) -> notify::Result<WatchHandle> {
    let (notify_tx, notify_rx) = crossbeam::channel::unbounded();
    let mut watcher = notify::recommended_watcher(move |res| {
        let _ = notify_tx.send(res);
    })?;

    let src_dir = engine.compiler().src_dir().to_path_buf();
    let mut roots = WatchRoots::new(vec![src_dir.clone()]);
    roots.attach_existing(&mut watcher)?;

    let (event_tx, event_rx) = mpsc::channel::<notify::Event>(256);
    std::thread::spawn(move || {
        while let Ok(result) = notify_rx.recv() {
            match result {
                Ok(event) => {
                    if event_tx.blocking_send(event).is_err() {
                        break;
                    }
                }
                Err(e) => log!("watch"; "notify error: {}", e),
            }
        }
    });

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let task = tokio::spawn(run(engine, watcher, roots, event_rx, shutdown_rx));
    log!("watch"; "watching {}", src_dir.display());

    Ok(WatchHandle {
        shutdown: Some(shutdown_tx),
        task,
    })
}

async fn run(
    engine: Engine,
    mut watcher: RecommendedWatcher,
    mut roots: WatchRoots,
    mut events: mpsc::Receiver<notify::Event>,
    mut shutdown: oneshot::Receiver<()>,
) {
    let scope = WatchScope::new(engine.config());
    let mut debouncer = Debouncer::new(engine.config().watch.debounce());

    loop {
        let deadline = debouncer.next_deadline();
        let sleep_until = tokio::time::Instant::from_std(deadline.unwrap_or_else(Instant::now));

        tokio::select! {
            biased;
            _ = &mut shutdown => break,
            event = events.recv() => match event {
                Some(event) => accept(&engine, &scope, &mut debouncer, &event),
                None => break,
            },
            _ = tokio::time::sleep_until(sleep_until), if deadline.is_some() => {
                roots.maintain(&mut watcher);
                for specifier in debouncer.take_due(Instant::now()) {
                    handler::handle(&engine, &scope, specifier).await;
                }
            }
        }
    }

    if debouncer.len() > 0 {
        debug!("watch"; "dropping {} pending changes", debouncer.len());
    }
    debouncer.clear();
    log!("watch"; "stopped");
}

/// Schedule every in-scope path of a raw notify event.
fn accept(engine: &Engine, scope: &WatchScope, debouncer: &mut Debouncer, event: &notify::Event) {
    match event.kind {
        EventKind::Create(_) | EventKind::Remove(_) => {}
        // Metadata-only changes (mtime, chmod) carry no content
        EventKind::Modify(notify::event::ModifyKind::Metadata(_)) => return,
        EventKind::Modify(_) => {}
        _ => return,
    }

    let now = Instant::now();
    for path in &event.paths {
        let Some(specifier) = scope.specifier_of(path) else {
            continue;
        };
        if scope.accepts(&specifier, engine.compiler().plugins(), engine.registry()) {
            debug!("watch"; "{:?} {}", event.kind, specifier);
            debouncer.schedule(specifier, now);
        }
    }
}
