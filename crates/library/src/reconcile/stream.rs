use crate::error::{ErrorKind as LibraryErrorKind, Result as LibraryResult};
use crate::reconcile::error::{ErrorKind, Result};
use crate::reconcile::{RegisterOutcome, Registration};
use crate::{MAX_SCAN_CONCURRENCY, PackageRepository};
use async_stream::stream;
use exn::ResultExt;
use futures::stream::FuturesUnordered;
use futures::{Stream, StreamExt};
use std::future::Future;
use std::path::Path;
use tracing::instrument;

/// Progress events emitted by [`scan`] as it works through the repository
/// directory.
///
/// Events follow a strict ordering:
/// 1. [`Started`](Self::Started): exactly once.
/// 2. [`DiscoveryComplete`](Self::DiscoveryComplete): exactly once, with the
///    number of package files found.
/// 3. [`Registered`](Self::Registered): zero or more times, one per file.
/// 4. [`Complete`](Self::Complete): exactly once.
///
/// Failing to list the directory ends the stream early, in which case
/// [`Complete`](Self::Complete) is never emitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanEvent {
    Started,
    DiscoveryComplete(u64),
    Registered(Registration),
    Complete,
}

/// Totals from draining a [`scan`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanStats {
    pub discovered: u64,
    pub registered: u64,
    pub invalidated: u64,
    pub unchanged: u64,
    pub failed: u64,
}
impl ScanStats {
    fn record(&mut self, outcome: RegisterOutcome) {
        match outcome {
            RegisterOutcome::Registered => self.registered += 1,
            RegisterOutcome::Invalidated => self.invalidated += 1,
            RegisterOutcome::Unchanged => self.unchanged += 1,
        }
    }
}

/// Streams [`ScanEvent`]s while registering every package file in the
/// repository directory.
///
/// The directory is listed up front (non-recursively), then files are
/// registered concurrently, up to [`MAX_SCAN_CONCURRENCY`] at a time, with
/// queued files promoted in listing order as in-flight registrations finish.
///
/// Individual file failures are surfaced as `Err` items without terminating
/// the stream; only a failure to list the directory is fatal.
pub fn scan(repo: &PackageRepository) -> impl Stream<Item = LibraryResult<ScanEvent>> + '_ {
    stream! {
        for await event in scan_inner(repo) {
            yield event.or_raise(|| LibraryErrorKind::Scan);
        }
    }
}

/// Whether a listing error means the directory itself could not be opened.
fn is_root_failure(err: &pkgrepo_storage::error::Error, root: &Path) -> bool {
    use pkgrepo_storage::error::ErrorKind as StorageErrorKind;
    matches!(&**err, StorageErrorKind::NotFound(p) | StorageErrorKind::PermissionDenied(p) if p == root)
}

fn scan_inner(repo: &PackageRepository) -> impl Stream<Item = Result<ScanEvent>> + '_ {
    // `rustfmt` does not format macros that use braces. Wrap in parentheses!
    stream!({
        yield Ok(ScanEvent::Started);

        let mut filenames = Vec::new();
        let mut listing = repo.dir.list_stream();
        while let Some(entry) = listing.next().await {
            match entry {
                Ok(filename) => filenames.push(filename),
                Err(e) if filenames.is_empty() && is_root_failure(&e, repo.dir.root()) => {
                    yield Err(e.raise(ErrorKind::Storage));
                    return;
                },
                // Unreadable entries are skipped.
                Err(e) => yield Err(e.raise(ErrorKind::Storage)),
            }
        }
        filenames.sort();
        // Infallible: a usize (either 32- or 64-bit) will always fit in a u64.
        yield Ok(ScanEvent::DiscoveryComplete(u64::try_from(filenames.len()).unwrap_or(u64::MAX)));

        let registrations = filenames.iter().map(|filename| repo.register_file_inner(filename));
        for await result in bounded(registrations, MAX_SCAN_CONCURRENCY) {
            yield result.map(ScanEvent::Registered);
        }

        yield Ok(ScanEvent::Complete);
    })
}

/// Polls at most `limit` of `futures` at once, starting them in iteration
/// order and yielding outputs as they finish.
fn bounded<I>(futures: I, limit: usize) -> impl Stream<Item = <I::Item as Future>::Output>
where
    I: IntoIterator,
    I::Item: Future,
{
    stream!({
        let mut queued = futures.into_iter();
        let mut processing: FuturesUnordered<_> = queued.by_ref().take(limit.max(1)).collect();
        while let Some(output) = processing.next().await {
            yield output;
            // Pop-n-push, but FIFO instead of LIFO.
            if let Some(next) = queued.next() {
                processing.push(next);
            }
        }
    })
}

impl PackageRepository {
    /// Run a [`scan`] to completion, logging per-file failures.
    #[instrument(skip(self), fields(repo = %self.id))]
    pub async fn scan_directory(&self) -> LibraryResult<ScanStats> {
        let mut stats = ScanStats::default();
        let mut completed = false;
        let events = scan(self);
        futures::pin_mut!(events);
        while let Some(event) = events.next().await {
            match event {
                Ok(ScanEvent::Started) => {},
                Ok(ScanEvent::DiscoveryComplete(count)) => {
                    tracing::debug!(repo = %self.id, count, "Discovered package files");
                    stats.discovered = count;
                },
                Ok(ScanEvent::Registered(registration)) => stats.record(registration.outcome),
                Ok(ScanEvent::Complete) => completed = true,
                Err(error) => {
                    tracing::warn!(repo = %self.id, error = ?error, "Could not register package file");
                    stats.failed += 1;
                },
            }
        }
        if !completed {
            exn::bail!(LibraryErrorKind::Scan);
        }
        tracing::info!(
            repo = %self.id,
            discovered = stats.discovered,
            registered = stats.registered,
            invalidated = stats.invalidated,
            failed = stats.failed,
            "Scan complete"
        );
        Ok(stats)
    }
}
