//! # Bus Lock
//!
//! Exclusive access to the GPIO bus, across threads of this process and across
//! independent processes sharing the same header.
//!
//! Two layers are taken in order:
//!
//! 1. an in-process [`Mutex`] that owns the GPIO handle, and
//! 2. an advisory marker file. Whoever creates the file holds the bus. A marker
//!    older than [`LockConfig::expire`] is considered abandoned by a crashed
//!    holder and is reclaimed.
//!
//! Both are released when the [`BusGuard`] is dropped.
use std::{
    fs::{self, OpenOptions},
    io::{self, ErrorKind},
    ops::{Deref, DerefMut},
    path::{Path, PathBuf},
    process,
    sync::{
        Mutex, MutexGuard, TryLockError,
        atomic::{AtomicUsize, Ordering},
    },
    thread,
    time::{Duration, Instant, SystemTime},
};

use crate::error::FicError;

/// How often the in-process mutex is retried while another thread holds it.
const MUTEX_POLL_INTERVAL: Duration = Duration::from_millis(5);

#[derive(Debug, Clone)]
pub struct LockConfig {
    /// Marker file shared by every program that drives the bus.
    pub path: PathBuf,
    /// Give up acquiring after this long.
    pub timeout: Duration,
    /// A marker older than this is reclaimed.
    pub expire: Duration,
    /// Retry interval while the marker exists.
    pub poll_interval: Duration,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/tmp/gpio.lock"),
            timeout: Duration::from_secs(10),
            expire: Duration::from_secs(120),
            poll_interval: Duration::from_secs(1),
        }
    }
}

/// Owns the bus resource `T` and hands it out to one holder at a time.
#[derive(Debug)]
pub struct BusLock<T> {
    resource: Mutex<T>,
    config: LockConfig,
}

/// Exclusive access to the bus. Dereferences to the guarded resource.
pub struct BusGuard<'a, T> {
    resource: MutexGuard<'a, T>,
    marker: &'a Path,
}

impl<T> BusLock<T> {
    pub fn new(resource: T, config: LockConfig) -> BusLock<T> {
        BusLock {
            resource: Mutex::new(resource),
            config,
        }
    }

    /// Blocks until the bus is available or the configured timeout elapsed.
    pub fn acquire(&self) -> Result<BusGuard<'_, T>, FicError> {
        let start = Instant::now();
        let resource = self.lock_resource(start)?;
        self.create_marker(start)?;
        log::trace!("Bus lock {} acquired", self.config.path.display());
        Ok(BusGuard {
            resource,
            marker: &self.config.path,
        })
    }

    fn timeout_error(&self) -> FicError {
        FicError::LockTimeout {
            path: self.config.path.clone(),
            timeout: self.config.timeout,
        }
    }

    fn lock_resource(&self, start: Instant) -> Result<MutexGuard<'_, T>, FicError> {
        loop {
            match self.resource.try_lock() {
                Ok(guard) => return Ok(guard),
                // Every hardware operation re-initializes the pins it uses,
                // so a holder that panicked leaves nothing to recover.
                Err(TryLockError::Poisoned(poisoned)) => return Ok(poisoned.into_inner()),
                Err(TryLockError::WouldBlock) => {}
            }
            if start.elapsed() >= self.config.timeout {
                return Err(self.timeout_error());
            }
            thread::sleep(MUTEX_POLL_INTERVAL);
        }
    }

    fn create_marker(&self, start: Instant) -> Result<(), FicError> {
        let path = &self.config.path;
        loop {
            match OpenOptions::new().write(true).create_new(true).open(path) {
                Ok(_) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                    if let Some(age) = marker_age(path)?
                        && age > self.config.expire
                        && reclaim_stale(path, self.config.expire)?
                    {
                        log::warn!(
                            "Reclaimed stale bus lock {} (age {:?})",
                            path.display(),
                            age
                        );
                        continue;
                    }
                }
                Err(err) => return Err(err.into()),
            }
            if start.elapsed() >= self.config.timeout {
                log::debug!("Bus lock {} still held, giving up", path.display());
                return Err(self.timeout_error());
            }
            thread::sleep(self.config.poll_interval);
        }
    }
}

/// Age of the marker, `None` if it vanished in the meantime.
fn marker_age(path: &Path) -> io::Result<Option<Duration>> {
    match fs::metadata(path) {
        Ok(meta) => {
            let modified = meta.modified()?;
            Ok(Some(
                SystemTime::now()
                    .duration_since(modified)
                    .unwrap_or(Duration::ZERO),
            ))
        }
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err),
    }
}

/// Moves a stale marker out of the way and deletes it.
///
/// The marker is first renamed to a name private to this call, so a marker
/// another process recreated after the age check is never deleted. If the
/// renamed file turns out to be fresh it is linked back. Returns whether the
/// stale marker is gone.
fn reclaim_stale(path: &Path, expire: Duration) -> io::Result<bool> {
    static RECLAIMS: AtomicUsize = AtomicUsize::new(0);
    let mut aside = path.as_os_str().to_owned();
    aside.push(format!(
        ".stale-{}-{}",
        process::id(),
        RECLAIMS.fetch_add(1, Ordering::Relaxed)
    ));
    let aside = PathBuf::from(aside);

    match fs::rename(path, &aside) {
        Ok(()) => {}
        // Someone else reclaimed it first
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(true),
        Err(err) => return Err(err),
    }
    let still_stale = marker_age(&aside)?.is_none_or(|age| age > expire);
    if !still_stale {
        log::debug!("Bus lock {} was renewed, putting it back", path.display());
        match fs::hard_link(&aside, path) {
            Ok(()) => {}
            // A newer marker took its place, the bus stays held either way
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {}
            Err(err) => return Err(err),
        }
    }
    match fs::remove_file(&aside) {
        Err(err) if err.kind() != ErrorKind::NotFound => Err(err),
        _ => Ok(still_stale),
    }
}

impl<T> Deref for BusGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.resource
    }
}

impl<T> DerefMut for BusGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.resource
    }
}

impl<T> Drop for BusGuard<'_, T> {
    fn drop(&mut self) {
        match fs::remove_file(self.marker) {
            Ok(()) => log::trace!("Bus lock {} released", self.marker.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                log::error!(
                    "Bus lock {} vanished while held, it was reclaimed as stale",
                    self.marker.display()
                );
            }
            Err(err) => {
                // A marker that cannot be removed blocks every future bus access
                log::error!(
                    "Cannot release bus lock {}: {}",
                    self.marker.display(),
                    err
                );
                std::process::abort();
            }
        }
    }
}
