//! Bug reporter capability and identity.
//!
//! The registry never looks inside a reporter. It needs two things: how
//! many log stores the reporter has (zero means it has nothing to report)
//! and a way to ask it to compose a report. Reporters are identified by a
//! [`ReporterId`] token handed out when the host wraps one in a
//! [`ReporterRef`], never by comparing their contents.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// A collaborator that can produce a bug report.
///
/// `compose_bug_report` runs on the UI thread and should return quickly;
/// long work belongs on a background task.
pub trait BugReporter: Send + Sync {
    /// Number of log stores this reporter draws from.
    fn log_store_count(&self) -> usize;

    /// Start composing a bug report.
    fn compose_bug_report(&self);
}

/// Identity token for a reporter.
///
/// Monotonically increasing counter, assigned once per [`ReporterRef::new`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ReporterId(u64);

impl ReporterId {
    fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ReporterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "reporter-{}", self.0)
    }
}

/// Shared, identity-carrying handle to a reporter.
///
/// Clones are the same reporter. Two refs built from separate `new` calls
/// are distinct reporters even when they wrap equal values.
#[derive(Clone)]
pub struct ReporterRef {
    id: ReporterId,
    inner: Arc<dyn BugReporter>,
}

impl ReporterRef {
    pub fn new<R: BugReporter + 'static>(reporter: R) -> Self {
        Self::from_arc(Arc::new(reporter))
    }

    pub fn from_arc(inner: Arc<dyn BugReporter>) -> Self {
        Self {
            id: ReporterId::next(),
            inner,
        }
    }

    pub fn id(&self) -> ReporterId {
        self.id
    }

    pub fn log_store_count(&self) -> usize {
        self.inner.log_store_count()
    }

    pub fn compose_bug_report(&self) {
        self.inner.compose_bug_report();
    }

    /// Non-owning form held by the registry.
    pub(crate) fn downgrade(&self) -> WeakReporter {
        WeakReporter {
            id: self.id,
            inner: Arc::downgrade(&self.inner),
        }
    }
}

impl PartialEq for ReporterRef {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ReporterRef {}

impl fmt::Debug for ReporterRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReporterRef")
            .field("id", &self.id)
            .field("log_stores", &self.inner.log_store_count())
            .finish()
    }
}

/// Weak reporter reference stored in the association map.
#[derive(Clone)]
pub(crate) struct WeakReporter {
    id: ReporterId,
    inner: Weak<dyn BugReporter>,
}

impl WeakReporter {
    pub(crate) fn id(&self) -> ReporterId {
        self.id
    }

    /// `None` once the host has dropped every strong ref.
    pub(crate) fn upgrade(&self) -> Option<ReporterRef> {
        self.inner.upgrade().map(|inner| ReporterRef { id: self.id, inner })
    }
}
