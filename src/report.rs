//! Report fragments produced by the probe pipeline.
//!
//! Every detector produces exactly one [`Fragment`]. Fragments are appended to a [`Report`]
//! in the order the detectors ran and are never merged or modified afterwards.
//!
//! A value that could not be determined is kept as a typed [`Failure`] so the reader can tell a
//! missing file apart from a permission problem or a hung tool.

use std::fmt;

use chrono::{DateTime, Local};

/// Kind of failure that made a value unavailable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Expected file, device or mapping is absent.
    NotFound,
    /// Insufficient privilege to read a pseudo-file.
    PermissionDenied,
    /// An external tool exceeded its time bound.
    Timeout,
    /// Content did not have the expected shape.
    Malformed,
    /// An external command is not installed.
    ToolMissing,
    /// Anything else, with detail in [`Failure::detail`].
    Other,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureKind::NotFound => "not found",
            FailureKind::PermissionDenied => "permission denied",
            FailureKind::Timeout => "timed out",
            FailureKind::Malformed => "malformed",
            FailureKind::ToolMissing => "tool missing",
            FailureKind::Other => "failed",
        };
        write!(f, "{name}")
    }
}

/// A typed absence: the failure kind plus a human-readable detail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub kind: FailureKind,
    pub detail: String,
}

impl Failure {
    pub fn new(kind: FailureKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }

    pub fn not_found(detail: impl Into<String>) -> Self {
        Self::new(FailureKind::NotFound, detail)
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.detail.is_empty() {
            write!(f, "{}", self.kind)
        } else {
            write!(f, "{} ({})", self.kind, self.detail)
        }
    }
}

/// A resource limit as read from a cgroup or rlimit source.
///
/// "No limit" is always [`LimitValue::Unbounded`], never a numeric sentinel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LimitValue {
    Unbounded,
    Bytes(u64),
    Count(u64),
    /// Content that is neither numeric nor the unlimited token, kept verbatim.
    Unknown(String),
}

const BYTES_PER_GIB: f64 = (1u64 << 30) as f64;

impl LimitValue {
    /// Returns the limit in binary gigabytes for [`LimitValue::Bytes`].
    pub fn as_gib(&self) -> Option<f64> {
        match self {
            LimitValue::Bytes(bytes) => Some(bytes_to_gib(*bytes)),
            _ => None,
        }
    }
}

impl fmt::Display for LimitValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LimitValue::Unbounded => write!(f, "unlimited"),
            LimitValue::Bytes(bytes) => {
                write!(f, "{:.2} GB ({bytes} bytes)", bytes_to_gib(*bytes))
            }
            LimitValue::Count(count) => write!(f, "{count}"),
            LimitValue::Unknown(raw) => write!(f, "unknown `{raw}`"),
        }
    }
}

/// Converts bytes to binary gigabytes.
pub fn bytes_to_gib(bytes: u64) -> f64 {
    bytes as f64 / BYTES_PER_GIB
}

/// A single labelled line within a fragment.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub label: String,
    pub value: Result<String, Failure>,
    pub note: Option<String>,
}

impl Entry {
    pub fn value(label: impl Into<String>, value: impl fmt::Display) -> Self {
        Self {
            label: label.into(),
            value: Ok(value.to_string()),
            note: None,
        }
    }

    pub fn failure(label: impl Into<String>, failure: Failure) -> Self {
        Self {
            label: label.into(),
            value: Err(failure),
            note: None,
        }
    }

    pub fn from_result<T: fmt::Display>(label: impl Into<String>, value: Result<T, Failure>) -> Self {
        match value {
            Ok(v) => Self::value(label, v),
            Err(failure) => Self::failure(label, failure),
        }
    }

    /// A free-standing remark with no value of its own.
    pub fn remark(note: impl Into<String>) -> Self {
        Self {
            label: String::new(),
            value: Ok(String::new()),
            note: Some(note.into()),
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    pub fn is_failure(&self) -> bool {
        self.value.is_err()
    }
}

impl fmt::Display for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.value, self.label.is_empty()) {
            (Ok(value), true) if value.is_empty() => {}
            (Ok(value), true) => write!(f, "{value}")?,
            (Ok(value), false) if value.is_empty() => write!(f, "{}", self.label)?,
            (Ok(value), false) => write!(f, "{}: {value}", self.label)?,
            (Err(failure), _) => write!(f, "{}: {failure}", self.label)?,
        }
        match &self.note {
            Some(note) if self.label.is_empty() && matches!(&self.value, Ok(v) if v.is_empty()) => {
                write!(f, "→ {note}")
            }
            Some(note) => write!(f, " → {note}"),
            None => Ok(()),
        }
    }
}

/// One detector's self-contained output.
#[derive(Debug, Clone)]
pub struct Fragment {
    section: String,
    produced_at: DateTime<Local>,
    entries: Vec<Entry>,
}

impl Fragment {
    pub fn builder(section: impl Into<String>) -> FragmentBuilder {
        FragmentBuilder {
            section: section.into(),
            entries: Vec::new(),
        }
    }

    pub fn section(&self) -> &str {
        &self.section
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    /// Returns the first entry with the given label.
    pub fn entry(&self, label: &str) -> Option<&Entry> {
        self.entries.iter().find(|e| e.label == label)
    }
}

impl fmt::Display for Fragment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ts = self.produced_at.format("%H:%M:%S");
        writeln!(f, "[{ts}] === {} ===", self.section)?;
        for entry in &self.entries {
            writeln!(f, "[{ts}] {entry}")?;
        }
        Ok(())
    }
}

/// Accumulates entries until the fragment is sealed with [`FragmentBuilder::build`].
#[derive(Debug)]
pub struct FragmentBuilder {
    section: String,
    entries: Vec<Entry>,
}

impl FragmentBuilder {
    pub fn push(&mut self, entry: Entry) -> &mut Self {
        self.entries.push(entry);
        self
    }

    pub fn extend(&mut self, entries: impl IntoIterator<Item = Entry>) -> &mut Self {
        self.entries.extend(entries);
        self
    }

    pub fn build(self) -> Fragment {
        Fragment {
            section: self.section,
            produced_at: Local::now(),
            entries: self.entries,
        }
    }
}

/// The cumulative report of one probe run.
#[derive(Debug)]
pub struct Report {
    started_at: DateTime<Local>,
    fragments: Vec<Fragment>,
}

impl Default for Report {
    fn default() -> Self {
        Self {
            started_at: Local::now(),
            fragments: Vec::new(),
        }
    }
}

impl Report {
    pub fn push(&mut self, fragment: Fragment) -> &Fragment {
        self.fragments.push(fragment);
        &self.fragments[self.fragments.len() - 1]
    }

    pub fn fragments(&self) -> &[Fragment] {
        &self.fragments
    }

    pub fn fragment(&self, section: &str) -> Option<&Fragment> {
        self.fragments.iter().find(|f| f.section == section)
    }

    pub fn started_at(&self) -> DateTime<Local> {
        self.started_at
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for fragment in &self.fragments {
            write!(f, "{fragment}")?;
        }
        Ok(())
    }
}
