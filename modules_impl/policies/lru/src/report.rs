//! # Statistics Report
//!
//! Plain-text table of list sizes and reclaim counters, one row per
//! instance, read through a [`ReportSession`] the way a procfs file is read.

use alloc::string::String;
use core::fmt::{self, Write};

use dime_modules::InstanceId;

use crate::config::ReclaimConfig;
use crate::state::{ListKind, PrpState};
use crate::stats::{Counter, StatsSnapshot};

/// Leading report columns
pub const REPORT_HEADER: &str =
    "id kswp_sleep free_max_size free_size apc_size inpc_size aan_size inan_size";

/// One report row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportRow {
    /// Instance
    pub instance: InstanceId,
    /// Reclaimer period
    pub kswapd_sleep_ms: u32,
    /// Free pool target
    pub free_target: usize,
    /// Free pool size
    pub free: usize,
    /// Active page cache size
    pub active_pc: usize,
    /// Inactive page cache size
    pub inactive_pc: usize,
    /// Active anonymous size
    pub active_an: usize,
    /// Inactive anonymous size
    pub inactive_an: usize,
    /// Counters
    pub stats: StatsSnapshot,
}

impl ReportRow {
    /// Capture the current row of `state`
    pub fn capture(state: &PrpState, config: &ReclaimConfig) -> Self {
        Self {
            instance: state.instance_id(),
            kswapd_sleep_ms: config.kswapd_sleep_ms,
            free_target: config.required_free(state.local_npages()),
            free: state.list(ListKind::Free).len(),
            active_pc: state.list(ListKind::ActivePc).len(),
            inactive_pc: state.list(ListKind::InactivePc).len(),
            active_an: state.list(ListKind::ActiveAn).len(),
            inactive_an: state.list(ListKind::InactiveAn).len(),
            stats: state.stats().snapshot(),
        }
    }
}

impl fmt::Display for ReportRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {} {} {} {} {} {}",
            self.instance,
            self.kswapd_sleep_ms,
            self.free_target,
            self.free,
            self.active_pc,
            self.inactive_pc,
            self.active_an,
            self.inactive_an,
            self.stats
        )
    }
}

/// Write the header line
pub fn render_header(out: &mut impl Write) -> fmt::Result {
    out.write_str(REPORT_HEADER)?;
    for counter in Counter::ALL {
        write!(out, " {}", counter.column())?;
    }
    out.write_char('\n')
}

/// Render a full report: header then one line per row
pub fn render<I>(rows: I) -> String
where
    I: IntoIterator<Item = ReportRow>,
{
    let mut out = String::new();
    // Writing to a String cannot fail.
    let _ = render_header(&mut out);
    for row in rows {
        let _ = writeln!(out, "{}", row);
    }
    out
}

/// Something that can render the report
pub trait ReportSource {
    /// Render the whole report
    fn render_report(&self) -> String;
}

/// A reader of the report
///
/// Reading at offset 0 takes a fresh snapshot; later offsets are served from
/// that snapshot so a multi-chunk read sees one consistent table.
pub struct ReportSession<'a> {
    source: &'a dyn ReportSource,
    snapshot: String,
}

impl fmt::Debug for ReportSession<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReportSession")
            .field("snapshot_len", &self.snapshot.len())
            .finish()
    }
}

impl<'a> ReportSession<'a> {
    /// Open a session
    pub fn open(source: &'a dyn ReportSource) -> Self {
        Self {
            source,
            snapshot: String::new(),
        }
    }

    /// Copy report bytes starting at `offset` into `buf`
    ///
    /// Returns the number of bytes copied; 0 past the end.
    pub fn read(&mut self, offset: usize, buf: &mut [u8]) -> usize {
        if offset == 0 {
            self.snapshot = self.source.render_report();
        }
        let bytes = self.snapshot.as_bytes();
        if offset >= bytes.len() {
            return 0;
        }
        let n = buf.len().min(bytes.len() - offset);
        buf[..n].copy_from_slice(&bytes[offset..offset + n]);
        n
    }

    /// Accept and discard a write
    pub fn write(&mut self, data: &[u8]) -> usize {
        data.len()
    }
}
