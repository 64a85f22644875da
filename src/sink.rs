//! Module for the process-wide append-only sinks: the archive of accepted
//! records, the log of generated update URLs, and the rejects file.
//!
//! All pipeline threads feed one sink thread through a channel, so every
//! append is serialized by a single writer and per-connection receipt order
//! is preserved.
use std::fs::{File, OpenOptions};
use std::io;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::time;

use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone)]
/// Struct modeling the file paths of the three append-only sinks.
pub struct SinkParameters {
    /// Path of the archive of accepted raw records.
    pub archive_path: String,
    /// Path of the log of generated update URLs.
    pub url_log_path: String,
    /// Path of the rejects file for lines that failed any pipeline stage.
    pub rejects_path: String,
}

/// One append request from a pipeline thread.
#[derive(Debug)]
pub enum SinkRequest {
    /// Append an accepted record, receipt timestamp prefixed, to the archive.
    Archive(String),
    /// Append a generated update URL to the URL log.
    UrlLog(String),
    /// Append a raw or partial line that failed a pipeline stage.
    Reject(String),
}

fn open_append(path: &str) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

fn append_line(file: &mut File, line: &str) -> io::Result<()> {
    writeln!(file, "{}", line)?;
    file.flush()
}

fn handle_request(
    request: SinkRequest,
    archive: &mut File,
    url_log: &mut File,
    rejects: &mut File,
) {
    let result = match request {
        SinkRequest::Archive(line) => append_line(archive, line.as_str()),
        SinkRequest::UrlLog(line) => append_line(url_log, line.as_str()),
        SinkRequest::Reject(line) => append_line(rejects, line.as_str()),
    };
    match result {
        Ok(_) => {}
        Err(err) => {
            log::error!(target: "wxrelayd::sink", "Could not append to sink: '{}'", err);
        }
    }
}

/// Thread function for the sink writer.
///
/// Opens the three sink files at thread start and appends every request
/// received on the channel. This function will run until the `thread_finish`
/// parameter is set; the channel is drained before returning so the
/// archive/reject decision of records still in flight is not lost.
///
/// # Errors
///
/// Failing to open any sink file is fatal: the error is logged and the
/// shared termination flag is set, shutting the daemon down rather than
/// running with data loss. Individual append failures are logged and
/// skipped.
pub fn sink_thread(
    rx: Receiver<SinkRequest>,
    thread_finish: Arc<AtomicBool>,
    params: SinkParameters,
) {
    let mut archive = match open_append(params.archive_path.as_str()) {
        Ok(file) => file,
        Err(err) => {
            log::error!(target: "wxrelayd::sink", "Cannot open archive sink '{}': '{}'", params.archive_path, err);
            thread_finish.store(true, Ordering::SeqCst);
            return;
        }
    };
    let mut url_log = match open_append(params.url_log_path.as_str()) {
        Ok(file) => file,
        Err(err) => {
            log::error!(target: "wxrelayd::sink", "Cannot open url log sink '{}': '{}'", params.url_log_path, err);
            thread_finish.store(true, Ordering::SeqCst);
            return;
        }
    };
    let mut rejects = match open_append(params.rejects_path.as_str()) {
        Ok(file) => file,
        Err(err) => {
            log::error!(target: "wxrelayd::sink", "Cannot open rejects sink '{}': '{}'", params.rejects_path, err);
            thread_finish.store(true, Ordering::SeqCst);
            return;
        }
    };

    log::info!(target: "wxrelayd::sink", "Sinks opened: archive '{}', url log '{}', rejects '{}'",
               params.archive_path, params.url_log_path, params.rejects_path);

    let timeout = time::Duration::from_millis(100);

    while !thread_finish.load(Ordering::SeqCst) {
        let request = match rx.recv_timeout(timeout) {
            Ok(request) => request,
            Err(_) => {
                continue;
            }
        };
        handle_request(request, &mut archive, &mut url_log, &mut rejects);
    }

    while let Ok(request) = rx.try_recv() {
        handle_request(request, &mut archive, &mut url_log, &mut rejects);
    }
}
