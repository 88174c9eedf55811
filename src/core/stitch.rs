// harvest - core/stitch.rs
//
// Multi-line record stitching.
//
// A line starting with a space or tab continues the record above it (stack
// traces, wrapped messages). Any other line is a header that starts a new
// record. Pending lines live in a `Stash` until the next header, the end of
// the stream, or an overflow forces them out.
//
// Pure state machine: no threads, no channels. `core::parser` drives it.

use crate::core::model::{Line, Log, Target};
use crate::util::constants::TOO_MANY_ROWS_MARKER;
use std::sync::Arc;

/// Returns `true` if `content` continues the previous record.
pub fn is_continuation(content: &str) -> bool {
    content.starts_with(' ') || content.starts_with('\t')
}

/// Pending lines of the record currently being assembled.
#[derive(Debug)]
pub struct Stash {
    contents: Vec<String>,
    /// Continuation lines currently held (the header is not counted).
    continuations: usize,
    /// Host/path of the line that last filled the stash.
    host: Option<Arc<str>>,
    path: Option<Arc<str>>,
    max_content_stash: usize,
    target: Arc<Target>,
}

impl Stash {
    /// An empty stash that holds at most `max_content_stash` continuation
    /// lines before force-flushing.
    pub fn new(target: Arc<Target>, max_content_stash: usize) -> Self {
        Self {
            contents: Vec::new(),
            continuations: 0,
            host: None,
            path: None,
            max_content_stash: max_content_stash.max(1),
            target,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.contents.is_empty()
    }

    pub fn len(&self) -> usize {
        self.contents.len()
    }

    /// Feed one line. Records completed by this line are appended to `out`
    /// in emission order.
    pub fn push(&mut self, line: Line, out: &mut Vec<Log>) {
        if is_continuation(&line.content) {
            if self.continuations >= self.max_content_stash {
                // Force-flush before the stash grows past its bound, then mark
                // the truncation in-band so the consumer can see it.
                tracing::warn!(
                    host = %line.host,
                    path = %line.path,
                    max = self.max_content_stash,
                    "Multi-line record exceeds continuation limit; splitting"
                );
                let content = self.take_joined();
                out.push(self.record(&line.host, &line.path, content));
                out.push(self.record(&line.host, &line.path, TOO_MANY_ROWS_MARKER.to_string()));
            }
            self.continuations += 1;
            self.fill(line);
            return;
        }

        // Header line. The flushed record is tagged with the incoming line's
        // host/path, not the stash owner's.
        if !self.contents.is_empty() {
            let content = self.take_joined();
            out.push(self.record(&line.host, &line.path, content));
        }
        self.fill(line);
    }

    /// Flush whatever remains at end-of-stream. Returns `None` when the stash
    /// is empty, so calling it twice never emits the same content twice.
    pub fn finish(&mut self) -> Option<Log> {
        if self.contents.is_empty() {
            return None;
        }
        let host = self.host.clone().unwrap_or_else(|| Arc::from(""));
        let path = self.path.clone().unwrap_or_else(|| Arc::from(""));
        let content = self.take_joined();
        Some(self.record(&host, &path, content))
    }

    fn fill(&mut self, line: Line) {
        self.host = Some(line.host);
        self.path = Some(line.path);
        self.contents.push(line.content);
    }

    fn take_joined(&mut self) -> String {
        let joined = self.contents.join("\n");
        self.contents.clear();
        self.continuations = 0;
        joined
    }

    fn record(&self, host: &Arc<str>, path: &Arc<str>, content: String) -> Log {
        Log::unresolved(
            Arc::clone(host),
            Arc::clone(path),
            content,
            Arc::clone(&self.target),
        )
    }
}
