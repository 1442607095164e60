//! Event reader: streams tag fragments out of a log source.
//!
//! The reader never buffers the whole source. It hides XML framing (escaping,
//! CDATA, text splitting) and reports a truncated tail instead of failing when
//! the writer died mid-event.

use std::fs::File;
use std::io::{self, BufRead, BufReader, Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

/// The only hard failure of a parse pass.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("Failed to open log source {name}: {source}")]
    Open {
        name: String,
        #[source]
        source: io::Error,
    },
}

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

/// Cooperative cancellation flag shared between a pass and its controller.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        CancelToken::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

// ---------------------------------------------------------------------------
// Sources
// ---------------------------------------------------------------------------

/// A restartable byte source: every `open` starts again from the beginning.
pub trait LogSource {
    /// Name used in reports and errors.
    fn name(&self) -> String;

    fn open(&self) -> Result<Box<dyn BufRead + Send>, SourceError>;
}

/// A finished log file on disk.
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FileSource { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl LogSource for FileSource {
    fn name(&self) -> String {
        self.path.display().to_string()
    }

    fn open(&self) -> Result<Box<dyn BufRead + Send>, SourceError> {
        let file = File::open(&self.path).map_err(|source| SourceError::Open {
            name: self.name(),
            source,
        })?;
        Ok(Box::new(BufReader::new(file)))
    }
}

/// An in-memory log, mostly for tests and for hosts that already hold the text.
#[derive(Debug, Clone)]
pub struct MemorySource {
    name: String,
    bytes: Arc<[u8]>,
}

impl MemorySource {
    pub fn new(name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        MemorySource {
            name: name.into(),
            bytes: Arc::from(bytes.into()),
        }
    }

    pub fn from_text(text: &str) -> Self {
        MemorySource::new("<memory>", text.as_bytes().to_vec())
    }
}

impl LogSource for MemorySource {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn open(&self) -> Result<Box<dyn BufRead + Send>, SourceError> {
        Ok(Box::new(Cursor::new(SharedBytes(self.bytes.clone()))))
    }
}

struct SharedBytes(Arc<[u8]>);

impl AsRef<[u8]> for SharedBytes {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// A log file that is still being written by a running process.
///
/// Reads block at end of file, polling for more data, until the writer is
/// marked finished, the pass is cancelled, or the idle timeout elapses.
#[derive(Debug, Clone)]
pub struct FollowSource {
    path: PathBuf,
    poll_interval: Duration,
    idle_timeout: Option<Duration>,
    finished: Arc<AtomicBool>,
    cancel: CancelToken,
}

impl FollowSource {
    pub fn new(path: impl Into<PathBuf>, poll_interval: Duration) -> Self {
        FollowSource {
            path: path.into(),
            poll_interval,
            idle_timeout: None,
            finished: Arc::new(AtomicBool::new(false)),
            cancel: CancelToken::new(),
        }
    }

    pub fn with_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Handle the host flips once the monitored process has exited.
    pub fn finished_flag(&self) -> Arc<AtomicBool> {
        self.finished.clone()
    }
}

impl LogSource for FollowSource {
    fn name(&self) -> String {
        format!("{} (follow)", self.path.display())
    }

    fn open(&self) -> Result<Box<dyn BufRead + Send>, SourceError> {
        let file = File::open(&self.path).map_err(|source| SourceError::Open {
            name: self.name(),
            source,
        })?;
        Ok(Box::new(BufReader::new(TailReader {
            inner: file,
            poll_interval: self.poll_interval,
            idle_timeout: self.idle_timeout,
            finished: self.finished.clone(),
            cancel: self.cancel.clone(),
        })))
    }
}

/// `Read` adapter that waits for a growing file instead of reporting EOF.
struct TailReader<R> {
    inner: R,
    poll_interval: Duration,
    idle_timeout: Option<Duration>,
    finished: Arc<AtomicBool>,
    cancel: CancelToken,
}

impl<R: Read> Read for TailReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let idle_since = Instant::now();
        loop {
            let n = self.inner.read(buf)?;
            if n > 0 || buf.is_empty() {
                return Ok(n);
            }
            if self.cancel.is_cancelled() {
                return Ok(0);
            }
            if self.finished.load(Ordering::Acquire) {
                // One last read: the writer may have flushed right before finishing.
                return self.inner.read(buf);
            }
            if let Some(limit) = self.idle_timeout {
                if idle_since.elapsed() >= limit {
                    tracing::debug!("follow source idle for {:?}, treating as end", limit);
                    return Ok(0);
                }
            }
            std::thread::sleep(self.poll_interval);
        }
    }
}

// ---------------------------------------------------------------------------
// Raw events
// ---------------------------------------------------------------------------

/// Shape of a fragment in the element nesting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FragmentKind {
    /// `<tag ...>`
    Open,
    /// `<tag .../>`
    Empty,
    /// `</tag>`
    Close,
    /// Character data inside the enclosing element.
    Text,
}

/// One decoded tag fragment. Transient: consumed by the decoder immediately.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    pub kind: FragmentKind,
    /// Tag name; for text, the name of the enclosing element (empty at top level).
    pub name: String,
    /// Attributes in document order, values unescaped.
    pub attributes: Vec<(String, String)>,
    pub text: Option<String>,
    /// Number of enclosing elements.
    pub depth: usize,
    /// Name of the enclosing element.
    pub parent: Option<String>,
    /// Byte offset of the end of the fragment in the source.
    pub position: u64,
}

impl RawEvent {
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Why the fragment stream stopped early.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Truncation {
    /// The source ended while these elements were still open (outermost first).
    UnclosedElements(Vec<String>),
    /// The source ended inside a fragment or stopped being readable.
    Unreadable { position: u64, message: String },
}

enum ReaderState {
    Reading,
    Done,
}

/// Lazy, finite sequence of [`RawEvent`]s over one opened source.
pub struct EventReader {
    xml: Reader<Box<dyn BufRead + Send>>,
    buf: Vec<u8>,
    stack: Vec<String>,
    state: ReaderState,
    truncation: Option<Truncation>,
    cancel: Option<CancelToken>,
    cancelled: bool,
    fragments: u64,
}

impl EventReader {
    pub fn new(input: Box<dyn BufRead + Send>) -> Self {
        let mut xml = Reader::from_reader(input);
        let config = xml.config_mut();
        config.trim_text(true);
        // Nesting is tracked here so mismatched or stray end tags degrade gracefully.
        config.check_end_names = false;
        config.allow_unmatched_ends = true;
        EventReader {
            xml,
            buf: Vec::with_capacity(4096),
            stack: Vec::new(),
            state: ReaderState::Reading,
            truncation: None,
            cancel: None,
            cancelled: false,
            fragments: 0,
        }
    }

    /// Open `source` from its beginning.
    pub fn open(source: &dyn LogSource) -> Result<Self, SourceError> {
        Ok(EventReader::new(source.open()?))
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn truncation(&self) -> Option<&Truncation> {
        self.truncation.as_ref()
    }

    pub fn is_truncated(&self) -> bool {
        self.truncation.is_some()
    }

    pub fn was_cancelled(&self) -> bool {
        self.cancelled
    }

    pub fn fragments_read(&self) -> u64 {
        self.fragments
    }

    fn byte_position(&self) -> u64 {
        self.xml.buffer_position() as u64
    }

    fn element(&mut self, kind: FragmentKind, start: &BytesStart<'_>) -> RawEvent {
        let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
        let attributes = start
            .attributes()
            .with_checks(false)
            .filter_map(|a| a.ok())
            .map(|attr| {
                let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
                let value = match attr.unescape_value() {
                    Ok(v) => v.into_owned(),
                    Err(_) => String::from_utf8_lossy(&attr.value).into_owned(),
                };
                (key, value)
            })
            .collect();
        let depth = self.stack.len();
        let parent = self.stack.last().cloned();
        if kind == FragmentKind::Open {
            self.stack.push(name.clone());
        }
        RawEvent {
            kind,
            name,
            attributes,
            text: None,
            depth,
            parent,
            position: self.byte_position(),
        }
    }

    fn close(&mut self, name: String) -> RawEvent {
        // Pop back to the matching element; unmatched ends leave the stack alone.
        if let Some(at) = self.stack.iter().rposition(|open| *open == name) {
            self.stack.truncate(at);
        }
        RawEvent {
            kind: FragmentKind::Close,
            depth: self.stack.len(),
            parent: self.stack.last().cloned(),
            name,
            attributes: Vec::new(),
            text: None,
            position: self.byte_position(),
        }
    }

    fn text(&self, text: String) -> RawEvent {
        RawEvent {
            kind: FragmentKind::Text,
            name: self.stack.last().cloned().unwrap_or_default(),
            attributes: Vec::new(),
            text: Some(text),
            depth: self.stack.len(),
            parent: self.stack.last().cloned(),
            position: self.byte_position(),
        }
    }

    fn finish(&mut self) {
        self.state = ReaderState::Done;
        if self.truncation.is_none() && !self.stack.is_empty() && !self.cancelled {
            self.truncation = Some(Truncation::UnclosedElements(self.stack.clone()));
        }
    }
}

impl Iterator for EventReader {
    type Item = RawEvent;

    fn next(&mut self) -> Option<RawEvent> {
        loop {
            if let ReaderState::Done = self.state {
                return None;
            }
            if self.cancel.as_ref().is_some_and(CancelToken::is_cancelled) {
                self.cancelled = true;
                self.finish();
                return None;
            }

            self.buf.clear();
            let read = self
                .xml
                .read_event_into(&mut self.buf)
                .map(Event::into_owned);
            let event = match read {
                Ok(event) => event,
                Err(err) => {
                    let position = self.byte_position();
                    tracing::warn!("log source unreadable at byte {}: {}", position, err);
                    self.truncation = Some(Truncation::Unreadable {
                        position,
                        message: err.to_string(),
                    });
                    self.finish();
                    return None;
                }
            };

            let raw = match event {
                Event::Start(start) => self.element(FragmentKind::Open, &start),
                Event::Empty(start) => self.element(FragmentKind::Empty, &start),
                Event::End(end) => {
                    let name = String::from_utf8_lossy(end.name().as_ref()).into_owned();
                    self.close(name)
                }
                Event::Text(text) => {
                    let text = match text.unescape() {
                        Ok(t) => t.into_owned(),
                        Err(_) => String::from_utf8_lossy(&text).into_owned(),
                    };
                    if text.is_empty() {
                        continue;
                    }
                    self.text(text)
                }
                Event::CData(data) => {
                    let text = String::from_utf8_lossy(&data.into_inner()).into_owned();
                    self.text(text)
                }
                Event::Eof => {
                    self.finish();
                    return None;
                }
                // Declarations, comments, processing instructions.
                _ => continue,
            };
            self.fragments += 1;
            return Some(raw);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_all(text: &str) -> (Vec<RawEvent>, Option<Truncation>) {
        let mut reader = EventReader::open(&MemorySource::from_text(text)).unwrap();
        let events: Vec<RawEvent> = reader.by_ref().collect();
        (events, reader.truncation().cloned())
    }

    #[test]
    fn test_nesting_and_attributes() {
        let (events, truncation) = read_all(
            "<?xml version='1.0'?><log><task compile_id='3' method='A b ()V'><bc bci='4'/></task></log>",
        );
        assert!(truncation.is_none());
        let kinds: Vec<FragmentKind> = events.iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![
                FragmentKind::Open,
                FragmentKind::Open,
                FragmentKind::Empty,
                FragmentKind::Close,
                FragmentKind::Close
            ]
        );
        assert_eq!(events[1].attribute("compile_id"), Some("3"));
        assert_eq!(events[1].depth, 1);
        assert_eq!(events[1].parent.as_deref(), Some("log"));
        assert_eq!(events[2].depth, 2);
        assert_eq!(events[2].parent.as_deref(), Some("task"));
        assert_eq!(events[3].depth, 1);
    }

    #[test]
    fn test_fragments_carry_byte_positions() {
        let text = "<log><a/><b x='1'/></log>";
        let (events, _) = read_all(text);
        let positions: Vec<u64> = events.iter().map(|e| e.position).collect();
        assert_eq!(positions.len(), 4);
        assert!(positions.windows(2).all(|w| w[0] < w[1]), "{:?}", positions);
        assert_eq!(positions[3], text.len() as u64);
    }

    #[test]
    fn test_unescapes_values_and_text() {
        let (events, _) = read_all("<a reason='hot &lt;init&gt;'>x &amp; y</a>");
        assert_eq!(events[0].attribute("reason"), Some("hot <init>"));
        assert_eq!(events[1].kind, FragmentKind::Text);
        assert_eq!(events[1].text.as_deref(), Some("x & y"));
        assert_eq!(events[1].name, "a");
    }

    #[test]
    fn test_truncated_after_open_element() {
        let (events, truncation) = read_all("<log><task compile_id='1'>");
        assert_eq!(events.len(), 2);
        assert!(truncation.is_some());
        if let Some(Truncation::UnclosedElements(open)) = truncation {
            assert_eq!(open, vec!["log".to_string(), "task".to_string()]);
        }
    }

    #[test]
    fn test_truncated_mid_tag_keeps_earlier_fragments() {
        let (events, truncation) = read_all("<log><task compile_id='1'/><task compile_id='2");
        assert!(events.len() >= 2);
        assert_eq!(events[1].attribute("compile_id"), Some("1"));
        assert!(truncation.is_some());
    }

    #[test]
    fn test_stray_end_tag_is_tolerated() {
        let (events, truncation) = read_all("<log></oops><a/></log>");
        assert!(truncation.is_none());
        assert_eq!(events.iter().filter(|e| e.name == "a").count(), 1);
    }

    #[test]
    fn test_restartable() {
        let source = MemorySource::from_text("<log><a/></log>");
        let first: Vec<RawEvent> = EventReader::open(&source).unwrap().collect();
        let second: Vec<RawEvent> = EventReader::open(&source).unwrap().collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_cancel_stops_between_fragments() {
        let cancel = CancelToken::new();
        let mut reader = EventReader::open(&MemorySource::from_text("<log><a/><b/><c/></log>"))
            .unwrap()
            .with_cancel(cancel.clone());
        assert!(reader.next().is_some());
        cancel.cancel();
        assert!(reader.next().is_none());
        assert!(reader.was_cancelled());
        assert!(!reader.is_truncated());
    }

    #[test]
    fn test_missing_file_is_hard_error() {
        let err = FileSource::new("/nonexistent/hotspot.log").open().err().unwrap();
        assert!(matches!(err, SourceError::Open { .. }));
    }

    #[test]
    fn test_follow_source_sees_appended_data() {
        use std::io::Write;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "<log><a/>").unwrap();
        file.flush().unwrap();

        let source = FollowSource::new(file.path(), Duration::from_millis(5));
        let finished = source.finished_flag();
        let mut reader = EventReader::open(&source).unwrap();
        assert_eq!(reader.next().unwrap().name, "log");
        assert_eq!(reader.next().unwrap().name, "a");

        let path = file.path().to_path_buf();
        let writer = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(30));
            let mut f = std::fs::OpenOptions::new().append(true).open(path).unwrap();
            write!(f, "<b/></log>").unwrap();
            f.flush().unwrap();
            finished.store(true, Ordering::Release);
        });

        let rest: Vec<String> = reader.by_ref().map(|e| e.name).collect();
        writer.join().unwrap();
        assert_eq!(rest, vec!["b".to_string(), "log".to_string()]);
        assert!(!reader.is_truncated());
    }
}
