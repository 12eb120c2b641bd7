use std::fmt;
use std::sync::Arc;

use log::trace;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;

use super::managed::ManagedCommand;
use crate::error::ErrorObserver;

/// Which output stream a line came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

impl fmt::Display for OutputStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputStream::Stdout => f.write_str("stdout"),
            OutputStream::Stderr => f.write_str("stderr"),
        }
    }
}

/// A stream of lines from a supervised command
pub struct LineStream {
    /// Channel receiver for lines
    rx: mpsc::Receiver<String>,
}

impl LineStream {
    /// Create a new line stream
    pub fn new(rx: mpsc::Receiver<String>) -> Self {
        Self { rx }
    }

    /// Get the next line from the stream.
    ///
    /// Returns `None` once the command is gone from the registry.
    pub async fn next(&mut self) -> Option<String> {
        self.rx.recv().await
    }

    /// Get a line if one is already queued
    pub fn try_next(&mut self) -> Option<String> {
        self.rx.try_recv().ok()
    }

    /// Filter the stream
    pub fn filter<F>(self, filter: F) -> FilteredLineStream<F>
    where
        F: FnMut(&str) -> bool + Send + 'static,
    {
        FilteredLineStream {
            rx: self.rx,
            filter,
        }
    }

    /// Map the stream
    pub fn map<F, U>(self, map_fn: F) -> MappedLineStream<F>
    where
        F: FnMut(String) -> U + Send + 'static,
    {
        MappedLineStream {
            rx: self.rx,
            map_fn,
        }
    }

    pub fn into_inner(self) -> mpsc::Receiver<String> {
        self.rx
    }
}

/// A filtered stream of lines
pub struct FilteredLineStream<F> {
    rx: mpsc::Receiver<String>,
    filter: F,
}

impl<F> FilteredLineStream<F>
where
    F: FnMut(&str) -> bool + Send + 'static,
{
    /// Get the next line that passes the filter
    pub async fn next(&mut self) -> Option<String> {
        while let Some(line) = self.rx.recv().await {
            if (self.filter)(&line) {
                return Some(line);
            }
        }
        None
    }
}

/// A mapped stream of lines
pub struct MappedLineStream<F> {
    rx: mpsc::Receiver<String>,
    map_fn: F,
}

impl<F, U> MappedLineStream<F>
where
    F: FnMut(String) -> U + Send + 'static,
{
    /// Get the next mapped item from the stream
    pub async fn next(&mut self) -> Option<U> {
        self.rx.recv().await.map(|line| (self.map_fn)(line))
    }
}

/// Read `reader` line by line and hand every line to the command's publisher.
///
/// Lines are delivered in the order they were written. Bytes that are not
/// UTF-8 are replaced rather than ending the stream.
pub(crate) async fn pump_lines<R>(
    reader: R,
    stream: OutputStream,
    managed: Arc<ManagedCommand>,
    observer: Arc<dyn ErrorObserver>,
) where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                if buf.last() == Some(&b'\n') {
                    buf.pop();
                    if buf.last() == Some(&b'\r') {
                        buf.pop();
                    }
                }
                let line = String::from_utf8_lossy(&buf);
                managed.publish_line(stream, &line, observer.as_ref()).await;
            }
            Err(e) => {
                let context = format!("{}error reading {}", managed.prefix(), stream);
                observer.observe(&context, &e);
                break;
            }
        }
    }

    trace!("{}{} closed", managed.prefix(), stream);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_filter_and_map() {
        let (tx, rx) = mpsc::channel(8);
        for line in ["keep 1", "drop", "keep 2"] {
            tx.send(line.to_string()).await.unwrap();
        }
        drop(tx);

        let mut filtered = LineStream::new(rx).filter(|line| line.starts_with("keep"));
        assert_eq!(filtered.next().await.as_deref(), Some("keep 1"));
        assert_eq!(filtered.next().await.as_deref(), Some("keep 2"));
        assert_eq!(filtered.next().await, None);

        let (tx, rx) = mpsc::channel(8);
        tx.send("abc".to_string()).await.unwrap();
        drop(tx);
        let mut lengths = LineStream::new(rx).map(|line| line.len());
        assert_eq!(lengths.next().await, Some(3));
        assert_eq!(lengths.next().await, None);
    }

    #[test]
    fn test_stream_names() {
        assert_eq!(OutputStream::Stdout.to_string(), "stdout");
        assert_eq!(OutputStream::Stderr.to_string(), "stderr");
    }
}
