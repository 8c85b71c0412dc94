//! Decoder for `text/event-stream` response bodies.
//!
//! Only the parts of the format used by beacon nodes and the rollup tracker are interpreted:
//! `event` names the event, `data` lines are joined with newlines, and a blank line dispatches.
//! `id` and `retry` fields are ignored. An event that is not terminated by a blank line before
//! the body ends is discarded.
//!
//! Lines that are not valid UTF-8 or exceed [`MAX_LINE_LENGTH`] are reported as errors and
//! the event they belong to is dropped, but decoding continues with the next line.

use core::{
    mem,
    str::{self, Utf8Error},
};
use std::io;

use bytes::{Buf as _, Bytes, BytesMut};
use futures::{
    future,
    stream::{Stream, StreamExt as _},
};
use thiserror::Error;
use tokio_util::{
    codec::{Decoder, FramedRead},
    io::StreamReader,
};

pub const MAX_LINE_LENGTH: usize = 1 << 20;

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct ServerSentEvent {
    pub event: Option<String>,
    pub data: String,
}

#[derive(Debug, Error)]
pub enum EventStreamError {
    #[error("event stream line exceeds {MAX_LINE_LENGTH} bytes")]
    LineTooLong,
    #[error("event stream line is not valid UTF-8")]
    InvalidUtf8(#[source] Utf8Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl EventStreamError {
    /// Whether the stream ended because of this error.
    ///
    /// Only errors reading the body are fatal. Malformed lines are skipped.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Io(_))
    }
}

/// Decodes a response body into events.
///
/// The returned stream ends after the first [fatal](EventStreamError::is_fatal) error.
pub fn server_sent_events<S>(
    body: S,
) -> impl Stream<Item = Result<ServerSentEvent, EventStreamError>>
where
    S: Stream<Item = io::Result<Bytes>>,
{
    let lines = FramedRead::new(StreamReader::new(body), LineCodec::default());

    lines
        .scan(EventBuilder::default(), |builder, line| {
            let item = match line {
                Ok(Line::Complete(line)) => match str::from_utf8(&line) {
                    Ok(line) => builder.feed(line).map(Ok),
                    Err(error) => {
                        builder.corrupted = true;
                        Some(Err(EventStreamError::InvalidUtf8(error)))
                    }
                },
                Ok(Line::TooLong) => {
                    builder.corrupted = true;
                    Some(Err(EventStreamError::LineTooLong))
                }
                Err(error) => Some(Err(error.into())),
            };

            future::ready(Some(item))
        })
        .filter_map(future::ready)
}

enum Line {
    Complete(Bytes),
    TooLong,
}

/// Splits a body into raw lines without decoding them.
///
/// Unlike `LinesCodec`, invalid lines are yielded as items rather than errors, so the
/// `FramedRead` around it keeps going.
#[derive(Default)]
struct LineCodec {
    // Bytes before this index are known not to contain a newline.
    next_index: usize,
    discarding: bool,
}

impl Decoder for LineCodec {
    type Item = Line;
    type Error = io::Error;

    fn decode(&mut self, buffer: &mut BytesMut) -> io::Result<Option<Line>> {
        loop {
            let newline = buffer[self.next_index..]
                .iter()
                .position(|byte| *byte == b'\n')
                .map(|offset| self.next_index + offset);

            match newline {
                Some(index) if self.discarding => {
                    buffer.advance(index + 1);
                    self.next_index = 0;
                    self.discarding = false;
                }
                Some(index) if index > MAX_LINE_LENGTH => {
                    buffer.advance(index + 1);
                    self.next_index = 0;
                    return Ok(Some(Line::TooLong));
                }
                Some(index) => {
                    let mut line = buffer.split_to(index + 1);
                    line.truncate(index);

                    if line.last() == Some(&b'\r') {
                        line.truncate(index - 1);
                    }

                    self.next_index = 0;
                    return Ok(Some(Line::Complete(line.freeze())));
                }
                None if self.discarding => {
                    buffer.clear();
                    self.next_index = 0;
                    return Ok(None);
                }
                None if buffer.len() > MAX_LINE_LENGTH => {
                    buffer.clear();
                    self.next_index = 0;
                    self.discarding = true;
                    return Ok(Some(Line::TooLong));
                }
                None => {
                    self.next_index = buffer.len();
                    return Ok(None);
                }
            }
        }
    }

    fn decode_eof(&mut self, buffer: &mut BytesMut) -> io::Result<Option<Line>> {
        let line = self.decode(buffer)?;

        // An unterminated last line cannot complete an event.
        if line.is_none() {
            buffer.clear();
            self.next_index = 0;
            self.discarding = false;
        }

        Ok(line)
    }
}

#[derive(Default)]
struct EventBuilder {
    event: Option<String>,
    data: Option<String>,
    corrupted: bool,
}

impl EventBuilder {
    fn feed(&mut self, line: &str) -> Option<ServerSentEvent> {
        if line.is_empty() {
            return self.dispatch();
        }

        // Comment.
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "event" => self.event = Some(value.to_owned()),
            "data" => match &mut self.data {
                Some(data) => {
                    data.push('\n');
                    data.push_str(value);
                }
                None => self.data = Some(value.to_owned()),
            },
            _ => {}
        }

        None
    }

    fn dispatch(&mut self) -> Option<ServerSentEvent> {
        let event = self.event.take();
        let data = self.data.take();

        if mem::take(&mut self.corrupted) {
            return None;
        }

        let data = data?;

        Some(ServerSentEvent { event, data })
    }
}
