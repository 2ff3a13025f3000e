//! Asynchronous event sources for documents read through tokio.

use async_trait::async_trait;
use encoding_rs::Encoding;
use quick_xml::Reader;
use tokio::io::AsyncBufRead;
use xmlmap_core::{BranchContext, DocumentDriver, MarkupEvent, RunError};

use crate::reader::{encoding_for_label, translate, Step, TextDecoder};
use crate::XmlError;

/// Pull based producer of markup events that may wait on I/O.
#[async_trait]
pub trait AsyncEventSource: Send {
    type Error: Send;

    /// Next event, or `None` once the document is exhausted.
    async fn next_event(&mut self) -> Result<Option<MarkupEvent>, Self::Error>;
}

/// [`crate::XmlEventSource`] counterpart over a tokio reader.
pub struct AsyncXmlEventSource<R> {
    reader: Reader<R>,
    buf: Vec<u8>,
    encoding: Option<&'static Encoding>,
    pending: Option<MarkupEvent>,
    done: bool,
}

impl<R: AsyncBufRead + Unpin> AsyncXmlEventSource<R> {
    pub fn from_reader(reader: R) -> Self {
        Self {
            reader: Reader::from_reader(reader),
            buf: Vec::new(),
            encoding: None,
            pending: None,
            done: false,
        }
    }

    /// Decode the document as `label` regardless of its XML declaration.
    pub fn with_encoding(mut self, label: &str) -> Result<Self, XmlError> {
        self.encoding = Some(encoding_for_label(label)?);
        Ok(self)
    }

    /// Byte offset of the reader in the document.
    pub fn position(&self) -> usize {
        self.reader.buffer_position()
    }
}

#[async_trait]
impl<R> AsyncEventSource for AsyncXmlEventSource<R>
where
    R: AsyncBufRead + Unpin + Send,
{
    type Error = XmlError;

    async fn next_event(&mut self) -> Result<Option<MarkupEvent>, XmlError> {
        if let Some(event) = self.pending.take() {
            return Ok(Some(event));
        }
        while !self.done {
            self.buf.clear();
            let event = self
                .reader
                .read_event_into_async(&mut self.buf)
                .await
                .map_err(|source| XmlError::Syntax {
                    position: self.reader.buffer_position(),
                    source,
                })?;
            let position = self.reader.buffer_position();
            let decoder = TextDecoder::select(self.encoding, &self.reader);
            match translate(event, decoder, position)? {
                Step::One(event) => return Ok(Some(event)),
                Step::Pair(open, close) => {
                    self.pending = Some(close);
                    return Ok(Some(open));
                }
                Step::Skip => {}
                Step::Eof => self.done = true,
            }
        }
        Ok(None)
    }
}

/// Pump every event of an asynchronous `source` through `driver`.
pub async fn drive_async<C, S>(
    driver: &mut DocumentDriver<'_, C>,
    source: &mut S,
) -> Result<(), RunError<S::Error>>
where
    C: BranchContext,
    S: AsyncEventSource + ?Sized,
{
    while let Some(event) = source.next_event().await.map_err(RunError::Source)? {
        driver.handle(&event)?;
    }
    Ok(())
}
