//! Blocking event source over `quick_xml::Reader`.

use std::borrow::Cow;
use std::io::BufRead;

use bytes::{Buf, Bytes};
use encoding_rs::Encoding;
use quick_xml::encoding::Decoder;
use quick_xml::escape::unescape;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use tracing::{debug, trace};
use xmlmap_core::{EventSource, MarkupEvent};

use crate::XmlError;

/// Outcome of translating one quick-xml event.
pub(crate) enum Step {
    One(MarkupEvent),
    /// Self-closing element: open followed by close.
    Pair(MarkupEvent, MarkupEvent),
    Skip,
    Eof,
}

/// Decodes raw document bytes into text.
#[derive(Clone, Copy)]
pub(crate) enum TextDecoder {
    /// Whatever the reader detected from the BOM or the XML declaration.
    Document(Decoder),
    /// Encoding forced by the caller; the declaration is ignored.
    Fixed(&'static Encoding),
}

impl TextDecoder {
    pub(crate) fn select<R>(fixed: Option<&'static Encoding>, reader: &Reader<R>) -> Self {
        match fixed {
            Some(encoding) => TextDecoder::Fixed(encoding),
            None => TextDecoder::Document(reader.decoder()),
        }
    }

    fn decode<'b>(&self, bytes: &'b [u8], position: usize) -> Result<Cow<'b, str>, XmlError> {
        match self {
            TextDecoder::Document(decoder) => decoder
                .decode(bytes)
                .map_err(|source| XmlError::Syntax { position, source }),
            TextDecoder::Fixed(encoding) => encoding
                .decode_without_bom_handling_and_without_replacement(bytes)
                .ok_or(XmlError::Decode {
                    position,
                    encoding: encoding.name(),
                }),
        }
    }

    fn owned(&self, bytes: &[u8], position: usize) -> Result<String, XmlError> {
        self.decode(bytes, position).map(Cow::into_owned)
    }

    fn unescaped(&self, bytes: &[u8], position: usize) -> Result<String, XmlError> {
        let decoded = self.decode(bytes, position)?;
        unescape(&decoded)
            .map(Cow::into_owned)
            .map_err(|err| XmlError::Syntax {
                position,
                source: err.into(),
            })
    }
}

/// Resolve an encoding label such as `ISO-8859-1` or `windows-1252`.
pub(crate) fn encoding_for_label(label: &str) -> Result<&'static Encoding, XmlError> {
    Encoding::for_label(label.trim().as_bytes())
        .ok_or_else(|| XmlError::UnknownEncoding(label.to_string()))
}

pub(crate) fn translate(
    event: Event<'_>,
    decoder: TextDecoder,
    position: usize,
) -> Result<Step, XmlError> {
    match event {
        Event::Start(start) => Ok(Step::One(start_event(&start, decoder, position)?)),
        Event::Empty(start) => {
            let open = start_event(&start, decoder, position)?;
            let name = decoder.owned(start.local_name().as_ref(), position)?;
            Ok(Step::Pair(open, MarkupEvent::End { name }))
        }
        Event::End(end) => Ok(Step::One(MarkupEvent::End {
            name: decoder.owned(end.local_name().as_ref(), position)?,
        })),
        Event::Text(text) => Ok(Step::One(MarkupEvent::Text(
            decoder.unescaped(&text, position)?,
        ))),
        Event::CData(data) => Ok(Step::One(MarkupEvent::Text(decoder.owned(&data, position)?))),
        Event::Eof => Ok(Step::Eof),
        Event::Comment(_) | Event::Decl(_) | Event::PI(_) | Event::DocType(_) => {
            trace!(position, "non-element markup dropped");
            Ok(Step::Skip)
        }
    }
}

fn start_event(
    start: &BytesStart<'_>,
    decoder: TextDecoder,
    position: usize,
) -> Result<MarkupEvent, XmlError> {
    let name = decoder.owned(start.local_name().as_ref(), position)?;
    let mut attributes = Vec::new();
    for attr in start.attributes() {
        let attr = attr.map_err(|err| XmlError::Syntax {
            position,
            source: err.into(),
        })?;
        if attr.key.as_namespace_binding().is_some() {
            continue;
        }
        let key = decoder.owned(attr.key.local_name().as_ref(), position)?;
        let value = decoder.unescaped(&attr.value, position)?;
        attributes.push((key, value));
    }
    Ok(MarkupEvent::Start { name, attributes })
}

/// Pulls [`MarkupEvent`]s out of an XML document.
///
/// Element and attribute names are reported without their namespace prefix;
/// namespace declarations are not reported as attributes. Byte input is decoded
/// according to its BOM or XML declaration unless [`XmlEventSource::with_encoding`]
/// forces an encoding.
pub struct XmlEventSource<R> {
    reader: Reader<R>,
    buf: Vec<u8>,
    encoding: Option<&'static Encoding>,
    pending: Option<MarkupEvent>,
    done: bool,
}

impl<'a> XmlEventSource<&'a [u8]> {
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(xml: &'a str) -> Self {
        Self::wrap(Reader::from_str(xml))
    }
}

impl XmlEventSource<bytes::buf::Reader<Bytes>> {
    pub fn from_bytes(data: Bytes) -> Self {
        Self::from_reader(data.reader())
    }
}

impl<R: BufRead> XmlEventSource<R> {
    pub fn from_reader(reader: R) -> Self {
        Self::wrap(Reader::from_reader(reader))
    }
}

impl<R> XmlEventSource<R> {
    fn wrap(reader: Reader<R>) -> Self {
        Self {
            reader,
            buf: Vec::new(),
            encoding: None,
            pending: None,
            done: false,
        }
    }

    /// Decode the document as `label` regardless of its XML declaration.
    pub fn with_encoding(mut self, label: &str) -> Result<Self, XmlError> {
        let encoding = encoding_for_label(label)?;
        debug!(encoding = encoding.name(), "encoding override");
        self.encoding = Some(encoding);
        Ok(self)
    }

    /// Byte offset of the reader in the document.
    pub fn position(&self) -> usize {
        self.reader.buffer_position()
    }
}

impl<R: BufRead> EventSource for XmlEventSource<R> {
    type Error = XmlError;

    fn next_event(&mut self) -> Result<Option<MarkupEvent>, XmlError> {
        if let Some(event) = self.pending.take() {
            return Ok(Some(event));
        }
        while !self.done {
            self.buf.clear();
            let event = self
                .reader
                .read_event_into(&mut self.buf)
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
