//! XML front end for `xmlmap-core`: quick-xml backed event sources and
//! one-call entry points mapping a whole document through a driver.

use std::any::Any;
use std::io::BufRead;

use thiserror::Error;
use tokio::io::AsyncBufRead;
use tracing::debug;
use xmlmap_core::{BranchContext, DocumentDriver, MapError, RuleTree, RunError};

mod reader;
mod stream;

pub use reader::XmlEventSource;
pub use stream::{drive_async, AsyncEventSource, AsyncXmlEventSource};

#[derive(Debug, Error)]
pub enum XmlError {
    #[error("xml at byte {position}: {source}")]
    Syntax {
        position: usize,
        #[source]
        source: quick_xml::Error,
    },
    #[error("bytes at {position} are not valid {encoding}")]
    Decode {
        position: usize,
        encoding: &'static str,
    },
    #[error("unknown encoding label {0:?}")]
    UnknownEncoding(String),
    #[error(transparent)]
    Map(#[from] MapError),
}

impl XmlError {
    /// Byte offset reported by the reader, for markup errors.
    pub fn position(&self) -> Option<usize> {
        match self {
            XmlError::Syntax { position, .. } | XmlError::Decode { position, .. } => Some(*position),
            XmlError::UnknownEncoding(_) | XmlError::Map(_) => None,
        }
    }
}

impl From<RunError<XmlError>> for XmlError {
    fn from(err: RunError<XmlError>) -> Self {
        match err {
            RunError::Source(err) => err,
            RunError::Map(err) => XmlError::Map(err),
        }
    }
}

/// Map an in-memory document through `driver` and take its `T` result.
pub fn map_str<T, C>(xml: &str, driver: &mut DocumentDriver<'_, C>) -> Result<Option<T>, XmlError>
where
    T: Any,
    C: BranchContext,
{
    debug!(bytes = xml.len(), "mapping document");
    driver.run(XmlEventSource::from_str(xml))?;
    Ok(driver.take_result())
}

/// Map a document read from `reader` through `driver`.
pub fn map_reader<T, C, R>(reader: R, driver: &mut DocumentDriver<'_, C>) -> Result<Option<T>, XmlError>
where
    T: Any,
    C: BranchContext,
    R: BufRead,
{
    driver.run(XmlEventSource::from_reader(reader))?;
    Ok(driver.take_result())
}

/// Map a document read from `reader`, decoding it as `encoding` whatever its
/// XML declaration says.
pub fn map_reader_with_encoding<T, C, R>(
    reader: R,
    encoding: &str,
    driver: &mut DocumentDriver<'_, C>,
) -> Result<Option<T>, XmlError>
where
    T: Any,
    C: BranchContext,
    R: BufRead,
{
    driver.run(XmlEventSource::from_reader(reader).with_encoding(encoding)?)?;
    Ok(driver.take_result())
}

/// Map a document read asynchronously from `reader` through `driver`.
pub async fn map_async<T, C, R>(
    reader: R,
    driver: &mut DocumentDriver<'_, C>,
) -> Result<Option<T>, XmlError>
where
    T: Any,
    C: BranchContext,
    R: AsyncBufRead + Unpin + Send,
{
    let mut source = AsyncXmlEventSource::from_reader(reader);
    drive_async(driver, &mut source).await?;
    Ok(driver.take_result())
}

/// Map `xml` with a fresh driver over `tree`.
pub fn map_document<T, C>(tree: &RuleTree<C>, xml: &str) -> Result<Option<T>, XmlError>
where
    T: Any,
    C: BranchContext + Default,
{
    let mut driver = DocumentDriver::new(tree);
    map_str(xml, &mut driver)
}
