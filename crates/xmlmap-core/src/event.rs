//! Markup events consumed by the driver and the seam to whatever produces them.

use std::collections::{BTreeMap, HashMap};

/// One tokenized markup event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarkupEvent {
    /// Element-open with its attributes in document order.
    Start {
        name: String,
        attributes: Vec<(String, String)>,
    },
    /// Raw, untrimmed character data.
    Text(String),
    /// Element-close.
    End { name: String },
}

impl MarkupEvent {
    pub fn start(name: impl Into<String>) -> Self {
        MarkupEvent::Start {
            name: name.into(),
            attributes: Vec::new(),
        }
    }

    pub fn start_with<K, V>(name: impl Into<String>, attributes: &[(K, V)]) -> Self
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        MarkupEvent::Start {
            name: name.into(),
            attributes: attributes
                .iter()
                .map(|(key, value)| (key.as_ref().to_string(), value.as_ref().to_string()))
                .collect(),
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        MarkupEvent::Text(text.into())
    }

    pub fn end(name: impl Into<String>) -> Self {
        MarkupEvent::End { name: name.into() }
    }
}

/// Name based access to the attributes of an element-open event.
pub trait AttributeSource {
    /// Raw value of attribute `name`, if present.
    fn attribute(&self, name: &str) -> Option<&str>;
}

impl<K: AsRef<str>, V: AsRef<str>> AttributeSource for [(K, V)] {
    fn attribute(&self, name: &str) -> Option<&str> {
        self.iter()
            .find(|(key, _)| key.as_ref() == name)
            .map(|(_, value)| value.as_ref())
    }
}

impl<K: AsRef<str>, V: AsRef<str>> AttributeSource for Vec<(K, V)> {
    fn attribute(&self, name: &str) -> Option<&str> {
        self.as_slice().attribute(name)
    }
}

impl<K: AsRef<str>, V: AsRef<str>, const N: usize> AttributeSource for [(K, V); N] {
    fn attribute(&self, name: &str) -> Option<&str> {
        self.as_slice().attribute(name)
    }
}

impl<V: AsRef<str>> AttributeSource for HashMap<String, V> {
    fn attribute(&self, name: &str) -> Option<&str> {
        self.get(name).map(AsRef::as_ref)
    }
}

impl<V: AsRef<str>> AttributeSource for BTreeMap<String, V> {
    fn attribute(&self, name: &str) -> Option<&str> {
        self.get(name).map(AsRef::as_ref)
    }
}

/// Pull based producer of markup events, e.g. an XML tokenizer.
pub trait EventSource {
    type Error;

    /// Next event, or `None` once the document is exhausted.
    fn next_event(&mut self) -> Result<Option<MarkupEvent>, Self::Error>;
}

/// Any in-memory sequence of events is a source that never fails.
impl<I> EventSource for I
where
    I: Iterator<Item = MarkupEvent>,
{
    type Error = std::convert::Infallible;

    fn next_event(&mut self) -> Result<Option<MarkupEvent>, Self::Error> {
        Ok(self.next())
    }
}
