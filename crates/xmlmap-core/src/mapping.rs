//! Field mapping units: attribute sets and element text turned into typed
//! values and injected into objects living on the branch.
//!
//! Attribute units are assembled with a small typestate builder:
//!
//! ```
//! use xmlmap_core::{AttributeMapping, TypeMapBranch};
//!
//! #[derive(Default)]
//! struct Event {
//!     id: Option<String>,
//! }
//!
//! let unit: AttributeMapping<Event, Option<String>, TypeMapBranch> = AttributeMapping::on()
//!     .fields(["id"])
//!     .map(|values| Ok::<_, std::convert::Infallible>(values.first().map(str::to_owned)))
//!     .set(|event: &mut Event, id| event.id = id);
//! assert_eq!(unit.fields(), ["id"]);
//! ```
//!
//! `map` and `map_with_context` each consume the builder, so a unit can never
//! carry both kinds of mapping function.

use std::any::{type_name, Any};
use std::marker::PhantomData;

use tracing::{debug, warn};

use crate::branch::BranchContext;
use crate::error::{BoxError, MapError};
use crate::event::AttributeSource;

/// Attribute values captured for one application of an attribute unit, in
/// the order the unit declared them. Absent attributes are `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttributeValues {
    values: Vec<(String, Option<String>)>,
}

impl AttributeValues {
    /// Capture `fields` from `source`.
    pub fn capture<S>(fields: &[String], source: &S) -> Self
    where
        S: AttributeSource + ?Sized,
    {
        Self {
            values: fields
                .iter()
                .map(|field| (field.clone(), source.attribute(field).map(str::to_owned)))
                .collect(),
        }
    }

    /// Value of attribute `name`; `None` when undeclared or absent.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values
            .iter()
            .find(|(key, _)| key == name)
            .and_then(|(_, value)| value.as_deref())
    }

    /// Value of the first declared attribute.
    pub fn first(&self) -> Option<&str> {
        self.values.first().and_then(|(_, value)| value.as_deref())
    }

    /// Declared names with their captured values.
    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.values
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_deref()))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, Option<V>)> for AttributeValues {
    fn from_iter<I: IntoIterator<Item = (K, Option<V>)>>(iter: I) -> Self {
        Self {
            values: iter
                .into_iter()
                .map(|(key, value)| (key.into(), value.map(Into::into)))
                .collect(),
        }
    }
}

type Predicate<T> = Box<dyn Fn(&T) -> bool + Send + Sync>;
type PureFn<V> = Box<dyn Fn(&AttributeValues) -> Result<V, BoxError> + Send + Sync>;
type ContextFn<V, C> = Box<dyn Fn(&AttributeValues, &C) -> Result<V, BoxError> + Send + Sync>;
type Setter<T, V> = Box<dyn Fn(&mut T, V) + Send + Sync>;

/// How an attribute unit locates the object it writes into.
enum Target<T> {
    Type,
    Matching(Predicate<T>),
}

impl<T: Any> Target<T> {
    fn resolves<C: BranchContext>(&self, branch: &C) -> bool {
        match self {
            Target::Type => branch.get::<T>().is_some(),
            Target::Matching(predicate) => branch.get_matching::<T, _>(predicate).is_some(),
        }
    }

    fn resolve_mut<'b, C: BranchContext>(&self, branch: &'b mut C) -> Option<&'b mut T> {
        match self {
            Target::Type => branch.get_mut::<T>(),
            Target::Matching(predicate) => branch.get_matching_mut::<T, _>(predicate),
        }
    }
}

enum Transform<V, C> {
    Pure(PureFn<V>),
    WithContext(ContextFn<V, C>),
}

/// First builder stage: target chosen, attribute names being collected.
pub struct AttributeMappingBuilder<T, C> {
    target: Target<T>,
    fields: Vec<String>,
    _context: PhantomData<fn(&C)>,
}

/// Second builder stage: mapping function chosen, setter pending.
pub struct AttributeMappingSetter<T, V, C> {
    target: Target<T>,
    fields: Vec<String>,
    transform: Transform<V, C>,
}

/// Attribute-set mapping unit: captured attributes → `V` → setter on `T`.
pub struct AttributeMapping<T, V, C> {
    target: Target<T>,
    fields: Vec<String>,
    transform: Transform<V, C>,
    setter: Setter<T, V>,
}

impl<T: Any, C> AttributeMapping<T, (), C> {
    /// Start a unit writing into the live object of type `T`.
    pub fn on() -> AttributeMappingBuilder<T, C> {
        AttributeMappingBuilder {
            target: Target::Type,
            fields: Vec::new(),
            _context: PhantomData,
        }
    }

    /// Start a unit writing into the object of type `T` selected by
    /// `predicate`. With a [`crate::ListBranch`] the most recently inserted
    /// match wins.
    pub fn matching<P>(predicate: P) -> AttributeMappingBuilder<T, C>
    where
        P: Fn(&T) -> bool + Send + Sync + 'static,
    {
        AttributeMappingBuilder {
            target: Target::Matching(Box::new(predicate)),
            fields: Vec::new(),
            _context: PhantomData,
        }
    }
}

impl<T, C> AttributeMappingBuilder<T, C> {
    /// Attribute names to capture, in order.
    pub fn fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields.extend(fields.into_iter().map(Into::into));
        self
    }

    /// Use a pure mapping function.
    pub fn map<V, E, F>(self, mapper: F) -> AttributeMappingSetter<T, V, C>
    where
        F: Fn(&AttributeValues) -> Result<V, E> + Send + Sync + 'static,
        E: Into<BoxError>,
    {
        AttributeMappingSetter {
            target: self.target,
            fields: self.fields,
            transform: Transform::Pure(Box::new(
                move |values: &AttributeValues| -> Result<V, BoxError> {
                    mapper(values).map_err(Into::into)
                },
            )),
        }
    }

    /// Use a mapping function that can also read the live branch.
    pub fn map_with_context<V, E, F>(self, mapper: F) -> AttributeMappingSetter<T, V, C>
    where
        F: Fn(&AttributeValues, &C) -> Result<V, E> + Send + Sync + 'static,
        E: Into<BoxError>,
    {
        AttributeMappingSetter {
            target: self.target,
            fields: self.fields,
            transform: Transform::WithContext(Box::new(
                move |values: &AttributeValues, branch: &C| -> Result<V, BoxError> {
                    mapper(values, branch).map_err(Into::into)
                },
            )),
        }
    }
}

impl<T, V, C> AttributeMappingSetter<T, V, C> {
    /// Finish the unit with the setter applied to the resolved target.
    pub fn set<F>(self, setter: F) -> AttributeMapping<T, V, C>
    where
        F: Fn(&mut T, V) + Send + Sync + 'static,
    {
        AttributeMapping {
            target: self.target,
            fields: self.fields,
            transform: self.transform,
            setter: Box::new(setter),
        }
    }
}

impl<T, V, C> AttributeMapping<T, V, C> {
    /// Attribute names this unit captures.
    pub fn fields(&self) -> &[String] {
        &self.fields
    }
}

impl<T: Any, V, C: BranchContext> AttributeMapping<T, V, C> {
    /// Apply the unit to already captured values. Returns whether the setter
    /// ran.
    pub fn apply(
        &self,
        element: &str,
        values: &AttributeValues,
        branch: &mut C,
    ) -> Result<bool, MapError> {
        if self.fields.is_empty() {
            return Ok(false);
        }
        if !self.target.resolves(branch) {
            debug!(
                element,
                target = type_name::<T>(),
                "no target object on the branch, attribute values dismissed"
            );
            return Ok(false);
        }
        let value = match &self.transform {
            Transform::Pure(mapper) => mapper(values),
            Transform::WithContext(mapper) => mapper(values, &*branch),
        }
        .map_err(|source| MapError::Attribute {
            element: element.to_string(),
            attributes: self.fields.clone(),
            source,
        })?;
        match self.target.resolve_mut(branch) {
            Some(target) => {
                (self.setter)(target, value);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

/// Type-erased attribute unit stored on a rule node.
pub(crate) trait AttributeRule<C>: Send + Sync {
    fn fields(&self) -> &[String];

    fn apply(
        &self,
        element: &str,
        values: &AttributeValues,
        branch: &mut C,
    ) -> Result<bool, MapError>;
}

impl<T, V, C> AttributeRule<C> for AttributeMapping<T, V, C>
where
    T: Any,
    C: BranchContext,
{
    fn fields(&self) -> &[String] {
        AttributeMapping::fields(self)
    }

    fn apply(
        &self,
        element: &str,
        values: &AttributeValues,
        branch: &mut C,
    ) -> Result<bool, MapError> {
        AttributeMapping::apply(self, element, values, branch)
    }
}

type TextFn<V> = Box<dyn Fn(&str) -> Result<V, BoxError> + Send + Sync>;

/// Element text mapping unit: text → `V` → setter on the live `T`.
pub struct TextMapping<T, V> {
    mapper: TextFn<V>,
    setter: Setter<T, V>,
}

impl<T: Any, V> TextMapping<T, V> {
    pub fn new<M, E, S>(mapper: M, setter: S) -> Self
    where
        M: Fn(&str) -> Result<V, E> + Send + Sync + 'static,
        E: Into<BoxError>,
        S: Fn(&mut T, V) + Send + Sync + 'static,
    {
        Self {
            mapper: Box::new(move |text: &str| -> Result<V, BoxError> {
                mapper(text).map_err(Into::into)
            }),
            setter: Box::new(setter),
        }
    }

    /// Map `text` into `target`. A missing target is reported and skipped;
    /// returns whether the setter ran.
    pub fn apply(&self, element: &str, text: &str, target: Option<&mut T>) -> Result<bool, MapError> {
        let Some(target) = target else {
            warn!(
                element,
                target = type_name::<T>(),
                content = %crate::truncate_for_log(text, crate::DEFAULT_LOG_TEXT_LIMIT),
                "no object of the required type on the branch, element text dismissed"
            );
            return Ok(false);
        };
        let value = (self.mapper)(text).map_err(|source| MapError::Text {
            element: element.to_string(),
            source,
        })?;
        (self.setter)(target, value);
        Ok(true)
    }
}

/// Type-erased text unit stored on a rule node.
pub(crate) trait TextRule<C>: Send + Sync {
    fn apply(&self, element: &str, text: &str, branch: &mut C) -> Result<bool, MapError>;
}

impl<T, V, C> TextRule<C> for TextMapping<T, V>
where
    T: Any,
    C: BranchContext,
{
    fn apply(&self, element: &str, text: &str, branch: &mut C) -> Result<bool, MapError> {
        TextMapping::apply(self, element, text, branch.get_mut::<T>())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::branch::{ListBranch, TypeMapBranch};

    #[derive(Debug, Default, PartialEq)]
    struct Event {
        id: Option<String>,
        name: Option<String>,
        description: Option<String>,
    }

    #[derive(Debug, Default, PartialEq)]
    struct Market {
        id: String,
        name: Option<String>,
    }

    fn first(values: &AttributeValues) -> Result<Option<String>, BoxError> {
        Ok(values.first().map(str::to_owned))
    }

    fn captured(pairs: &[(&str, &str)], fields: &[&str]) -> AttributeValues {
        let fields: Vec<String> = fields.iter().map(|f| f.to_string()).collect();
        AttributeValues::capture(&fields, pairs)
    }

    #[test]
    fn capture_marks_absent_attributes() {
        let values = captured(&[("id", "1")], &["id", "name"]);
        assert_eq!(values.get("id"), Some("1"));
        assert_eq!(values.get("name"), None);
        assert_eq!(values.len(), 2);
        assert_eq!(
            values.iter().collect::<Vec<_>>(),
            vec![("id", Some("1")), ("name", None)]
        );
    }

    #[test]
    fn typed_unit_sets_value() {
        let unit = AttributeMapping::<Event, _, TypeMapBranch>::on()
            .fields(["id"])
            .map(first)
            .set(|event: &mut Event, id| event.id = id);
        let mut branch = TypeMapBranch::with(Event::default());
        let applied = unit
            .apply("event", &captured(&[("id", "1")], &["id"]), &mut branch)
            .expect("apply");
        assert!(applied);
        assert_eq!(branch.get::<Event>().unwrap().id.as_deref(), Some("1"));
    }

    #[test]
    fn missing_target_is_skipped() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let unit = AttributeMapping::<Event, _, TypeMapBranch>::on()
            .fields(["id"])
            .map(move |values| {
                seen.fetch_add(1, Ordering::SeqCst);
                first(values)
            })
            .set(|event: &mut Event, id| event.id = id);
        let mut branch = TypeMapBranch::new();
        let applied = unit
            .apply("event", &captured(&[("id", "1")], &["id"]), &mut branch)
            .expect("apply");
        assert!(!applied);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn zero_field_unit_never_fires() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let unit = AttributeMapping::<Event, _, TypeMapBranch>::on()
            .map(first)
            .set(move |_: &mut Event, _| {
                seen.fetch_add(1, Ordering::SeqCst);
            });
        let mut with_target = TypeMapBranch::with(Event::default());
        let mut without_target = TypeMapBranch::new();
        let empty = AttributeValues::default();
        assert!(!unit.apply("event", &empty, &mut with_target).unwrap());
        assert!(!unit.apply("event", &empty, &mut without_target).unwrap());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn context_mapper_reads_branch() {
        let unit = AttributeMapping::<Market, _, TypeMapBranch>::on()
            .fields(["name"])
            .map_with_context(|values, branch: &TypeMapBranch| -> Result<String, BoxError> {
                let event = branch.get::<Event>().ok_or("no event")?;
                Ok(format!(
                    "{} ({})",
                    values.get("name").unwrap_or_default(),
                    event.name.as_deref().unwrap_or_default()
                ))
            })
            .set(|market: &mut Market, name| market.name = Some(name));
        let mut branch = TypeMapBranch::new();
        branch
            .insert(Event {
                name: Some("Foo".into()),
                ..Event::default()
            })
            .unwrap();
        branch.insert(Market::default()).unwrap();
        unit.apply("market", &captured(&[("name", "Mkt Foo")], &["name"]), &mut branch)
            .expect("apply");
        assert_eq!(
            branch.get::<Market>().unwrap().name.as_deref(),
            Some("Mkt Foo (Foo)")
        );
    }

    #[test]
    fn mapper_error_carries_element_and_fields() {
        let unit = AttributeMapping::<Event, _, TypeMapBranch>::on()
            .fields(["id", "name"])
            .map(|values| values.get("id").ok_or("id required").map(str::to_owned))
            .set(|event: &mut Event, id| event.id = Some(id));
        let mut branch = TypeMapBranch::with(Event::default());
        let err = unit
            .apply("event", &captured(&[("name", "x")], &["id", "name"]), &mut branch)
            .unwrap_err();
        match err {
            MapError::Attribute {
                element,
                attributes,
                ..
            } => {
                assert_eq!(element, "event");
                assert_eq!(attributes, vec!["id".to_string(), "name".to_string()]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn predicate_unit_picks_most_recent_match() {
        let unit = AttributeMapping::<Market, _, ListBranch>::matching(|market: &Market| {
            market.id.starts_with('m')
        })
        .fields(["name"])
        .map(first)
        .set(|market: &mut Market, name| market.name = name);
        let mut branch = ListBranch::new();
        branch.insert(Market { id: "m1".into(), name: None }).unwrap();
        branch.insert(Market { id: "m2".into(), name: None }).unwrap();
        branch.insert(Market { id: "x3".into(), name: None }).unwrap();
        unit.apply("selection", &captured(&[("name", "Sel")], &["name"]), &mut branch)
            .expect("apply");
        let named = branch
            .get_matching::<Market, _>(|market| market.name.is_some())
            .expect("one market named");
        assert_eq!(named.id, "m2");
    }

    #[test]
    fn text_unit_maps_and_warns_on_missing_target() {
        let unit = TextMapping::new(
            |text: &str| Ok::<_, BoxError>(text.to_owned()),
            |event: &mut Event, text| event.description = Some(text),
        );
        let mut event = Event::default();
        assert!(unit.apply("event", "Some text", Some(&mut event)).unwrap());
        assert_eq!(event.description.as_deref(), Some("Some text"));
        assert!(!unit.apply("event", "lost", None).unwrap());
    }

    #[test]
    fn text_unit_error_is_reported() {
        let unit = TextMapping::new(
            |text: &str| text.parse::<u32>(),
            |_: &mut Event, _| {},
        );
        let mut event = Event::default();
        let err = unit.apply("count", "abc", Some(&mut event)).unwrap_err();
        assert!(matches!(err, MapError::Text { ref element, .. } if element == "count"));
    }
}
