//! Stock converters for attribute and text mapping units.
//!
//! Attribute converters take the captured [`AttributeValues`] and look at the
//! first declared attribute unless stated otherwise; text converters take the
//! trimmed element text.

use std::any::type_name;
use std::fmt::Display;
use std::str::FromStr;

use thiserror::Error;
use tracing::debug;
use xmlmap_core::AttributeValues;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConvertError {
    #[error("required attribute {0} is absent")]
    Missing(String),
    #[error("no attribute declared for this unit")]
    NoFields,
    #[error("cannot parse {value:?} as {target}: {reason}")]
    Parse {
        value: String,
        target: &'static str,
        reason: String,
    },
}

impl ConvertError {
    fn parse<T, E: Display>(value: &str, err: E) -> Self {
        ConvertError::Parse {
            value: value.to_string(),
            target: type_name::<T>(),
            reason: err.to_string(),
        }
    }
}

/// Value of the first declared attribute, if present.
pub fn first(values: &AttributeValues) -> Result<Option<String>, ConvertError> {
    Ok(values.first().map(str::to_owned))
}

/// Value of the first declared attribute; absence is an error.
pub fn required(values: &AttributeValues) -> Result<String, ConvertError> {
    let (name, value) = values.iter().next().ok_or(ConvertError::NoFields)?;
    value
        .map(str::to_owned)
        .ok_or_else(|| ConvertError::Missing(name.to_string()))
}

/// `TRUE`, `Y` or `YES` in any case map to `true`; anything else, absence
/// included, maps to `false`.
pub fn boolean(values: &AttributeValues) -> Result<bool, ConvertError> {
    Ok(values.first().is_some_and(|value| {
        ["TRUE", "Y", "YES"]
            .iter()
            .any(|accepted| value.eq_ignore_ascii_case(accepted))
    }))
}

/// Lenient 32-bit integer: absent or unparsable values map to `0`.
pub fn integer(values: &AttributeValues) -> Result<i32, ConvertError> {
    let Some(value) = values.first() else {
        return Ok(0);
    };
    Ok(value.parse::<i32>().unwrap_or_else(|err| {
        debug!(value, error = %err, "unparsable integer attribute, using 0");
        0
    }))
}

/// Strict parse of the first declared attribute into `T`; absence is `None`.
pub fn parsed<T>(values: &AttributeValues) -> Result<Option<T>, ConvertError>
where
    T: FromStr,
    T::Err: Display,
{
    values
        .first()
        .map(|value| value.parse::<T>().map_err(|err| ConvertError::parse::<T, _>(value, err)))
        .transpose()
}

/// All present values joined with `separator`, in declaration order; `None`
/// when every declared attribute is absent.
pub fn joined(
    separator: &str,
) -> impl Fn(&AttributeValues) -> Result<Option<String>, ConvertError> + Send + Sync + 'static {
    let separator = separator.to_owned();
    move |values: &AttributeValues| -> Result<Option<String>, ConvertError> {
        let present: Vec<&str> = values.iter().filter_map(|(_, value)| value).collect();
        if present.is_empty() {
            Ok(None)
        } else {
            Ok(Some(present.join(separator.as_str())))
        }
    }
}

/// Element text as is.
pub fn text(value: &str) -> Result<String, ConvertError> {
    Ok(value.to_owned())
}

/// Strict parse of element text into `T`.
pub fn text_parsed<T>(value: &str) -> Result<T, ConvertError>
where
    T: FromStr,
    T::Err: Display,
{
    value
        .parse::<T>()
        .map_err(|err| ConvertError::parse::<T, _>(value, err))
}
