//! # Field Extractor
//!
//! Reads fields and parameter lists straight out of a scanned token array.
//! Nothing here builds a document tree: lookups walk the flat [`Token`] slice
//! and hand raw source slices to the [`ValueCodec`] only for the parameters
//! that are actually bound.

use std::borrow::Cow;

use serde_json::Value;
use thiserror::Error;

use crate::codec::{CodecError, ValueCodec};
use crate::registry::ParamDescriptor;
use crate::scanner::{Token, TokenKind};

/// A scanned source buffer paired with its tokens
#[derive(Debug, Clone, Copy)]
pub struct Document<'a> {
    src: &'a str,
    tokens: &'a [Token],
}

impl<'a> Document<'a> {
    pub fn new(src: &'a str, tokens: &'a [Token]) -> Self {
        Self { src, tokens }
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn source(&self) -> &'a str {
        self.src
    }

    pub fn token(&self, index: usize) -> Option<&'a Token> {
        self.tokens.get(index)
    }

    pub fn kind(&self, index: usize) -> Option<TokenKind> {
        self.token(index).map(|t| t.kind)
    }

    /// Raw JSON text of a token (strings keep their quotes)
    pub fn raw(&self, index: usize) -> &'a str {
        self.token(index)
            .and_then(|t| self.src.get(t.start..t.end))
            .unwrap_or("")
    }

    /// Index of the first token after the subtree rooted at `index`
    pub fn next_sibling(&self, index: usize) -> usize {
        let mut remaining = 1usize;
        let mut next = index;
        while remaining > 0 && next < self.tokens.len() {
            remaining = remaining - 1 + self.tokens[next].size;
            next += 1;
        }
        next
    }

    /// Direct children of a container: array items, or the keys of an object
    pub fn children(&self, index: usize) -> Children<'a> {
        let size = self.token(index).map_or(0, |t| t.size);
        Children {
            doc: *self,
            next: index + 1,
            remaining: size,
        }
    }

    /// `(key, value)` token pairs of an object; `value` is `None` for a key
    /// without a value (only possible in lenient mode)
    pub fn entries(&self, object: usize) -> impl Iterator<Item = (usize, Option<usize>)> + 'a {
        let doc = *self;
        self.children(object).map(move |key| {
            let value = doc
                .token(key)
                .filter(|t| t.size > 0)
                .map(|_| key + 1);
            (key, value)
        })
    }

    /// Decoded contents of a string token
    pub fn string(&self, index: usize) -> Result<Cow<'a, str>, CodecError> {
        decode_string(self.raw(index))
    }

    /// Value token of the first key in `object` equal to `name`
    pub fn find_field(&self, object: usize, name: &str) -> Option<usize> {
        if self.kind(object) != Some(TokenKind::Object) {
            return None;
        }
        self.entries(object)
            .find(|&(key, _)| self.key_matches(key, name))
            .and_then(|(_, value)| value)
    }

    fn key_matches(&self, key: usize, name: &str) -> bool {
        self.kind(key) == Some(TokenKind::String)
            && self.string(key).is_ok_and(|decoded| decoded == name)
    }
}

/// Iterator over the direct children of a container token
#[derive(Debug, Clone)]
pub struct Children<'a> {
    doc: Document<'a>,
    next: usize,
    remaining: usize,
}

impl Iterator for Children<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        if self.remaining == 0 || self.next >= self.doc.len() {
            return None;
        }
        let current = self.next;
        self.remaining -= 1;
        self.next = self.doc.next_sibling(current);
        Some(current)
    }
}

/// Decode a quoted JSON string, borrowing when it holds no escapes
pub fn decode_string(raw: &str) -> Result<Cow<'_, str>, CodecError> {
    let inner = raw
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'));
    match inner {
        Some(inner) if !inner.contains('\\') => Ok(Cow::Borrowed(inner)),
        _ => Ok(Cow::Owned(serde_json::from_str::<String>(raw)?)),
    }
}

/// Raw slice of the value stored under a top-level key of the root object.
///
/// Used to read the method name before the method, and so its parameter
/// descriptors, are known.
pub fn first_top_level_field<'a>(doc: &Document<'a>, field: &str) -> Option<&'a str> {
    doc.find_field(0, field).map(|value| doc.raw(value))
}

/// Parameter binding failures, surfaced to clients as -32602
#[derive(Debug, Error)]
pub enum BindError {
    #[error("params must be an array or an object")]
    NotAContainer,
    #[error("missing required parameter '{0}'")]
    MissingParameter(String),
    #[error("unknown parameter '{0}'")]
    UnknownParameter(String),
    #[error("expected {expected} parameters, received {received}; only {defaults} have defaults")]
    NotEnoughArguments {
        expected: usize,
        received: usize,
        defaults: usize,
    },
    #[error("expected {expected} parameters, received {received}")]
    CountMismatch { expected: usize, received: usize },
    #[error("parameter '{name}': {source}")]
    Decode {
        name: String,
        #[source]
        source: CodecError,
    },
}

/// Bind the `params` container (array or object token, or `None` when the
/// request carries no params) against a method's descriptors.
///
/// Positional arguments bind by index; missing trailing arguments are filled
/// from their defaults. Named arguments bind by external name; unknown names
/// are rejected and missing names fall back to defaults.
pub fn bind_parameters(
    doc: &Document<'_>,
    params: Option<usize>,
    descriptors: &[ParamDescriptor],
    codec: &dyn ValueCodec,
) -> Result<Vec<Value>, BindError> {
    match params.map(|p| (p, doc.kind(p))) {
        None => bind_positional(doc, &[], descriptors, codec),
        Some((p, Some(TokenKind::Array))) => {
            let supplied: Vec<usize> = doc.children(p).collect();
            bind_positional(doc, &supplied, descriptors, codec)
        }
        Some((p, Some(TokenKind::Object))) => bind_named(doc, p, descriptors, codec),
        Some(_) => Err(BindError::NotAContainer),
    }
}

fn decode_param(
    doc: &Document<'_>,
    value: usize,
    descriptor: &ParamDescriptor,
    codec: &dyn ValueCodec,
) -> Result<Value, BindError> {
    codec
        .decode(doc.raw(value), &descriptor.ty)
        .map_err(|source| BindError::Decode {
            name: descriptor.name.clone(),
            source,
        })
}

fn bind_positional(
    doc: &Document<'_>,
    supplied: &[usize],
    descriptors: &[ParamDescriptor],
    codec: &dyn ValueCodec,
) -> Result<Vec<Value>, BindError> {
    let expected = descriptors.len();
    if supplied.len() > expected {
        return Err(BindError::CountMismatch {
            expected,
            received: supplied.len(),
        });
    }

    let missing = expected - supplied.len();
    let defaults = descriptors
        .iter()
        .rev()
        .take_while(|d| d.has_default())
        .count();
    if missing > defaults {
        return Err(BindError::NotEnoughArguments {
            expected,
            received: supplied.len(),
            defaults,
        });
    }

    let mut values = Vec::with_capacity(expected);
    for (descriptor, &value) in descriptors.iter().zip(supplied) {
        values.push(decode_param(doc, value, descriptor, codec)?);
    }
    values.extend(
        descriptors[supplied.len()..]
            .iter()
            .filter_map(|d| d.default.clone()),
    );

    if values.len() != expected {
        return Err(BindError::CountMismatch {
            expected,
            received: values.len(),
        });
    }
    Ok(values)
}

fn bind_named(
    doc: &Document<'_>,
    object: usize,
    descriptors: &[ParamDescriptor],
    codec: &dyn ValueCodec,
) -> Result<Vec<Value>, BindError> {
    let mut named = Vec::new();
    for (key, value) in doc.entries(object) {
        let name = doc.string(key).map_err(|source| BindError::Decode {
            name: doc.raw(key).to_string(),
            source,
        })?;
        named.push((name, value));
    }

    let mut values = Vec::with_capacity(descriptors.len());
    for descriptor in descriptors {
        let supplied = named
            .iter()
            .find(|(name, _)| *name == descriptor.name)
            .and_then(|&(_, value)| value);
        match (supplied, &descriptor.default) {
            (Some(value), _) => values.push(decode_param(doc, value, descriptor, codec)?),
            (None, Some(default)) => values.push(default.clone()),
            (None, None) => return Err(BindError::MissingParameter(descriptor.name.clone())),
        }
    }

    if let Some((unknown, _)) = named
        .iter()
        .find(|(name, _)| !descriptors.iter().any(|d| d.name == *name))
    {
        return Err(BindError::UnknownParameter(unknown.to_string()));
    }
    Ok(values)
}
