//! Tag slugs
//!
//! A tag slug is the protobuf encoding of a resource's freeform and defined
//! tags, prefixed by a four byte preamble. The authorization service receives
//! the existing and the requested slugs and answers with the merged one.

use std::collections::BTreeMap;
use std::fmt;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use http::{Method, Request};
use prost::Message;
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;

use crate::error::Result;

/// Version 1, protobuf serialization, no encoding, no compression
pub const SLUG_PREAMBLE: [u8; 4] = [1, 3, 2, 2];

/// JSON field holding defined tags in resource bodies
pub const DEFINED_TAGS_KEY: &str = "definedTags";

/// Arbitrary key/value tags
pub type FreeformTagSet = BTreeMap<String, String>;

/// Namespace to key/value tags
pub type DefinedTagSet = BTreeMap<String, BTreeMap<String, String>>;

/// Protobuf messages of the slug body
pub mod proto {
    use std::collections::BTreeMap;

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Slug {
        #[prost(message, optional, tag = "1")]
        pub freeform_tags: Option<StringMap>,
        #[prost(message, optional, tag = "2")]
        pub defined_tags: Option<NamespaceMap>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct StringMap {
        #[prost(btree_map = "string, string", tag = "1")]
        pub entries: BTreeMap<String, String>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct NamespaceMap {
        #[prost(btree_map = "string, message", tag = "1")]
        pub namespaces: BTreeMap<String, NamespaceDefinedTags>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct NamespaceDefinedTags {
        #[prost(btree_map = "string, message", tag = "1")]
        pub tags: BTreeMap<String, DefinedTagValue>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct DefinedTagValue {
        #[prost(string, repeated, tag = "1")]
        pub value: Vec<String>,
    }
}

/// Preamble-prefixed protobuf tag blob
///
/// Serializes to JSON as a standard base64 string.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct TagSlug(Vec<u8>);

impl TagSlug {
    /// Encode tag sets; `None` leaves the corresponding field unset
    pub fn new(freeform: Option<FreeformTagSet>, defined: Option<DefinedTagSet>) -> Self {
        let slug = proto::Slug {
            freeform_tags: freeform.map(|entries| proto::StringMap { entries }),
            defined_tags: defined.map(|defined| proto::NamespaceMap {
                namespaces: defined
                    .into_iter()
                    .map(|(namespace, tags)| {
                        let tags = tags
                            .into_iter()
                            .map(|(key, value)| {
                                (key, proto::DefinedTagValue { value: vec![value] })
                            })
                            .collect();
                        (namespace, proto::NamespaceDefinedTags { tags })
                    })
                    .collect(),
            }),
        };
        Self::from_message(&slug)
    }

    /// Encode a protobuf slug behind the preamble
    pub fn from_message(slug: &proto::Slug) -> Self {
        let mut bytes = SLUG_PREAMBLE.to_vec();
        bytes.extend(slug.encode_to_vec());
        Self(bytes)
    }

    /// Wrap bytes as-is
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    /// Decode the protobuf body, ignoring a leading preamble
    ///
    /// # Errors
    ///
    /// Returns [`AuthzError::TagSlugDecode`](crate::AuthzError::TagSlugDecode)
    /// for malformed protobuf.
    pub fn to_message(&self) -> Result<proto::Slug> {
        let body = self.0.strip_prefix(&SLUG_PREAMBLE[..]).unwrap_or(&self.0[..]);
        Ok(proto::Slug::decode(body)?)
    }

    /// Decoded freeform tags; empty when the slug has none
    ///
    /// # Errors
    ///
    /// See [`TagSlug::to_message`].
    pub fn freeform_tag_set(&self) -> Result<FreeformTagSet> {
        Ok(self
            .to_message()?
            .freeform_tags
            .map(|map| map.entries)
            .unwrap_or_default())
    }

    /// Decoded defined tags; every tag keeps its first value
    ///
    /// # Errors
    ///
    /// See [`TagSlug::to_message`].
    pub fn defined_tag_set(&self) -> Result<DefinedTagSet> {
        let namespaces = self
            .to_message()?
            .defined_tags
            .map(|map| map.namespaces)
            .unwrap_or_default();

        Ok(namespaces
            .into_iter()
            .map(|(namespace, tags)| {
                let tags = tags
                    .tags
                    .into_iter()
                    .map(|(key, value)| {
                        (key, value.value.into_iter().next().unwrap_or_default())
                    })
                    .collect();
                (namespace, tags)
            })
            .collect())
    }
}

impl fmt::Debug for TagSlug {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TagSlug").field(&STANDARD.encode(&self.0)).finish()
    }
}

impl Serialize for TagSlug {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(&self.0))
    }
}

impl<'de> Deserialize<'de> for TagSlug {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded)
            .map(Self)
            .map_err(de::Error::custom)
    }
}

/// Prefix `bytes` with the preamble unless it already carries one
///
/// Bytes that start with the preamble but only decode as a whole are treated
/// as an unprefixed slug.
///
/// # Errors
///
/// Returns [`AuthzError::TagSlugDecode`](crate::AuthzError::TagSlugDecode)
/// when `bytes` is not protobuf with or without the preamble.
pub fn add_slug_headers(bytes: &[u8]) -> Result<TagSlug> {
    if let Some(body) = bytes.strip_prefix(&SLUG_PREAMBLE[..]) {
        if body.is_empty() || proto::Slug::decode(body).is_ok() {
            return Ok(TagSlug::from_bytes(bytes));
        }
    }

    proto::Slug::decode(bytes)?;
    let mut prefixed = SLUG_PREAMBLE.to_vec();
    prefixed.extend_from_slice(bytes);
    Ok(TagSlug(prefixed))
}

/// Whether `request` is a PUT whose body holds nothing but defined tags
///
/// # Errors
///
/// Returns [`AuthzError::Json`](crate::AuthzError::Json) when the body of a
/// PUT is not JSON or its `definedTags` value is not a [`DefinedTagSet`].
pub fn is_defined_tags_only_put_request(request: &Request<Bytes>) -> Result<bool> {
    if request.method() != Method::PUT {
        return Ok(false);
    }

    let body: Value = serde_json::from_slice(request.body())?;
    let Value::Object(mut fields) = body else {
        return Ok(false);
    };
    if fields.len() != 1 {
        return Ok(false);
    }
    let Some(defined) = fields.remove(DEFINED_TAGS_KEY) else {
        return Ok(false);
    };

    serde_json::from_value::<DefinedTagSet>(defined)?;
    Ok(true)
}
