//! # Key-Path Resolution
//!
//! Turns a declarative description of a nested field into the store key,
//! the remote path and the payload shape of a property-scoped write.
//!
//! ## Resolution Rule
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Scalar Patch vs Sub-Object Put                       │
//! │                                                                         │
//! │  root key "users/1", segments [address, city], leaf kind String        │
//! │                                                                         │
//! │  sync = Patch, leaf is Primitive | Nullable | String                    │
//! │    key     = users/1/address/city                                       │
//! │    path    = users/1/address          (leaf excluded)                   │
//! │    payload = {"city":"Oslo"}                                            │
//! │                                                                         │
//! │  otherwise (Put, or leaf is an Object)                                  │
//! │    key     = users/1/address/city                                       │
//! │    path    = users/1/address/city     (full chain)                      │
//! │    payload = "Oslo"                                                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The remote store only merges at the JSON-object level, so a scalar leaf
//! must be patched as a single-key object at its parent.
//!
//! ## Declaring Paths
//! ```rust
//! use serde::Serialize;
//! use tideline_core::property;
//!
//! #[derive(Serialize)]
//! struct Address { city: String }
//! impl tideline_core::PropertyValue for Address {}
//!
//! #[derive(Serialize)]
//! struct User { name: String, address: Address }
//!
//! let name = property!(User => name: String);
//! let city = property!(User => address.city: String);
//! assert_eq!(city.key_path().segments(), &["address", "city"]);
//! # let _ = name;
//! ```

use std::collections::{BTreeMap, HashMap};
use std::marker::PhantomData;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{CoreError, CoreResult};
use crate::types::{Entry, SyncOptions};

/// Characters the remote store reserves in key names.
pub const RESERVED_CHARS: &[char] = &['/', '.', '$', '#', '[', ']'];

// =============================================================================
// Value Kind
// =============================================================================

/// Classification of a leaf field, decides the payload shape of a patch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    /// Numbers, booleans, chars.
    Primitive,
    /// An optional primitive.
    Nullable,
    /// Text.
    String,
    /// Anything that serializes to an object or array.
    Object,
}

impl ValueKind {
    /// Scalar leaves are patched at their parent path.
    pub fn is_scalar(&self) -> bool {
        !matches!(self, ValueKind::Object)
    }

    /// Classifies an untyped JSON value.
    pub fn of_json(value: &Value) -> ValueKind {
        match value {
            Value::Null => ValueKind::Nullable,
            Value::Bool(_) | Value::Number(_) => ValueKind::Primitive,
            Value::String(_) => ValueKind::String,
            Value::Array(_) | Value::Object(_) => ValueKind::Object,
        }
    }
}

// =============================================================================
// Property Value Tags
// =============================================================================

/// Type tag for values that can sit at the end of a key path.
///
/// Entity types opt in with an empty impl and are treated as objects.
pub trait PropertyValue: Serialize {
    const KIND: ValueKind = ValueKind::Object;
}

macro_rules! primitive_property_values {
    ($($ty:ty),* $(,)?) => {
        $(impl PropertyValue for $ty {
            const KIND: ValueKind = ValueKind::Primitive;
        })*
    };
}

primitive_property_values!(
    bool, char, i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize, f32, f64
);

impl PropertyValue for String {
    const KIND: ValueKind = ValueKind::String;
}

impl PropertyValue for &str {
    const KIND: ValueKind = ValueKind::String;
}

impl<P: PropertyValue> PropertyValue for Option<P> {
    const KIND: ValueKind = match P::KIND {
        ValueKind::Primitive => ValueKind::Nullable,
        other => other,
    };
}

impl<P: Serialize> PropertyValue for Vec<P> {}
impl<V: Serialize> PropertyValue for HashMap<String, V> {}
impl<V: Serialize> PropertyValue for BTreeMap<String, V> {}
impl PropertyValue for Value {}

// =============================================================================
// Key Path
// =============================================================================

/// Ordered field names from the entity root to a leaf, plus the leaf's kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPath {
    segments: Vec<String>,
    kind: ValueKind,
}

impl KeyPath {
    pub fn new<I, S>(segments: I, kind: ValueKind) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        KeyPath {
            segments: segments.into_iter().map(Into::into).collect(),
            kind,
        }
    }

    /// Parses a `/`-separated path. Validation happens at resolve time.
    pub fn parse(path: &str, kind: ValueKind) -> Self {
        KeyPath::new(path.split('/'), kind)
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn kind(&self) -> ValueKind {
        self.kind
    }

    /// The last segment.
    pub fn leaf(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    /// Fails when the path has no segments or a segment is not a legal key.
    pub fn validate(&self) -> CoreResult<()> {
        if self.segments.is_empty() {
            return Err(CoreError::invalid_key_path("", "path has no segments"));
        }

        for (index, segment) in self.segments.iter().enumerate() {
            if segment.is_empty() {
                return Err(CoreError::invalid_key_path(
                    self.to_string(),
                    format!("segment {index} is empty"),
                ));
            }
            if let Some(c) = segment.chars().find(|c| RESERVED_CHARS.contains(c)) {
                return Err(CoreError::invalid_key_path(
                    self.to_string(),
                    format!("segment {segment:?} contains reserved character {c:?}"),
                ));
            }
        }

        Ok(())
    }
}

impl std::fmt::Display for KeyPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.segments.join("/"))
    }
}

/// A key path bound to an entity type `T` and a leaf type `P`.
///
/// Usually built with [`property!`](crate::property), which also checks at
/// compile time that the field chain exists on `T` with type `P`.
pub struct Property<T, P> {
    key_path: KeyPath,
    _marker: PhantomData<fn(&T) -> P>,
}

impl<T, P: PropertyValue> Property<T, P> {
    /// Builds a property from explicit segment names.
    ///
    /// Use this when the serialized field names differ from the Rust ones.
    pub fn new(segments: &[&str]) -> Self {
        Property {
            key_path: KeyPath::new(segments.iter().copied(), P::KIND),
            _marker: PhantomData,
        }
    }
}

impl<T, P> Property<T, P> {
    pub fn key_path(&self) -> &KeyPath {
        &self.key_path
    }
}

impl<T, P> Clone for Property<T, P> {
    fn clone(&self) -> Self {
        Property {
            key_path: self.key_path.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T, P> std::fmt::Debug for Property<T, P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Property")
            .field("key_path", &self.key_path)
            .finish()
    }
}

/// Declares a [`Property`] for a field chain of an entity.
///
/// ```rust
/// # use serde::Serialize;
/// # use tideline_core::property;
/// #[derive(Serialize)]
/// struct User { age: Option<u32> }
///
/// let age = property!(User => age: Option<u32>);
/// assert_eq!(age.key_path().kind(), tideline_core::ValueKind::Nullable);
/// ```
#[macro_export]
macro_rules! property {
    ($entity:ty => $($segment:ident).+ : $value:ty) => {{
        #[allow(dead_code)]
        fn __field_check(entity: &$entity) -> &$value {
            &entity.$($segment).+
        }
        $crate::key_path::Property::<$entity, $value>::new(&[$(stringify!($segment)),+])
    }};
}

// =============================================================================
// Resolution
// =============================================================================

/// The outcome of resolving a key path against a root key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedKeyPath {
    /// Store key of the partial entry, always the full chain.
    pub key: String,
    /// Remote path the push writes to.
    pub path: String,
    /// Field name of the leaf.
    pub leaf: String,
    /// Segments relative to the root entity.
    pub segments: Vec<String>,
    /// True when the payload wraps the leaf in a single-key object.
    pub scalar_patch: bool,
}

impl ResolvedKeyPath {
    /// Builds the push payload for `value`.
    pub fn payload(&self, value: &Value) -> String {
        if self.scalar_patch {
            let mut object = Map::with_capacity(1);
            object.insert(self.leaf.clone(), value.clone());
            Value::Object(object).to_string()
        } else {
            value.to_string()
        }
    }

    /// Builds the partial entry carrying `value`.
    pub fn to_entry(&self, value: Value, priority: i32, sync_options: SyncOptions) -> Entry {
        let data = self.payload(&value);
        Entry::partial(
            self.key.clone(),
            self.path.clone(),
            value,
            data,
            priority,
            sync_options,
        )
    }
}

/// Resolves `key_path` under `root_key`.
///
/// An empty root key addresses the remote root.
pub fn resolve(
    root_key: &str,
    key_path: &KeyPath,
    sync_options: SyncOptions,
) -> CoreResult<ResolvedKeyPath> {
    key_path.validate()?;

    let segments = key_path.segments();
    let scalar_patch = sync_options == SyncOptions::Patch && key_path.kind().is_scalar();

    let key = join_segments(root_key, segments);
    let path = if scalar_patch {
        join_segments(root_key, &segments[..segments.len() - 1])
    } else {
        key.clone()
    };

    Ok(ResolvedKeyPath {
        key,
        path,
        leaf: segments[segments.len() - 1].clone(),
        segments: segments.to_vec(),
        scalar_patch,
    })
}

fn join_segments(root_key: &str, segments: &[String]) -> String {
    let root = root_key.trim_end_matches('/');
    let tail = segments.join("/");

    match (root.is_empty(), tail.is_empty()) {
        (true, _) => tail,
        (false, true) => root.to_string(),
        (false, false) => format!("{root}/{tail}"),
    }
}
