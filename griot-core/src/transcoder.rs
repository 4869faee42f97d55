//! Self-describing value transcoding.
//!
//! The [`Transcoder`] turns value graphs ([`Value`]) into a self-describing
//! JSON byte string and back. A fixed set of primitives is carried directly;
//! everything else goes through a registered [`Transcoding`], which maps a
//! custom Rust type to primitive form under a unique short name. On the wire
//! a custom value is a two-key mapping:
//!
//! ```json
//! {"_type_": "datetime_iso", "_data_": "2024-05-02T09:30:00.000001+00:00"}
//! ```
//!
//! The decoder dispatches on the `_type_` tag and fails, naming the tag,
//! when no transcoding is registered for it.
//!
//! [`Transcoder::standard`] registers the built-in transcodings for UUIDs
//! ([`UuidAsHex`]), arbitrary-precision decimals ([`DecimalAsStr`]), and
//! timezone-aware timestamps with microsecond precision ([`DatetimeAsIso`]).

use std::{
    any::{Any, TypeId},
    collections::{BTreeMap, HashMap},
    fmt,
    sync::Arc,
};

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use bigdecimal::BigDecimal;
use chrono::{DateTime, SecondsFormat, Utc};
use thiserror::Error;
use uuid::Uuid;

/// Reserved mapping key naming the transcoding that produced a value.
pub const TYPE_KEY: &str = "_type_";
/// Reserved mapping key carrying the transcoded body.
pub const DATA_KEY: &str = "_data_";
/// Reserved tag for the byte-string primitive, which JSON cannot carry
/// natively. Transcodings must not register under this name.
const BYTES_TAG: &str = "bytes";

/// Error raised while encoding or decoding a value graph.
#[derive(Debug, Error)]
pub enum TranscodingError {
    /// The decoder met a type tag with no registered transcoding.
    #[error("no transcoding registered under tag `{tag}`")]
    UnknownTag { tag: String },
    /// The encoder met a custom value whose type has no registered
    /// transcoding.
    #[error("no transcoding registered for type `{type_name}`")]
    UnregisteredType { type_name: &'static str },
    /// A transcoding rejected the body it was asked to handle.
    #[error("transcoding `{name}` rejected its input: {reason}")]
    Rejected { name: &'static str, reason: String },
    /// Floats on the wire are JSON numbers; NaN and infinities have no
    /// representation.
    #[error("non-finite float cannot be encoded")]
    NonFiniteFloat,
    /// The byte string is not a well-formed document.
    #[error("malformed document: {0}")]
    Malformed(#[from] serde_json::Error),
    /// A record's topic has no entry in the topic registry.
    #[error("no event type registered for topic `{topic}`")]
    UnknownTopic { topic: String },
}

impl TranscodingError {
    fn rejected(name: &'static str, reason: impl Into<String>) -> Self {
        Self::Rejected {
            name,
            reason: reason.into(),
        }
    }
}

/// A value graph accepted by the [`Transcoder`].
///
/// The first eight variants are the primitive forms carried directly on the
/// wire. [`Value::Custom`] holds any other type; encoding one requires a
/// [`Transcoding`] registered for its concrete type.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    Seq(Vec<Value>),
    Map(BTreeMap<String, Value>),
    /// A value handled by a registered [`Transcoding`].
    Custom(CustomValue),
}

impl Value {
    /// Wrap a custom value for transcoding.
    pub fn custom<T>(value: T) -> Self
    where
        T: Any + PartialEq + fmt::Debug + Send + Sync,
    {
        Self::Custom(CustomValue::new(value))
    }

    /// Borrow the inner custom value, if this is a `Custom` of type `T`.
    #[must_use]
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        match self {
            Self::Custom(custom) => custom.downcast_ref(),
            _ => None,
        }
    }

    /// Borrow the string contents, if this is a `Str`.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Copy out the integer contents, if this is an `Int`.
    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

trait ErasedValue: Any + Send + Sync {
    fn erased_eq(&self, other: &dyn ErasedValue) -> bool;
    fn as_any(&self) -> &dyn Any;
    fn type_name(&self) -> &'static str;
    fn debug(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result;
}

impl<T> ErasedValue for T
where
    T: Any + PartialEq + fmt::Debug + Send + Sync,
{
    fn erased_eq(&self, other: &dyn ErasedValue) -> bool {
        other
            .as_any()
            .downcast_ref::<T>()
            .is_some_and(|other| other == self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }

    fn debug(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// A type-erased custom value inside a [`Value`] graph.
///
/// Holds any `T: PartialEq + Debug + Send + Sync + 'static`. Equality
/// compares the erased values when their concrete types match and is false
/// otherwise.
#[derive(Clone)]
pub struct CustomValue(Arc<dyn ErasedValue>);

impl CustomValue {
    /// Erase a concrete value.
    pub fn new<T>(value: T) -> Self
    where
        T: Any + PartialEq + fmt::Debug + Send + Sync,
    {
        Self(Arc::new(value))
    }

    /// Borrow the concrete value, if it is a `T`.
    #[must_use]
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.as_any().downcast_ref()
    }

    /// Name of the erased concrete type, for diagnostics.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        self.0.type_name()
    }

    fn inner_type_id(&self) -> TypeId {
        self.0.as_any().type_id()
    }
}

impl PartialEq for CustomValue {
    fn eq(&self, other: &Self) -> bool {
        self.0.erased_eq(other.0.as_ref())
    }
}

impl fmt::Debug for CustomValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.debug(f)
    }
}

/// A registered codec for one custom value type.
///
/// Each transcoding declares the concrete type it handles, a unique short
/// name used as the wire tag, and an encode/decode pair between the custom
/// value and primitive-or-mapping form.
pub trait Transcoding: Send + Sync {
    /// Unique short name written to the wire as the type tag.
    fn name(&self) -> &'static str;

    /// The concrete Rust type this transcoding handles.
    fn handles(&self) -> TypeId;

    /// Encode the custom value into primitive-or-mapping form.
    ///
    /// # Errors
    ///
    /// Returns [`TranscodingError::Rejected`] when the erased value is not of
    /// the declared type.
    fn encode(&self, value: &CustomValue) -> Result<Value, TranscodingError>;

    /// Decode primitive-or-mapping form back into the custom value.
    ///
    /// # Errors
    ///
    /// Returns [`TranscodingError::Rejected`] when the body does not match
    /// what this transcoding produces.
    fn decode(&self, data: Value) -> Result<CustomValue, TranscodingError>;
}

/// Encodes [`Uuid`] values as 32 lowercase hex digits.
#[derive(Clone, Copy, Debug, Default)]
pub struct UuidAsHex;

impl Transcoding for UuidAsHex {
    fn name(&self) -> &'static str {
        "uuid_hex"
    }

    fn handles(&self) -> TypeId {
        TypeId::of::<Uuid>()
    }

    fn encode(&self, value: &CustomValue) -> Result<Value, TranscodingError> {
        let uuid = value
            .downcast_ref::<Uuid>()
            .ok_or_else(|| TranscodingError::rejected(self.name(), "value is not a Uuid"))?;
        Ok(Value::Str(uuid.simple().to_string()))
    }

    fn decode(&self, data: Value) -> Result<CustomValue, TranscodingError> {
        let Value::Str(hex) = data else {
            return Err(TranscodingError::rejected(self.name(), "body is not a string"));
        };
        let uuid = Uuid::parse_str(&hex)
            .map_err(|e| TranscodingError::rejected(self.name(), e.to_string()))?;
        Ok(CustomValue::new(uuid))
    }
}

/// Encodes [`BigDecimal`] values as their plain decimal string form.
#[derive(Clone, Copy, Debug, Default)]
pub struct DecimalAsStr;

impl Transcoding for DecimalAsStr {
    fn name(&self) -> &'static str {
        "decimal_str"
    }

    fn handles(&self) -> TypeId {
        TypeId::of::<BigDecimal>()
    }

    fn encode(&self, value: &CustomValue) -> Result<Value, TranscodingError> {
        let decimal = value
            .downcast_ref::<BigDecimal>()
            .ok_or_else(|| TranscodingError::rejected(self.name(), "value is not a BigDecimal"))?;
        Ok(Value::Str(decimal.to_string()))
    }

    fn decode(&self, data: Value) -> Result<CustomValue, TranscodingError> {
        let Value::Str(s) = data else {
            return Err(TranscodingError::rejected(self.name(), "body is not a string"));
        };
        let decimal: BigDecimal = s
            .parse()
            .map_err(|e: bigdecimal::ParseBigDecimalError| {
                TranscodingError::rejected(self.name(), e.to_string())
            })?;
        Ok(CustomValue::new(decimal))
    }
}

/// Encodes `DateTime<Utc>` values as RFC 3339 with microsecond precision and
/// an explicit offset. Offsets other than UTC are accepted on decode and
/// normalised to UTC.
#[derive(Clone, Copy, Debug, Default)]
pub struct DatetimeAsIso;

impl Transcoding for DatetimeAsIso {
    fn name(&self) -> &'static str {
        "datetime_iso"
    }

    fn handles(&self) -> TypeId {
        TypeId::of::<DateTime<Utc>>()
    }

    fn encode(&self, value: &CustomValue) -> Result<Value, TranscodingError> {
        let datetime = value.downcast_ref::<DateTime<Utc>>().ok_or_else(|| {
            TranscodingError::rejected(self.name(), "value is not a DateTime<Utc>")
        })?;
        Ok(Value::Str(
            datetime.to_rfc3339_opts(SecondsFormat::Micros, false),
        ))
    }

    fn decode(&self, data: Value) -> Result<CustomValue, TranscodingError> {
        let Value::Str(s) = data else {
            return Err(TranscodingError::rejected(self.name(), "body is not a string"));
        };
        let datetime = DateTime::parse_from_rfc3339(&s)
            .map_err(|e| TranscodingError::rejected(self.name(), e.to_string()))?;
        Ok(CustomValue::new(datetime.with_timezone(&Utc)))
    }
}

/// Registry of transcodings plus the wire codec itself.
///
/// Construction happens once at application startup; the transcoder is
/// read-only afterwards and may be shared across threads freely.
#[derive(Clone, Default)]
pub struct Transcoder {
    by_name: HashMap<&'static str, Arc<dyn Transcoding>>,
    by_type: HashMap<TypeId, Arc<dyn Transcoding>>,
}

impl Transcoder {
    /// An empty transcoder with no transcodings registered.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A transcoder with the standard transcodings registered: [`UuidAsHex`],
    /// [`DecimalAsStr`] and [`DatetimeAsIso`].
    #[must_use]
    pub fn standard() -> Self {
        let mut transcoder = Self::new();
        transcoder.register(UuidAsHex);
        transcoder.register(DecimalAsStr);
        transcoder.register(DatetimeAsIso);
        transcoder
    }

    /// Register a transcoding. A later registration under the same name or
    /// type replaces the earlier one.
    pub fn register(&mut self, transcoding: impl Transcoding + 'static) {
        let transcoding: Arc<dyn Transcoding> = Arc::new(transcoding);
        self.by_name.insert(transcoding.name(), transcoding.clone());
        self.by_type.insert(transcoding.handles(), transcoding);
    }

    /// Encode a value graph into a self-describing byte string.
    ///
    /// # Errors
    ///
    /// Returns [`TranscodingError::UnregisteredType`] when the graph contains
    /// a custom value with no registered transcoding, or
    /// [`TranscodingError::NonFiniteFloat`] for NaN or infinite floats.
    pub fn encode(&self, value: &Value) -> Result<Vec<u8>, TranscodingError> {
        let document = self.to_json(value)?;
        Ok(serde_json::to_vec(&document)?)
    }

    /// Decode a byte string produced by [`encode`](Self::encode).
    ///
    /// # Errors
    ///
    /// Returns [`TranscodingError::UnknownTag`] when a type tag has no
    /// registered transcoding (the error names the tag), or
    /// [`TranscodingError::Rejected`] when a transcoding refuses its body.
    pub fn decode(&self, data: &[u8]) -> Result<Value, TranscodingError> {
        let document: serde_json::Value = serde_json::from_slice(data)?;
        self.from_json(document)
    }

    fn to_json(&self, value: &Value) -> Result<serde_json::Value, TranscodingError> {
        Ok(match value {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::Number((*i).into()),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .ok_or(TranscodingError::NonFiniteFloat)?,
            Value::Str(s) => serde_json::Value::String(s.clone()),
            Value::Bytes(bytes) => tagged(BYTES_TAG, serde_json::Value::String(BASE64.encode(bytes))),
            Value::Seq(items) => serde_json::Value::Array(
                items.iter().map(|item| self.to_json(item)).collect::<Result<_, _>>()?,
            ),
            Value::Map(entries) => serde_json::Value::Object(
                entries
                    .iter()
                    .map(|(key, value)| Ok((key.clone(), self.to_json(value)?)))
                    .collect::<Result<_, TranscodingError>>()?,
            ),
            Value::Custom(custom) => {
                let transcoding = self.by_type.get(&custom.inner_type_id()).ok_or(
                    TranscodingError::UnregisteredType {
                        type_name: custom.type_name(),
                    },
                )?;
                let body = transcoding.encode(custom)?;
                tagged(transcoding.name(), self.to_json(&body)?)
            }
        })
    }

    fn from_json(&self, document: serde_json::Value) -> Result<Value, TranscodingError> {
        Ok(match document {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                // Very large integers and all fractional numbers land here.
                None => Value::Float(n.as_f64().ok_or(TranscodingError::NonFiniteFloat)?),
            },
            serde_json::Value::String(s) => Value::Str(s),
            serde_json::Value::Array(items) => Value::Seq(
                items
                    .into_iter()
                    .map(|item| self.from_json(item))
                    .collect::<Result<_, _>>()?,
            ),
            serde_json::Value::Object(mut entries) => {
                if let Some((tag, data)) = take_tagged(&mut entries) {
                    if tag == BYTES_TAG {
                        let serde_json::Value::String(encoded) = data else {
                            return Err(TranscodingError::rejected(
                                BYTES_TAG,
                                "body is not a string",
                            ));
                        };
                        let bytes = BASE64
                            .decode(encoded)
                            .map_err(|e| TranscodingError::rejected(BYTES_TAG, e.to_string()))?;
                        return Ok(Value::Bytes(bytes));
                    }
                    let transcoding = self
                        .by_name
                        .get(tag.as_str())
                        .ok_or(TranscodingError::UnknownTag { tag })?;
                    let body = self.from_json(data)?;
                    Value::Custom(transcoding.decode(body)?)
                } else {
                    Value::Map(
                        entries
                            .into_iter()
                            .map(|(key, value)| Ok((key, self.from_json(value)?)))
                            .collect::<Result<_, TranscodingError>>()?,
                    )
                }
            }
        })
    }
}

/// Extract `(tag, data)` when the object is exactly a reserved two-key
/// mapping with a string tag; leaves the object untouched otherwise.
fn take_tagged(
    entries: &mut serde_json::Map<String, serde_json::Value>,
) -> Option<(String, serde_json::Value)> {
    if entries.len() != 2 || !entries.contains_key(DATA_KEY) {
        return None;
    }
    let tag = match entries.get(TYPE_KEY) {
        Some(serde_json::Value::String(tag)) => tag.clone(),
        _ => return None,
    };
    let data = entries.remove(DATA_KEY)?;
    Some((tag, data))
}

fn tagged(tag: &str, data: serde_json::Value) -> serde_json::Value {
    let mut object = serde_json::Map::with_capacity(2);
    object.insert(TYPE_KEY.to_string(), serde_json::Value::String(tag.to_string()));
    object.insert(DATA_KEY.to_string(), data);
    serde_json::Value::Object(object)
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn sample_map() -> Value {
        let mut map = BTreeMap::new();
        map.insert("name".to_string(), Value::from("earth"));
        map.insert("count".to_string(), Value::Int(3));
        map.insert("ratio".to_string(), Value::Float(0.5));
        map.insert("live".to_string(), Value::Bool(true));
        map.insert("nothing".to_string(), Value::Null);
        map.insert("raw".to_string(), Value::Bytes(vec![0, 159, 146, 150]));
        map.insert(
            "tags".to_string(),
            Value::Seq(vec![Value::from("a"), Value::from("b")]),
        );
        Value::Map(map)
    }

    #[test]
    fn primitives_round_trip() {
        let transcoder = Transcoder::new();
        let value = sample_map();
        let bytes = transcoder.encode(&value).unwrap();
        assert_eq!(transcoder.decode(&bytes).unwrap(), value);
    }

    #[test]
    fn uuid_round_trips_through_hex() {
        let transcoder = Transcoder::standard();
        let value = Value::custom(Uuid::new_v4());
        let bytes = transcoder.encode(&value).unwrap();
        assert_eq!(transcoder.decode(&bytes).unwrap(), value);
    }

    #[test]
    fn decimal_round_trips_with_full_precision() {
        let transcoder = Transcoder::standard();
        let decimal: BigDecimal = "123456789012345678901234567890.000000000001"
            .parse()
            .unwrap();
        let value = Value::custom(decimal);
        let bytes = transcoder.encode(&value).unwrap();
        assert_eq!(transcoder.decode(&bytes).unwrap(), value);
    }

    #[test]
    fn datetime_keeps_microseconds() {
        let transcoder = Transcoder::standard();
        let datetime = Utc.with_ymd_and_hms(2024, 5, 2, 9, 30, 0).unwrap()
            + chrono::Duration::microseconds(123_456);
        let value = Value::custom(datetime);
        let bytes = transcoder.encode(&value).unwrap();
        assert_eq!(transcoder.decode(&bytes).unwrap(), value);
    }

    #[test]
    fn datetime_with_offset_normalises_to_utc() {
        let transcoder = Transcoder::standard();
        let document = format!(
            r#"{{"{TYPE_KEY}":"datetime_iso","{DATA_KEY}":"2024-05-02T11:30:00.000000+02:00"}}"#
        );
        let decoded = transcoder.decode(document.as_bytes()).unwrap();
        let expected = Utc.with_ymd_and_hms(2024, 5, 2, 9, 30, 0).unwrap();
        assert_eq!(decoded.downcast_ref::<DateTime<Utc>>(), Some(&expected));
    }

    #[test]
    fn unknown_tag_names_the_tag() {
        let transcoder = Transcoder::new();
        let document = format!(r#"{{"{TYPE_KEY}":"no_such_tag","{DATA_KEY}":"x"}}"#);
        let error = transcoder.decode(document.as_bytes()).unwrap_err();
        assert!(matches!(
            &error,
            TranscodingError::UnknownTag { tag } if tag == "no_such_tag"
        ));
        assert!(error.to_string().contains("no_such_tag"));
    }

    #[test]
    fn unregistered_type_fails_on_encode() {
        let transcoder = Transcoder::new();
        let value = Value::custom(Uuid::new_v4());
        let error = transcoder.encode(&value).unwrap_err();
        assert!(matches!(error, TranscodingError::UnregisteredType { .. }));
    }

    #[test]
    fn transcoding_rejects_mismatched_body() {
        let transcoder = Transcoder::standard();
        let document = format!(r#"{{"{TYPE_KEY}":"uuid_hex","{DATA_KEY}":17}}"#);
        let error = transcoder.decode(document.as_bytes()).unwrap_err();
        assert!(matches!(error, TranscodingError::Rejected { name, .. } if name == "uuid_hex"));
    }

    #[test]
    fn non_finite_float_is_rejected() {
        let transcoder = Transcoder::new();
        let error = transcoder.encode(&Value::Float(f64::NAN)).unwrap_err();
        assert!(matches!(error, TranscodingError::NonFiniteFloat));
    }

    #[test]
    fn malformed_document_is_rejected() {
        let transcoder = Transcoder::new();
        let error = transcoder.decode(b"not json").unwrap_err();
        assert!(matches!(error, TranscodingError::Malformed(_)));
    }

    #[test]
    fn two_key_map_without_reserved_keys_stays_a_map() {
        let transcoder = Transcoder::new();
        let mut map = BTreeMap::new();
        map.insert("left".to_string(), Value::Int(1));
        map.insert("right".to_string(), Value::Int(2));
        let value = Value::Map(map);
        let bytes = transcoder.encode(&value).unwrap();
        assert_eq!(transcoder.decode(&bytes).unwrap(), value);
    }

    #[derive(Debug, PartialEq)]
    struct Fahrenheit(i64);

    struct FahrenheitAsInt;

    impl Transcoding for FahrenheitAsInt {
        fn name(&self) -> &'static str {
            "fahrenheit_int"
        }

        fn handles(&self) -> TypeId {
            TypeId::of::<Fahrenheit>()
        }

        fn encode(&self, value: &CustomValue) -> Result<Value, TranscodingError> {
            let fahrenheit = value
                .downcast_ref::<Fahrenheit>()
                .ok_or_else(|| TranscodingError::rejected(self.name(), "not Fahrenheit"))?;
            Ok(Value::Int(fahrenheit.0))
        }

        fn decode(&self, data: Value) -> Result<CustomValue, TranscodingError> {
            let Value::Int(degrees) = data else {
                return Err(TranscodingError::rejected(self.name(), "body is not an int"));
            };
            Ok(CustomValue::new(Fahrenheit(degrees)))
        }
    }

    #[test]
    fn registered_custom_transcoding_round_trips() {
        let mut transcoder = Transcoder::new();
        transcoder.register(FahrenheitAsInt);
        let value = Value::Seq(vec![Value::custom(Fahrenheit(-40)), Value::Int(0)]);
        let bytes = transcoder.encode(&value).unwrap();
        assert_eq!(transcoder.decode(&bytes).unwrap(), value);
    }

    #[test]
    fn custom_values_of_different_types_are_not_equal() {
        assert_ne!(
            Value::custom(Fahrenheit(0)),
            Value::custom(0i64),
        );
    }
}
