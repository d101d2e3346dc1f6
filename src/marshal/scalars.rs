use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::core::{Result, StoreError, Value, join_path};
use crate::schema::{FieldSpec, PropertyDescriptor, PropertyKind};
use crate::values::{
    Amount, DeltaSet, Email, ExternalId, Id, Interval, KeyMixed, MinMax, Mixed, PersonName, Phone,
    SecureString, Translations, VerifyString,
};

use super::{Decoder, Delta, Encoder, Property};

fn mismatch(path: &str, expected: &str, found: &Value) -> StoreError {
    StoreError::Marshal(format!(
        "property '{}': expected {}, found {}",
        path,
        expected,
        found.type_name()
    ))
}

fn push(path: &str, kind: PropertyKind, spec: &FieldSpec, out: &mut Vec<PropertyDescriptor>) -> Result<()> {
    out.push(PropertyDescriptor::new(path, kind, spec.flags()?));
    Ok(())
}

macro_rules! scalar_property {
    ($ty:ty, $kind:ident, $expected:literal, |$this:ident| $encode:expr, |$value:ident| $decode:expr) => {
        impl Property for $ty {
            fn describe(path: &str, spec: &FieldSpec, out: &mut Vec<PropertyDescriptor>) -> Result<()> {
                push(path, PropertyKind::$kind, spec, out)
            }

            fn encode(&self, path: &str, encoder: &mut Encoder<'_>) {
                let $this = self;
                encoder.put(path, $encode);
            }

            fn decode(&mut self, path: &str, decoder: &Decoder<'_>) -> Result<()> {
                *self = match decoder.get(path) {
                    None => Default::default(),
                    Some($value) => ($decode).ok_or_else(|| mismatch(path, $expected, $value))?,
                };
                Ok(())
            }
        }
    };
}

scalar_property!(String, Text, "TEXT", |v| Value::Text(v.clone()), |v| v.as_str().map(str::to_string));
scalar_property!(i64, Int, "INT", |v| Value::Int(*v), |v| v.as_i64());
scalar_property!(i32, Int, "INT", |v| Value::Int(i64::from(*v)), |v| v
    .as_i64()
    .and_then(|i| i32::try_from(i).ok()));
scalar_property!(u32, Int, "INT", |v| Value::Int(i64::from(*v)), |v| v
    .as_i64()
    .and_then(|i| u32::try_from(i).ok()));
scalar_property!(bool, Bool, "BOOL", |v| Value::Bool(*v), |v| v.as_bool());
scalar_property!(f64, Float, "FLOAT", |v| Value::Float(*v), |v| v.as_f64());
scalar_property!(DateTime<Utc>, Time, "TIME", |v| Value::from(*v), |v| v.as_time());
scalar_property!(Vec<u8>, Raw, "RAW", |v| Value::Raw(v.clone()), |v| match v {
    Value::Raw(bytes) => Some(bytes.clone()),
    _ => None,
});
scalar_property!(Vec<String>, StringList, "STRING_ARRAY", |v| Value::StringArray(v.clone()), |v| match v {
    Value::StringArray(items) => Some(items.clone()),
    _ => None,
});
scalar_property!(BTreeMap<String, String>, KeyValue, "KEY_VALUE", |v| Value::KeyValue(v.clone()), |v| match v {
    Value::KeyValue(map) => Some(map.clone()),
    _ => None,
});
scalar_property!(Amount, Amount, "AMOUNT", |v| Value::Amount {
    currency: v.currency.clone(),
    units: v.units,
}, |v| match v {
    Value::Amount { currency, units } => Some(Amount::new(currency.clone(), *units)),
    _ => None,
});
scalar_property!(Interval, Interval, "INTERVAL", |v| Value::Interval {
    unit: v.unit,
    count: v.count,
}, |v| match v {
    Value::Interval { unit, count } => Some(Interval::new(*unit, *count)),
    _ => None,
});
scalar_property!(Mixed, Mixed, "MIXED", |v| Value::Mixed(v.clone()), |v| match v {
    Value::Mixed(m) => Some(m.clone()),
    _ => None,
});
scalar_property!(ExternalId, ExternalId, "KEY_VALUE", |v| Value::KeyValue(v.to_map()), |v| match v {
    Value::KeyValue(map) => Some(ExternalId::from_map(map)),
    _ => None,
});
scalar_property!(Translations, Translations, "KEY_VALUE", |v| Value::KeyValue(v.0.clone()), |v| match v {
    Value::KeyValue(map) => Some(Translations(map.clone())),
    _ => None,
});
scalar_property!(Email, Email, "TEXT", |v| Value::Text(v.0.clone()), |v| v.as_str().map(Email::new));
scalar_property!(Phone, Phone, "TEXT", |v| Value::Text(v.0.clone()), |v| v.as_str().map(Phone::new));

impl<T> Property for Id<T> {
    fn describe(path: &str, spec: &FieldSpec, out: &mut Vec<PropertyDescriptor>) -> Result<()> {
        push(path, PropertyKind::EntityRef, spec, out)
    }

    fn encode(&self, path: &str, encoder: &mut Encoder<'_>) {
        if !self.is_empty() {
            encoder.put(path, Value::Text(self.entity_id().to_string()));
        }
    }

    fn decode(&mut self, path: &str, decoder: &Decoder<'_>) -> Result<()> {
        *self = match decoder.get(path) {
            None => Id::default(),
            Some(v) => Id::new(v.as_str().ok_or_else(|| mismatch(path, "TEXT", v))?),
        };
        Ok(())
    }
}

impl Property for SecureString {
    fn describe(path: &str, spec: &FieldSpec, out: &mut Vec<PropertyDescriptor>) -> Result<()> {
        let mut flags = spec.flags()?;
        flags.secure = true;
        out.push(PropertyDescriptor::new(path, PropertyKind::SecureText, flags));
        Ok(())
    }

    /// Only a value carrying plaintext is written; a masked read-back is
    /// never sent back to the server.
    fn encode(&self, path: &str, encoder: &mut Encoder<'_>) {
        if let Some(plain) = self.plain() {
            encoder.put(
                path,
                Value::Secure {
                    plain: Some(plain.to_string()),
                    masked: self.masked().to_string(),
                },
            );
        }
    }

    fn decode(&mut self, path: &str, decoder: &Decoder<'_>) -> Result<()> {
        *self = match decoder.get(path) {
            None => SecureString::default(),
            Some(Value::Secure { plain, masked }) => SecureString::from_parts(plain.clone(), masked.clone()),
            Some(Value::Text(masked)) => SecureString::masked_only(masked.clone()),
            Some(other) => return Err(mismatch(path, "SECURE", other)),
        };
        Ok(())
    }
}

impl Property for VerifyString {
    fn describe(path: &str, spec: &FieldSpec, out: &mut Vec<PropertyDescriptor>) -> Result<()> {
        let mut flags = spec.flags()?;
        flags.verify = true;
        out.push(PropertyDescriptor::new(path, PropertyKind::VerifyText, flags));
        Ok(())
    }

    fn encode(&self, path: &str, encoder: &mut Encoder<'_>) {
        if let Some(secret) = self.secret() {
            encoder.put(path, Value::Verify(secret.to_string()));
        }
    }

    fn decode(&mut self, _path: &str, _decoder: &Decoder<'_>) -> Result<()> {
        *self = VerifyString::default();
        Ok(())
    }
}

impl Property for DeltaSet<String> {
    fn describe(path: &str, spec: &FieldSpec, out: &mut Vec<PropertyDescriptor>) -> Result<()> {
        push(path, PropertyKind::StringSet, spec, out)
    }

    fn encode(&self, path: &str, encoder: &mut Encoder<'_>) {
        if self.is_replacement() {
            encoder.put(path, Value::StringArray(self.to_vec()));
        } else if self.has_delta() {
            encoder.delta(Delta::Strings {
                path: path.to_string(),
                add: self.pending_added(),
                remove: self.pending_removed(),
            });
        }
    }

    fn decode(&mut self, path: &str, decoder: &Decoder<'_>) -> Result<()> {
        match decoder.get(path) {
            None => self.load(Vec::new()),
            Some(Value::StringArray(items)) => self.load(items.iter().cloned()),
            Some(other) => return Err(mismatch(path, "STRING_ARRAY", other)),
        }
        Ok(())
    }

    fn mark_clean(&mut self) {
        DeltaSet::mark_clean(self);
    }
}

impl Property for DeltaSet<i64> {
    fn describe(path: &str, spec: &FieldSpec, out: &mut Vec<PropertyDescriptor>) -> Result<()> {
        push(path, PropertyKind::IntSet, spec, out)
    }

    fn encode(&self, path: &str, encoder: &mut Encoder<'_>) {
        if self.is_replacement() {
            encoder.put(path, Value::IntArray(self.to_vec()));
        } else if self.has_delta() {
            encoder.delta(Delta::Ints {
                path: path.to_string(),
                add: self.pending_added(),
                remove: self.pending_removed(),
            });
        }
    }

    fn decode(&mut self, path: &str, decoder: &Decoder<'_>) -> Result<()> {
        match decoder.get(path) {
            None => self.load(Vec::new()),
            Some(Value::IntArray(items)) => self.load(items.iter().copied()),
            Some(other) => return Err(mismatch(path, "INT_ARRAY", other)),
        }
        Ok(())
    }

    fn mark_clean(&mut self) {
        DeltaSet::mark_clean(self);
    }
}

impl Property for KeyMixed {
    fn describe(path: &str, spec: &FieldSpec, out: &mut Vec<PropertyDescriptor>) -> Result<()> {
        push(path, PropertyKind::KeyMixed, spec, out)
    }

    fn encode(&self, path: &str, encoder: &mut Encoder<'_>) {
        if self.is_replacement() {
            encoder.put(path, Value::KeyMixed(self.entries().clone()));
        } else if !self.pending_upserts().is_empty() || !self.pending_removals().is_empty() {
            encoder.delta(Delta::Keyed {
                path: path.to_string(),
                upsert: self.pending_upserts().clone(),
                remove: self.pending_removals().iter().cloned().collect(),
            });
        }
    }

    fn decode(&mut self, path: &str, decoder: &Decoder<'_>) -> Result<()> {
        match decoder.get(path) {
            None => self.load(BTreeMap::new()),
            Some(Value::KeyMixed(map)) => self.load(map.clone()),
            Some(other) => return Err(mismatch(path, "KEY_MIXED", other)),
        }
        Ok(())
    }

    fn mark_clean(&mut self) {
        KeyMixed::mark_clean(self);
    }
}

impl Property for MinMax {
    fn describe(path: &str, spec: &FieldSpec, out: &mut Vec<PropertyDescriptor>) -> Result<()> {
        let flags = spec.flags()?;
        out.push(PropertyDescriptor::new(join_path(path, "min"), PropertyKind::Float, flags));
        out.push(PropertyDescriptor::new(join_path(path, "max"), PropertyKind::Float, flags));
        Ok(())
    }

    fn encode(&self, path: &str, encoder: &mut Encoder<'_>) {
        self.min.encode(&join_path(path, "min"), encoder);
        self.max.encode(&join_path(path, "max"), encoder);
    }

    fn decode(&mut self, path: &str, decoder: &Decoder<'_>) -> Result<()> {
        self.min.decode(&join_path(path, "min"), decoder)?;
        self.max.decode(&join_path(path, "max"), decoder)
    }
}

impl Property for PersonName {
    fn describe(path: &str, spec: &FieldSpec, out: &mut Vec<PropertyDescriptor>) -> Result<()> {
        let flags = spec.flags()?;
        for part in ["title", "first", "middle", "last"] {
            out.push(PropertyDescriptor::new(join_path(path, part), PropertyKind::Text, flags));
        }
        Ok(())
    }

    fn encode(&self, path: &str, encoder: &mut Encoder<'_>) {
        self.title.encode(&join_path(path, "title"), encoder);
        self.first.encode(&join_path(path, "first"), encoder);
        self.middle.encode(&join_path(path, "middle"), encoder);
        self.last.encode(&join_path(path, "last"), encoder);
    }

    fn decode(&mut self, path: &str, decoder: &Decoder<'_>) -> Result<()> {
        self.title.decode(&join_path(path, "title"), decoder)?;
        self.first.decode(&join_path(path, "first"), decoder)?;
        self.middle.decode(&join_path(path, "middle"), decoder)?;
        self.last.decode(&join_path(path, "last"), decoder)
    }
}

impl<T: Property + Default> Property for Option<T> {
    fn describe(path: &str, spec: &FieldSpec, out: &mut Vec<PropertyDescriptor>) -> Result<()> {
        T::describe(path, spec, out)
    }

    fn encode(&self, path: &str, encoder: &mut Encoder<'_>) {
        if let Some(inner) = self {
            inner.encode(path, encoder);
        }
    }

    fn decode(&mut self, path: &str, decoder: &Decoder<'_>) -> Result<()> {
        if decoder.has_within(path) {
            let mut inner = T::default();
            inner.decode(path, decoder)?;
            *self = Some(inner);
        } else {
            *self = None;
        }
        Ok(())
    }

    fn mark_clean(&mut self) {
        if let Some(inner) = self {
            inner.mark_clean();
        }
    }

    fn mark_selected_clean(&mut self, path: &str, selection: &[String]) {
        if let Some(inner) = self {
            inner.mark_selected_clean(path, selection);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::PropertySet;
    use crate::values::IntSet;

    fn roundtrip<T: Property + Default>(value: &T) -> T {
        let mut encoder = Encoder::new(&[]);
        value.encode("field", &mut encoder);
        let (properties, _) = encoder.finish().unwrap();
        let mut out = T::default();
        out.decode("field", &Decoder::new(&properties)).unwrap();
        out
    }

    #[test]
    fn test_amount_preserved() {
        let amount = Amount::gbp(1000);
        assert_eq!(roundtrip(&amount), amount);
    }

    #[test]
    fn test_missing_path_resets_to_zero() {
        let mut height = 190i64;
        height.decode("height_in_cm", &Decoder::new(&PropertySet::new())).unwrap();
        assert_eq!(height, 0);
    }

    #[test]
    fn test_type_mismatch_is_marshal_error() {
        let mut properties = PropertySet::new();
        properties.insert("age", Value::from("old"));
        let mut age = 0i64;
        let err = age.decode("age", &Decoder::new(&properties)).unwrap_err();
        assert!(matches!(err, StoreError::Marshal(_)));
    }

    #[test]
    fn test_secure_without_plaintext_not_encoded() {
        let masked = SecureString::masked_only("Pe*******");
        let mut encoder = Encoder::new(&[]);
        masked.encode("secret_answer", &mut encoder);
        assert!(encoder.finish().unwrap().0.is_empty());
    }

    #[test]
    fn test_secure_decodes_masked_text() {
        let mut properties = PropertySet::new();
        properties.insert("full_name", Value::from("Jo*** D***"));
        let mut secure = SecureString::new("John Doe", "Jo*** D***");
        secure.decode("full_name", &Decoder::new(&properties)).unwrap();
        assert_eq!(secure.plain(), None);
        assert_eq!(secure.masked(), "Jo*** D***");
    }

    #[test]
    fn test_verify_never_read_back() {
        let mut properties = PropertySet::new();
        properties.insert("account_pin", Value::Verify("1234".into()));
        let mut pin = VerifyString::new("1234");
        pin.decode("account_pin", &Decoder::new(&properties)).unwrap();
        assert!(!pin.is_set());
    }

    #[test]
    fn test_set_delta_vs_replacement() {
        let mut set = IntSet::from_values([1, 2, 3, 4]);
        let mut encoder = Encoder::new(&[]);
        set.encode("integer_set", &mut encoder);
        let (properties, deltas) = encoder.finish().unwrap();
        assert_eq!(properties.get("integer_set"), Some(&Value::IntArray(vec![1, 2, 3, 4])));
        assert!(deltas.is_empty());

        set.mark_clean();
        set.add(7);
        let mut encoder = Encoder::new(&[]);
        set.encode("integer_set", &mut encoder);
        let (properties, deltas) = encoder.finish().unwrap();
        assert!(properties.is_empty());
        assert_eq!(
            deltas,
            vec![Delta::Ints {
                path: "integer_set".into(),
                add: vec![7],
                remove: vec![],
            }]
        );
    }

    #[test]
    fn test_untouched_set_omitted() {
        let set = IntSet::new();
        let mut encoder = Encoder::new(&[]);
        set.encode("integer_set", &mut encoder);
        let (properties, deltas) = encoder.finish().unwrap();
        assert!(properties.is_empty());
        assert!(deltas.is_empty());
    }

    #[test]
    fn test_option_absent_decodes_none() {
        let mut name: Option<PersonName> = Some(PersonName::new("A", "B"));
        name.decode("name", &Decoder::new(&PropertySet::new())).unwrap();
        assert!(name.is_none());

        let value = Some(PersonName::new("John", "Doe"));
        assert_eq!(roundtrip(&value), value);
    }

    #[test]
    fn test_minmax_nested_paths() {
        let mut out = Vec::new();
        MinMax::describe("range", &FieldSpec::plain("range"), &mut out).unwrap();
        let paths: Vec<&str> = out.iter().map(|d| d.path.as_str()).collect();
        assert_eq!(paths, vec!["range.min", "range.max"]);
    }
}
