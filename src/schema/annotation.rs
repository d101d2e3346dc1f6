use crate::core::{Result, StoreError};

use super::descriptor::{COUNT_DESCENDANT_PREFIX, COUNT_RELATION_PREFIX, CountSource, PropertyFlags};

/// Parsed `#[property("name,opt1,opt2")]` annotation.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FieldSpec {
    pub name: String,
    pub options: Vec<String>,
}

impl FieldSpec {
    /// Parses an annotation for the field `ident`. An empty name falls back
    /// to the field identifier.
    pub fn parse(raw: &str, ident: &str) -> Self {
        let mut parts = raw.split(',').map(str::trim);
        let name = match parts.next() {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => ident.trim_start_matches("r#").to_string(),
        };
        let options = parts.filter(|p| !p.is_empty()).map(str::to_string).collect();
        Self { name, options }
    }

    /// Annotation of a field that carries none.
    pub fn plain(ident: &str) -> Self {
        Self::parse("", ident)
    }

    pub fn is_skipped(&self) -> bool {
        self.name == "-"
    }

    pub fn has(&self, option: &str) -> bool {
        self.options.iter().any(|o| o == option)
    }

    pub fn count_source(&self) -> Option<CountSource> {
        if let Some(key) = self.name.strip_prefix(COUNT_RELATION_PREFIX) {
            Some(CountSource::Relation(key.to_string()))
        } else {
            self.name
                .strip_prefix(COUNT_DESCENDANT_PREFIX)
                .map(|schema| CountSource::Descendant(schema.to_string()))
        }
    }

    pub fn flags(&self) -> Result<PropertyFlags> {
        let mut flags = PropertyFlags::default();
        for option in &self.options {
            match option.as_str() {
                "indexed" => flags.indexed = true,
                "unique" => flags.unique = true,
                "lookup" => flags.lookup = true,
                "primary" => flags.primary = true,
                "secure" => flags.secure = true,
                "verify" => flags.verify = true,
                "nosnapshot" => flags.no_snapshot = true,
                "metric" => flags.metric = true,
                "metricfilter" => flags.metric_filter = true,
                "pii" => flags.pii = true,
                "child" => flags.child = true,
                "omitempty" => flags.omit_empty = true,
                other => {
                    return Err(StoreError::Schema(format!(
                        "property '{}': unknown option '{}'",
                        self.name, other
                    )));
                }
            }
        }
        Ok(flags)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_name_and_options() {
        let spec = FieldSpec::parse("name_hash,primary,indexed", "name_hash");
        assert_eq!(spec.name, "name_hash");
        assert!(spec.has("primary"));

        let flags = spec.flags().unwrap();
        assert!(flags.primary);
        assert!(flags.indexed);
        assert!(!flags.unique);
    }

    #[test]
    fn test_empty_name_uses_ident() {
        let spec = FieldSpec::parse(",unique", "email");
        assert_eq!(spec.name, "email");
        assert!(spec.flags().unwrap().unique);

        assert_eq!(FieldSpec::plain("r#type").name, "type");
    }

    #[test]
    fn test_unknown_option_rejected() {
        let spec = FieldSpec::parse("x,sorted", "x");
        assert!(spec.flags().is_err());
    }

    #[test]
    fn test_count_sources() {
        let spec = FieldSpec::parse("_count_descendant:fixtures.renewal", "renewals");
        assert_eq!(
            spec.count_source(),
            Some(CountSource::Descendant("fixtures.renewal".into()))
        );
        assert!(FieldSpec::parse("-", "x").is_skipped());
    }
}
