//! Query generator: expands an entity into one rendered string per field.
//!
//! Templates use `{company}`, `{ticker}` and `{year}` placeholders. They
//! are parsed once at startup; a malformed template is a [`ConfigError`],
//! never a runtime failure.

use crate::error::ConfigError;
use crate::models::{Entity, Query};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// One `field -> template` line of configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldTemplate {
    pub field: String,
    pub template: String,
}

impl FieldTemplate {
    pub fn new(field: &str, template: &str) -> Self {
        Self {
            field: field.to_string(),
            template: template.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Company,
    Ticker,
    Year,
}

/// A parsed template bound to its output field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryTemplate {
    field: String,
    segments: Vec<Segment>,
}

impl QueryTemplate {
    pub fn parse(field: &str, template: &str) -> Result<Self, ConfigError> {
        let malformed = |reason: String| ConfigError::Template {
            field: field.to_string(),
            reason,
        };

        if field.trim().is_empty() {
            return Err(malformed("field name is empty".to_string()));
        }

        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = template.chars();
        while let Some(ch) = chars.next() {
            match ch {
                '{' => {
                    let mut name = String::new();
                    let mut closed = false;
                    for c in chars.by_ref() {
                        if c == '}' {
                            closed = true;
                            break;
                        }
                        name.push(c);
                    }
                    if !closed {
                        return Err(malformed("unclosed `{`".to_string()));
                    }
                    let segment = match name.as_str() {
                        "company" => Segment::Company,
                        "ticker" => Segment::Ticker,
                        "year" => Segment::Year,
                        other => return Err(malformed(format!("unknown placeholder `{{{other}}}`"))),
                    };
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(segment);
                }
                '}' => return Err(malformed("unmatched `}`".to_string())),
                _ => literal.push(ch),
            }
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }
        if segments.is_empty() {
            return Err(malformed("template is empty".to_string()));
        }

        Ok(Self {
            field: field.to_string(),
            segments,
        })
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn render(&self, entity: &Entity, year: i32) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(s) => out.push_str(s),
                Segment::Company => out.push_str(&entity.name),
                Segment::Ticker => out.push_str(&entity.ticker),
                Segment::Year => out.push_str(&year.to_string()),
            }
        }
        out
    }
}

/// Renders every configured template for an entity, in configuration order.
#[derive(Debug, Clone)]
pub struct QueryGenerator {
    templates: Vec<QueryTemplate>,
    year: i32,
}

impl QueryGenerator {
    /// # Arguments
    ///
    /// * `specs` - `(field, template)` pairs in output order
    /// * `year` - Value substituted for `{year}`
    ///
    /// # Returns
    ///
    /// A [`ConfigError::Template`] if a template is malformed or a field
    /// is configured twice.
    pub fn new(specs: &[FieldTemplate], year: i32) -> Result<Self, ConfigError> {
        let mut seen = HashSet::new();
        let mut templates = Vec::with_capacity(specs.len());
        for spec in specs {
            if !seen.insert(spec.field.as_str()) {
                return Err(ConfigError::Template {
                    field: spec.field.clone(),
                    reason: "field is configured more than once".to_string(),
                });
            }
            templates.push(QueryTemplate::parse(&spec.field, &spec.template)?);
        }
        Ok(Self { templates, year })
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.templates.iter().map(|t| t.field())
    }

    pub fn generate(&self, entity: &Entity) -> Vec<Query> {
        self.templates
            .iter()
            .map(|t| Query {
                ticker: entity.ticker.clone(),
                field: t.field().to_string(),
                text: t.render(entity, self.year),
                parent: entity.parent.clone(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn acme() -> Entity {
        Entity::new("Acme Corp", "ACME")
    }

    #[test]
    fn test_products_and_services_template() {
        let generator = QueryGenerator::new(
            &[FieldTemplate::new("products_and_services", "{company} products and services")],
            2025,
        )
        .unwrap();
        let queries = generator.generate(&acme());
        assert_eq!(queries.len(), 1);
        assert_eq!(queries[0].text, "Acme Corp products and services");
        assert_eq!(queries[0].field, "products_and_services");
        assert_eq!(queries[0].ticker, "ACME");
        assert_eq!(queries[0].parent, None);
    }

    #[test]
    fn test_competitor_queries_carry_parent() {
        let generator = QueryGenerator::new(&[FieldTemplate::new("submarkets", "{company} submarkets")], 2025).unwrap();
        let rival = Entity::competitor_of("Globex", "GBX", &acme());
        let queries = generator.generate(&rival);
        assert_eq!(queries[0].text, "Globex submarkets");
        assert_eq!(queries[0].parent.as_deref(), Some("ACME"));
    }

    #[test]
    fn test_all_placeholders() {
        let t = QueryTemplate::parse("forecast", "{company} ({ticker}) stock forecast {year}").unwrap();
        assert_eq!(t.render(&acme(), 2026), "Acme Corp (ACME) stock forecast 2026");
    }

    #[test]
    fn test_generation_keeps_config_order() {
        let generator = QueryGenerator::new(
            &[
                FieldTemplate::new("b", "{ticker} technical analysis"),
                FieldTemplate::new("a", "{company} annual report filetype:pdf"),
            ],
            2025,
        )
        .unwrap();
        let fields: Vec<_> = generator.fields().collect();
        assert_eq!(fields, vec!["b", "a"]);
        let texts: Vec<_> = generator.generate(&acme()).into_iter().map(|q| q.text).collect();
        assert_eq!(
            texts,
            vec!["ACME technical analysis", "Acme Corp annual report filetype:pdf"]
        );
    }

    #[test]
    fn test_malformed_templates_rejected() {
        for bad in ["{company", "{compnay} report", "report }", "", "{}"] {
            let err = QueryTemplate::parse("f", bad).unwrap_err();
            assert!(matches!(err, ConfigError::Template { .. }), "accepted {bad:?}");
        }
    }

    #[test]
    fn test_duplicate_field_rejected() {
        let err = QueryGenerator::new(
            &[FieldTemplate::new("x", "{company}"), FieldTemplate::new("x", "{ticker}")],
            2025,
        )
        .unwrap_err();
        assert!(err.to_string().contains("more than once"));
    }
}
