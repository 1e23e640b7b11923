//! Templates for the names of delivered files.
//!
//! A template is a list of elements concatenated in order, optionally folded
//! to lower or upper case. Elements are written as strings:
//!
//! | Element                          | Value                                        |
//! |----------------------------------|----------------------------------------------|
//! | `text` or `literal(text)`        | `text`                                       |
//! | `receivingOrganization()`        | organization of the receiver                 |
//! | `createdDate(fmt)`               | creation time, strftime `fmt`                |
//! | `regexReplace(input,pat,repl)`   | `input` with every `pat` match replaced      |
//! | `schemaBaseName()`               | last path segment of the report's schema     |
//! | `processingModeCode()`           | `testing`, `production` or `development`     |

use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Deserialize;

/// Format used by `createdDate()` when none is given.
pub const DEFAULT_DATE_FORMAT: &str = "%Y%m%d%H%M%S";

#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    #[error("unknown file name element: {0}")]
    UnknownElement(String),
    #[error("{element} expects {expected} arguments")]
    BadArguments {
        element: &'static str,
        expected: usize,
    },
    #[error("invalid pattern in regexReplace: {0}")]
    Regex(#[from] regex::Error),
    #[error("schemaBaseName() requires a schema name")]
    MissingSchema,
}

/// Values a template can draw from.
#[derive(Debug, Clone)]
pub struct FileNameContext<'a> {
    pub receiving_organization: Option<&'a str>,
    pub schema_name: Option<&'a str>,
    pub processing_mode_code: Option<&'a str>,
    pub created_at: DateTime<Utc>,
}

impl<'a> FileNameContext<'a> {
    #[must_use]
    pub fn new(created_at: DateTime<Utc>) -> Self {
        Self {
            receiving_organization: None,
            schema_name: None,
            processing_mode_code: None,
            created_at,
        }
    }
}

// ---------------------------------------------------------------------------
// FileNameElement
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileNameElement {
    Literal(String),
    ReceivingOrganization,
    CreatedDate(Option<String>),
    RegexReplace {
        input: String,
        pattern: String,
        replacement: String,
    },
    SchemaBaseName,
    ProcessingModeCode,
}

impl FileNameElement {
    /// Parse the string form of an element. Anything that is not a known
    /// `name(args)` call and does not look like one is a literal.
    ///
    /// # Errors
    ///
    /// Returns an error for calls to unknown elements or with the wrong
    /// number of arguments.
    pub fn parse(text: &str) -> Result<Self, TemplateError> {
        let Some((name, args)) = split_call(text) else {
            return Ok(Self::Literal(text.to_string()));
        };
        match name {
            "literal" => Ok(Self::Literal(args.to_string())),
            "receivingOrganization" => Ok(Self::ReceivingOrganization),
            "createdDate" => Ok(Self::CreatedDate(
                (!args.is_empty()).then(|| args.to_string()),
            )),
            "regexReplace" => {
                let mut parts = args.splitn(3, ',');
                match (parts.next(), parts.next(), parts.next()) {
                    (Some(input), Some(pattern), Some(replacement)) => Ok(Self::RegexReplace {
                        input: input.to_string(),
                        pattern: pattern.to_string(),
                        replacement: replacement.to_string(),
                    }),
                    _ => Err(TemplateError::BadArguments {
                        element: "regexReplace",
                        expected: 3,
                    }),
                }
            }
            "schemaBaseName" => Ok(Self::SchemaBaseName),
            "processingModeCode" => Ok(Self::ProcessingModeCode),
            other => Err(TemplateError::UnknownElement(other.to_string())),
        }
    }

    /// Render this element.
    ///
    /// # Errors
    ///
    /// Returns an error for an invalid `regexReplace` pattern or a
    /// `schemaBaseName()` without a schema.
    pub fn value(&self, ctx: &FileNameContext<'_>) -> Result<String, TemplateError> {
        match self {
            Self::Literal(text) => Ok(text.clone()),
            Self::ReceivingOrganization => {
                Ok(ctx.receiving_organization.unwrap_or_default().to_string())
            }
            Self::CreatedDate(format) => Ok(format_date(
                ctx.created_at,
                format.as_deref().unwrap_or(DEFAULT_DATE_FORMAT),
            )),
            Self::RegexReplace {
                input,
                pattern,
                replacement,
            } => {
                let regex = Regex::new(pattern)?;
                Ok(regex.replace_all(input, replacement.as_str()).into_owned())
            }
            Self::SchemaBaseName => {
                let schema = ctx.schema_name.ok_or(TemplateError::MissingSchema)?;
                Ok(schema.rsplit('/').next().unwrap_or(schema).to_string())
            }
            Self::ProcessingModeCode => Ok(match ctx.processing_mode_code {
                Some("p") => "production",
                Some("d") => "development",
                _ => "testing",
            }
            .to_string()),
        }
    }
}

/// Splits `name(args)` into its parts when `name` is a plain identifier.
fn split_call(text: &str) -> Option<(&str, &str)> {
    let inner = text.strip_suffix(')')?;
    let (name, args) = inner.split_once('(')?;
    let is_identifier =
        !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    is_identifier.then_some((name, args))
}

/// Formats `at` with a strftime pattern. Patterns that fail to parse or that
/// contain no date field at all render as the empty string.
fn format_date(at: DateTime<Utc>, format: &str) -> String {
    let items: Vec<Item<'_>> = StrftimeItems::new(format).collect();
    let has_error = items.iter().any(|item| matches!(item, Item::Error));
    let has_field = items
        .iter()
        .any(|item| matches!(item, Item::Numeric(..) | Item::Fixed(_)));
    if has_error || !has_field {
        return String::new();
    }
    at.format_with_items(items.into_iter()).to_string()
}

// ---------------------------------------------------------------------------
// FileNameTemplate
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum CaseFold {
    #[default]
    Keep,
    Lower,
    Upper,
}

/// Parsed file-name template.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "TemplateSpec")]
pub struct FileNameTemplate {
    elements: Vec<FileNameElement>,
    case: CaseFold,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TemplateSpec {
    elements: Vec<String>,
    #[serde(default)]
    lower_case: bool,
    #[serde(default)]
    upper_case: bool,
}

impl TryFrom<TemplateSpec> for FileNameTemplate {
    type Error = TemplateError;

    fn try_from(spec: TemplateSpec) -> Result<Self, Self::Error> {
        let elements = spec
            .elements
            .iter()
            .map(|text| FileNameElement::parse(text))
            .collect::<Result<Vec<_>, _>>()?;
        let case = match (spec.lower_case, spec.upper_case) {
            (true, _) => CaseFold::Lower,
            (false, true) => CaseFold::Upper,
            (false, false) => CaseFold::Keep,
        };
        Ok(Self { elements, case })
    }
}

impl FileNameTemplate {
    /// Parse a template from element strings, keeping case.
    ///
    /// # Errors
    ///
    /// Returns the first element parse error.
    pub fn parse<S: AsRef<str>>(elements: &[S]) -> Result<Self, TemplateError> {
        Self::try_from(TemplateSpec {
            elements: elements.iter().map(|e| e.as_ref().to_string()).collect(),
            lower_case: false,
            upper_case: false,
        })
    }

    #[must_use]
    pub fn lower_case(mut self) -> Self {
        self.case = CaseFold::Lower;
        self
    }

    #[must_use]
    pub fn upper_case(mut self) -> Self {
        self.case = CaseFold::Upper;
        self
    }

    #[must_use]
    pub fn elements(&self) -> &[FileNameElement] {
        &self.elements
    }

    /// Render the file name, without extension.
    ///
    /// # Errors
    ///
    /// Returns the first element rendering error.
    pub fn file_name(&self, ctx: &FileNameContext<'_>) -> Result<String, TemplateError> {
        let mut name = String::new();
        for element in &self.elements {
            name.push_str(&element.value(ctx)?);
        }
        Ok(match self.case {
            CaseFold::Keep => name,
            CaseFold::Lower => name.to_lowercase(),
            CaseFold::Upper => name.to_uppercase(),
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn ctx() -> FileNameContext<'static> {
        FileNameContext {
            receiving_organization: Some("yoyodyne"),
            schema_name: Some("/dir1/sub-dir/complex-covid-19"),
            processing_mode_code: Some("p"),
            created_at: Utc.with_ymd_and_hms(2021, 2, 3, 4, 5, 6).unwrap(),
        }
    }

    fn from_json(json: &str) -> FileNameTemplate {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn literal_element() {
        let template = from_json(r#"{"elements":["literal(cdcprime)"]}"#);
        assert_eq!(template.file_name(&ctx()).unwrap(), "cdcprime");
    }

    #[test]
    fn concatenates_elements() {
        let template =
            from_json(r#"{"elements":["literal(cdcprime_)","receivingOrganization()"]}"#);
        assert_eq!(template.file_name(&ctx()).unwrap(), "cdcprime_yoyodyne");
    }

    #[test]
    fn bare_strings_are_literals() {
        let template = from_json(r#"{"elements":["cdcprime_","receivingOrganization()"]}"#);
        assert_eq!(template.file_name(&ctx()).unwrap(), "cdcprime_yoyodyne");
    }

    #[test]
    fn case_folding() {
        let upper = from_json(
            r#"{"elements":["cdcprime_","receivingOrganization()"],"upperCase":true}"#,
        );
        assert_eq!(upper.file_name(&ctx()).unwrap(), "CDCPRIME_YOYODYNE");

        let lower = from_json(r#"{"elements":["CdcPrime_"],"lowerCase":true}"#);
        assert_eq!(lower.file_name(&ctx()).unwrap(), "cdcprime_");

        let kept = from_json(r#"{"elements":["CdcPrime_","receivingOrganization()"]}"#);
        assert_eq!(kept.file_name(&ctx()).unwrap(), "CdcPrime_yoyodyne");
    }

    #[test]
    fn created_date_formats() {
        let default = FileNameElement::parse("createdDate()").unwrap();
        assert_eq!(default.value(&ctx()).unwrap(), "20210203040506");

        let hourly = FileNameElement::parse("createdDate(%Y%m%d%H)").unwrap();
        assert_eq!(hourly.value(&ctx()).unwrap(), "2021020304");
    }

    #[test]
    fn bogus_date_format_renders_empty() {
        let bogus = FileNameElement::CreatedDate(Some("As formats go, I'm bogus".to_string()));
        assert_eq!(bogus.value(&ctx()).unwrap(), "");

        let broken = FileNameElement::CreatedDate(Some("%Y%Q".to_string()));
        assert_eq!(broken.value(&ctx()).unwrap(), "");
    }

    #[test]
    fn regex_replace() {
        let element = FileNameElement::parse("regexReplace( Acme_Labs-,[ _-]+,)").unwrap();
        assert_eq!(element.value(&ctx()).unwrap(), "AcmeLabs");
    }

    #[test]
    fn regex_replace_needs_three_arguments() {
        assert!(matches!(
            FileNameElement::parse("regexReplace(only-one)"),
            Err(TemplateError::BadArguments { .. })
        ));
    }

    #[test]
    fn schema_base_name() {
        let element = FileNameElement::SchemaBaseName;
        assert_eq!(element.value(&ctx()).unwrap(), "complex-covid-19");

        let mut simple = ctx();
        simple.schema_name = Some("covid-19");
        assert_eq!(element.value(&simple).unwrap(), "covid-19");

        let mut missing = ctx();
        missing.schema_name = None;
        assert!(matches!(
            element.value(&missing),
            Err(TemplateError::MissingSchema)
        ));
    }

    #[test]
    fn processing_mode_code() {
        let element = FileNameElement::ProcessingModeCode;
        let mut context = ctx();
        for (code, expected) in [
            ("t", "testing"),
            ("p", "production"),
            ("d", "development"),
            ("junk data", "testing"),
        ] {
            context.processing_mode_code = Some(code);
            assert_eq!(element.value(&context).unwrap(), expected);
        }
    }

    #[test]
    fn unknown_element_is_rejected() {
        let result = serde_json::from_str::<FileNameTemplate>(r#"{"elements":["sendingApp()"]}"#);
        assert!(result.is_err());
    }
}
