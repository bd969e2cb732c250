//! Page schema: every CSS locator the scrapers depend on, in one table.
//!
//! When bioRxiv changes its markup, only the table returned by
//! [`PageSchema::biorxiv`] (or a YAML override passed with `--schema`) needs
//! to change. Scrapers ask for a [`Field`] and never see a selector string.
//!
//! # Override file
//!
//! ```yaml
//! attention_count:
//!   css: "#count_twitter"
//! posted_date:
//!   css: ".pane-custom .published"
//!   strip_prefix: ["Posted"]
//!   strip_suffix: ["."]
//! ```
//!
//! Fields missing from the override keep their built-in locator.

use crate::error::ConfigError;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tracing::{info, instrument};

/// Named things the scrapers extract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    /// "Posted May 8, 2024." line on a detail page.
    PostedDate,
    /// Share counter; also the readiness marker of a detail page.
    AttentionCount,
    Abstract,
    Title,
    /// One match per subject tag.
    SubjectArea,
    /// Wrapper around the search results pager. Absence means "no results".
    PagerContainer,
    PagerLink,
    /// DOI link of each search result.
    ResultLink,
    /// Date heading of a "recent" listing page.
    ListingDate,
    /// Article link on a "recent" listing page.
    ListingArticle,
}

impl Field {
    pub const ALL: [Field; 10] = [
        Field::PostedDate,
        Field::AttentionCount,
        Field::Abstract,
        Field::Title,
        Field::SubjectArea,
        Field::PagerContainer,
        Field::PagerLink,
        Field::ResultLink,
        Field::ListingDate,
        Field::ListingArticle,
    ];
}

/// Where a field lives and how to clean what is found there.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Locator {
    pub css: String,
    /// Read this attribute instead of the element text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attr: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub strip_prefix: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub strip_suffix: Vec<String>,
}

impl Locator {
    pub fn css(css: &str) -> Self {
        Self {
            css: css.to_string(),
            attr: None,
            strip_prefix: Vec::new(),
            strip_suffix: Vec::new(),
        }
    }

    pub fn attr(mut self, attr: &str) -> Self {
        self.attr = Some(attr.to_string());
        self
    }

    pub fn strip_prefix(mut self, prefix: &str) -> Self {
        self.strip_prefix.push(prefix.to_string());
        self
    }

    pub fn strip_suffix(mut self, suffix: &str) -> Self {
        self.strip_suffix.push(suffix.to_string());
        self
    }

    /// Apply the prefix/suffix decorations to raw text.
    fn clean(&self, raw: &str) -> String {
        let mut s = raw.trim();
        for prefix in &self.strip_prefix {
            if let Some(rest) = s.strip_prefix(prefix.as_str()) {
                s = rest.trim();
            }
        }
        for suffix in &self.strip_suffix {
            if let Some(rest) = s.strip_suffix(suffix.as_str()) {
                s = rest.trim();
            }
        }
        s.to_string()
    }
}

/// Field → locator table.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(transparent)]
pub struct PageSchema {
    rules: BTreeMap<Field, Locator>,
}

impl Default for PageSchema {
    fn default() -> Self {
        Self::biorxiv()
    }
}

impl PageSchema {
    /// Locators for www.biorxiv.org.
    pub fn biorxiv() -> Self {
        let detail_panel = "#block-system-main > div > div > div > div > div:nth-child(2) > div > div";
        let rules = BTreeMap::from([
            (
                Field::PostedDate,
                Locator::css(&format!("{detail_panel} > div:nth-child(3) > div"))
                    .strip_prefix("Posted")
                    .strip_suffix("."),
            ),
            (Field::AttentionCount, Locator::css("#count_twitter")),
            (Field::Abstract, Locator::css("#p-3")),
            (Field::Title, Locator::css("#page-title")),
            (
                Field::SubjectArea,
                Locator::css(&format!(
                    "{detail_panel} > div:nth-child(11) > div > div > div > ul > li > span > a"
                )),
            ),
            (
                Field::PagerContainer,
                Locator::css("div.highwire-list.page-group-items.item-list"),
            ),
            (
                Field::PagerLink,
                Locator::css("div.highwire-list.page-group-items.item-list ul.pager.pager-items a")
                    .attr("href"),
            ),
            (
                Field::ResultLink,
                Locator::css("span.highwire-cite-metadata-doi").strip_prefix("doi:"),
            ),
            (Field::ListingDate, Locator::css("div.highwire-list-wrapper h3")),
            (
                Field::ListingArticle,
                Locator::css("a.highwire-cite-linked-title").attr("href"),
            ),
        ]);
        Self { rules }
    }

    /// Built-in table with the locators from a YAML document laid over it.
    pub fn with_yaml_overrides(yaml: &str) -> Result<Self, ConfigError> {
        let overrides: BTreeMap<Field, Locator> =
            serde_yaml::from_str(yaml).map_err(|e| ConfigError::Schema(e.to_string()))?;
        let mut schema = Self::biorxiv();
        schema.rules.extend(overrides);
        Ok(schema)
    }

    /// Load the schema, applying the override file if one is given.
    #[instrument(level = "info")]
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            None => Ok(Self::biorxiv()),
            Some(path) => {
                let yaml = std::fs::read_to_string(path)
                    .map_err(|e| ConfigError::Schema(format!("{}: {e}", path.display())))?;
                let schema = Self::with_yaml_overrides(&yaml)?;
                info!(path = %path.display(), "Loaded page schema overrides");
                Ok(schema)
            }
        }
    }

    pub fn locator(&self, field: Field) -> Option<&Locator> {
        self.rules.get(&field)
    }

    /// Parse every selector up front so a bad override fails at startup
    /// instead of on the first page.
    pub fn compile(&self) -> Result<CompiledSchema, ConfigError> {
        let mut rules = HashMap::new();
        for field in Field::ALL {
            let locator = self
                .rules
                .get(&field)
                .ok_or_else(|| ConfigError::Schema(format!("no locator for {field:?}")))?;
            let selector = Selector::parse(&locator.css)
                .map_err(|e| ConfigError::Schema(format!("{field:?}: {e}")))?;
            rules.insert(
                field,
                CompiledRule {
                    selector,
                    locator: locator.clone(),
                },
            );
        }
        Ok(CompiledSchema { rules })
    }
}

#[derive(Debug)]
struct CompiledRule {
    selector: Selector,
    locator: Locator,
}

impl CompiledRule {
    fn value(&self, element: ElementRef<'_>) -> Option<String> {
        let raw = match &self.locator.attr {
            Some(attr) => element.value().attr(attr)?.to_string(),
            None => element_text(element),
        };
        let cleaned = self.locator.clean(&raw);
        (!cleaned.is_empty()).then_some(cleaned)
    }
}

/// A [`PageSchema`] with parsed selectors, ready to query documents.
#[derive(Debug)]
pub struct CompiledSchema {
    rules: HashMap<Field, CompiledRule>,
}

impl CompiledSchema {
    fn rule(&self, field: Field) -> &CompiledRule {
        // compile() inserts every Field::ALL entry
        &self.rules[&field]
    }

    /// Whether any element matches the field's selector.
    pub fn contains(&self, document: &Html, field: Field) -> bool {
        document.select(&self.rule(field).selector).next().is_some()
    }

    /// Cleaned value of the first match with a non-empty value.
    pub fn first(&self, document: &Html, field: Field) -> Option<String> {
        let rule = self.rule(field);
        document.select(&rule.selector).find_map(|el| rule.value(el))
    }

    /// Cleaned values of every match, in document order.
    pub fn all(&self, document: &Html, field: Field) -> Vec<String> {
        let rule = self.rule(field);
        document
            .select(&rule.selector)
            .filter_map(|el| rule.value(el))
            .collect()
    }
}

/// Element text with whitespace-only nodes dropped and the rest trimmed.
fn element_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}
