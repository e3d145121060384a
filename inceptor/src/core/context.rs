//! Keyword tagging of free-text problem statements.
//!
//! [`extract_context`] is a pure function over text: every category is always
//! present in the returned [`TagSet`], possibly empty. [`TagSet::enrich`]
//! layers caller overrides on top and fills the `scale` and `urgency` defaults.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Fixed set of tag categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Technology,
    ProblemType,
    Scale,
    Urgency,
    Constraints,
}

impl Category {
    pub const ALL: [Category; 5] = [
        Category::Technology,
        Category::ProblemType,
        Category::Scale,
        Category::Urgency,
        Category::Constraints,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Category::Technology => "technology",
            Category::ProblemType => "problem_type",
            Category::Scale => "scale",
            Category::Urgency => "urgency",
            Category::Constraints => "constraints",
        }
    }

    pub fn parse(key: &str) -> Option<Category> {
        Category::ALL.into_iter().find(|c| c.as_str() == key)
    }

    /// Tag applied when enrichment finds the category empty.
    fn default_tag(self) -> Option<&'static str> {
        match self {
            Category::Scale => Some("medium"),
            Category::Urgency => Some("normal"),
            Category::Technology | Category::ProblemType | Category::Constraints => None,
        }
    }

    fn patterns(self) -> &'static [&'static str] {
        match self {
            Category::Technology => &[
                r"\b(python|javascript|react|flask|fastapi|django|nodejs|typescript)\b",
                r"\b(docker|kubernetes|aws|azure|gcp|terraform)\b",
                r"\b(mysql|postgresql|mongodb|redis|elasticsearch)\b",
            ],
            Category::ProblemType => &[
                r"\b(logging|monitoring|security|performance|testing|deployment)\b",
                r"\b(authentication|authorization|api|frontend|backend|database)\b",
                r"\b(ci/cd|devops|automation|scaling|optimization)\b",
            ],
            Category::Scale => &[
                r"\b(small|medium|large|enterprise|startup|team|personal)\b",
                r"\b(\d+\s*users?|\d+\s*requests?|\d+\s*servers?)\b",
            ],
            Category::Urgency => &[
                r"\b(urgent|asap|quick|fast|immediate|prototype|poc)\b",
                r"\b(production|critical|important|nice to have)\b",
            ],
            Category::Constraints => &[
                r"\b(budget|time|resources|team size|deadline)\b",
                r"\b(security|compliance|gdpr|hipaa|pci)\b",
                r"\b(legacy|existing|migration|greenfield)\b",
            ],
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

static PATTERNS: LazyLock<Vec<(Category, Vec<Regex>)>> = LazyLock::new(|| {
    Category::ALL
        .into_iter()
        .map(|category| {
            let compiled = category
                .patterns()
                .iter()
                .map(|pattern| Regex::new(pattern).expect("context pattern should compile"))
                .collect();
            (category, compiled)
        })
        .collect()
});

/// Caller-supplied context overrides, keyed by category or free-form name.
pub type ContextOverrides = BTreeMap<String, Value>;

/// Categorized keyword tags plus verbatim extra context.
///
/// Serializes as one flat object: each category as a sorted array of tags,
/// followed by any extra keys supplied through [`TagSet::enrich`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "BTreeMap<String, Value>", into = "BTreeMap<String, Value>")]
pub struct TagSet {
    categories: BTreeMap<Category, BTreeSet<String>>,
    extra: BTreeMap<String, Value>,
}

impl Default for TagSet {
    fn default() -> Self {
        Self {
            categories: Category::ALL
                .into_iter()
                .map(|c| (c, BTreeSet::new()))
                .collect(),
            extra: BTreeMap::new(),
        }
    }
}

impl TagSet {
    /// Tags for a category (empty when nothing matched).
    pub fn get(&self, category: Category) -> &BTreeSet<String> {
        static EMPTY: BTreeSet<String> = BTreeSet::new();
        self.categories.get(&category).unwrap_or(&EMPTY)
    }

    pub fn contains(&self, category: Category, tag: &str) -> bool {
        self.get(category).contains(tag)
    }

    /// Extra, non-category context value.
    pub fn extra(&self, key: &str) -> Option<&Value> {
        self.extra.get(key)
    }

    /// Merge caller overrides and apply defaults.
    ///
    /// Override values replace detected values for the same key. Afterwards an
    /// empty `scale` or `urgency` receives its default tag. Applying the same
    /// overrides twice yields the same tag set.
    pub fn enrich(mut self, overrides: &ContextOverrides) -> TagSet {
        for (key, value) in overrides {
            match Category::parse(key) {
                Some(category) => {
                    self.categories.insert(category, tags_from_value(value));
                }
                None => {
                    self.extra.insert(key.clone(), value.clone());
                }
            }
        }
        for category in Category::ALL {
            if let Some(default) = category.default_tag() {
                let tags = self.categories.entry(category).or_default();
                if tags.is_empty() {
                    tags.insert(default.to_string());
                }
            }
        }
        self
    }

    /// Render as indented JSON for prompt interpolation.
    pub fn to_prompt_json(&self) -> String {
        let value: BTreeMap<String, Value> = self.clone().into();
        serde_json::to_string_pretty(&value).unwrap_or_else(|_| "{}".to_string())
    }
}

impl From<TagSet> for BTreeMap<String, Value> {
    fn from(tags: TagSet) -> Self {
        let mut out = BTreeMap::new();
        for (category, values) in tags.categories {
            let values = values.into_iter().map(Value::String).collect();
            out.insert(category.as_str().to_string(), Value::Array(values));
        }
        for (key, value) in tags.extra {
            out.insert(key, value);
        }
        out
    }
}

impl From<BTreeMap<String, Value>> for TagSet {
    fn from(raw: BTreeMap<String, Value>) -> Self {
        let mut tags = TagSet::default();
        for (key, value) in raw {
            match Category::parse(&key) {
                Some(category) => {
                    tags.categories.insert(category, tags_from_value(&value));
                }
                None => {
                    tags.extra.insert(key, value);
                }
            }
        }
        tags
    }
}

fn tags_from_value(value: &Value) -> BTreeSet<String> {
    match value {
        Value::Null => BTreeSet::new(),
        Value::String(s) => BTreeSet::from([s.clone()]),
        Value::Array(items) => items
            .iter()
            .filter(|item| !item.is_null())
            .map(|item| match item {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect(),
        other => BTreeSet::from([other.to_string()]),
    }
}

/// Tag free text by keyword category.
///
/// Matching is case-insensitive on word boundaries; matches from all patterns
/// of a category are unioned, so each term appears once.
pub fn extract_context(text: &str) -> TagSet {
    let lowered = text.to_lowercase();
    let mut tags = TagSet::default();
    for (category, patterns) in PATTERNS.iter() {
        let found = tags.categories.entry(*category).or_default();
        for pattern in patterns {
            for caps in pattern.captures_iter(&lowered) {
                if let Some(m) = caps.get(1) {
                    found.insert(m.as_str().to_string());
                }
            }
        }
    }
    tags
}
