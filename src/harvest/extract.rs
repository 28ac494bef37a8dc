//! Activity extraction over ActivityStreams-style JSON-LD feeds.
//!
//! The walk visits every object and array in the document. Each object has its
//! `type`/`@type` tags normalized once into a [`TypeTags`] set, and tagged
//! nodes contribute record links to the matching buckets:
//!
//! - `Create` / `Update`: every link object anywhere under the node's `object`.
//! - `Remove`: only the link objects listed directly in `object.url`.
//!
//! Untagged and tagged nodes alike are descended into, so activities nested
//! inside other activities are still discovered.

use crate::harvest::config::ExtractConfig;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ActivityType {
    Create,
    Update,
    Remove,
}

impl ActivityType {
    pub const ALL: [ActivityType; 3] = [Self::Create, Self::Update, Self::Remove];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "Create",
            Self::Update => "Update",
            Self::Remove => "Remove",
        }
    }

    fn index(self) -> usize {
        match self {
            Self::Create => 0,
            Self::Update => 1,
            Self::Remove => 2,
        }
    }

    fn bit(self) -> u8 {
        1 << self.index()
    }
}

impl fmt::Display for ActivityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownActivityType(pub String);

impl FromStr for ActivityType {
    type Err = UnknownActivityType;

    /// Exact, case-sensitive match against the ActivityStreams names.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Create" => Ok(Self::Create),
            "Update" => Ok(Self::Update),
            "Remove" => Ok(Self::Remove),
            other => Err(UnknownActivityType(other.to_string())),
        }
    }
}

/// Set of recognized activity types carried by one node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TypeTags(u8);

impl TypeTags {
    pub fn of(types: &[ActivityType]) -> Self {
        let mut tags = Self::default();
        for t in types {
            tags.insert(*t);
        }
        tags
    }

    pub fn insert(&mut self, t: ActivityType) {
        self.0 |= t.bit();
    }

    pub fn contains(self, t: ActivityType) -> bool {
        self.0 & t.bit() != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    fn intersect(self, other: TypeTags) -> Self {
        Self(self.0 & other.0)
    }

    pub fn iter(self) -> impl Iterator<Item = ActivityType> {
        ActivityType::ALL.into_iter().filter(move |t| self.contains(*t))
    }

    /// Tags declared under `type` and `@type`, restricted to `recognized`.
    /// A tag may be a single string or an array of strings.
    fn from_node(node: &Map<String, Value>, recognized: TypeTags) -> Self {
        let mut tags = Self::default();
        for key in ["type", "@type"] {
            match node.get(key) {
                Some(Value::String(name)) => tags.insert_name(name),
                Some(Value::Array(names)) => {
                    for name in names.iter().filter_map(Value::as_str) {
                        tags.insert_name(name);
                    }
                }
                _ => {}
            }
        }
        tags.intersect(recognized)
    }

    fn insert_name(&mut self, name: &str) {
        if let Ok(t) = name.parse::<ActivityType>() {
            self.insert(t);
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExtractRules {
    pub recognized: TypeTags,
    pub media_type: String,
    pub href_suffix: String,
}

impl ExtractRules {
    pub fn from_config(cfg: &ExtractConfig) -> Self {
        Self {
            recognized: TypeTags::of(&cfg.recognized_types),
            media_type: cfg.media_type.clone(),
            href_suffix: cfg.href_suffix.clone(),
        }
    }

    /// Canonical href of a link object, if it points at a record in the
    /// expected media type.
    fn link_href<'v>(&self, link: &'v Map<String, Value>) -> Option<&'v str> {
        let media_type = link.get("mediaType").and_then(Value::as_str)?;
        if media_type != self.media_type {
            return None;
        }
        let href = canonical_url(link.get("href").and_then(Value::as_str)?.trim());
        href.ends_with(&self.href_suffix).then_some(href)
    }
}

impl Default for ExtractRules {
    fn default() -> Self {
        Self::from_config(&ExtractConfig::default())
    }
}

/// Strip the query string; the result is the dedup key for a resource.
pub fn canonical_url(href: &str) -> &str {
    href.split_once('?').map_or(href, |(base, _)| base)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivityBuckets {
    sets: [BTreeSet<String>; 3],
}

impl ActivityBuckets {
    pub fn get(&self, t: ActivityType) -> &BTreeSet<String> {
        &self.sets[t.index()]
    }

    pub fn total(&self) -> usize {
        self.sets.iter().map(BTreeSet::len).sum()
    }

    fn extend(&mut self, t: ActivityType, urls: &BTreeSet<String>) {
        self.sets[t.index()].extend(urls.iter().cloned());
    }
}

struct Extractor<'r> {
    rules: &'r ExtractRules,
    out: ActivityBuckets,
}

impl Extractor<'_> {
    fn visit(&mut self, node: &Value) {
        match node {
            Value::Object(map) => self.visit_object(map),
            Value::Array(items) => {
                for item in items {
                    self.visit(item);
                }
            }
            Value::String(_) | Value::Number(_) | Value::Bool(_) | Value::Null => {}
        }
    }

    fn visit_object(&mut self, map: &Map<String, Value>) {
        let tags = TypeTags::from_node(map, self.rules.recognized);
        if !tags.is_empty() {
            self.collect_activity(map, tags);
        }
        for child in map.values() {
            self.visit(child);
        }
    }

    fn collect_activity(&mut self, activity: &Map<String, Value>, tags: TypeTags) {
        let object = activity.get("object");

        if tags.contains(ActivityType::Create) || tags.contains(ActivityType::Update) {
            let mut found = BTreeSet::new();
            if let Some(object) = object {
                self.collect_links_deep(object, &mut found);
            }
            for t in [ActivityType::Create, ActivityType::Update] {
                if tags.contains(t) {
                    self.out.extend(t, &found);
                }
            }
        }

        if tags.contains(ActivityType::Remove) {
            let mut found = BTreeSet::new();
            if let Some(Value::Object(object)) = object {
                self.collect_direct_links(object, &mut found);
            }
            self.out.extend(ActivityType::Remove, &found);
        }
    }

    fn collect_links_deep(&self, node: &Value, found: &mut BTreeSet<String>) {
        match node {
            Value::Object(map) => {
                if let Some(href) = self.rules.link_href(map) {
                    found.insert(href.to_string());
                }
                for child in map.values() {
                    self.collect_links_deep(child, found);
                }
            }
            Value::Array(items) => {
                for item in items {
                    self.collect_links_deep(item, found);
                }
            }
            _ => {}
        }
    }

    fn collect_direct_links(&self, object: &Map<String, Value>, found: &mut BTreeSet<String>) {
        let links: &[Value] = match object.get("url") {
            Some(Value::Array(items)) => items,
            Some(single @ Value::Object(_)) => std::slice::from_ref(single),
            _ => return,
        };
        for link in links.iter().filter_map(Value::as_object) {
            if let Some(href) = self.rules.link_href(link) {
                found.insert(href.to_string());
            }
        }
    }
}

pub fn extract(document: &Value, rules: &ExtractRules) -> ActivityBuckets {
    let mut extractor = Extractor {
        rules,
        out: ActivityBuckets::default(),
    };
    extractor.visit(document);
    extractor.out
}

#[cfg(test)]
mod tests {
    use super::{ActivityType, ExtractRules, TypeTags, canonical_url, extract};
    use serde_json::json;

    const MARC: &str = "application/marc+xml";

    fn link(href: &str) -> serde_json::Value {
        json!({ "mediaType": MARC, "href": href })
    }

    fn urls(buckets: &super::ActivityBuckets, t: ActivityType) -> Vec<&str> {
        buckets.get(t).iter().map(String::as_str).collect()
    }

    #[test]
    fn canonical_url_drops_query() {
        assert_eq!(
            canonical_url("https://id.loc.gov/a/n1.marcxml.xml?x=1&y=2"),
            "https://id.loc.gov/a/n1.marcxml.xml"
        );
        assert_eq!(canonical_url("https://id.loc.gov/a/n1"), "https://id.loc.gov/a/n1");
    }

    #[test]
    fn create_collects_nested_links_and_dedups_by_canonical_form() {
        let doc = json!({
            "orderedItems": [
                {
                    "type": "Create",
                    "object": {
                        "id": "n1",
                        "url": [
                            link("https://id.loc.gov/authorities/names/n1.marcxml.xml?v=2"),
                            { "mediaType": "text/html", "href": "https://id.loc.gov/authorities/names/n1.html" }
                        ],
                        "nested": { "deeper": [link("https://id.loc.gov/authorities/names/n2.marcxml.xml")] }
                    }
                },
                {
                    "type": "Create",
                    "object": { "url": [link("https://id.loc.gov/authorities/names/n1.marcxml.xml")] }
                }
            ]
        });

        let rules = ExtractRules::default();
        let first = extract(&doc, &rules);
        let second = extract(&doc, &rules);

        assert_eq!(first, second);
        assert_eq!(
            urls(&first, ActivityType::Create),
            vec![
                "https://id.loc.gov/authorities/names/n1.marcxml.xml",
                "https://id.loc.gov/authorities/names/n2.marcxml.xml",
            ]
        );
        assert!(first.get(ActivityType::Update).is_empty());
        assert_eq!(first.total(), 2);
    }

    #[test]
    fn multi_tag_node_feeds_every_tagged_bucket() {
        let doc = json!({
            "@type": ["Create", "Update"],
            "object": { "url": [link("https://id.loc.gov/a/n9.marcxml.xml")] }
        });
        let out = extract(&doc, &ExtractRules::default());

        assert_eq!(urls(&out, ActivityType::Create), vec!["https://id.loc.gov/a/n9.marcxml.xml"]);
        assert_eq!(urls(&out, ActivityType::Update), vec!["https://id.loc.gov/a/n9.marcxml.xml"]);
        assert!(out.get(ActivityType::Remove).is_empty());
    }

    #[test]
    fn remove_reads_only_direct_object_urls() {
        let doc = json!({
            "type": "Remove",
            "object": {
                "url": [link("https://id.loc.gov/a/gone.marcxml.xml")],
                "related": {
                    "url": [link("https://id.loc.gov/a/not-removed.marcxml.xml")]
                },
                "history": [{
                    "type": "Create",
                    "object": { "url": [link("https://id.loc.gov/a/created.marcxml.xml")] }
                }]
            }
        });
        let out = extract(&doc, &ExtractRules::default());

        assert_eq!(urls(&out, ActivityType::Remove), vec!["https://id.loc.gov/a/gone.marcxml.xml"]);
        assert_eq!(
            urls(&out, ActivityType::Create),
            vec!["https://id.loc.gov/a/created.marcxml.xml"]
        );
    }

    #[test]
    fn same_url_may_land_in_several_buckets() {
        let href = "https://id.loc.gov/a/n5.marcxml.xml";
        let doc = json!([
            { "type": "Update", "object": { "url": [link(href)] } },
            { "type": "Remove", "object": { "url": link(href) } }
        ]);
        let out = extract(&doc, &ExtractRules::default());

        assert_eq!(urls(&out, ActivityType::Update), vec![href]);
        assert_eq!(urls(&out, ActivityType::Remove), vec![href]);
    }

    #[test]
    fn tag_matching_is_exact_and_case_sensitive() {
        let doc = json!([
            { "type": "create", "object": { "url": [link("https://id.loc.gov/a/lower.marcxml.xml")] } },
            { "type": "Delete", "object": { "url": [link("https://id.loc.gov/a/delete.marcxml.xml")] } }
        ]);
        let out = extract(&doc, &ExtractRules::default());
        assert_eq!(out.total(), 0);
    }

    #[test]
    fn media_type_and_suffix_must_both_match() {
        let doc = json!({
            "type": "Create",
            "object": { "url": [
                { "mediaType": "application/xml", "href": "https://id.loc.gov/a/x.marcxml.xml" },
                { "mediaType": MARC, "href": "https://id.loc.gov/a/x.rdf" },
                { "mediaType": MARC, "href": 42 }
            ]}
        });
        assert_eq!(extract(&doc, &ExtractRules::default()).total(), 0);
    }

    #[test]
    fn malformed_shapes_are_tolerated() {
        let rules = ExtractRules::default();
        for doc in [
            json!("just a string"),
            json!(17),
            json!(null),
            json!({ "type": "Create" }),
            json!({ "type": "Create", "object": "n1" }),
            json!({ "type": "Remove", "object": { "url": "https://id.loc.gov/a/n1.marcxml.xml" } }),
            json!({ "type": ["Remove", 3], "object": [link("https://id.loc.gov/a/n1.marcxml.xml")] }),
        ] {
            assert_eq!(extract(&doc, &rules).total(), 0, "doc: {doc}");
        }
    }

    #[test]
    fn unrecognized_types_are_not_collected_but_still_traversed() {
        let mut rules = ExtractRules::default();
        rules.recognized = TypeTags::of(&[ActivityType::Create]);

        let doc = json!({
            "type": "Update",
            "object": { "url": [link("https://id.loc.gov/a/upd.marcxml.xml")] },
            "children": [{ "type": "Create", "object": { "url": [link("https://id.loc.gov/a/new.marcxml.xml")] } }]
        });
        let out = extract(&doc, &rules);

        assert!(out.get(ActivityType::Update).is_empty());
        assert_eq!(urls(&out, ActivityType::Create), vec!["https://id.loc.gov/a/new.marcxml.xml"]);
    }
}
