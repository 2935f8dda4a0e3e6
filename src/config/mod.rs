use anyhow::{Result, bail};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;

use crate::dsl::FilterTexts;
use crate::metadata::AuthorMode;
use crate::model::Kind;

const NODE: &[Kind] = &[Kind::Node];
const WAY: &[Kind] = &[Kind::Way];
const RELATION: &[Kind] = &[Kind::Relation];
const NODE_WAY: &[Kind] = &[Kind::Node, Kind::Way];
const NODE_RELATION: &[Kind] = &[Kind::Node, Kind::Relation];
const WAY_RELATION: &[Kind] = &[Kind::Way, Kind::Relation];
const ALL: &[Kind] = &Kind::ALL;

/// Which of the four filter lists an option feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterList {
    Keep,
    Drop,
    KeepTags,
    DropTags,
}

/// Every filter option with the list and object kinds it applies to.
/// `drop-nodes`, `drop-ways` and `drop-relations` only land here when given
/// a value; without one they drop the whole section.
pub const FILTER_OPTIONS: &[(&str, FilterList, &[Kind])] = &[
    ("keep", FilterList::Keep, ALL),
    ("keep-nodes", FilterList::Keep, NODE),
    ("keep-ways", FilterList::Keep, WAY),
    ("keep-relations", FilterList::Keep, RELATION),
    ("keep-nodes-ways", FilterList::Keep, NODE_WAY),
    ("keep-nodes-relations", FilterList::Keep, NODE_RELATION),
    ("keep-ways-relations", FilterList::Keep, WAY_RELATION),
    ("drop", FilterList::Drop, ALL),
    ("drop-nodes", FilterList::Drop, NODE),
    ("drop-ways", FilterList::Drop, WAY),
    ("drop-relations", FilterList::Drop, RELATION),
    ("drop-nodes-ways", FilterList::Drop, NODE_WAY),
    ("drop-nodes-relations", FilterList::Drop, NODE_RELATION),
    ("drop-ways-relations", FilterList::Drop, WAY_RELATION),
    ("keep-tags", FilterList::KeepTags, ALL),
    ("keep-node-tags", FilterList::KeepTags, NODE),
    ("keep-way-tags", FilterList::KeepTags, WAY),
    ("keep-relation-tags", FilterList::KeepTags, RELATION),
    ("keep-node-way-tags", FilterList::KeepTags, NODE_WAY),
    ("keep-node-relation-tags", FilterList::KeepTags, NODE_RELATION),
    ("keep-way-relation-tags", FilterList::KeepTags, WAY_RELATION),
    ("drop-tags", FilterList::DropTags, ALL),
    ("drop-node-tags", FilterList::DropTags, NODE),
    ("drop-way-tags", FilterList::DropTags, WAY),
    ("drop-relation-tags", FilterList::DropTags, RELATION),
    ("drop-node-way-tags", FilterList::DropTags, NODE_WAY),
    ("drop-node-relation-tags", FilterList::DropTags, NODE_RELATION),
    ("drop-way-relation-tags", FilterList::DropTags, WAY_RELATION),
];

/// Options that drop a whole section when given without a filter.
pub const SECTION_OPTIONS: [(&str, Kind); 3] = [
    ("drop-nodes", Kind::Node),
    ("drop-ways", Kind::Way),
    ("drop-relations", Kind::Relation),
];

/// Add one filter text under the option `name` (without leading dashes).
pub fn add_filter(texts: &mut FilterTexts, name: &str, text: &str) -> Result<()> {
    let Some((_, list, kinds)) = FILTER_OPTIONS.iter().find(|(option, _, _)| *option == name)
    else {
        bail!("Config: Unknown filter option '{}'", name);
    };
    let target = match list {
        FilterList::Keep => &mut texts.keep,
        FilterList::Drop => &mut texts.drop,
        FilterList::KeepTags => &mut texts.keep_tags,
        FilterList::DropTags => &mut texts.drop_tags,
    };
    FilterTexts::push(target, kinds, text);
    Ok(())
}

/// Hash table sizes in MiB for nodes, ways and relations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashBudget {
    pub nodes: u32,
    pub ways: u32,
    pub relations: u32,
}

impl HashBudget {
    pub const DEFAULT_TOTAL: u32 = 1000;

    /// Split a total 90/9/1 between nodes, ways and relations.
    pub fn from_total(total: u32) -> Self {
        let total = if total == 0 {
            Self::DEFAULT_TOTAL
        } else {
            total
        };
        let share = |percent: u64| (u64::from(total) * percent / 100).max(1) as u32;
        Self {
            nodes: share(90),
            ways: share(9),
            relations: share(1),
        }
    }
}

impl Default for HashBudget {
    fn default() -> Self {
        Self::from_total(Self::DEFAULT_TOTAL)
    }
}

impl FromStr for HashBudget {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let parse = |part: &str| {
            part.trim()
                .parse::<u32>()
                .map_err(|_| format!("invalid hash memory size: {value}"))
        };
        let parts: Vec<&str> = value.split('-').collect();
        match parts.as_slice() {
            [total] => Ok(Self::from_total(parse(total)?)),
            [nodes, ways, relations] => Ok(Self {
                nodes: parse(nodes)?.max(1),
                ways: parse(ways)?.max(1),
                relations: parse(relations)?.max(1),
            }),
            _ => Err(format!(
                "invalid hash memory size: {value} (expected N or N-N-N)"
            )),
        }
    }
}

/// Settings for one run, resolved from the command line and an optional
/// parameter file.
#[derive(Debug, Clone, Default)]
pub struct RuntimeConfig {
    pub filters: FilterTexts,
    /// Per kind: leave the whole section out of the output.
    pub drop_sections: [bool; 3],
    pub author_mode: AuthorMode,
    pub fake_lonlat: bool,
    pub ignore_dependencies: bool,
    pub hash: HashBudget,
}

impl RuntimeConfig {
    pub fn drops_section(&self, kind: Kind) -> bool {
        self.drop_sections[kind.index()]
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    pub fn values(&self) -> Vec<String> {
        match self {
            OneOrMany::One(value) => vec![value.clone()],
            OneOrMany::Many(values) => values.clone(),
        }
    }
}

/// `drop-nodes: true` drops the section, a string or list is a filter.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum SectionOrFilter {
    Section(bool),
    Filter(OneOrMany),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum HashMemorySetting {
    Total(u32),
    Text(String),
}

impl HashMemorySetting {
    pub fn budget(&self) -> Result<HashBudget> {
        match self {
            HashMemorySetting::Total(total) => Ok(HashBudget::from_total(*total)),
            HashMemorySetting::Text(text) => text
                .parse()
                .map_err(|e: String| anyhow::anyhow!("Config: {}", e)),
        }
    }
}

/// YAML parameter file using the command line option names as keys.
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ParameterFile {
    pub drop_author: bool,
    pub drop_version: bool,
    pub fake_author: bool,
    pub fake_version: bool,
    pub fake_lonlat: bool,
    pub ignore_dependencies: bool,
    pub hash_memory: Option<HashMemorySetting>,
    pub drop_nodes: Option<SectionOrFilter>,
    pub drop_ways: Option<SectionOrFilter>,
    pub drop_relations: Option<SectionOrFilter>,
    #[serde(flatten)]
    pub filters: BTreeMap<String, OneOrMany>,
}

impl ParameterFile {
    pub fn load(path: &Path) -> Result<Self> {
        let settings = ::config::Config::builder()
            .add_source(::config::File::from(path).format(::config::FileFormat::Yaml))
            .build()?;
        let file: Self = settings.try_deserialize()?;
        for name in file.filters.keys() {
            if !FILTER_OPTIONS.iter().any(|(option, _, _)| option == name) {
                bail!("Config: Unknown option '{}' in parameter file", name);
            }
        }
        Ok(file)
    }

    pub fn section_option(&self, kind: Kind) -> Option<&SectionOrFilter> {
        match kind {
            Kind::Node => self.drop_nodes.as_ref(),
            Kind::Way => self.drop_ways.as_ref(),
            Kind::Relation => self.drop_relations.as_ref(),
        }
    }
}
