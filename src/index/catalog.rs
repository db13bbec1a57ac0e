use std::collections::HashMap;

use parking_lot::RwLock;
use serde::Serialize;

use crate::config::CatalogConfig;
use crate::index::text_index::{Prioritized, TextIndex};
use crate::index::trie::Node;
use crate::stats::IndexStats;

pub const DEFAULT_PRIORITY: i32 = 3;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CatalogError {
    #[error("catalog: id already defined: {0}")]
    Duplicate(String),
    #[error("catalog: unknown id: {0}")]
    Unknown(String),
}

/// 设置项（索引叶子）：指向某个页面/分节里的一个可定位元素
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Leaf {
    pub id: String,
    pub text: String,
    pub page: String,
    pub section: String,
    pub selector: String,
    pub priority: i32,
}

impl Prioritized for Leaf {
    fn priority(&self) -> i32 {
        self.priority
    }
}

#[derive(Clone, Debug, Default)]
pub struct LeafSpec {
    pub id: String,
    pub text: String,
    pub page: String,
    pub section: String,
    pub selector: String,
    pub priority: Option<i32>,
}

#[derive(Default)]
struct Tables {
    leaves: HashMap<String, Leaf>,
    /// id -> 展示文本（含同义词 id）
    strings: HashMap<String, String>,
    configurable: HashMap<String, bool>,
}

/// 可搜索的设置目录：叶子表 + 文本表 + 单词索引
#[derive(Default)]
pub struct Catalog {
    tables: RwLock<Tables>,
    index: TextIndex<String>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(cfg: &CatalogConfig) -> Self {
        let catalog = Self::new();
        catalog.set_configurable(cfg.configurable.iter().map(|(k, v)| (k.clone(), *v)));

        let pages = cfg
            .pages
            .iter()
            .map(|p| (p.id.clone(), p.text.clone(), p.selector.clone()));
        let mut skipped = catalog.add_pages(pages);

        for section in &cfg.sections {
            let items = section
                .items
                .iter()
                .map(|i| (i.id.clone(), i.text.clone(), i.selector.clone(), i.priority));
            skipped += catalog.bulk_add(&section.page, &section.section, items);
        }

        skipped += catalog.add_synonyms(
            cfg.synonyms
                .iter()
                .map(|s| (s.id.clone(), s.synonym_id.clone(), s.text.clone())),
        );
        skipped += catalog.add_explanations(
            cfg.explanations
                .iter()
                .map(|(id, text)| (id.clone(), text.clone())),
        );

        tracing::info!(
            "Catalog built: {} leaves, {} words, {} entries skipped",
            catalog.len(),
            catalog.index.len(),
            skipped
        );
        catalog
    }

    /// 只有显式 false 才视为不可配置
    pub fn set_configurable<I>(&self, items: I)
    where
        I: IntoIterator<Item = (String, bool)>,
    {
        let mut t = self.tables.write();
        for (id, state) in items {
            t.configurable.insert(id, state);
        }
    }

    pub fn is_configurable(&self, id: &str) -> bool {
        self.tables.read().configurable.get(id) != Some(&false)
    }

    /// 加入设置项。不可配置的 id 静默跳过（返回 Ok(false)）。
    pub fn add(&self, spec: LeafSpec) -> Result<bool, CatalogError> {
        if !self.is_configurable(&spec.id) {
            return Ok(false);
        }
        {
            let mut t = self.tables.write();
            if t.leaves.contains_key(&spec.id) {
                tracing::warn!("catalog: id already defined: {}", spec.id);
                return Err(CatalogError::Duplicate(spec.id));
            }
            let leaf = Leaf {
                id: spec.id.clone(),
                text: spec.text.clone(),
                page: spec.page,
                section: spec.section,
                selector: spec.selector,
                priority: spec.priority.unwrap_or(DEFAULT_PRIORITY),
            };
            t.leaves.insert(spec.id.clone(), leaf);
            t.strings.insert(spec.id.clone(), spec.text.clone());
        }
        self.index.add_with_id(&spec.text, spec.id);
        Ok(true)
    }

    /// 顶层页面：page 即自身文本，section 为空。返回失败条数。
    pub fn add_pages<I>(&self, pages: I) -> usize
    where
        I: IntoIterator<Item = (String, String, String)>,
    {
        pages
            .into_iter()
            .map(|(id, text, selector)| {
                self.add(LeafSpec {
                    id,
                    page: text.clone(),
                    text,
                    section: String::new(),
                    selector,
                    priority: None,
                })
            })
            .filter(Result::is_err)
            .count()
    }

    /// 同一页面/分节下批量加入。返回失败条数。
    pub fn bulk_add<I>(&self, page: &str, section: &str, items: I) -> usize
    where
        I: IntoIterator<Item = (String, String, String, Option<i32>)>,
    {
        items
            .into_iter()
            .map(|(id, text, selector, priority)| {
                self.add(LeafSpec {
                    id,
                    text,
                    page: page.to_string(),
                    section: section.to_string(),
                    selector,
                    priority,
                })
            })
            .filter(Result::is_err)
            .count()
    }

    /// 只登记文本（不进索引）
    pub fn add_text(&self, id: &str, text: &str) -> Result<(), CatalogError> {
        let mut t = self.tables.write();
        if t.strings.contains_key(id) {
            tracing::warn!("catalog: id already defined: {}", id);
            return Err(CatalogError::Duplicate(id.to_string()));
        }
        t.strings.insert(id.to_string(), text.to_string());
        Ok(())
    }

    /// 同义文本：以 synonym_id 登记文本，但索引指向已有的 id
    pub fn add_synonym(&self, id: &str, synonym_id: &str, text: &str) -> Result<(), CatalogError> {
        {
            let mut t = self.tables.write();
            if !t.leaves.contains_key(id) {
                tracing::warn!("catalog: add_synonym() id is unknown: {}", id);
                return Err(CatalogError::Unknown(id.to_string()));
            }
            t.strings.insert(synonym_id.to_string(), text.to_string());
        }
        self.index.add_with_id(text, id.to_string());
        Ok(())
    }

    pub fn add_synonyms<I>(&self, synonyms: I) -> usize
    where
        I: IntoIterator<Item = (String, String, String)>,
    {
        synonyms
            .into_iter()
            .filter(|(id, synonym_id, text)| self.add_synonym(id, synonym_id, text).is_err())
            .count()
    }

    pub fn add_explanations<I>(&self, explanations: I) -> usize
    where
        I: IntoIterator<Item = (String, String)>,
    {
        explanations
            .into_iter()
            .filter(|(id, text)| {
                self.add_synonym(id, &format!("{id}_EXPLANATION"), text)
                    .is_err()
            })
            .count()
    }

    pub fn get_setting(&self, id: &str) -> Option<Leaf> {
        self.tables.read().leaves.get(id).cloned()
    }

    pub fn text(&self, id: &str) -> Option<String> {
        self.tables.read().strings.get(id).cloned()
    }

    pub fn search(&self, query: &str) -> Vec<Leaf> {
        let t = self.tables.read();
        self.index.search(query, |id| t.leaves.get(id).cloned())
    }

    pub fn search_for_ids(&self, query: &str) -> Vec<String> {
        self.index.search_for_ids(query)
    }

    pub fn reset(&self) {
        let mut t = self.tables.write();
        t.leaves.clear();
        t.strings.clear();
        self.index.reset();
    }

    pub fn len(&self) -> usize {
        self.tables.read().leaves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn index(&self) -> &TextIndex<String> {
        &self.index
    }

    pub fn stats(&self) -> IndexStats {
        let nodes = self.index.node_count();
        IndexStats {
            leaves: self.len(),
            words: self.index.len(),
            nodes,
            cached_queries: self.index.cached_queries(),
            estimated_bytes: (nodes * std::mem::size_of::<Node<String>>()) as u64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ItemEntry, PageEntry, SectionEntry, SynonymEntry};

    fn spec(id: &str, text: &str, priority: Option<i32>) -> LeafSpec {
        LeafSpec {
            id: id.to_string(),
            text: text.to_string(),
            page: "Mail".to_string(),
            section: "Compose".to_string(),
            selector: format!("#{id}"),
            priority,
        }
    }

    #[test]
    fn add_and_search_sorted_by_priority() {
        let c = Catalog::new();
        c.add(spec("mail/format", "Mail format", None)).unwrap();
        c.add(spec("mail/signature", "Mail signature", Some(1))).unwrap();

        let ids: Vec<String> = c.search("mail").into_iter().map(|l| l.id).collect();
        assert_eq!(ids, vec!["mail/signature", "mail/format"]);
        assert_eq!(c.get_setting("mail/format").unwrap().priority, DEFAULT_PRIORITY);
        assert_eq!(c.text("mail/signature").as_deref(), Some("Mail signature"));
    }

    #[test]
    fn duplicates_are_rejected_and_first_wins() {
        let c = Catalog::new();
        c.add(spec("a", "Alpha", None)).unwrap();
        assert_eq!(
            c.add(spec("a", "Other", None)),
            Err(CatalogError::Duplicate("a".to_string()))
        );
        assert_eq!(c.get_setting("a").unwrap().text, "Alpha");
        assert!(c.search_for_ids("other").is_empty());
    }

    #[test]
    fn non_configurable_items_are_skipped() {
        let c = Catalog::new();
        c.set_configurable([("hidden".to_string(), false), ("shown".to_string(), true)]);
        assert!(!c.is_configurable("hidden"));
        assert!(c.is_configurable("shown"));
        assert!(c.is_configurable("never-mentioned"));

        assert_eq!(c.add(spec("hidden", "Secret", None)), Ok(false));
        assert!(c.get_setting("hidden").is_none());
        assert!(c.search("secret").is_empty());
    }

    #[test]
    fn synonyms_and_explanations_point_to_existing_leaf() {
        let c = Catalog::new();
        c.add(spec("mail/vacation", "Vacation notice", None)).unwrap();
        c.add_synonym("mail/vacation", "mail/vacation_AUTO", "Auto reply").unwrap();
        assert_eq!(
            c.add_explanations([(
                "mail/vacation".to_string(),
                "Answer incoming messages while away".to_string()
            )]),
            0
        );

        assert_eq!(c.search_for_ids("auto"), vec!["mail/vacation"]);
        assert_eq!(c.search_for_ids("incoming away"), vec!["mail/vacation"]);
        assert_eq!(c.text("mail/vacation_AUTO").as_deref(), Some("Auto reply"));
        assert!(c.text("mail/vacation_EXPLANATION").is_some());

        assert_eq!(
            c.add_synonym("nope", "nope_X", "x"),
            Err(CatalogError::Unknown("nope".to_string()))
        );
    }

    #[test]
    fn add_text_is_not_searchable() {
        let c = Catalog::new();
        c.add_text("label/ok", "Okay").unwrap();
        assert!(c.add_text("label/ok", "Again").is_err());
        assert_eq!(c.text("label/ok").as_deref(), Some("Okay"));
        assert!(c.search_for_ids("okay").is_empty());
    }

    #[test]
    fn from_config_and_reset() {
        let cfg = CatalogConfig {
            configurable: [("calendar/hidden".to_string(), false)].into_iter().collect(),
            pages: vec![PageEntry {
                id: "settings/calendar".to_string(),
                text: "Calendar".to_string(),
                selector: String::new(),
            }],
            sections: vec![SectionEntry {
                page: "Calendar".to_string(),
                section: "Reminders".to_string(),
                items: vec![
                    ItemEntry {
                        id: "calendar/reminder".to_string(),
                        text: "Default reminder".to_string(),
                        selector: "#rem".to_string(),
                        priority: Some(2),
                    },
                    ItemEntry {
                        id: "calendar/hidden".to_string(),
                        text: "Hidden calendar option".to_string(),
                        selector: String::new(),
                        priority: None,
                    },
                ],
            }],
            synonyms: vec![SynonymEntry {
                id: "calendar/reminder".to_string(),
                synonym_id: "calendar/reminder_ALARM".to_string(),
                text: "Alarm".to_string(),
            }],
            explanations: Default::default(),
        };

        let c = Catalog::from_config(&cfg);
        assert_eq!(c.len(), 2);
        let page = c.get_setting("settings/calendar").unwrap();
        assert_eq!(page.page, "Calendar");
        assert_eq!(page.section, "");

        let hits: Vec<String> = c.search("cal").into_iter().map(|l| l.id).collect();
        assert_eq!(hits, vec!["settings/calendar"]);
        assert_eq!(c.search("alarm")[0].section, "Reminders");

        let stats = c.stats();
        assert_eq!(stats.leaves, 2);
        assert!(stats.words >= 3);
        assert_eq!(stats.cached_queries, 2);

        c.reset();
        assert!(c.is_empty());
        assert!(c.search("alarm").is_empty());
    }
}
