use log::debug;
use serde_json::Value as Json;
use std::collections::HashMap;

use crate::error::{HermsError, Result};
use crate::logic::Query;
use crate::model::TagId;

/// A node of the tag forest.
#[derive(Debug, Clone)]
pub struct Tag {
    pub name: String,
    pub id: TagId,
    pub parent: Option<TagId>,
    /// Children in creation order.
    pub children: Vec<TagId>,
    pub description: String,
    pub is_abstract: bool,
    /// Derived membership condition. It is bound on refresh but does not take
    /// part in `isa` or `matches`.
    pub expression: Option<Query>,
}

/// Forest of tags plus the leaf-name index.
///
/// Removed tags leave a hole in the arena so handles are never reused.
#[derive(Debug, Clone, Default)]
pub struct TagForest {
    arena: Vec<Option<Tag>>,
    roots: Vec<TagId>,
    names: HashMap<String, Vec<TagId>>,
}

impl TagForest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: TagId) -> Option<&Tag> {
        self.arena.get(id.0).and_then(|t| t.as_ref())
    }

    pub fn get_mut(&mut self, id: TagId) -> Option<&mut Tag> {
        self.arena.get_mut(id.0).and_then(|t| t.as_mut())
    }

    pub fn roots(&self) -> &[TagId] {
        &self.roots
    }

    pub fn len(&self) -> usize {
        self.arena.iter().filter(|t| t.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&mut self) {
        self.arena.clear();
        self.roots.clear();
        self.names.clear();
    }

    /// Child of `parent` (or root when `None`) with the given name.
    pub fn child(&self, parent: Option<TagId>, name: &str) -> Option<TagId> {
        let siblings = match parent {
            Some(p) => &self.get(p)?.children,
            None => &self.roots,
        };
        siblings
            .iter()
            .copied()
            .find(|id| self.get(*id).map(|t| t.name == name).unwrap_or(false))
    }

    /// Create a tag under `parent`. An existing sibling with the same name is
    /// returned as is.
    pub fn add(&mut self, parent: Option<TagId>, name: &str) -> Result<TagId> {
        if name.is_empty() || name.contains('.') {
            return Err(HermsError::schema(format!("invalid tag name '{}'", name)));
        }
        if let Some(existing) = self.child(parent, name) {
            return Ok(existing);
        }
        let id = TagId(self.arena.len());
        match parent {
            Some(p) => self
                .get_mut(p)
                .ok_or_else(|| HermsError::not_found("tag", format!("#{}", p.0)))?
                .children
                .push(id),
            None => self.roots.push(id),
        }
        self.arena.push(Some(Tag {
            name: name.to_string(),
            id,
            parent,
            children: Vec::new(),
            description: String::new(),
            is_abstract: false,
            expression: None,
        }));
        self.names.entry(name.to_string()).or_default().push(id);
        Ok(id)
    }

    /// Remove a tag and its subtree. Returns the removed handles.
    pub fn remove(&mut self, id: TagId) -> Vec<TagId> {
        let removed = self.walk(id);
        if removed.is_empty() {
            return removed;
        }
        match self.get(id).and_then(|t| t.parent) {
            Some(parent) => {
                if let Some(p) = self.get_mut(parent) {
                    p.children.retain(|c| *c != id);
                }
            }
            None => self.roots.retain(|r| *r != id),
        }
        for tid in &removed {
            if let Some(tag) = self.arena[tid.0].take() {
                if let Some(list) = self.names.get_mut(&tag.name) {
                    list.retain(|x| x != tid);
                    if list.is_empty() {
                        self.names.remove(&tag.name);
                    }
                }
            }
        }
        removed
    }

    /// Ancestor path from the root down to `id`.
    pub fn path(&self, id: TagId) -> Vec<&str> {
        let mut names = Vec::new();
        let mut cur = self.get(id);
        while let Some(tag) = cur {
            names.push(tag.name.as_str());
            cur = tag.parent.and_then(|p| self.get(p));
        }
        names.reverse();
        names
    }

    /// Dot-joined ancestor path.
    pub fn abs_name(&self, id: TagId) -> String {
        self.path(id).join(".")
    }

    /// True iff `names` is exactly the absolute path of `id`.
    pub fn matches(&self, id: TagId, names: &str) -> bool {
        let path = self.path(id);
        !path.is_empty() && names.split('.').eq(path.iter().copied())
    }

    fn ends_with(&self, id: TagId, parts: &[&str]) -> bool {
        let path = self.path(id);
        path.len() >= parts.len() && path[path.len() - parts.len()..] == *parts
    }

    /// True when `target` is `id` or one of its ancestors.
    pub fn isa(&self, id: TagId, target: TagId) -> bool {
        let mut cur = Some(id);
        while let Some(t) = cur {
            if t == target {
                return true;
            }
            cur = self.get(t).and_then(|tag| tag.parent);
        }
        false
    }

    /// `id` followed by all its descendants, depth first.
    pub fn walk(&self, id: TagId) -> Vec<TagId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(t) = stack.pop() {
            if let Some(tag) = self.get(t) {
                out.push(t);
                stack.extend(tag.children.iter().rev().copied());
            }
        }
        out
    }

    /// Every tag, depth first over the roots in creation order.
    pub fn all(&self) -> Vec<TagId> {
        self.roots.iter().flat_map(|r| self.walk(*r)).collect()
    }

    /// Every tag whose path ends with `name` (`leaf` or `cat.leaf`), in
    /// creation order.
    pub fn candidates(&self, name: &str) -> Vec<TagId> {
        let parts: Vec<&str> = name.split('.').collect();
        let Some(leaf) = parts.last() else {
            return Vec::new();
        };
        self.names
            .get(*leaf)
            .map(|ids| {
                ids.iter()
                    .copied()
                    .filter(|id| self.ends_with(*id, &parts))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Find a tag by leaf name, optionally qualified by its ancestors
    /// (`cat.leaf`). Several tags sharing a leaf name are told apart by the
    /// qualifier; if it still leaves several, the first in creation order
    /// wins.
    pub fn lookup(&self, name: &str) -> Option<TagId> {
        let candidates = self.candidates(name);
        if candidates.len() > 1 {
            debug!(
                "Tag name '{}' is ambiguous ({} tags), using {}",
                name,
                candidates.len(),
                self.abs_name(candidates[0])
            );
        }
        candidates.first().copied()
    }

    /// Like [`lookup`](Self::lookup) but only below `namespace`.
    pub fn lookup_under(&self, namespace: TagId, name: &str) -> Option<TagId> {
        let parts: Vec<&str> = name.split('.').collect();
        let leaf = parts.last()?;
        self.names.get(*leaf)?.iter().copied().find(|id| {
            *id != namespace && self.isa(*id, namespace) && self.ends_with(*id, &parts)
        })
    }

    /// Find a tag, creating it (and any missing ancestors of a dotted name)
    /// when it does not exist.
    pub fn tag_or_create(&mut self, name: &str, parent: Option<TagId>) -> Result<TagId> {
        let found = match parent {
            Some(p) => self.lookup_under(p, name),
            None => self.lookup(name),
        };
        if let Some(id) = found {
            return Ok(id);
        }
        let mut cur = parent;
        for part in name.split('.') {
            cur = Some(self.add(cur, part)?);
        }
        cur.ok_or_else(|| HermsError::schema("empty tag name"))
    }

    /// Create tags from configuration: either a list of names, or a map from
    /// name to a description string or a tag object
    /// (`abstract`, `description`, `expression`, `children`).
    pub fn configure(&mut self, parent: Option<TagId>, config: &Json) -> Result<Vec<TagId>> {
        let mut created = Vec::new();
        match config {
            Json::Null => {}
            Json::Array(items) => {
                for item in items {
                    let name = item.as_str().ok_or_else(|| {
                        HermsError::schema(format!("tag list entry {} is not a string", item))
                    })?;
                    created.push(self.add(parent, name)?);
                }
            }
            Json::Object(entries) => {
                for (name, entry) in entries {
                    let id = self.add(parent, name)?;
                    created.push(id);
                    match entry {
                        Json::Null => {}
                        Json::String(description) => {
                            if let Some(tag) = self.get_mut(id) {
                                tag.description = description.clone();
                            }
                        }
                        Json::Object(fields) => {
                            if let Some(tag) = self.get_mut(id) {
                                tag.is_abstract = fields
                                    .get("abstract")
                                    .and_then(Json::as_bool)
                                    .unwrap_or(false);
                                tag.description = fields
                                    .get("description")
                                    .and_then(Json::as_str)
                                    .unwrap_or_default()
                                    .to_string();
                                tag.expression = fields
                                    .get("expression")
                                    .and_then(Json::as_str)
                                    .map(Query::parse)
                                    .transpose()?;
                            }
                            if let Some(children) = fields.get("children") {
                                created.extend(self.configure(Some(id), children)?);
                            }
                        }
                        other => {
                            return Err(HermsError::schema(format!(
                                "tag '{}': unexpected configuration {}",
                                name, other
                            )))
                        }
                    }
                }
            }
            other => {
                return Err(HermsError::schema(format!(
                    "tags must be a list or an object, got {}",
                    other
                )))
            }
        }
        Ok(created)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn forest() -> TagForest {
        let mut forest = TagForest::new();
        forest
            .configure(
                None,
                &json!({
                    "tag1": "test tag 1",
                    "tagcat": {"children": ["t1", "t2", "t3"]},
                    "other": {"children": {"t2": {"children": ["deep"]}}}
                }),
            )
            .unwrap();
        forest
    }

    #[test]
    fn test_abs_name_and_match() {
        let forest = forest();
        let t2 = forest.lookup("tagcat.t2").unwrap();
        assert_eq!(forest.abs_name(t2), "tagcat.t2");
        assert!(forest.matches(t2, "tagcat.t2"));
        assert!(!forest.matches(t2, "t2"));
        assert!(!forest.matches(t2, "other.t2"));
        assert!(!forest.matches(t2, "x.tagcat.t2"));
        assert_eq!(
            forest.get(forest.lookup("tag1").unwrap()).unwrap().description,
            "test tag 1"
        );
    }

    #[test]
    fn test_ambiguous_leaf_resolved_by_qualifier() {
        let forest = forest();
        let first = forest.lookup("t2").unwrap();
        assert_eq!(forest.abs_name(first), "tagcat.t2");
        let other = forest.lookup("other.t2").unwrap();
        assert_eq!(forest.abs_name(other), "other.t2");
        assert!(forest.lookup("nothere.t2").is_none());
        assert!(forest.lookup("deep").is_some());

        // the bare leaf stays ambiguous; lookup takes the earliest
        assert_eq!(forest.candidates("t2"), vec![first, other]);
        assert_eq!(forest.candidates("other.t2"), vec![other]);
        assert!(forest.candidates("nothere").is_empty());
    }

    #[test]
    fn test_isa_walks_ancestors() {
        let forest = forest();
        let deep = forest.lookup("deep").unwrap();
        let other = forest.lookup("other").unwrap();
        let ot2 = forest.lookup("other.t2").unwrap();
        let tagcat = forest.lookup("tagcat").unwrap();
        assert!(forest.isa(deep, ot2));
        assert!(forest.isa(deep, other));
        assert!(forest.isa(deep, deep));
        assert!(!forest.isa(deep, tagcat));
        assert!(!forest.isa(other, deep));
    }

    #[test]
    fn test_lookup_under_namespace() {
        let forest = forest();
        let tagcat = forest.lookup("tagcat").unwrap();
        let other = forest.lookup("other").unwrap();
        let t2 = forest.lookup_under(other, "t2").unwrap();
        assert_eq!(forest.abs_name(t2), "other.t2");
        assert!(forest.lookup_under(tagcat, "deep").is_none());
    }

    #[test]
    fn test_remove_subtree_unregisters_names() {
        let mut forest = forest();
        let other = forest.lookup("other").unwrap();
        let removed = forest.remove(other);
        assert_eq!(removed.len(), 3);
        assert!(forest.lookup("deep").is_none());
        assert!(forest.lookup("other.t2").is_none());
        assert!(forest.lookup("t2").is_some());
        assert_eq!(forest.roots().len(), 2);
        assert!(forest.get(other).is_none());
    }

    #[test]
    fn test_tag_or_create_dotted() {
        let mut forest = forest();
        let before = forest.len();
        let id = forest.tag_or_create("new.sub", None).unwrap();
        assert_eq!(forest.abs_name(id), "new.sub");
        assert_eq!(forest.len(), before + 2);
        assert_eq!(forest.tag_or_create("new.sub", None).unwrap(), id);
        assert_eq!(forest.tag_or_create("t1", None).unwrap(), forest.lookup("t1").unwrap());
    }

    #[test]
    fn test_walk_order() {
        let forest = forest();
        let names: Vec<String> = forest.all().into_iter().map(|t| forest.abs_name(t)).collect();
        assert_eq!(
            names,
            vec![
                "tag1",
                "tagcat",
                "tagcat.t1",
                "tagcat.t2",
                "tagcat.t3",
                "other",
                "other.t2",
                "other.t2.deep"
            ]
        );
    }
}
