//! The shared chat document and typed scans over its collections.
//!
//! Every query is a linear scan of one collection; updates replace the
//! record element in place so document order is preserved.

use crate::element::Element;
use crate::error::{Result, StoreError};
use crate::models::{Contact, Entity, Group, Message, User};
use serde::Serialize;

/// Name of the document element.
pub const ROOT: &str = "chat";

/// Collections in the order the schema requires them.
pub const COLLECTIONS: [&str; 4] = [
    User::COLLECTION,
    Contact::COLLECTION,
    Group::COLLECTION,
    Message::COLLECTION,
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    root: Element,
}

/// Record counts per collection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DocumentStats {
    pub users: usize,
    pub contacts: usize,
    pub groups: usize,
    pub messages: usize,
}

impl Document {
    /// An empty document with all collections present.
    pub fn skeleton() -> Self {
        let root = COLLECTIONS
            .iter()
            .fold(Element::new(ROOT), |acc, name| acc.with_child(Element::new(*name)));
        Self { root }
    }

    pub fn from_root(root: Element) -> Self {
        Self { root }
    }

    pub fn parse(xml: &str) -> Result<Self> {
        Element::parse(xml).map(Self::from_root)
    }

    pub fn to_xml(&self) -> Result<String> {
        self.root.to_xml()
    }

    pub fn root(&self) -> &Element {
        &self.root
    }

    fn collection(&self, name: &str) -> Result<&Element> {
        self.root
            .child(name)
            .ok_or_else(|| StoreError::malformed(ROOT, format!("missing <{}> collection", name)))
    }

    fn collection_mut(&mut self, name: &str) -> Result<&mut Element> {
        let collection = self
            .root
            .child_mut(name)
            .ok_or_else(|| StoreError::malformed(ROOT, format!("missing <{}> collection", name)))?;
        // Leftover indentation from a hand-edited empty collection.
        collection.text = None;
        Ok(collection)
    }

    fn records<E: Entity>(&self) -> Result<impl Iterator<Item = &Element>> {
        Ok(self.collection(E::COLLECTION)?.children_named(E::ELEMENT))
    }

    /// Every record of a collection, in document order.
    pub fn all<E: Entity>(&self) -> Result<Vec<E>> {
        self.records::<E>()?.map(E::from_element).collect()
    }

    /// Records matching a predicate, in document order.
    pub fn find<E, P>(&self, predicate: P) -> Result<Vec<E>>
    where
        E: Entity,
        P: Fn(&E) -> bool,
    {
        let mut found = Vec::new();
        for el in self.records::<E>()? {
            let record = E::from_element(el)?;
            if predicate(&record) {
                found.push(record);
            }
        }
        Ok(found)
    }

    /// First record matching a predicate.
    pub fn find_one<E, P>(&self, predicate: P) -> Result<Option<E>>
    where
        E: Entity,
        P: Fn(&E) -> bool,
    {
        for el in self.records::<E>()? {
            let record = E::from_element(el)?;
            if predicate(&record) {
                return Ok(Some(record));
            }
        }
        Ok(None)
    }

    /// Record by its `id` attribute.
    pub fn get<E: Entity>(&self, id: &str) -> Result<Option<E>> {
        self.records::<E>()?
            .find(|el| el.attr("id") == Some(id))
            .map(E::from_element)
            .transpose()
    }

    pub fn contains<E: Entity>(&self, id: &str) -> Result<bool> {
        Ok(self.records::<E>()?.any(|el| el.attr("id") == Some(id)))
    }

    pub fn count<E: Entity>(&self) -> Result<usize> {
        Ok(self.records::<E>()?.count())
    }

    /// Appends a record; an existing id is an error.
    pub fn insert<E: Entity>(&mut self, record: &E) -> Result<()> {
        if self.contains::<E>(record.id())? {
            return Err(StoreError::Duplicate {
                kind: E::KIND,
                id: record.id().to_string(),
            });
        }
        self.collection_mut(E::COLLECTION)?
            .children
            .push(record.to_element());
        Ok(())
    }

    /// Replaces the record with the same id in place.
    pub fn update<E: Entity>(&mut self, record: &E) -> Result<()> {
        let collection = self.collection_mut(E::COLLECTION)?;
        let slot = collection
            .children
            .iter_mut()
            .find(|el| el.name == E::ELEMENT && el.attr("id") == Some(record.id()))
            .ok_or_else(|| StoreError::not_found(E::KIND, record.id()))?;
        *slot = record.to_element();
        Ok(())
    }

    /// Removes a record by id; returns it if it existed.
    pub fn remove<E: Entity>(&mut self, id: &str) -> Result<Option<E>> {
        let collection = self.collection_mut(E::COLLECTION)?;
        let Some(idx) = collection
            .children
            .iter()
            .position(|el| el.name == E::ELEMENT && el.attr("id") == Some(id))
        else {
            return Ok(None);
        };
        let removed = collection.children.remove(idx);
        E::from_element(&removed).map(Some)
    }

    /// Removes every record matching a predicate and returns them.
    pub fn remove_where<E, P>(&mut self, predicate: P) -> Result<Vec<E>>
    where
        E: Entity,
        P: Fn(&E) -> bool,
    {
        let collection = self.collection_mut(E::COLLECTION)?;
        let mut keep = Vec::with_capacity(collection.children.len());
        let mut removed = Vec::new();

        // Decide everything first so a malformed record leaves the collection intact.
        for el in &collection.children {
            if el.name == E::ELEMENT {
                let record = E::from_element(el)?;
                if predicate(&record) {
                    removed.push(record);
                    keep.push(false);
                    continue;
                }
            }
            keep.push(true);
        }

        let mut flags = keep.into_iter();
        collection.children.retain(|_| flags.next().unwrap_or(true));
        Ok(removed)
    }

    pub fn stats(&self) -> Result<DocumentStats> {
        Ok(DocumentStats {
            users: self.count::<User>()?,
            contacts: self.count::<Contact>()?,
            groups: self.count::<Group>()?,
            messages: self.count::<Message>()?,
        })
    }
}
