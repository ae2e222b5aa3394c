use super::require;
use crate::error::{Result, StoreError};
use crate::models::{Contact, User};
use crate::xml_manager::XmlManager;
use std::sync::Arc;
use tracing::info;

#[derive(Clone)]
pub struct ContactRepository {
    xml: Arc<XmlManager>,
}

impl ContactRepository {
    pub fn new(xml: Arc<XmlManager>) -> Self {
        Self { xml }
    }

    /// Store `owner -> contact` and, if missing, the reverse entry.
    ///
    /// Both users must exist. An existing `owner -> contact` entry is a
    /// conflict; an existing reverse entry is kept as is.
    pub async fn create_pair(
        &self,
        owner_id: &str,
        contact_id: &str,
        name: &str,
        reverse_name: &str,
    ) -> Result<Contact> {
        let contact = self
            .xml
            .write(|doc| {
                require::<User>(doc, owner_id)?;
                require::<User>(doc, contact_id)?;

                let existing: Vec<Contact> = doc.find(|c: &Contact| c.links(owner_id, contact_id))?;
                if existing.iter().any(|c| c.user_id == owner_id) {
                    return Err(StoreError::Conflict(format!(
                        "{} is already a contact of {}",
                        contact_id, owner_id
                    )));
                }

                let contact = Contact::new(owner_id, contact_id, name);
                doc.insert(&contact)?;
                if existing.is_empty() {
                    doc.insert(&Contact::new(contact_id, owner_id, reverse_name))?;
                }
                Ok(contact)
            })
            .await?;

        info!("[Contacts] Linked {} <-> {}", owner_id, contact_id);
        Ok(contact)
    }

    /// Entries in one user's address book, in insertion order.
    pub async fn find_by_owner(&self, owner_id: &str) -> Result<Vec<Contact>> {
        self.find_where(|c| c.user_id == owner_id).await
    }

    /// The `owner -> contact` entry, if any.
    pub async fn find_between(&self, owner_id: &str, contact_id: &str) -> Result<Option<Contact>> {
        self.xml
            .read(|doc| {
                doc.find_one(|c: &Contact| c.user_id == owner_id && c.contact_user_id == contact_id)
            })
            .await
    }

    pub async fn find_where<P>(&self, predicate: P) -> Result<Vec<Contact>>
    where
        P: Fn(&Contact) -> bool,
    {
        self.xml.read(|doc| doc.find(predicate)).await
    }

    pub async fn update(&self, contact: &Contact) -> Result<()> {
        self.xml.write(|doc| doc.update(contact)).await
    }

    /// Remove the entries linking two users in both directions.
    ///
    /// Fails with `NotFound` when `owner` has no entry for `contact`.
    pub async fn delete_pair(&self, owner_id: &str, contact_id: &str) -> Result<usize> {
        let removed = self
            .xml
            .write(|doc| {
                let owned = doc.find_one(|c: &Contact| {
                    c.user_id == owner_id && c.contact_user_id == contact_id
                })?;
                if owned.is_none() {
                    return Err(StoreError::not_found("contact", contact_id));
                }
                Ok(doc
                    .remove_where(|c: &Contact| c.links(owner_id, contact_id))?
                    .len())
            })
            .await?;

        info!("[Contacts] Unlinked {} <-> {}", owner_id, contact_id);
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::UserRepository;
    use crate::schema::Schema;
    use tempfile::TempDir;

    async fn setup(dir: &TempDir) -> (ContactRepository, User, User) {
        let xml = Arc::new(
            XmlManager::open(dir.path().join("chat.xml"), Schema::builtin().unwrap())
                .await
                .unwrap(),
        );
        let users = UserRepository::new(xml.clone());
        let ada = User::new("Ada", "ada@example.com");
        let bob = User::new("Bob", "bob@example.com");
        users.create(&ada).await.unwrap();
        users.create(&bob).await.unwrap();
        (ContactRepository::new(xml), ada, bob)
    }

    #[tokio::test]
    async fn test_create_pair_stores_both_directions() {
        let dir = TempDir::new().unwrap();
        let (contacts, ada, bob) = setup(&dir).await;

        let created = contacts
            .create_pair(&ada.id, &bob.id, "Bobby", "Ada")
            .await
            .unwrap();
        assert_eq!(created.name, "Bobby");

        let reverse = contacts.find_between(&bob.id, &ada.id).await.unwrap().unwrap();
        assert_eq!(reverse.name, "Ada");
        assert_eq!(contacts.find_by_owner(&ada.id).await.unwrap(), vec![created]);

        let err = contacts
            .create_pair(&ada.id, &bob.id, "Bob", "Ada")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_create_pair_keeps_existing_reverse() {
        let dir = TempDir::new().unwrap();
        let (contacts, ada, bob) = setup(&dir).await;

        let one_sided = Contact::new(&bob.id, &ada.id, "Ada L.");
        contacts
            .xml
            .write(|doc| doc.insert(&one_sided))
            .await
            .unwrap();

        contacts.create_pair(&ada.id, &bob.id, "Bob", "Ada").await.unwrap();
        assert_eq!(
            contacts.find_between(&bob.id, &ada.id).await.unwrap(),
            Some(one_sided)
        );
        assert_eq!(contacts.find_where(|_| true).await.unwrap().len(), 2);

        let mut renamed = contacts.find_between(&ada.id, &bob.id).await.unwrap().unwrap();
        renamed.name = "Robert".into();
        contacts.update(&renamed).await.unwrap();
        assert_eq!(
            contacts.find_between(&ada.id, &bob.id).await.unwrap().unwrap().name,
            "Robert"
        );
    }

    #[tokio::test]
    async fn test_unknown_users_and_missing_pair() {
        let dir = TempDir::new().unwrap();
        let (contacts, ada, bob) = setup(&dir).await;

        let err = contacts
            .create_pair(&ada.id, "usr_missing", "Ghost", "Ada")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { kind: "user", .. }));

        let err = contacts.delete_pair(&ada.id, &bob.id).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { kind: "contact", .. }));

        contacts.create_pair(&ada.id, &bob.id, "Bob", "Ada").await.unwrap();
        assert_eq!(contacts.delete_pair(&bob.id, &ada.id).await.unwrap(), 2);
        assert!(contacts.find_where(|_| true).await.unwrap().is_empty());
    }
}
