//! Favorite Storage - per-user, per-album favorite sets
//!
//! Favorites are private to one user on one device. Each (user, album) pair
//! maps to a set of media ids serialized with postcard.

use std::collections::BTreeSet;

use crate::error::AlbumError;
use crate::types::{AlbumId, MediaId, UserId};
use redb::{ReadableTable, TableDefinition};

use super::Storage;

/// Table for favorite sets (key: "{user}::{album}", value: serialized id list)
pub(crate) const FAVORITES_TABLE: TableDefinition<&str, &[u8]> =
    TableDefinition::new("favorites");

/// Set of favorite media ids for one (user, album)
pub type FavoriteSet = BTreeSet<MediaId>;

/// Key combining user and album
pub fn favorites_key(user: &UserId, album: &AlbumId) -> String {
    format!("{}::{}", user, album.doc_key())
}

impl Storage {
    // ═══════════════════════════════════════════════════════════════════════
    // Favorite Operations
    // ═══════════════════════════════════════════════════════════════════════

    /// Load the favorite set for a user in an album.
    ///
    /// Returns an empty set if nothing was stored yet.
    pub fn load_favorites(&self, user: &UserId, album: &AlbumId) -> Result<FavoriteSet, AlbumError> {
        let db = self.db_handle();
        let db_guard = db.read();
        let read_txn = db_guard.begin_read()?;
        let table = read_txn.open_table(FAVORITES_TABLE)?;
        let key = favorites_key(user, album);

        match table.get(key.as_str())? {
            Some(data) => {
                let ids: Vec<MediaId> = postcard::from_bytes(data.value())
                    .map_err(|e| AlbumError::Serialization(e.to_string()))?;
                Ok(ids.into_iter().collect())
            }
            None => Ok(FavoriteSet::new()),
        }
    }

    /// Replace the favorite set for a user in an album.
    ///
    /// An empty set removes the entry.
    pub fn save_favorites(
        &self,
        user: &UserId,
        album: &AlbumId,
        favorites: &FavoriteSet,
    ) -> Result<(), AlbumError> {
        let db = self.db_handle();
        let db_guard = db.read();
        let write_txn = db_guard.begin_write()?;
        {
            let mut table = write_txn.open_table(FAVORITES_TABLE)?;
            let key = favorites_key(user, album);
            if favorites.is_empty() {
                table.remove(key.as_str())?;
            } else {
                let ids: Vec<&MediaId> = favorites.iter().collect();
                let serialized = postcard::to_allocvec(&ids)
                    .map_err(|e| AlbumError::Serialization(e.to_string()))?;
                table.insert(key.as_str(), serialized.as_slice())?;
            }
        }
        write_txn.commit()?;
        Ok(())
    }

    /// List every album id holding favorites for a user
    pub fn favorite_albums(&self, user: &UserId) -> Result<Vec<AlbumId>, AlbumError> {
        let db = self.db_handle();
        let db_guard = db.read();
        let read_txn = db_guard.begin_read()?;
        let table = read_txn.open_table(FAVORITES_TABLE)?;
        let prefix = format!("{}::", user);

        let mut albums = Vec::new();
        for entry in table.iter()? {
            let (key, _) = entry?;
            if let Some(raw) = key.value().strip_prefix(prefix.as_str()) {
                if let Ok(album) = AlbumId::from_string(raw) {
                    albums.push(album);
                }
            }
        }
        Ok(albums)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_storage() -> (Storage, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.redb");
        let storage = Storage::new(&db_path).unwrap();
        (storage, temp_dir)
    }

    #[test]
    fn test_missing_favorites_are_empty() {
        let (storage, _temp) = create_test_storage();
        let set = storage
            .load_favorites(&UserId::from("u1"), &AlbumId::new())
            .unwrap();
        assert!(set.is_empty());
    }

    #[test]
    fn test_save_and_load_favorites() {
        let (storage, _temp) = create_test_storage();
        let user = UserId::from("u1");
        let album = AlbumId::new();
        let set: FavoriteSet = [MediaId::new(), MediaId::new()].into_iter().collect();

        storage.save_favorites(&user, &album, &set).unwrap();
        assert_eq!(storage.load_favorites(&user, &album).unwrap(), set);
    }

    #[test]
    fn test_favorites_are_isolated_per_user_and_album() {
        let (storage, _temp) = create_test_storage();
        let album = AlbumId::new();
        let other_album = AlbumId::new();
        let item = MediaId::new();
        let set: FavoriteSet = [item].into_iter().collect();

        storage
            .save_favorites(&UserId::from("u1"), &album, &set)
            .unwrap();

        assert!(storage
            .load_favorites(&UserId::from("u2"), &album)
            .unwrap()
            .is_empty());
        assert!(storage
            .load_favorites(&UserId::from("u1"), &other_album)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_empty_set_removes_entry() {
        let (storage, _temp) = create_test_storage();
        let user = UserId::from("u1");
        let album = AlbumId::new();
        let set: FavoriteSet = [MediaId::new()].into_iter().collect();

        storage.save_favorites(&user, &album, &set).unwrap();
        assert_eq!(storage.favorite_albums(&user).unwrap(), vec![album]);

        storage
            .save_favorites(&user, &album, &FavoriteSet::new())
            .unwrap();
        assert!(storage.favorite_albums(&user).unwrap().is_empty());
    }

    #[test]
    fn test_favorites_survive_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("favorites.redb");
        let user = UserId::from("u1");
        let album = AlbumId::new();
        let set: FavoriteSet = [MediaId::new(), MediaId::new(), MediaId::new()]
            .into_iter()
            .collect();

        {
            let storage = Storage::new(&db_path).unwrap();
            storage.save_favorites(&user, &album, &set).unwrap();
        }

        let reopened = Storage::new(&db_path).unwrap();
        assert_eq!(reopened.load_favorites(&user, &album).unwrap(), set);
    }
}
