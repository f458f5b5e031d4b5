//! In-memory projections of the photo cache
//!
//! Three views (paged list, favorites, search results) plus the favorite-id
//! set they are annotated from. All of them change under one lock and are
//! published on watch channels before the lock is released, so every
//! subscriber observes updates in the order they were applied.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;

use crate::state::PhotoRecord;

pub type ViewSnapshot = Arc<Vec<PhotoRecord>>;

#[derive(Debug, Default)]
pub struct ViewState {
    all_photos: Vec<PhotoRecord>,
    favorites: Vec<PhotoRecord>,
    search_results: Vec<PhotoRecord>,
    favorite_ids: HashSet<String>,
    dirty_all: bool,
    dirty_favorites: bool,
    dirty_search: bool,
}

impl ViewState {
    pub fn all_photos(&self) -> &[PhotoRecord] {
        &self.all_photos
    }

    pub fn favorites(&self) -> &[PhotoRecord] {
        &self.favorites
    }

    pub fn search_results(&self) -> &[PhotoRecord] {
        &self.search_results
    }

    pub fn is_favorite(&self, id: &str) -> bool {
        self.favorite_ids.contains(id)
    }

    fn annotate(&self, records: Vec<PhotoRecord>) -> Vec<PhotoRecord> {
        records
            .into_iter()
            .map(|photo| {
                let is_favorite = self.favorite_ids.contains(&photo.id);
                photo.with_favorite(is_favorite)
            })
            .collect()
    }

    /// Replace the paged list wholesale
    pub fn replace_all(&mut self, records: Vec<PhotoRecord>) {
        self.all_photos = self.annotate(records);
        self.dirty_all = true;
    }

    /// Append a page; ids already listed are replaced where they stand
    pub fn append_page(&mut self, records: Vec<PhotoRecord>) {
        for photo in self.annotate(records) {
            match self.all_photos.iter_mut().find(|p| p.id == photo.id) {
                Some(existing) => *existing = photo,
                None => self.all_photos.push(photo),
            }
        }
        self.dirty_all = true;
    }

    pub fn clear_pages(&mut self) {
        self.all_photos.clear();
        self.dirty_all = true;
    }

    /// Install the store's favorites and bring the other views in line
    pub fn set_favorites(&mut self, favorites: Vec<PhotoRecord>) {
        self.favorite_ids = favorites.iter().map(|p| p.id.clone()).collect();
        self.favorites = favorites
            .into_iter()
            .map(|photo| photo.with_favorite(true))
            .collect();
        self.dirty_favorites = true;

        for photo in self.all_photos.iter_mut().chain(self.search_results.iter_mut()) {
            let is_favorite = self.favorite_ids.contains(&photo.id);
            if photo.is_favorite != is_favorite {
                photo.is_favorite = is_favorite;
                self.dirty_all = true;
                self.dirty_search = true;
            }
        }
    }

    /// Flip one record in place in the paged list and the search results
    pub fn patch_favorite(&mut self, id: &str, is_favorite: bool) {
        if is_favorite {
            self.favorite_ids.insert(id.to_string());
        } else {
            self.favorite_ids.remove(id);
        }

        if let Some(photo) = self.all_photos.iter_mut().find(|p| p.id == id) {
            photo.is_favorite = is_favorite;
            self.dirty_all = true;
        }
        if let Some(photo) = self.search_results.iter_mut().find(|p| p.id == id) {
            photo.is_favorite = is_favorite;
            self.dirty_search = true;
        }
    }

    pub fn set_search_results(&mut self, results: Vec<PhotoRecord>) {
        self.search_results = self.annotate(results);
        self.dirty_search = true;
    }
}

/// Owner of the view state and its watch channels
pub struct Views {
    state: Mutex<ViewState>,
    all_photos: watch::Sender<ViewSnapshot>,
    favorites: watch::Sender<ViewSnapshot>,
    search_results: watch::Sender<ViewSnapshot>,
}

impl Views {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ViewState::default()),
            all_photos: watch::channel(ViewSnapshot::default()).0,
            favorites: watch::channel(ViewSnapshot::default()).0,
            search_results: watch::channel(ViewSnapshot::default()).0,
        }
    }

    fn lock(&self) -> MutexGuard<'_, ViewState> {
        // A panicking reader cannot leave the vectors half-written
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Mutate the state, then publish whatever changed while still locked
    pub fn update<R>(&self, f: impl FnOnce(&mut ViewState) -> R) -> R {
        let mut state = self.lock();
        let result = f(&mut state);

        if std::mem::take(&mut state.dirty_all) {
            self.all_photos.send_replace(Arc::new(state.all_photos.clone()));
        }
        if std::mem::take(&mut state.dirty_favorites) {
            self.favorites.send_replace(Arc::new(state.favorites.clone()));
        }
        if std::mem::take(&mut state.dirty_search) {
            self.search_results.send_replace(Arc::new(state.search_results.clone()));
        }
        result
    }

    pub fn read<R>(&self, f: impl FnOnce(&ViewState) -> R) -> R {
        f(&self.lock())
    }

    pub fn subscribe_all_photos(&self) -> watch::Receiver<ViewSnapshot> {
        self.all_photos.subscribe()
    }

    pub fn subscribe_favorites(&self) -> watch::Receiver<ViewSnapshot> {
        self.favorites.subscribe()
    }

    pub fn subscribe_search_results(&self) -> watch::Receiver<ViewSnapshot> {
        self.search_results.subscribe()
    }
}

impl Default for Views {
    fn default() -> Self {
        Self::new()
    }
}
