//! In-memory stores.
//!
//! Used when the server runs without a database (`ALLOW_DB_FAIL`) and by
//! the test suite. A save validates everything before touching state and
//! then applies under a single write lock, which gives the same
//! all-or-nothing behaviour as a database transaction.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::{
    resolve_publish_date, BlogDocument, BlogQuery, BlogStore, ConsultationQuery,
    ConsultationStore, MediaQuery, MediaStore, NewConsultation, NewMedia, PageDocument,
    PageQuery, PageStore, SavedVersion, StoreError,
};
use crate::db::models::{
    BlogPost, BlogVersionInfo, Consultation, ConsultationStatus, MediaFile, Page, PageDetail,
    PageVersionInfo, Section, SectionRow,
};
use crate::query::Paginated;

#[derive(Debug, Clone, Copy)]
struct SectionMediaLink {
    section_id: i64,
    file_version_id: i32,
    display_order: i32,
}

#[derive(Debug, Default)]
struct Inner {
    pages: Vec<Page>,
    sections: Vec<SectionRow>,
    section_media: Vec<SectionMediaLink>,
    posts: Vec<BlogPost>,
    consultations: Vec<Consultation>,
    media: HashMap<i32, MediaFile>,
    next_row_id: i64,
    next_page_id: i32,
    next_post_id: i32,
    next_page_version_id: i32,
    next_section_id: i64,
    next_consultation_id: i32,
    next_media_id: i32,
}

impl Inner {
    fn next_row_id(&mut self) -> i64 {
        self.next_row_id += 1;
        self.next_row_id
    }

    fn next_page_version_id(&mut self) -> i32 {
        self.next_page_version_id += 1;
        self.next_page_version_id
    }

    fn current_page(&self, page_id: i32) -> Option<&Page> {
        self.pages
            .iter()
            .filter(|p| p.page_id == page_id)
            .max_by_key(|p| p.version)
    }

    fn current_post(&self, post_id: i32) -> Option<&BlogPost> {
        self.posts
            .iter()
            .filter(|p| p.post_id == post_id)
            .max_by_key(|p| p.version)
    }

    fn current_pages(&self) -> Vec<&Page> {
        let mut latest: HashMap<i32, &Page> = HashMap::new();
        for page in &self.pages {
            match latest.get(&page.page_id) {
                Some(existing) if existing.version >= page.version => {}
                _ => {
                    latest.insert(page.page_id, page);
                }
            }
        }
        latest.into_values().collect()
    }

    fn current_posts(&self) -> Vec<&BlogPost> {
        let mut latest: HashMap<i32, &BlogPost> = HashMap::new();
        for post in &self.posts {
            match latest.get(&post.post_id) {
                Some(existing) if existing.version >= post.version => {}
                _ => {
                    latest.insert(post.post_id, post);
                }
            }
        }
        latest.into_values().collect()
    }

    fn check_url(&self, url: &str, own_family: Option<i32>) -> Result<(), StoreError> {
        let taken = self
            .pages
            .iter()
            .any(|p| p.url == url && Some(p.page_id) != own_family);
        if taken {
            return Err(StoreError::Conflict(format!(
                "URL '{}' is already used by another page",
                url
            )));
        }
        Ok(())
    }

    fn check_slug(&self, slug: &str, own_family: Option<i32>) -> Result<(), StoreError> {
        let taken = self
            .posts
            .iter()
            .any(|p| p.url_slug == slug && Some(p.post_id) != own_family);
        if taken {
            return Err(StoreError::Conflict(format!(
                "Slug '{}' is already used by another post",
                slug
            )));
        }
        Ok(())
    }

    fn check_media(&self, ids: impl IntoIterator<Item = i32>) -> Result<(), StoreError> {
        for id in ids {
            if !self.media.contains_key(&id) {
                return Err(StoreError::Invalid(format!("Media file {} does not exist", id)));
            }
        }
        Ok(())
    }

    fn append_page(
        &mut self,
        page_id: i32,
        version: i32,
        doc: &PageDocument,
        author: Option<i32>,
    ) -> SavedVersion {
        let page_version_id = self.next_page_version_id();
        let id = self.next_row_id();
        self.pages.push(Page {
            id,
            page_id,
            version,
            page_version_id,
            url: doc.url.clone(),
            title: doc.title.clone(),
            meta_title: doc.meta_title.clone(),
            meta_description: doc.meta_description.clone(),
            meta_keywords: doc.meta_keywords.clone(),
            parent_id: doc.parent_id,
            display_order: doc.display_order,
            is_published: doc.is_published,
            created_by: author,
            created_at: Utc::now(),
        });

        for (index, input) in doc.sections.iter().enumerate() {
            self.next_section_id += 1;
            let section_id = self.next_section_id;
            self.sections.push(SectionRow {
                section_id,
                page_version_id,
                section_type: input.section_type.clone(),
                name: input.name.clone(),
                content: input.content.clone(),
                display_order: index as i32,
                is_published: input.is_published,
            });
            for (position, file_version_id) in input.media.iter().enumerate() {
                self.section_media.push(SectionMediaLink {
                    section_id,
                    file_version_id: *file_version_id,
                    display_order: position as i32,
                });
            }
        }

        SavedVersion {
            id: page_id,
            version,
            page_version_id,
        }
    }

    fn page_detail(&self, page: &Page) -> PageDetail {
        let mut rows: Vec<&SectionRow> = self
            .sections
            .iter()
            .filter(|s| s.page_version_id == page.page_version_id)
            .collect();
        rows.sort_by_key(|s| s.display_order);

        let sections = rows
            .into_iter()
            .map(|row| {
                let mut links: Vec<&SectionMediaLink> = self
                    .section_media
                    .iter()
                    .filter(|l| l.section_id == row.section_id)
                    .collect();
                links.sort_by_key(|l| l.display_order);
                Section {
                    section: row.clone(),
                    media: links
                        .into_iter()
                        .filter_map(|l| self.media.get(&l.file_version_id).cloned())
                        .collect(),
                }
            })
            .collect();

        PageDetail {
            page: page.clone(),
            sections,
        }
    }

    fn append_post(
        &mut self,
        post_id: i32,
        version: i32,
        doc: &BlogDocument,
        previous_publish_date: Option<chrono::DateTime<Utc>>,
        author: Option<i32>,
    ) -> SavedVersion {
        let now = Utc::now();
        let page_version_id = self.next_page_version_id();
        let id = self.next_row_id();
        let featured_image_path = doc
            .featured_image_id
            .and_then(|fid| self.media.get(&fid))
            .map(|m| m.file_path.clone());
        self.posts.push(BlogPost {
            id,
            post_id,
            version,
            page_version_id,
            title: doc.title.clone(),
            url_slug: doc.url_slug.clone(),
            summary: doc.summary.clone(),
            content: doc.content.clone(),
            category: doc.category.clone(),
            tags: doc.tags.clone(),
            author: doc.author.clone(),
            featured_image_id: doc.featured_image_id,
            featured_image_path,
            is_published: doc.is_published,
            publish_date: resolve_publish_date(doc, previous_publish_date, now),
            created_by: author,
            created_at: now,
        });
        SavedVersion {
            id: post_id,
            version,
            page_version_id,
        }
    }
}

/// All stores backed by process memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn contains_ci(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

#[async_trait]
impl PageStore for MemoryStore {
    async fn list(&self, query: &PageQuery) -> Result<Paginated<Page>, StoreError> {
        let inner = self.inner.read().await;
        let search = query.search.as_deref().map(str::trim).filter(|s| !s.is_empty());
        let mut pages: Vec<Page> = inner
            .current_pages()
            .into_iter()
            .filter(|p| query.visibility.admits(p.is_published))
            .filter(|p| query.parent_id.is_none() || p.parent_id == query.parent_id)
            .filter(|p| search.map_or(true, |s| contains_ci(&p.title, s) || contains_ci(&p.url, s)))
            .cloned()
            .collect();
        pages.sort_by(|a, b| {
            a.display_order
                .cmp(&b.display_order)
                .then(a.page_id.cmp(&b.page_id))
        });
        let total = pages.len() as i64;
        Ok(Paginated {
            items: query.pagination.slice(pages),
            pagination: query.pagination.meta(total),
        })
    }

    async fn get(
        &self,
        page_id: i32,
        version: Option<i32>,
    ) -> Result<Option<PageDetail>, StoreError> {
        let inner = self.inner.read().await;
        let page = match version {
            Some(v) => inner
                .pages
                .iter()
                .find(|p| p.page_id == page_id && p.version == v),
            None => inner.current_page(page_id),
        };
        Ok(page.map(|p| inner.page_detail(p)))
    }

    async fn find_by_url(&self, url: &str) -> Result<Option<PageDetail>, StoreError> {
        let inner = self.inner.read().await;
        let page = inner.current_pages().into_iter().find(|p| p.url == url);
        Ok(page.map(|p| inner.page_detail(p)))
    }

    async fn versions(&self, page_id: i32) -> Result<Vec<PageVersionInfo>, StoreError> {
        let inner = self.inner.read().await;
        let mut versions: Vec<PageVersionInfo> = inner
            .pages
            .iter()
            .filter(|p| p.page_id == page_id)
            .map(|p| PageVersionInfo {
                version: p.version,
                page_version_id: p.page_version_id,
                url: p.url.clone(),
                title: p.title.clone(),
                is_published: p.is_published,
                created_by: p.created_by,
                created_at: p.created_at,
            })
            .collect();
        versions.sort_by(|a, b| b.version.cmp(&a.version));
        Ok(versions)
    }

    async fn create(
        &self,
        doc: &PageDocument,
        author: Option<i32>,
    ) -> Result<SavedVersion, StoreError> {
        let mut inner = self.inner.write().await;
        inner.check_url(&doc.url, None)?;
        inner.check_media(doc.sections.iter().flat_map(|s| s.media.iter().copied()))?;

        inner.next_page_id += 1;
        let page_id = inner.next_page_id;
        Ok(inner.append_page(page_id, 1, doc, author))
    }

    async fn update(
        &self,
        page_id: i32,
        doc: &PageDocument,
        author: Option<i32>,
    ) -> Result<SavedVersion, StoreError> {
        let mut inner = self.inner.write().await;
        let current = inner
            .current_page(page_id)
            .map(|p| p.version)
            .ok_or(StoreError::NotFound("Page"))?;
        inner.check_url(&doc.url, Some(page_id))?;
        inner.check_media(doc.sections.iter().flat_map(|s| s.media.iter().copied()))?;
        Ok(inner.append_page(page_id, current + 1, doc, author))
    }

    async fn delete(&self, page_id: i32) -> Result<bool, StoreError> {
        let mut inner = self.inner.write().await;
        let version_ids: Vec<i32> = inner
            .pages
            .iter()
            .filter(|p| p.page_id == page_id)
            .map(|p| p.page_version_id)
            .collect();
        if version_ids.is_empty() {
            return Ok(false);
        }
        let section_ids: Vec<i64> = inner
            .sections
            .iter()
            .filter(|s| version_ids.contains(&s.page_version_id))
            .map(|s| s.section_id)
            .collect();
        inner
            .section_media
            .retain(|l| !section_ids.contains(&l.section_id));
        inner
            .sections
            .retain(|s| !version_ids.contains(&s.page_version_id));
        inner.pages.retain(|p| p.page_id != page_id);
        Ok(true)
    }
}

#[async_trait]
impl BlogStore for MemoryStore {
    async fn list(&self, query: &BlogQuery) -> Result<Paginated<BlogPost>, StoreError> {
        let inner = self.inner.read().await;
        let search = query.search.as_deref().map(str::trim).filter(|s| !s.is_empty());
        let mut posts: Vec<BlogPost> = inner
            .current_posts()
            .into_iter()
            .filter(|p| query.visibility.admits(p.is_published))
            .filter(|p| {
                query
                    .category
                    .as_deref()
                    .map_or(true, |c| p.category.as_deref() == Some(c))
            })
            .filter(|p| query.tag.as_ref().map_or(true, |t| p.tags.contains(t)))
            .filter(|p| {
                search.map_or(true, |s| {
                    contains_ci(&p.title, s)
                        || p.summary.as_deref().is_some_and(|x| contains_ci(x, s))
                })
            })
            .cloned()
            .collect();
        // publish_date DESC with unset dates last, then newest row first
        posts.sort_by(|a, b| {
            b.publish_date
                .cmp(&a.publish_date)
                .then(b.created_at.cmp(&a.created_at))
                .then(b.post_id.cmp(&a.post_id))
        });
        let total = posts.len() as i64;
        Ok(Paginated {
            items: query.pagination.slice(posts),
            pagination: query.pagination.meta(total),
        })
    }

    async fn get(&self, post_id: i32, version: Option<i32>) -> Result<Option<BlogPost>, StoreError> {
        let inner = self.inner.read().await;
        let post = match version {
            Some(v) => inner
                .posts
                .iter()
                .find(|p| p.post_id == post_id && p.version == v),
            None => inner.current_post(post_id),
        };
        Ok(post.cloned())
    }

    async fn find_by_slug(&self, slug: &str) -> Result<Option<BlogPost>, StoreError> {
        let inner = self.inner.read().await;
        let post = inner
            .current_posts()
            .into_iter()
            .find(|p| p.url_slug == slug)
            .cloned();
        Ok(post)
    }

    async fn versions(&self, post_id: i32) -> Result<Vec<BlogVersionInfo>, StoreError> {
        let inner = self.inner.read().await;
        let mut versions: Vec<BlogVersionInfo> = inner
            .posts
            .iter()
            .filter(|p| p.post_id == post_id)
            .map(|p| BlogVersionInfo {
                version: p.version,
                page_version_id: p.page_version_id,
                title: p.title.clone(),
                url_slug: p.url_slug.clone(),
                is_published: p.is_published,
                created_by: p.created_by,
                created_at: p.created_at,
            })
            .collect();
        versions.sort_by(|a, b| b.version.cmp(&a.version));
        Ok(versions)
    }

    async fn create(
        &self,
        doc: &BlogDocument,
        author: Option<i32>,
    ) -> Result<SavedVersion, StoreError> {
        let mut inner = self.inner.write().await;
        inner.check_slug(&doc.url_slug, None)?;
        inner.check_media(doc.featured_image_id)?;
        inner.next_post_id += 1;
        let post_id = inner.next_post_id;
        Ok(inner.append_post(post_id, 1, doc, None, author))
    }

    async fn update(
        &self,
        post_id: i32,
        doc: &BlogDocument,
        author: Option<i32>,
    ) -> Result<SavedVersion, StoreError> {
        let mut inner = self.inner.write().await;
        let (current, previous_date) = inner
            .current_post(post_id)
            .map(|p| (p.version, p.publish_date))
            .ok_or(StoreError::NotFound("Blog post"))?;
        inner.check_slug(&doc.url_slug, Some(post_id))?;
        inner.check_media(doc.featured_image_id)?;
        Ok(inner.append_post(post_id, current + 1, doc, previous_date, author))
    }

    async fn delete(&self, post_id: i32) -> Result<bool, StoreError> {
        let mut inner = self.inner.write().await;
        let before = inner.posts.len();
        inner.posts.retain(|p| p.post_id != post_id);
        Ok(inner.posts.len() != before)
    }
}

#[async_trait]
impl ConsultationStore for MemoryStore {
    async fn create(&self, new: &NewConsultation) -> Result<Consultation, StoreError> {
        let mut inner = self.inner.write().await;
        inner.next_consultation_id += 1;
        let now = Utc::now();
        let consultation = Consultation {
            consultation_id: inner.next_consultation_id,
            name: new.name.clone(),
            email: new.email.clone(),
            phone: new.phone.clone(),
            country: new.country.clone(),
            service: new.service.clone(),
            message: new.message.clone(),
            status: ConsultationStatus::Pending,
            reply: None,
            replied_at: None,
            created_at: now,
            updated_at: now,
        };
        inner.consultations.push(consultation.clone());
        Ok(consultation)
    }

    async fn list(
        &self,
        query: &ConsultationQuery,
    ) -> Result<Paginated<Consultation>, StoreError> {
        let inner = self.inner.read().await;
        let search = query.search.as_deref().map(str::trim).filter(|s| !s.is_empty());
        let mut rows: Vec<Consultation> = inner
            .consultations
            .iter()
            .filter(|c| query.status.map_or(true, |s| c.status == s))
            .filter(|c| {
                search.map_or(true, |s| {
                    contains_ci(&c.name, s)
                        || contains_ci(&c.email, s)
                        || c.phone.as_deref().is_some_and(|p| contains_ci(p, s))
                })
            })
            .cloned()
            .collect();
        rows.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then(b.consultation_id.cmp(&a.consultation_id))
        });
        let total = rows.len() as i64;
        Ok(Paginated {
            items: query.pagination.slice(rows),
            pagination: query.pagination.meta(total),
        })
    }

    async fn get(&self, id: i32) -> Result<Option<Consultation>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .consultations
            .iter()
            .find(|c| c.consultation_id == id)
            .cloned())
    }

    async fn set_status(
        &self,
        id: i32,
        status: ConsultationStatus,
        reply: Option<String>,
    ) -> Result<Option<Consultation>, StoreError> {
        let mut inner = self.inner.write().await;
        let Some(row) = inner
            .consultations
            .iter_mut()
            .find(|c| c.consultation_id == id)
        else {
            return Ok(None);
        };
        let now = Utc::now();
        row.status = status;
        if let Some(reply) = reply {
            row.reply = Some(reply);
            row.replied_at = Some(now);
        }
        row.updated_at = now;
        Ok(Some(row.clone()))
    }

    async fn delete(&self, id: i32) -> Result<bool, StoreError> {
        let mut inner = self.inner.write().await;
        let before = inner.consultations.len();
        inner.consultations.retain(|c| c.consultation_id != id);
        Ok(inner.consultations.len() != before)
    }

    async fn counts(&self) -> Result<Vec<(ConsultationStatus, i64)>, StoreError> {
        let inner = self.inner.read().await;
        Ok(ConsultationStatus::ALL
            .iter()
            .map(|status| {
                let n = inner
                    .consultations
                    .iter()
                    .filter(|c| c.status == *status)
                    .count() as i64;
                (*status, n)
            })
            .collect())
    }
}

#[async_trait]
impl MediaStore for MemoryStore {
    async fn insert(&self, new: &NewMedia) -> Result<MediaFile, StoreError> {
        let mut inner = self.inner.write().await;
        inner.next_media_id += 1;
        let file = MediaFile {
            file_version_id: inner.next_media_id,
            file_name: new.file_name.clone(),
            original_name: new.original_name.clone(),
            file_path: new.file_path.clone(),
            file_type: new.file_type.clone(),
            mime_type: new.mime_type.clone(),
            file_size: new.file_size,
            alt_text: new.alt_text.clone(),
            uploaded_by: new.uploaded_by,
            created_at: Utc::now(),
        };
        inner.media.insert(file.file_version_id, file.clone());
        Ok(file)
    }

    async fn list(&self, query: &MediaQuery) -> Result<Paginated<MediaFile>, StoreError> {
        let inner = self.inner.read().await;
        let search = query.search.as_deref().map(str::trim).filter(|s| !s.is_empty());
        let mut files: Vec<MediaFile> = inner
            .media
            .values()
            .filter(|m| query.file_type.as_deref().map_or(true, |t| m.file_type == t))
            .filter(|m| {
                search.map_or(true, |s| {
                    contains_ci(&m.original_name, s)
                        || m.alt_text.as_deref().is_some_and(|a| contains_ci(a, s))
                })
            })
            .cloned()
            .collect();
        files.sort_by(|a, b| b.file_version_id.cmp(&a.file_version_id));
        let total = files.len() as i64;
        Ok(Paginated {
            items: query.pagination.slice(files),
            pagination: query.pagination.meta(total),
        })
    }

    async fn get(&self, id: i32) -> Result<Option<MediaFile>, StoreError> {
        Ok(self.inner.read().await.media.get(&id).cloned())
    }

    async fn update(
        &self,
        id: i32,
        original_name: Option<String>,
        alt_text: Option<String>,
    ) -> Result<Option<MediaFile>, StoreError> {
        let mut inner = self.inner.write().await;
        let Some(file) = inner.media.get_mut(&id) else {
            return Ok(None);
        };
        if let Some(name) = original_name {
            file.original_name = name;
        }
        if let Some(alt) = alt_text {
            file.alt_text = Some(alt);
        }
        Ok(Some(file.clone()))
    }

    async fn delete(&self, id: i32) -> Result<Option<MediaFile>, StoreError> {
        let mut inner = self.inner.write().await;
        let removed = inner.media.remove(&id);
        if removed.is_some() {
            inner.section_media.retain(|l| l.file_version_id != id);
        }
        Ok(removed)
    }
}
