//! Cursor logic for rotating through a descriptor. No timers live here; the
//! caller arms a timer with [`Rotation::current_duration`] and calls
//! [`Rotation::advance`] when it fires.

use std::sync::Arc;
use std::time::Duration;

use crate::config::{MenuLayout, PlaybackConfig};
use crate::content::{
    media_url, Descriptor, ItemKind, LeafId, Media, Menu, Product, DEFAULT_ITEM_DURATION,
};
use crate::pipeline::{Annotations, LeafStatus};
use crate::protocol::{CategoryView, ContentView, MediaLocation, MediaView, Position, ProductView};

#[derive(Debug, Clone)]
pub struct RotationSettings {
    pub default_item: Duration,
    pub menu_page: Duration,
    pub menu_layout: MenuLayout,
    pub categories_per_page: usize,
    pub products_per_page: usize,
}

impl Default for RotationSettings {
    fn default() -> Self {
        Self {
            default_item: DEFAULT_ITEM_DURATION,
            menu_page: Duration::from_secs(5),
            menu_layout: MenuLayout::CategoryPairs,
            categories_per_page: 2,
            products_per_page: 4,
        }
    }
}

impl From<&PlaybackConfig> for RotationSettings {
    fn from(cfg: &PlaybackConfig) -> Self {
        Self {
            default_item: cfg.default_item_duration(),
            menu_page: cfg.menu_page_duration(),
            menu_layout: cfg.menu_layout,
            categories_per_page: cfg.categories_per_page.max(1),
            products_per_page: cfg.products_per_page.max(1),
        }
    }
}

// ── Playlist ──────────────────────────────────────────────────────────────────

/// Index into a playlist with one duration per item. Always in `[0, len)`.
#[derive(Debug, Clone)]
pub struct PlaylistCursor {
    durations: Vec<Duration>,
    index: usize,
}

impl PlaylistCursor {
    pub fn new(durations: Vec<Duration>) -> Self {
        Self { durations, index: 0 }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn len(&self) -> usize {
        self.durations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.durations.is_empty()
    }

    pub fn current_duration(&self) -> Duration {
        self.durations
            .get(self.index)
            .copied()
            .unwrap_or(DEFAULT_ITEM_DURATION)
    }

    pub fn advance(&mut self) -> usize {
        if !self.durations.is_empty() {
            self.index = (self.index + 1) % self.durations.len();
        }
        self.index
    }

    pub fn reset(&mut self) {
        self.index = 0;
    }
}

// ── Menu ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Page {
    /// Categories `start..end`.
    Categories { start: usize, end: usize },
    /// Products `page * per_page ..` of one category.
    Products { category: usize, page: usize },
}

/// Pages through menu categories, either whole categories at a time or a
/// fixed number of products inside one category.
#[derive(Debug, Clone)]
pub struct MenuPager {
    layout: MenuLayout,
    per_page: usize,
    /// Product count per category.
    sizes: Vec<usize>,
    category: usize,
    page: usize,
}

impl MenuPager {
    pub fn category_pairs(categories: usize, per_page: usize) -> Self {
        Self {
            layout: MenuLayout::CategoryPairs,
            per_page: per_page.max(1),
            sizes: vec![0; categories],
            category: 0,
            page: 0,
        }
    }

    pub fn product_pages(sizes: Vec<usize>, per_page: usize) -> Self {
        Self {
            layout: MenuLayout::ProductPages,
            per_page: per_page.max(1),
            sizes,
            category: 0,
            page: 0,
        }
    }

    fn pages_in(&self, category: usize) -> usize {
        let n = self.sizes.get(category).copied().unwrap_or(0);
        n.div_ceil(self.per_page).max(1)
    }

    pub fn current(&self) -> Page {
        match self.layout {
            MenuLayout::CategoryPairs => Page::Categories {
                start: self.category,
                end: (self.category + self.per_page).min(self.sizes.len()),
            },
            MenuLayout::ProductPages => Page::Products {
                category: self.category,
                page: self.page,
            },
        }
    }

    pub fn advance(&mut self) -> Page {
        let len = self.sizes.len();
        if len == 0 {
            return self.current();
        }
        match self.layout {
            MenuLayout::CategoryPairs => {
                self.category += self.per_page;
                if self.category >= len {
                    self.category = 0;
                }
            }
            MenuLayout::ProductPages => {
                if self.page + 1 < self.pages_in(self.category) {
                    self.page += 1;
                } else {
                    self.page = 0;
                    self.category = (self.category + 1) % len;
                }
            }
        }
        self.current()
    }

    pub fn reset(&mut self) {
        self.category = 0;
        self.page = 0;
    }

    pub fn position(&self) -> Position {
        match self.current() {
            Page::Categories { start, end } => Position::Categories {
                start,
                end,
                len: self.sizes.len(),
            },
            Page::Products { category, page } => Position::Products {
                category,
                page,
                pages: self.pages_in(category),
            },
        }
    }
}

// ── Rotation ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
enum Cursor {
    Playlist(PlaylistCursor),
    Menu(MenuPager),
}

#[derive(Debug, Clone)]
pub struct Rotation {
    descriptor: Arc<Descriptor>,
    cursor: Cursor,
    menu_page: Duration,
    products_per_page: usize,
}

impl Rotation {
    /// Returns `None` when the descriptor has nothing to rotate through.
    pub fn new(descriptor: Arc<Descriptor>, settings: &RotationSettings) -> Option<Self> {
        if descriptor.is_empty() {
            return None;
        }
        let cursor = match descriptor.as_ref() {
            Descriptor::Playlist(p) => Cursor::Playlist(PlaylistCursor::new(
                p.items
                    .iter()
                    .map(|item| item.effective_duration(settings.default_item))
                    .collect(),
            )),
            Descriptor::Menu(m) => Cursor::Menu(match settings.menu_layout {
                MenuLayout::CategoryPairs => {
                    MenuPager::category_pairs(m.categories.len(), settings.categories_per_page)
                }
                MenuLayout::ProductPages => MenuPager::product_pages(
                    m.categories.iter().map(|c| c.products.len()).collect(),
                    settings.products_per_page,
                ),
            }),
        };
        Some(Self {
            descriptor,
            cursor,
            menu_page: settings.menu_page,
            products_per_page: settings.products_per_page.max(1),
        })
    }

    pub fn descriptor(&self) -> &Arc<Descriptor> {
        &self.descriptor
    }

    pub fn current_duration(&self) -> Duration {
        match &self.cursor {
            Cursor::Playlist(c) => c.current_duration(),
            Cursor::Menu(_) => self.menu_page,
        }
    }

    pub fn advance(&mut self) {
        match &mut self.cursor {
            Cursor::Playlist(c) => {
                c.advance();
            }
            Cursor::Menu(p) => {
                p.advance();
            }
        }
    }

    pub fn reset(&mut self) {
        match &mut self.cursor {
            Cursor::Playlist(c) => c.reset(),
            Cursor::Menu(p) => p.reset(),
        }
    }

    pub fn position(&self) -> Position {
        match &self.cursor {
            Cursor::Playlist(c) => Position::Item {
                index: c.index(),
                len: c.len(),
            },
            Cursor::Menu(p) => p.position(),
        }
    }

    /// What the renderer should show at the current position.
    pub fn view(&self, annotations: &Annotations) -> ContentView {
        match (self.descriptor.as_ref(), &self.cursor) {
            (Descriptor::Playlist(p), Cursor::Playlist(c)) => {
                let Some(item) = p.items.get(c.index()) else {
                    return ContentView::Empty;
                };
                match item.kind() {
                    ItemKind::File(Some(media)) => ContentView::Media(media_view(
                        media,
                        &p.base_url,
                        annotations.get(&LeafId::PlaylistItem(c.index())),
                    )),
                    ItemKind::Html(Some(html)) => ContentView::Html {
                        markup: html.content.clone(),
                    },
                    _ => ContentView::Empty,
                }
            }
            (Descriptor::Menu(m), Cursor::Menu(pager)) => {
                self.menu_view(m, pager.current(), annotations)
            }
            _ => ContentView::Empty,
        }
    }

    fn menu_view(&self, menu: &Menu, page: Page, annotations: &Annotations) -> ContentView {
        let categories = match page {
            Page::Categories { start, end } => (start..end)
                .filter_map(|c| {
                    let category = menu.categories.get(c)?;
                    Some(CategoryView {
                        name: category.name.clone(),
                        products: category
                            .products
                            .iter()
                            .enumerate()
                            .map(|(p, product)| product_view(menu, c, p, product, annotations))
                            .collect(),
                    })
                })
                .collect(),
            Page::Products { category: c, page } => menu
                .categories
                .get(c)
                .map(|category| CategoryView {
                    name: category.name.clone(),
                    products: category
                        .products
                        .iter()
                        .enumerate()
                        .skip(page * self.products_per_page)
                        .take(self.products_per_page)
                        .map(|(p, product)| product_view(menu, c, p, product, annotations))
                        .collect(),
                })
                .into_iter()
                .collect(),
        };
        ContentView::MenuPage {
            title: menu.name.clone(),
            description: menu.description.clone(),
            categories,
        }
    }
}

fn product_view(
    menu: &Menu,
    category: usize,
    index: usize,
    product: &Product,
    annotations: &Annotations,
) -> ProductView {
    ProductView {
        name: product.name.clone(),
        description: product.description.clone(),
        price: product.price,
        media: product.media.as_ref().filter(|m| m.is_fetchable()).map(|m| {
            media_view(
                m,
                &menu.base_url,
                annotations.get(&LeafId::Product {
                    category,
                    product: index,
                }),
            )
        }),
    }
}

/// Cached media resolves locally; failed or unresolved media falls back to
/// the live URL.
fn media_view(media: &Media, base_url: &str, status: Option<&LeafStatus>) -> MediaView {
    let source = match status {
        Some(LeafStatus::Cached(handle)) => MediaLocation::Cached {
            digest: handle.digest.clone(),
            path: handle.path.clone(),
        },
        _ => MediaLocation::Remote {
            url: media_url(base_url, &media.file_url),
        },
    };
    MediaView {
        file_name: media.file_name.clone(),
        file_extension: media.file_extension.clone(),
        is_video: media.is_video(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MediaHandle;
    use crate::content::{Category, ContentItem, Playlist};

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    #[test]
    fn playlist_cursor_wraps() {
        let mut c = PlaylistCursor::new(vec![secs(5), secs(10), secs(10)]);
        assert_eq!(c.advance(), 1);
        assert_eq!(c.advance(), 2);
        assert_eq!(c.advance(), 0);
    }

    #[test]
    fn single_item_stays_at_zero() {
        let mut c = PlaylistCursor::new(vec![secs(3)]);
        for _ in 0..100 {
            assert_eq!(c.advance(), 0);
        }
        assert_eq!(c.current_duration(), secs(3));
    }

    #[test]
    fn five_categories_two_per_page() {
        let mut pager = MenuPager::category_pairs(5, 2);
        let mut pages = vec![pager.current()];
        for _ in 0..3 {
            pages.push(pager.advance());
        }
        assert_eq!(
            pages,
            vec![
                Page::Categories { start: 0, end: 2 },
                Page::Categories { start: 2, end: 4 },
                Page::Categories { start: 4, end: 5 },
                Page::Categories { start: 0, end: 2 },
            ]
        );
    }

    #[test]
    fn product_pages_walk_categories() {
        // 5 products, then an empty category, then 2 products.
        let mut pager = MenuPager::product_pages(vec![5, 0, 2], 4);
        let mut pages = vec![pager.current()];
        for _ in 0..4 {
            pages.push(pager.advance());
        }
        assert_eq!(
            pages,
            vec![
                Page::Products { category: 0, page: 0 },
                Page::Products { category: 0, page: 1 },
                Page::Products { category: 1, page: 0 },
                Page::Products { category: 2, page: 0 },
                Page::Products { category: 0, page: 0 },
            ]
        );
        assert_eq!(
            pager.position(),
            Position::Products { category: 0, page: 0, pages: 2 }
        );
    }

    fn playlist(items: serde_json::Value) -> Arc<Descriptor> {
        let items: Vec<ContentItem> = serde_json::from_value(items).unwrap();
        Arc::new(Descriptor::Playlist(Playlist {
            id: "1".into(),
            name: "p".into(),
            base_url: "http://cdn".into(),
            items,
        }))
    }

    #[test]
    fn rotation_uses_effective_durations() {
        let d = playlist(serde_json::json!([
            {"contentType": "html", "duration": 5, "html": {"content": "a"}},
            {"contentType": "html", "duration": 0, "html": {"content": "b"}},
            {"contentType": "html", "duration": 10, "html": {"content": "c"}}
        ]));
        let mut r = Rotation::new(d, &RotationSettings::default()).unwrap();
        let mut seen = Vec::new();
        for _ in 0..3 {
            seen.push(r.current_duration());
            r.advance();
        }
        assert_eq!(seen, vec![secs(5), secs(10), secs(10)]);
        assert_eq!(r.position(), Position::Item { index: 0, len: 3 });
    }

    #[test]
    fn empty_descriptor_has_no_rotation() {
        let settings = RotationSettings::default();
        assert!(Rotation::new(playlist(serde_json::json!([])), &settings).is_none());
    }

    #[test]
    fn failed_media_falls_back_to_remote_url() {
        let d = playlist(serde_json::json!([
            {"contentType": "file",
             "media": {"file_url": "a.mp4", "file_extension": "mp4", "file_name": "A"}}
        ]));
        let r = Rotation::new(d, &RotationSettings::default()).unwrap();

        let mut annotations = Annotations::new();
        annotations.insert(LeafId::PlaylistItem(0), LeafStatus::Failed("HTTP 404".into()));
        match r.view(&annotations) {
            ContentView::Media(view) => {
                assert!(view.is_video);
                assert_eq!(view.source, MediaLocation::Remote { url: "http://cdn/a.mp4".into() });
            }
            other => panic!("unexpected view {other:?}"),
        }

        let handle = MediaHandle {
            key: "http://cdn/a.mp4".into(),
            digest: "ab".into(),
            path: "/tmp/ab.bin".into(),
        };
        annotations.insert(LeafId::PlaylistItem(0), LeafStatus::Cached(handle));
        match r.view(&annotations) {
            ContentView::Media(view) => {
                assert!(matches!(view.source, MediaLocation::Cached { .. }))
            }
            other => panic!("unexpected view {other:?}"),
        }
    }

    #[test]
    fn menu_page_shows_its_categories() {
        let categories: Vec<Category> = serde_json::from_value(serde_json::json!([
            {"name": "A", "products": [{"name": "a1", "price": 1}]},
            {"name": "B", "products": []},
            {"name": "C", "products": [
                {"name": "c1", "preco": "2,5", "media": {"file_url": "c1.jpg"}}
            ]}
        ]))
        .unwrap();
        let d = Arc::new(Descriptor::Menu(Menu {
            id: "m".into(),
            name: "Menu".into(),
            description: None,
            base_url: "http://cdn".into(),
            categories,
        }));
        let mut r = Rotation::new(d, &RotationSettings::default()).unwrap();
        assert_eq!(r.current_duration(), secs(5));
        r.advance();
        match r.view(&Annotations::new()) {
            ContentView::MenuPage { categories, .. } => {
                assert_eq!(categories.len(), 1);
                assert_eq!(categories[0].name, "C");
                assert_eq!(categories[0].products[0].price, 2.5);
                assert!(categories[0].products[0].media.is_some());
            }
            other => panic!("unexpected view {other:?}"),
        }
    }
}
