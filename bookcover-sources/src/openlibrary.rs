/// Size variants of the Open Library covers API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CoverSize {
    Large,
    Medium,
    Small,
}

impl CoverSize {
    pub fn letter(&self) -> char {
        match self {
            CoverSize::Large => 'L',
            CoverSize::Medium => 'M',
            CoverSize::Small => 'S',
        }
    }
}

/// Compose the Open Library cover URL for an ISBN at the given size.
pub fn cover_url(isbn: &str, size: CoverSize) -> String {
    format!(
        "https://covers.openlibrary.org/b/isbn/{isbn}-{}.jpg",
        size.letter()
    )
}
