use serde::{Deserialize, Serialize};

/// A book as seen by the cover resolver. Everything except identifiers is
/// optional; the resolver only needs enough to fingerprint the book and to
/// query the providers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Book {
    /// Catalog volume id (e.g. a Google Books volume id).
    pub id: Option<String>,
    pub isbn13: Option<String>,
    pub isbn10: Option<String>,
    pub title: Option<String>,
    /// Cover URL carried on the input record, used as a provisional hint.
    pub cover_image_url: Option<String>,
}

impl Book {
    /// The best ISBN available, preferring ISBN-13.
    pub fn isbn(&self) -> Option<&str> {
        self.isbn13.as_deref().or(self.isbn10.as_deref())
    }
}

/// The stable cache identity of a book, preferring ISBN-13, then ISBN-10,
/// then the catalog volume id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Fingerprint a book, or `None` when it carries no usable identifier.
    pub fn for_book(book: &Book) -> Option<Self> {
        [&book.isbn13, &book.isbn10, &book.id]
            .into_iter()
            .flatten()
            .find(|id| !id.trim().is_empty())
            .map(|id| Fingerprint(id.trim().to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_prefers_isbn13() {
        let book = Book {
            id: Some("vol1".to_string()),
            isbn13: Some("9780000000002".to_string()),
            isbn10: Some("0000000001".to_string()),
            ..Default::default()
        };
        assert_eq!(
            Fingerprint::for_book(&book).unwrap().as_str(),
            "9780000000002"
        );
    }

    #[test]
    fn fingerprint_falls_back_to_isbn10_then_id() {
        let mut book = Book {
            id: Some("vol1".to_string()),
            isbn10: Some("0000000001".to_string()),
            ..Default::default()
        };
        assert_eq!(Fingerprint::for_book(&book).unwrap().as_str(), "0000000001");

        book.isbn10 = None;
        assert_eq!(Fingerprint::for_book(&book).unwrap().as_str(), "vol1");
    }

    #[test]
    fn fingerprint_ignores_blank_identifiers() {
        let book = Book {
            id: Some("vol1".to_string()),
            isbn13: Some("   ".to_string()),
            ..Default::default()
        };
        assert_eq!(Fingerprint::for_book(&book).unwrap().as_str(), "vol1");

        assert_eq!(Fingerprint::for_book(&Book::default()), None);
    }
}
