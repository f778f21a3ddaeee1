use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stable identifier of an uploaded image; survives duration edits.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImageId(String);

impl ImageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ImageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Organization whose image set is displayed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OrgScope(String);

impl OrgScope {
    pub fn new(org: impl Into<String>) -> Self {
        Self(org.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OrgScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    pub id: ImageId,
    /// Resolvable location of the image bytes.
    pub url: String,
    /// How long the image stays on screen once it becomes current.
    pub display_duration: Duration,
    pub created_at: DateTime<Utc>,
}

impl Image {
    pub fn new(
        id: impl Into<String>,
        url: impl Into<String>,
        display_duration: Duration,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: ImageId::new(id),
            url: url.into(),
            display_duration,
            created_at,
        }
    }
}

/// Ordered set of images, newest first.
///
/// Ties on `created_at` are broken by id so repeated fetches of the same data
/// produce the same order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageCollection {
    images: Vec<Image>,
}

impl ImageCollection {
    pub fn newest_first(mut images: Vec<Image>) -> Self {
        images.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        Self { images }
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Image> {
        self.images.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Image> {
        self.images.iter()
    }

    pub fn position(&self, id: &ImageId) -> Option<usize> {
        self.images.iter().position(|img| &img.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn orders_newest_first_with_id_tiebreak() {
        let d = Duration::from_secs(5);
        let collection = ImageCollection::newest_first(vec![
            Image::new("old", "file:///old", d, at(10)),
            Image::new("b", "file:///b", d, at(30)),
            Image::new("a", "file:///a", d, at(30)),
            Image::new("mid", "file:///mid", d, at(20)),
        ]);
        let ids: Vec<&str> = collection.iter().map(|img| img.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "mid", "old"]);
        assert_eq!(collection.position(&ImageId::new("mid")), Some(2));
        assert!(collection.get(4).is_none());
    }
}
