use chrono::{TimeZone, Utc};
use failure::Fail;
use serde::Deserialize;
use std::fmt;
use std::path::Path;

pub trait Error: Fail {
    /// Return the remaining credits if this error says the caller ran out of
    /// its rate allowance.
    fn rate_limited(&self) -> Option<&Credits>;
}

/// Album as listed in an account, without its images.
#[derive(Deserialize, Debug, Clone, Eq, PartialEq)]
pub struct AlbumSummary {
    pub id: String,
    pub title: Option<String>,
}

#[derive(Deserialize, Debug, Clone, Eq, PartialEq)]
pub struct Album {
    pub id: String,
    pub title: Option<String>,
    pub deletehash: Option<String>,
    pub link: String,
    #[serde(default)]
    pub images: Vec<Image>,
}

impl Album {
    /// Return the first image titled exactly `title`.
    pub fn image_titled(&self, title: &str) -> Option<&Image> {
        self.images
            .iter()
            .find(|image| image.title.as_deref() == Some(title))
    }
}

#[derive(Deserialize, Debug, Clone, Eq, PartialEq)]
pub struct Image {
    pub id: String,
    pub title: Option<String>,
    pub link: String,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Privacy {
    Public,
    Hidden,
    Secret,
}

impl Privacy {
    pub fn as_str(self) -> &'static str {
        match self {
            Privacy::Public => "public",
            Privacy::Hidden => "hidden",
            Privacy::Secret => "secret",
        }
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct NewAlbum {
    pub title: String,
    pub description: String,
    pub privacy: Privacy,
}

/// Identifiers returned for a freshly created album.
#[derive(Deserialize, Debug, Clone, Eq, PartialEq)]
pub struct CreatedAlbum {
    pub id: String,
    pub deletehash: Option<String>,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ImageUpload {
    pub title: String,
    pub description: String,
    /// Deletion handle of the album to attach the image to
    pub album: Option<String>,
}

/// Rate limit counters last reported by the remote service.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct Credits {
    pub user_limit: Option<u64>,
    pub user_remaining: Option<u64>,
    /// Unix timestamp at which the user allowance resets
    pub user_reset: Option<i64>,
    pub client_limit: Option<u64>,
    pub client_remaining: Option<u64>,
}

impl fmt::Display for Credits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn num(v: Option<u64>) -> String {
            v.map(|v| v.to_string()).unwrap_or_else(|| "?".to_string())
        }
        let reset = self
            .user_reset
            .and_then(|t| Utc.timestamp_opt(t, 0).single())
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "?".to_string());
        write!(
            f,
            "user {}/{} (resets {}), client {}/{}",
            num(self.user_remaining),
            num(self.user_limit),
            reset,
            num(self.client_remaining),
            num(self.client_limit)
        )
    }
}

/// Remote image hosting service holding albums of images.
pub trait ImageHost {
    type E: Error + 'static;

    /// Return one page of albums owned by `user`. An empty page marks the end.
    fn account_albums(&self, user: &str, page: u32) -> Result<Vec<AlbumSummary>, Self::E>;

    /// Fetch an album including its list of images.
    fn album(&self, id: &str) -> Result<Album, Self::E>;

    fn create_album(&self, album: &NewAlbum) -> Result<CreatedAlbum, Self::E>;

    /// Upload the local file at `path`.
    fn upload_from_path(&self, path: &Path, meta: &ImageUpload) -> Result<Image, Self::E>;

    /// Return the credits observed on the most recent response.
    fn credits(&self) -> Credits;
}
