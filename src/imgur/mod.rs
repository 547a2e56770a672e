pub mod api;

use crate::album::{
    self, Album, AlbumSummary, CreatedAlbum, Credits, Image, ImageHost, ImageUpload, NewAlbum,
};
use crate::config::Config;
use crate::oauth::TokenService;
use api::ImgurApi;
use failure::{self, Fail};
use log::debug;
use std::io;
use std::path::Path;

pub fn new_imgur_client(config: &Config) -> Result<ImgurClient> {
    let tokens = TokenService::new(&config.client, config.tokens.as_ref())
        .map_err(|e| Error::InvalidAuthConfig(e.into()))?;
    Ok(ImgurClient::new(ImgurApi::new(tokens)))
}

#[derive(Debug, Fail)]
pub enum Error {
    /// Remote refused the request as the rate allowance has been used up
    #[fail(display = "Passed limit: {}", _0)]
    RateLimited(Credits),
    /// Response from Imgur was broken or unexpected
    #[fail(display = "Metadata corrupted: {}", _0)]
    CorruptedMetadata(String),
    /// Any IO failure reading local files
    #[fail(display = "IO error {}", _0)]
    IO(#[fail(cause)] io::Error),
    /// Remote API failure
    #[fail(display = "Remote endpoint failed: {}", _0)]
    RemoteFail(#[fail(cause)] api::Error),
    /// Invalid configuration
    #[fail(display = "Invalid auth configuration: {}", _0)]
    InvalidAuthConfig(#[fail(cause)] failure::Error),
}

impl album::Error for Error {
    fn rate_limited(&self) -> Option<&Credits> {
        match self {
            Error::RateLimited(credits) => Some(credits),
            _ => None,
        }
    }
}

impl From<api::Error> for Error {
    fn from(e: api::Error) -> Self {
        match e {
            api::Error::IO(e) => Error::IO(e),
            api::Error::RateLimited(credits) => Error::RateLimited(credits),
            e @ api::Error::Request(_) => Error::RemoteFail(e),
            e @ api::Error::Unauthorized(_) => Error::InvalidAuthConfig(e.into()),
            e @ api::Error::OAuthToken(_) => Error::InvalidAuthConfig(e.into()),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

pub struct ImgurClient {
    api: ImgurApi,
}

impl ImgurClient {
    pub fn new(api: ImgurApi) -> ImgurClient {
        ImgurClient { api }
    }
}

impl ImageHost for ImgurClient {
    type E = Error;

    fn account_albums(&self, user: &str, page: u32) -> Result<Vec<AlbumSummary>> {
        let albums = self.api.account_albums(user, page)?;
        debug!("Page {} of {}'s albums has {} entries", page, user, albums.len());
        Ok(albums)
    }

    fn album(&self, id: &str) -> Result<Album> {
        let album = self.api.album(id)?;
        if album.id != id {
            return Err(Error::CorruptedMetadata(format!(
                "asked for album {} but got {}",
                id, album.id
            )));
        }
        Ok(album)
    }

    fn create_album(&self, album: &NewAlbum) -> Result<CreatedAlbum> {
        let created = self.api.create_album(album)?;
        debug!("Created album {} titled {}", created.id, album.title);
        Ok(created)
    }

    fn upload_from_path(&self, path: &Path, meta: &ImageUpload) -> Result<Image> {
        Ok(self.api.upload_from_path(path, meta)?)
    }

    fn credits(&self) -> Credits {
        self.api.credits()
    }
}
