use crate::album::{Album, AlbumSummary, CreatedAlbum, Credits, Image, ImageUpload, NewAlbum};
use crate::oauth::{self, TokenService};
use failure::{self, format_err, Fail};
use log::{debug, warn};
use reqwest::header::{HeaderMap, AUTHORIZATION};
use reqwest::multipart::Form;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::cell::RefCell;
use std::io;
use std::path::Path;
use url::Url;

const API_ENDPOINT: &str = "https://api.imgur.com/3/";

const HEADER_USER_LIMIT: &str = "x-ratelimit-userlimit";
const HEADER_USER_REMAINING: &str = "x-ratelimit-userremaining";
const HEADER_USER_RESET: &str = "x-ratelimit-userreset";
const HEADER_CLIENT_LIMIT: &str = "x-ratelimit-clientlimit";
const HEADER_CLIENT_REMAINING: &str = "x-ratelimit-clientremaining";

#[derive(Debug, Fail)]
pub enum Error {
    /// Error by remote server is failing
    #[fail(display = "Error response returned: {}", _0)]
    Request(#[fail(cause)] failure::Error),
    /// The caller exceeded its rate allowance
    #[fail(display = "Rate limit exceeded: {}", _0)]
    RateLimited(Credits),
    /// Authentication error that never recovers with current config
    #[fail(display = "Access unauthorized by status: {}", _0)]
    Unauthorized(u16),
    /// Error in managing OAuth token
    #[fail(display = "Error in managing OAuth token: {}", _0)]
    OAuthToken(#[fail(cause)] oauth::Error),
    /// IO error
    #[fail(display = "IO error in processing request: {}", _0)]
    IO(#[fail(cause)] io::Error),
}

impl From<oauth::Error> for Error {
    fn from(e: oauth::Error) -> Self {
        Error::OAuthToken(e)
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Request(e.into())
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::IO(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Every API response wraps its payload the same way.
#[derive(Deserialize, Debug)]
struct Envelope<T> {
    data: T,
    #[serde(default)]
    success: bool,
    status: Option<u16>,
}

#[derive(Deserialize, Debug)]
struct ErrorData {
    error: Option<serde_json::Value>,
}

pub struct ImgurApi {
    tokens: TokenService,
    client: Client,
    credits: RefCell<Credits>,
}

impl ImgurApi {
    pub fn new(tokens: TokenService) -> ImgurApi {
        ImgurApi {
            tokens,
            client: Client::new(),
            credits: RefCell::new(Credits::default()),
        }
    }

    pub fn credits(&self) -> Credits {
        self.credits.borrow().clone()
    }

    fn authorize(&self, builder: RequestBuilder) -> Result<RequestBuilder> {
        if self.tokens.has_tokens() {
            Ok(builder.bearer_auth(self.tokens.obtain_access_token()?))
        } else {
            Ok(builder.header(AUTHORIZATION, format!("Client-ID {}", self.tokens.client_id())))
        }
    }

    /// Send the request made by `build` and decode the `data` of its response.
    ///
    /// `build` is called again for the single resend that follows a rejected
    /// access token.
    fn request<Res, F>(&self, url: &Url, build: F) -> Result<Res>
    where
        Res: DeserializeOwned,
        F: Fn(&Client) -> Result<RequestBuilder>,
    {
        let mut refreshed = false;
        loop {
            let builder = self.authorize(build(&self.client)?)?;
            let mut resp = builder.send()?;
            let status = resp.status();

            let credits = credits_from_headers(resp.headers(), &self.credits.borrow());
            *self.credits.borrow_mut() = credits;

            if status.is_success() {
                let envelope: Envelope<Res> = resp.json()?;
                if !envelope.success {
                    debug!(
                        "Response for {} not flagged successful, status {:?}",
                        url, envelope.status
                    );
                }
                return Ok(envelope.data);
            }

            if status == StatusCode::TOO_MANY_REQUESTS {
                return Err(Error::RateLimited(self.credits()));
            }

            if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
                if !refreshed && self.tokens.has_tokens() {
                    debug!("Got {} response for {}, refreshing token", status, url);
                    self.tokens.expire_current();
                    refreshed = true;
                    continue;
                }
                return Err(Error::Unauthorized(status.as_u16()));
            }

            let body = resp.text().unwrap_or_default();
            return Err(Error::Request(format_err!(
                "bad status code {} for {}: {}",
                status,
                url,
                error_message(&body)
            )));
        }
    }

    pub fn account_albums(&self, user: &str, page: u32) -> Result<Vec<AlbumSummary>> {
        let url = endpoint(&["account", user, "albums", &page.to_string()]);
        self.request(&url, |client| Ok(client.get(url.as_str())))
    }

    pub fn album(&self, id: &str) -> Result<Album> {
        let url = endpoint(&["album", id]);
        self.request(&url, |client| Ok(client.get(url.as_str())))
    }

    pub fn create_album(&self, album: &NewAlbum) -> Result<CreatedAlbum> {
        let url = endpoint(&["album"]);
        let params = [
            ("title", album.title.as_str()),
            ("description", album.description.as_str()),
            ("privacy", album.privacy.as_str()),
        ];
        self.request(&url, |client| Ok(client.post(url.as_str()).form(&params)))
    }

    pub fn upload_from_path(&self, path: &Path, meta: &ImageUpload) -> Result<Image> {
        let url = endpoint(&["image"]);
        self.request(&url, |client| {
            let mut form = Form::new()
                .text("type", "file")
                .text("title", meta.title.clone())
                .text("description", meta.description.clone());
            if let Some(album) = &meta.album {
                form = form.text("album", album.clone());
            }
            let form = form.file("image", path)?;
            Ok(client.post(url.as_str()).multipart(form))
        })
    }
}

fn endpoint(segments: &[&str]) -> Url {
    let mut url = Url::parse(API_ENDPOINT).expect("url parse");
    url.path_segments_mut()
        .expect("base url")
        .pop_if_empty()
        .extend(segments);
    url
}

fn credits_from_headers(headers: &HeaderMap, previous: &Credits) -> Credits {
    fn value<T: std::str::FromStr>(headers: &HeaderMap, name: &str) -> Option<T> {
        let raw = headers.get(name)?.to_str().ok()?;
        match raw.trim().parse() {
            Ok(v) => Some(v),
            Err(_) => {
                warn!("Ignoring malformed {} header: {:?}", name, raw);
                None
            }
        }
    }

    Credits {
        user_limit: value(headers, HEADER_USER_LIMIT).or(previous.user_limit),
        user_remaining: value(headers, HEADER_USER_REMAINING).or(previous.user_remaining),
        user_reset: value(headers, HEADER_USER_RESET).or(previous.user_reset),
        client_limit: value(headers, HEADER_CLIENT_LIMIT).or(previous.client_limit),
        client_remaining: value(headers, HEADER_CLIENT_REMAINING).or(previous.client_remaining),
    }
}

/// Extract the error message of a failed response, falling back to the raw body.
fn error_message(body: &str) -> String {
    match serde_json::from_str::<Envelope<ErrorData>>(body) {
        Ok(Envelope {
            data: ErrorData { error: Some(err) },
            ..
        }) => match err {
            serde_json::Value::String(msg) => msg,
            serde_json::Value::Object(obj) => obj
                .get("message")
                .and_then(|m| m.as_str())
                .map(String::from)
                .unwrap_or_else(|| serde_json::Value::Object(obj.clone()).to_string()),
            other => other.to_string(),
        },
        _ => body.to_string(),
    }
}
