use crate::config::{ClientConfig, Config, Tokens};
use failure::{self, format_err, Fail};
use log::debug;
use oauth2::basic::BasicClient;
use oauth2::reqwest::http_client;
use oauth2::{AuthType, AuthUrl, ClientId, ClientSecret, RefreshToken, TokenResponse, TokenUrl};
use serde::Deserialize;
use std::cell::RefCell;
use std::io::{self, BufRead, Write};
use std::time::{Duration, Instant};
use url::Url;

const AUTH_URL: &str = "https://api.imgur.com/oauth2/authorize";
const TOKEN_URL: &str = "https://api.imgur.com/oauth2/token";

#[derive(Debug, Fail)]
pub enum Error {
    /// Passed input contains invalid value
    #[fail(display = "Invalid argument {}: {}", name, reason)]
    InvalidArgument { name: &'static str, reason: String },
    /// Token request got error response
    #[fail(display = "Token request failed: {}", _0)]
    TokenRequest(failure::Error),
    /// No token is available locally now
    #[fail(display = "No token configured")]
    NoAvailableToken,
    /// Nothing was entered at the pin prompt
    #[fail(display = "No pin entered")]
    NoPin,
    #[fail(display = "IO error while reading pin: {}", _0)]
    IO(#[fail(cause)] io::Error),
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::IO(e)
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::TokenRequest(e.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Something able to turn a human-entered pin into a token pair.
pub trait PinAuthorizer {
    /// URL of the page handing out the pin.
    fn authorization_url(&self) -> String;

    fn exchange_pin(&self, pin: &str) -> Result<Tokens>;
}

/// Run the interactive pin exchange and return `config` updated with the
/// obtained tokens. Persisting the result is up to the caller.
pub fn acquire_tokens<A, R, W>(
    authorizer: &A,
    config: Config,
    mut input: R,
    mut output: W,
) -> Result<Config>
where
    A: PinAuthorizer,
    R: BufRead,
    W: Write,
{
    writeln!(
        output,
        "Please enter the pin you received from {}",
        authorizer.authorization_url()
    )?;
    output.flush()?;

    let mut line = String::new();
    input.read_line(&mut line)?;
    let pin = line.trim();
    if pin.is_empty() {
        return Err(Error::NoPin);
    }

    let tokens = authorizer.exchange_pin(pin)?;
    Ok(config.with_tokens(tokens))
}

#[derive(Deserialize, Debug)]
struct PinTokenResponse {
    access_token: String,
    refresh_token: String,
    expires_in: Option<u64>,
    account_username: Option<String>,
}

struct AccessToken {
    secret: String,
    expire_at: Option<Instant>,
}

struct TokenState {
    access: Option<AccessToken>,
    refresh: Option<String>,
}

/// Holds the tokens of a run and refreshes the access token when needed.
pub struct TokenService {
    client_id: String,
    client_secret: String,
    oauth2_client: BasicClient,
    http: reqwest::Client,
    state: RefCell<TokenState>,
}

impl TokenService {
    pub fn new(client: &ClientConfig, tokens: Option<&Tokens>) -> Result<TokenService> {
        let auth_url = AuthUrl::new(AUTH_URL.to_string()).map_err(|e| Error::InvalidArgument {
            name: "auth_url",
            reason: e.to_string(),
        })?;
        let token_url =
            TokenUrl::new(TOKEN_URL.to_string()).map_err(|e| Error::InvalidArgument {
                name: "token_url",
                reason: e.to_string(),
            })?;

        let oauth2_client = BasicClient::new(
            ClientId::new(client.id.clone()),
            Some(ClientSecret::new(client.secret.clone())),
            auth_url,
            Some(token_url),
        )
        .set_auth_type(AuthType::RequestBody);

        // A configured access token may be stale already; it gets refreshed
        // on the first rejection.
        let state = TokenState {
            access: tokens.map(|t| AccessToken {
                secret: t.access.clone(),
                expire_at: None,
            }),
            refresh: tokens.map(|t| t.refresh.clone()),
        };

        Ok(TokenService {
            client_id: client.id.clone(),
            client_secret: client.secret.clone(),
            oauth2_client,
            http: reqwest::Client::new(),
            state: RefCell::new(state),
        })
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Whether requests can be made on behalf of a user.
    pub fn has_tokens(&self) -> bool {
        let state = self.state.borrow();
        state.access.is_some() || state.refresh.is_some()
    }

    pub fn obtain_access_token(&self) -> Result<String> {
        if let Some(token) = &self.state.borrow().access {
            if token.expire_at.map(|t| t > Instant::now()).unwrap_or(true) {
                return Ok(token.secret.clone());
            }
        }

        let refresh_token = match self.state.borrow().refresh.clone() {
            Some(token) => token,
            None => return Err(Error::NoAvailableToken),
        };

        let resp = self
            .oauth2_client
            .exchange_refresh_token(&RefreshToken::new(refresh_token))
            .request(http_client)
            .map_err(|e| Error::TokenRequest(e.into()))?;
        debug!("Refresh token response: {:?}", resp);

        let secret = resp.access_token().secret().clone();
        let mut state = self.state.borrow_mut();
        state.access = Some(AccessToken {
            secret: secret.clone(),
            expire_at: resp.expires_in().map(|d| Instant::now() + d),
        });
        if let Some(refresh) = resp.refresh_token() {
            state.refresh = Some(refresh.secret().clone());
        }
        Ok(secret)
    }

    pub fn expire_current(&self) {
        self.state.borrow_mut().access = None;
    }
}

impl PinAuthorizer for TokenService {
    fn authorization_url(&self) -> String {
        Url::parse_with_params(
            AUTH_URL,
            &[("client_id", self.client_id.as_str()), ("response_type", "pin")],
        )
        .expect("url parse")
        .to_string()
    }

    fn exchange_pin(&self, pin: &str) -> Result<Tokens> {
        let params = [
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("grant_type", "pin"),
            ("pin", pin),
        ];
        let mut resp = self.http.post(TOKEN_URL).form(&params).send()?;
        if !resp.status().is_success() {
            return Err(Error::TokenRequest(format_err!(
                "bad status code: {}",
                resp.status()
            )));
        }

        let resp: PinTokenResponse = resp.json()?;
        debug!(
            "Pin exchanged for tokens of {:?}",
            resp.account_username.as_deref().unwrap_or("unknown user")
        );

        let mut state = self.state.borrow_mut();
        state.access = Some(AccessToken {
            secret: resp.access_token.clone(),
            expire_at: resp
                .expires_in
                .map(|s| Instant::now() + Duration::from_secs(s)),
        });
        state.refresh = Some(resp.refresh_token.clone());

        Ok(Tokens {
            access: resp.access_token,
            refresh: resp.refresh_token,
        })
    }
}
