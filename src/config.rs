use failure::Fail;
use ini::{Ini, Properties};
use log::debug;
use std::fmt;
use std::io;
use std::path::Path;

pub const CONFIG_FILENAME: &str = "imgur.ini";

const DEFAULT_SECTION: &str = "DEFAULT";
const CLIENT_SECTION: &str = "client";
const TOKENS_SECTION: &str = "tokens";

#[derive(Debug, Fail)]
pub enum Error {
    #[fail(display = "IO error in config file: {}", _0)]
    IO(#[fail(cause)] io::Error),
    #[fail(display = "Malformed config file: {}", _0)]
    Parse(String),
    /// Required sections or keys are absent
    #[fail(display = "{}", _0)]
    Invalid(Problems),
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::IO(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Problem {
    MissingClientSection,
    IncompleteClient { missing: Vec<&'static str> },
    MissingUser,
}

impl fmt::Display for Problem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Problem::MissingClientSection => write!(
                f,
                "You need a client configuration to access imgur. Get one at https://apidocs.imgur.com/"
            ),
            Problem::IncompleteClient { missing } => {
                write!(f, "Client config incomplete! Missing: {}", missing.join(", "))
            }
            Problem::MissingUser => write!(
                f,
                "Please add an imgur user to the default section of the configuration"
            ),
        }
    }
}

/// Every problem found while validating a config file, client section first.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Problems(pub Vec<Problem>);

impl fmt::Display for Problems {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let lines: Vec<_> = self.0.iter().map(ToString::to_string).collect();
        write!(f, "{}", lines.join("\n"))
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ClientConfig {
    pub id: String,
    pub secret: String,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Tokens {
    pub access: String,
    pub refresh: String,
}

/// Validated content of `imgur.ini`.
///
/// The file looks like:
/// ```text
/// [DEFAULT]
/// user = <imgur user owning the albums>
///
/// [client]
/// id = <app ID>
/// secret = <app secret>
///
/// [tokens]
/// access = <access token>
/// refresh = <refresh token>
/// ```
/// `tokens` is optional and gets filled in by the pin exchange. Key names
/// match regardless of ASCII case, section names don't.
#[derive(Clone)]
pub struct Config {
    pub user: String,
    pub client: ClientConfig,
    pub tokens: Option<Tokens>,
    document: Ini,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("user", &self.user)
            .field("client_id", &self.client.id)
            .field("has_tokens", &self.tokens.is_some())
            .finish()
    }
}

fn lookup<'a>(section: &'a Properties, key: &str) -> Option<&'a str> {
    section
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(key))
        .map(|(_, v)| v)
}

impl Config {
    /// Load and validate the config at `path`. A missing file reads as empty.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Config> {
        let path = path.as_ref();
        let document = match Ini::load_from_file(path) {
            Ok(doc) => doc,
            Err(ini::Error::Io(ref e)) if e.kind() == io::ErrorKind::NotFound => {
                debug!("No config at {}, starting empty", path.display());
                Ini::new()
            }
            Err(ini::Error::Io(e)) => return Err(Error::IO(e)),
            Err(ini::Error::Parse(e)) => return Err(Error::Parse(e.to_string())),
        };
        Self::from_document(document)
    }

    pub fn parse(content: &str) -> Result<Config> {
        let document = Ini::load_from_str(content).map_err(|e| Error::Parse(e.to_string()))?;
        Self::from_document(document)
    }

    fn from_document(document: Ini) -> Result<Config> {
        let mut problems = Vec::new();

        let client = match document.section(Some(CLIENT_SECTION)) {
            None => {
                problems.push(Problem::MissingClientSection);
                None
            }
            Some(section) => match (lookup(section, "id"), lookup(section, "secret")) {
                (Some(id), Some(secret)) => Some(ClientConfig {
                    id: id.to_string(),
                    secret: secret.to_string(),
                }),
                (id, secret) => {
                    let mut missing = Vec::new();
                    if id.is_none() {
                        missing.push("id");
                    }
                    if secret.is_none() {
                        missing.push("secret");
                    }
                    problems.push(Problem::IncompleteClient { missing });
                    None
                }
            },
        };

        let user = document
            .section(Some(DEFAULT_SECTION))
            .and_then(|s| lookup(s, "user"))
            .or_else(|| {
                document
                    .section(None::<String>)
                    .and_then(|s| lookup(s, "user"))
            })
            .map(String::from);
        if user.is_none() {
            problems.push(Problem::MissingUser);
        }

        let tokens = document.section(Some(TOKENS_SECTION)).and_then(|s| {
            match (lookup(s, "access"), lookup(s, "refresh")) {
                (Some(access), Some(refresh)) => Some(Tokens {
                    access: access.to_string(),
                    refresh: refresh.to_string(),
                }),
                _ => None,
            }
        });

        match (user, client) {
            (Some(user), Some(client)) if problems.is_empty() => Ok(Config {
                user,
                client,
                tokens,
                document,
            }),
            _ => Err(Error::Invalid(Problems(problems))),
        }
    }

    pub fn with_tokens(mut self, tokens: Tokens) -> Config {
        self.tokens = Some(tokens);
        self
    }

    /// Write the config back to `path`, keeping sections this tool doesn't know about.
    pub fn persist<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut document = self.document.clone();
        if let Some(tokens) = &self.tokens {
            if let Some(section) = document.section_mut(Some(TOKENS_SECTION)) {
                let stale: Vec<String> = section
                    .iter()
                    .map(|(k, _)| k)
                    .filter(|k| {
                        k.eq_ignore_ascii_case("access") || k.eq_ignore_ascii_case("refresh")
                    })
                    .map(String::from)
                    .collect();
                for key in stale {
                    section.remove(&key);
                }
            }
            document
                .with_section(Some(TOKENS_SECTION))
                .set("access", tokens.access.as_str())
                .set("refresh", tokens.refresh.as_str());
        }
        document.write_to_file(path.as_ref())?;
        debug!("Config written to {}", path.as_ref().display());
        Ok(())
    }
}
