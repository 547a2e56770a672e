pub mod album;
pub mod config;
pub mod imgur;
pub mod oauth;
pub mod reconcile;
pub mod scanner;

use album::ImageHost;
use config::Config;
use failure::Fail;
use log::info;
use oauth::{PinAuthorizer, TokenService};
use reconcile::{MirrorConfig, Reconciler, Summary};
use std::env;
use std::fs;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

#[derive(Debug, Fail)]
pub enum Error {
    #[fail(
        display = "Please provide a path to a {} directory. Given {}",
        expected, given
    )]
    WrongDirName { expected: String, given: String },
    #[fail(
        display = "Please provide a path to an EXISTING {} directory. Given {}",
        expected, given
    )]
    NotADirectory { expected: String, given: String },
    #[fail(display = "IO error resolving {:?}: {}", path, cause)]
    IO {
        path: PathBuf,
        #[fail(cause)]
        cause: io::Error,
    },
}

pub struct Options {
    pub repo_dir: PathBuf,
    pub config_path: PathBuf,
    pub mirror: MirrorConfig,
}

/// Check that `repo_dir` is an existing directory named `tracked` and
/// return the directory containing it.
pub fn validate_repo_dir(repo_dir: &Path, tracked: &str) -> Result<PathBuf, Error> {
    let io_err = |cause| Error::IO {
        path: repo_dir.to_path_buf(),
        cause,
    };
    let given = repo_dir.display().to_string();
    let path = if repo_dir.is_absolute() {
        repo_dir.to_path_buf()
    } else {
        env::current_dir().map_err(io_err)?.join(repo_dir)
    };

    if path.file_name().and_then(|n| n.to_str()) != Some(tracked) {
        return Err(Error::WrongDirName {
            expected: tracked.to_string(),
            given,
        });
    }
    if !path.is_dir() {
        return Err(Error::NotADirectory {
            expected: tracked.to_string(),
            given,
        });
    }

    let path = fs::canonicalize(&path).map_err(io_err)?;
    Ok(path.parent().map(Path::to_path_buf).unwrap_or(path))
}

/// Obtain tokens through the pin exchange and save them into `config_path`.
pub fn authorize<A, R, W>(
    authorizer: &A,
    config: Config,
    config_path: &Path,
    input: R,
    mut output: W,
) -> Result<Config, failure::Error>
where
    A: PinAuthorizer,
    R: BufRead,
    W: Write,
{
    let config = oauth::acquire_tokens(authorizer, config, input, &mut output)?;
    config.persist(config_path)?;
    writeln!(output, "Updated config for future use")?;
    Ok(config)
}

/// Upload every image under `root` missing from the albums of `user`,
/// writing progress to `output`.
pub fn mirror<H, W>(
    host: &H,
    user: &str,
    root: &Path,
    mirror: MirrorConfig,
    output: &mut W,
) -> Result<Summary, failure::Error>
where
    H: ImageHost,
    W: Write,
{
    let groups = scanner::scan(root, &mirror.tracked_dir, &mirror.extension)?;
    info!("Found {} directories with images", groups.len());
    let mut reconciler = Reconciler::prefetch(host, user, mirror, output)?;
    Ok(reconciler.reconcile(root, &groups, output)?)
}

pub fn run(options: Options) -> Result<Summary, failure::Error> {
    let stdin = io::stdin();
    run_with(
        options,
        |config| Ok(TokenService::new(&config.client, None)?),
        |config| Ok(imgur::new_imgur_client(config)?),
        stdin.lock(),
        io::stdout(),
    )
}

/// Validate the repository, load the config, run the pin exchange when no
/// tokens are configured and mirror through the host made by `connect`.
///
/// `authorizer` is only called when the pin exchange is needed. `connect`
/// sees the config holding the tokens.
pub fn run_with<A, H, FA, FH, R, W>(
    options: Options,
    authorizer: FA,
    connect: FH,
    input: R,
    mut output: W,
) -> Result<Summary, failure::Error>
where
    A: PinAuthorizer,
    H: ImageHost,
    FA: FnOnce(&Config) -> Result<A, failure::Error>,
    FH: FnOnce(&Config) -> Result<H, failure::Error>,
    R: BufRead,
    W: Write,
{
    let root = validate_repo_dir(&options.repo_dir, &options.mirror.tracked_dir)?;
    let mut config = Config::load(&options.config_path)?;

    if config.tokens.is_none() {
        let authorizer = authorizer(&config)?;
        config = authorize(
            &authorizer,
            config,
            &options.config_path,
            input,
            &mut output,
        )?;
    }

    let host = connect(&config)?;
    mirror(&host, &config.user, &root, options.mirror, &mut output)
}
