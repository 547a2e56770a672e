use clap::{App, Arg};
use env_logger;
use imgur_mirror::config::{self, CONFIG_FILENAME};
use imgur_mirror::reconcile::MirrorConfig;
use imgur_mirror::{self, Options};
use log::{error, info};
use std::env;
use std::path::PathBuf;

fn main() {
    env_logger::init();

    let matches = App::new("Imgur mirror")
        .version("0.1")
        .about("A helper to upload all images in the repo to imgur")
        .arg(
            Arg::with_name("repo_dir")
                .short("d")
                .long("repo_dir")
                .takes_value(true)
                .help("A path to the repository containing all the sweet sweet linux images"),
        )
        .get_matches();

    let repo_dir = match matches.value_of_os("repo_dir") {
        Some(dir) => PathBuf::from(dir),
        None => match env::current_dir() {
            Ok(dir) => dir,
            Err(e) => {
                eprintln!("Cannot determine the current directory: {}", e);
                std::process::exit(1);
            }
        },
    };

    let options = Options {
        repo_dir,
        config_path: PathBuf::from(CONFIG_FILENAME),
        mirror: MirrorConfig::default(),
    };

    match imgur_mirror::run(options) {
        Ok(summary) => info!(
            "Done: {} albums created, {} images uploaded, {} already present",
            summary.albums_created, summary.images_uploaded, summary.images_skipped
        ),
        Err(e) => {
            if let Some(e) = e.downcast_ref::<imgur_mirror::Error>() {
                eprintln!("{}", e);
            } else if let Some(config::Error::Invalid(problems)) = e.downcast_ref::<config::Error>()
            {
                eprintln!("{}", problems);
            } else {
                error!("Error happend, shutting down: {}", e);
            }
            std::process::exit(1);
        }
    }
}
