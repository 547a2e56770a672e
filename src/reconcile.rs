use crate::album::{self, Album, Error as _, ImageHost, ImageUpload, NewAlbum, Privacy};
use crate::scanner::ImageGroup;
use failure::Fail;
use log::{debug, info, warn};
use std::collections::HashMap;
use std::fmt;
use std::io::{self, Write};
use std::path::Path;

#[derive(Debug)]
pub enum Error<E> {
    Remote(E),
    /// An album came back without a deletion handle to attach uploads with
    MissingDeletehash(String),
    /// Progress could not be written out
    Output(io::Error),
}

impl<E: album::Error> Error<E> {
    pub fn is_rate_limited(&self) -> bool {
        match self {
            Error::Remote(e) => e.rate_limited().is_some(),
            _ => false,
        }
    }
}

impl<E: album::Error> fmt::Display for Error<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Remote(e) => write!(f, "{}", e),
            Error::MissingDeletehash(id) => write!(f, "Album {} has no deletehash", id),
            Error::Output(e) => write!(f, "Error writing progress: {}", e),
        }
    }
}

impl<E: album::Error> Fail for Error<E> {
    fn cause(&self) -> Option<&dyn Fail> {
        match self {
            Error::Remote(e) => Some(e),
            Error::Output(e) => Some(e),
            _ => None,
        }
    }
}

/// Print the remaining credits when `err` is a rate limit, then hand it back.
fn reported<E: album::Error, W: Write>(err: Error<E>, out: &mut W) -> Error<E> {
    if let Error::Remote(remote) = &err {
        if let Some(credits) = remote.rate_limited() {
            if let Err(e) = writeln!(out, "Passed limit {}", credits) {
                warn!("Failed to report credits {}: {}", credits, e);
            }
        }
    }
    err
}

/// Where mirrored images live and how their source URLs are derived.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct MirrorConfig {
    /// Name of the directory holding all images
    pub tracked_dir: String,
    /// Suffix of files to mirror
    pub extension: String,
    /// Base of the web URLs put into descriptions
    pub root_url: String,
    /// Replacement of `tracked_dir` in web URLs
    pub tree_segment: String,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        MirrorConfig {
            tracked_dir: "lnxpcs".to_string(),
            extension: ".png".to_string(),
            root_url: "https://github.com/jstpcs/".to_string(),
            tree_segment: "lnxpcs/tree/master".to_string(),
        }
    }
}

impl MirrorConfig {
    /// Web URL of the directory an album mirrors.
    pub fn album_url(&self, title: &str) -> String {
        format!(
            "{}{}",
            self.root_url,
            title.replace(&self.tracked_dir, &self.tree_segment)
        )
    }
}

#[derive(Debug, Default, Clone, Copy, Eq, PartialEq)]
pub struct Summary {
    pub albums_created: usize,
    pub images_uploaded: usize,
    pub images_skipped: usize,
}

/// Brings remote albums in line with local image groups.
///
/// Albums are looked up by exact title in a map populated once up front.
/// Albums created during the run are added to it, as are uploaded images.
pub struct Reconciler<'a, H: ImageHost> {
    host: &'a H,
    mirror: MirrorConfig,
    albums: HashMap<String, Album>,
    summary: Summary,
}

impl<'a, H: ImageHost> Reconciler<'a, H> {
    pub fn new(host: &'a H, mirror: MirrorConfig, albums: HashMap<String, Album>) -> Self {
        Reconciler {
            host,
            mirror,
            albums,
            summary: Summary::default(),
        }
    }

    /// Build a reconciler knowing every album of `user`, images included.
    pub fn prefetch<W: Write>(
        host: &'a H,
        user: &str,
        mirror: MirrorConfig,
        out: &mut W,
    ) -> Result<Self, Error<H::E>> {
        let albums = Self::fetch_albums(host, user).map_err(|e| reported(e, out))?;
        info!("Fetched {} albums of {}", albums.len(), user);
        Ok(Self::new(host, mirror, albums))
    }

    fn fetch_albums(host: &H, user: &str) -> Result<HashMap<String, Album>, Error<H::E>> {
        let mut albums = HashMap::new();
        let mut page = 0;
        loop {
            let summaries = host.account_albums(user, page).map_err(Error::Remote)?;
            if summaries.is_empty() {
                return Ok(albums);
            }
            for summary in summaries {
                let title = match summary.title {
                    Some(title) => title,
                    None => {
                        warn!("Ignoring untitled album {}", summary.id);
                        continue;
                    }
                };
                let album = host.album(&summary.id).map_err(Error::Remote)?;
                if albums.insert(title.clone(), album).is_some() {
                    warn!("Several albums are titled {}, using the last one", title);
                }
            }
            page += 1;
        }
    }

    pub fn albums(&self) -> &HashMap<String, Album> {
        &self.albums
    }

    /// Return the album titled `title`, creating it when there's none.
    fn resolve_album(&mut self, title: &str, album_url: &str) -> Result<&mut Album, Error<H::E>> {
        if !self.albums.contains_key(title) {
            let created = self
                .host
                .create_album(&NewAlbum {
                    title: title.to_string(),
                    description: format!("Album of images from {}", album_url),
                    privacy: Privacy::Hidden,
                })
                .map_err(Error::Remote)?;
            let album = self.host.album(&created.id).map_err(Error::Remote)?;
            self.summary.albums_created += 1;
            self.albums.insert(title.to_string(), album);
        }
        Ok(self.albums.get_mut(title).expect("album just resolved"))
    }

    /// Upload every file of `groups` not yet present in its album, writing
    /// progress to `out`.
    ///
    /// `root` is the directory group paths are relative to. Running out of
    /// rate allowance aborts the remaining groups.
    pub fn reconcile<W: Write>(
        &mut self,
        root: &Path,
        groups: &[ImageGroup],
        out: &mut W,
    ) -> Result<Summary, Error<H::E>> {
        for group in groups {
            self.reconcile_group(root, group, out)
                .map_err(|e| reported(e, out))?;
        }
        Ok(self.summary)
    }

    fn reconcile_group<W: Write>(
        &mut self,
        root: &Path,
        group: &ImageGroup,
        out: &mut W,
    ) -> Result<(), Error<H::E>> {
        let album_url = self.mirror.album_url(&group.dir);
        let host = self.host;
        let album = self.resolve_album(&group.dir, &album_url)?;
        writeln!(out, "Handling album {}", album_url).map_err(Error::Output)?;
        writeln!(out, "Album @ {}", album.link).map_err(Error::Output)?;

        let mut uploaded = 0;
        let mut skipped = 0;
        for file in &group.files {
            let title = format!("{}/{}", group.dir, file);
            let image_url = format!("{}/{}", album_url, file);
            writeln!(out, "\tHandling image {}", image_url).map_err(Error::Output)?;

            if album.image_titled(&title).is_some() {
                // Present already. Whether the local file is newer isn't checked.
                debug!("{} is already in album {}", title, album.id);
                skipped += 1;
                continue;
            }

            let deletehash = album
                .deletehash
                .clone()
                .ok_or_else(|| Error::MissingDeletehash(album.id.clone()))?;
            let image = host
                .upload_from_path(
                    &root.join(&group.dir).join(file),
                    &ImageUpload {
                        title: title.clone(),
                        description: format!("A mirror of {}", image_url),
                        album: Some(deletehash),
                    },
                )
                .map_err(Error::Remote)?;
            writeln!(out, "\t\tUploaded to {}", image.link).map_err(Error::Output)?;
            album.images.push(image);
            uploaded += 1;
        }

        self.summary.images_uploaded += uploaded;
        self.summary.images_skipped += skipped;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::album::{AlbumSummary, CreatedAlbum, Credits, Image};
    use std::cell::RefCell;
    use std::path::PathBuf;
    use std::rc::Rc;

    #[derive(Debug, Fail)]
    pub enum MockError {
        #[fail(display = "rate limited")]
        RateLimited(Credits),
        #[fail(display = "no such album {}", _0)]
        NoSuchAlbum(String),
    }

    impl album::Error for MockError {
        fn rate_limited(&self) -> Option<&Credits> {
            match self {
                MockError::RateLimited(c) => Some(c),
                _ => None,
            }
        }
    }

    #[derive(Debug, Clone, PartialEq)]
    pub enum Call {
        AccountAlbums(String, u32),
        Album(String),
        Create(NewAlbum),
        Upload(PathBuf, ImageUpload),
    }

    /// In-memory host recording every call made to it.
    pub struct MockHost {
        pub albums: RefCell<Vec<Album>>,
        pub calls: Rc<RefCell<Vec<Call>>>,
        /// Uploads beyond this many fail with a rate limit
        pub upload_allowance: Option<usize>,
        /// Listing account albums fails with a rate limit
        pub listing_limited: bool,
        pub page_size: usize,
    }

    impl MockHost {
        pub fn new(albums: Vec<Album>) -> MockHost {
            MockHost {
                albums: RefCell::new(albums),
                calls: Rc::new(RefCell::new(Vec::new())),
                upload_allowance: None,
                listing_limited: false,
                page_size: 2,
            }
        }

        pub fn creates(&self) -> Vec<NewAlbum> {
            self.calls
                .borrow()
                .iter()
                .filter_map(|c| match c {
                    Call::Create(a) => Some(a.clone()),
                    _ => None,
                })
                .collect()
        }

        pub fn uploads(&self) -> Vec<(PathBuf, ImageUpload)> {
            self.calls
                .borrow()
                .iter()
                .filter_map(|c| match c {
                    Call::Upload(p, u) => Some((p.clone(), u.clone())),
                    _ => None,
                })
                .collect()
        }
    }

    impl ImageHost for MockHost {
        type E = MockError;

        fn account_albums(&self, user: &str, page: u32) -> Result<Vec<AlbumSummary>, MockError> {
            self.calls
                .borrow_mut()
                .push(Call::AccountAlbums(user.to_string(), page));
            if self.listing_limited {
                return Err(MockError::RateLimited(self.credits()));
            }
            Ok(self
                .albums
                .borrow()
                .iter()
                .skip(page as usize * self.page_size)
                .take(self.page_size)
                .map(|a| AlbumSummary {
                    id: a.id.clone(),
                    title: a.title.clone(),
                })
                .collect())
        }

        fn album(&self, id: &str) -> Result<Album, MockError> {
            self.calls.borrow_mut().push(Call::Album(id.to_string()));
            self.albums
                .borrow()
                .iter()
                .find(|a| a.id == id)
                .cloned()
                .ok_or_else(|| MockError::NoSuchAlbum(id.to_string()))
        }

        fn create_album(&self, album: &NewAlbum) -> Result<CreatedAlbum, MockError> {
            self.calls.borrow_mut().push(Call::Create(album.clone()));
            let mut albums = self.albums.borrow_mut();
            let id = format!("new{}", albums.len());
            albums.push(Album {
                id: id.clone(),
                title: Some(album.title.clone()),
                deletehash: Some(format!("dh-{}", id)),
                link: format!("https://imgur.com/a/{}", id),
                images: Vec::new(),
            });
            Ok(CreatedAlbum {
                id: id.clone(),
                deletehash: Some(format!("dh-{}", id)),
            })
        }

        fn upload_from_path(&self, path: &Path, meta: &ImageUpload) -> Result<Image, MockError> {
            let done = self.uploads().len();
            if self.upload_allowance.map(|n| done >= n).unwrap_or(false) {
                return Err(MockError::RateLimited(self.credits()));
            }
            self.calls
                .borrow_mut()
                .push(Call::Upload(path.to_path_buf(), meta.clone()));
            Ok(Image {
                id: format!("img{}", done),
                title: Some(meta.title.clone()),
                link: format!("https://i.imgur.com/img{}.png", done),
            })
        }

        fn credits(&self) -> Credits {
            Credits {
                client_remaining: Some(0),
                ..Credits::default()
            }
        }
    }

    pub fn remote_album(id: &str, title: &str, images: &[&str]) -> Album {
        Album {
            id: id.to_string(),
            title: Some(title.to_string()),
            deletehash: Some(format!("dh-{}", id)),
            link: format!("https://imgur.com/a/{}", id),
            images: images
                .iter()
                .enumerate()
                .map(|(i, t)| Image {
                    id: format!("{}-{}", id, i),
                    title: Some(t.to_string()),
                    link: format!("https://i.imgur.com/{}-{}.png", id, i),
                })
                .collect(),
        }
    }

    fn foo_group() -> ImageGroup {
        ImageGroup {
            dir: "lnxpcs/foo".to_string(),
            files: vec!["a.png".to_string(), "b.png".to_string()],
        }
    }

    #[test]
    fn test_album_url() {
        let mirror = MirrorConfig::default();
        assert_eq!(
            "https://github.com/jstpcs/lnxpcs/tree/master/foo",
            mirror.album_url("lnxpcs/foo")
        );
        assert_eq!(
            "https://github.com/jstpcs/lnxpcs/tree/master",
            mirror.album_url("lnxpcs")
        );
    }

    #[test]
    fn test_prefetch_pages_all_albums() {
        let host = MockHost::new(vec![
            remote_album("1", "lnxpcs/a", &[]),
            remote_album("2", "lnxpcs/b", &["lnxpcs/b/x.png"]),
            remote_album("3", "lnxpcs/c", &[]),
        ]);
        let reconciler =
            Reconciler::prefetch(&host, "jstpcs", MirrorConfig::default(), &mut io::sink())
                .unwrap();

        let mut titles: Vec<_> = reconciler.albums().keys().cloned().collect();
        titles.sort();
        assert_eq!(vec!["lnxpcs/a", "lnxpcs/b", "lnxpcs/c"], titles);
        assert_eq!(1, reconciler.albums()["lnxpcs/b"].images.len());
        assert_eq!(
            vec![
                Call::AccountAlbums("jstpcs".to_string(), 0),
                Call::Album("1".to_string()),
                Call::Album("2".to_string()),
                Call::AccountAlbums("jstpcs".to_string(), 1),
                Call::Album("3".to_string()),
                Call::AccountAlbums("jstpcs".to_string(), 2),
            ],
            *host.calls.borrow()
        );
    }

    #[test]
    fn test_creates_missing_album_and_uploads_all() {
        let host = MockHost::new(Vec::new());
        let mut reconciler =
            Reconciler::prefetch(&host, "jstpcs", MirrorConfig::default(), &mut io::sink())
                .unwrap();
        let summary = reconciler
            .reconcile(Path::new("/repo"), &[foo_group()], &mut io::sink())
            .unwrap();

        assert_eq!(
            vec![NewAlbum {
                title: "lnxpcs/foo".to_string(),
                description:
                    "Album of images from https://github.com/jstpcs/lnxpcs/tree/master/foo"
                        .to_string(),
                privacy: Privacy::Hidden,
            }],
            host.creates()
        );
        assert_eq!(
            vec![
                (
                    PathBuf::from("/repo/lnxpcs/foo/a.png"),
                    ImageUpload {
                        title: "lnxpcs/foo/a.png".to_string(),
                        description:
                            "A mirror of https://github.com/jstpcs/lnxpcs/tree/master/foo/a.png"
                                .to_string(),
                        album: Some("dh-new0".to_string()),
                    }
                ),
                (
                    PathBuf::from("/repo/lnxpcs/foo/b.png"),
                    ImageUpload {
                        title: "lnxpcs/foo/b.png".to_string(),
                        description:
                            "A mirror of https://github.com/jstpcs/lnxpcs/tree/master/foo/b.png"
                                .to_string(),
                        album: Some("dh-new0".to_string()),
                    }
                ),
            ],
            host.uploads()
        );
        assert_eq!(
            Summary {
                albums_created: 1,
                images_uploaded: 2,
                images_skipped: 0,
            },
            summary
        );
    }

    #[test]
    fn test_reuses_existing_album_and_skips_present_images() {
        let host = MockHost::new(vec![remote_album(
            "foo",
            "lnxpcs/foo",
            &["lnxpcs/foo/a.png"],
        )]);
        let mut reconciler =
            Reconciler::prefetch(&host, "jstpcs", MirrorConfig::default(), &mut io::sink())
                .unwrap();
        let summary = reconciler
            .reconcile(Path::new("/repo"), &[foo_group()], &mut io::sink())
            .unwrap();

        assert!(host.creates().is_empty());
        let uploads = host.uploads();
        assert_eq!(1, uploads.len());
        assert_eq!(PathBuf::from("/repo/lnxpcs/foo/b.png"), uploads[0].0);
        assert_eq!("lnxpcs/foo/b.png", uploads[0].1.title);
        assert_eq!(Some("dh-foo".to_string()), uploads[0].1.album);
        assert_eq!(
            Summary {
                albums_created: 0,
                images_uploaded: 1,
                images_skipped: 1,
            },
            summary
        );
    }

    #[test]
    fn test_title_match_is_exact() {
        let host = MockHost::new(vec![
            remote_album("x", "lnxpcs/Foo", &[]),
            remote_album("y", "lnxpcs/foo/", &[]),
        ]);
        let mut reconciler =
            Reconciler::prefetch(&host, "jstpcs", MirrorConfig::default(), &mut io::sink())
                .unwrap();
        reconciler
            .reconcile(Path::new("/repo"), &[foo_group()], &mut io::sink())
            .unwrap();
        assert_eq!(1, host.creates().len());
    }

    #[test]
    fn test_created_album_is_reused_within_run() {
        let host = MockHost::new(Vec::new());
        let mut reconciler = Reconciler::new(&host, MirrorConfig::default(), HashMap::new());
        let first = ImageGroup {
            dir: "lnxpcs/foo".to_string(),
            files: vec!["a.png".to_string()],
        };
        reconciler
            .reconcile(
                Path::new("/repo"),
                &[first.clone(), foo_group()],
                &mut io::sink(),
            )
            .unwrap();

        assert_eq!(1, host.creates().len());
        // a.png got recorded as uploaded by the first group
        let titles: Vec<_> = host.uploads().into_iter().map(|(_, u)| u.title).collect();
        assert_eq!(vec!["lnxpcs/foo/a.png", "lnxpcs/foo/b.png"], titles);
    }

    #[test]
    fn test_rate_limit_aborts_run() {
        let mut host = MockHost::new(Vec::new());
        host.upload_allowance = Some(1);
        let bar = ImageGroup {
            dir: "lnxpcs/bar".to_string(),
            files: vec!["c.png".to_string()],
        };
        let mut reconciler = Reconciler::new(&host, MirrorConfig::default(), HashMap::new());
        let mut out = Vec::new();
        let err = reconciler
            .reconcile(Path::new("/repo"), &[foo_group(), bar], &mut out)
            .unwrap_err();

        assert!(err.is_rate_limited());
        assert_eq!(1, host.uploads().len());
        // Nothing is attempted for the group after the failure
        assert_eq!(1, host.creates().len());
        let out = String::from_utf8(out).unwrap();
        assert!(out.contains(
            "\tHandling image https://github.com/jstpcs/lnxpcs/tree/master/foo/b.png\n"
        ));
        assert!(out.ends_with("Passed limit user ?/? (resets ?), client 0/?\n"));
        assert!(!out.contains("lnxpcs/tree/master/bar"));
    }

    #[test]
    fn test_rate_limited_prefetch_reports_credits() {
        let mut host = MockHost::new(vec![remote_album("1", "lnxpcs/a", &[])]);
        host.listing_limited = true;
        let mut out = Vec::new();
        match Reconciler::prefetch(&host, "jstpcs", MirrorConfig::default(), &mut out) {
            Err(e) => assert!(e.is_rate_limited()),
            Ok(_) => panic!("prefetch succeeded"),
        }
        assert_eq!(
            "Passed limit user ?/? (resets ?), client 0/?\n",
            String::from_utf8(out).unwrap()
        );
        assert_eq!(
            vec![Call::AccountAlbums("jstpcs".to_string(), 0)],
            *host.calls.borrow()
        );
    }

    #[test]
    fn test_progress_output() {
        let host = MockHost::new(Vec::new());
        let mut albums = HashMap::new();
        albums.insert(
            "lnxpcs/foo".to_string(),
            remote_album("foo", "lnxpcs/foo", &["lnxpcs/foo/a.png"]),
        );
        let mut reconciler = Reconciler::new(&host, MirrorConfig::default(), albums);
        let mut out = Vec::new();
        reconciler
            .reconcile(Path::new("/repo"), &[foo_group()], &mut out)
            .unwrap();
        assert_eq!(
            "Handling album https://github.com/jstpcs/lnxpcs/tree/master/foo\n\
             Album @ https://imgur.com/a/foo\n\
             \tHandling image https://github.com/jstpcs/lnxpcs/tree/master/foo/a.png\n\
             \tHandling image https://github.com/jstpcs/lnxpcs/tree/master/foo/b.png\n\
             \t\tUploaded to https://i.imgur.com/img0.png\n",
            String::from_utf8(out).unwrap()
        );
    }

    #[test]
    fn test_missing_deletehash() {
        let mut album = remote_album("foo", "lnxpcs/foo", &[]);
        album.deletehash = None;
        let host = MockHost::new(vec![album]);
        let mut reconciler =
            Reconciler::prefetch(&host, "jstpcs", MirrorConfig::default(), &mut io::sink())
                .unwrap();
        match reconciler.reconcile(Path::new("/repo"), &[foo_group()], &mut io::sink()) {
            Err(Error::MissingDeletehash(id)) => assert_eq!("foo", id),
            other => panic!("unexpected result: {:?}", other),
        }
        assert!(host.uploads().is_empty());
    }
}
