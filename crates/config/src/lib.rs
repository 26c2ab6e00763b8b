//! Configuration loading and validation.
//!
//! Sources are layered, later ones overriding earlier ones:
//!
//! 1. Built-in defaults.
//! 2. A configuration file (TOML, YAML or JSON, chosen by extension). When
//!    no file is given, `<config_dir>/pkgrepo/config.toml` is used if it
//!    exists.
//! 3. Environment variables prefixed with `PKGREPO_`, using `__` to nest:
//!    `PKGREPO_REPOS__MAIN__RETENTION=3`.
//!
//! ```toml
//! port = 8197
//! auth_token = "s3cret"
//!
//! [repos.netbsd-10]
//! path = "/srv/packages/netbsd-10/All"
//! mount = "/netbsd-10"
//! upstream = "rsync://ftp.netbsd.org/pub/pkgsrc/packages/NetBSD/amd64/10.0/All/"
//! retention = 2
//! ```

pub mod error;

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use tracing::instrument;

const APPLICATION: &str = "pkgrepo";
const CONFIG_FILENAME: &str = "config.toml";
const ENV_PREFIX: &str = "PKGREPO_";
const ENV_SEPARATOR: &str = "__";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Listen address for the HTTP front end that serves repositories. Not
    /// used by the CLI.
    pub address: IpAddr,
    /// Listen port for the HTTP front end. Not used by the CLI.
    pub port: u16,
    /// Holds one cache database per repository.
    pub cache_dir: PathBuf,
    /// Staging area for uploads before they are moved into a repository.
    /// `pkgrepo upload` copies the given file here first, so the original is
    /// never moved.
    pub tmp_dir: PathBuf,
    /// Shared secret for uploads. Uploads are refused while unset.
    pub auth_token: Option<String>,
    pub extractor: ExtractorConfig,
    pub mirror: MirrorConfig,
    /// File extensions recognised as package files, without the dot.
    pub extensions: Vec<String>,
    pub repos: BTreeMap<String, RepoConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractorConfig {
    /// Defaults to `pkg_info` discovered on `PATH`.
    pub command: Option<PathBuf>,
    pub args: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MirrorConfig {
    pub command: PathBuf,
    pub args: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoConfig {
    /// Directory holding the package files.
    pub path: PathBuf,
    /// URL prefix the HTTP front end serves the repository under. Checked at
    /// load time, otherwise unused by the CLI.
    pub mount: String,
    /// Mirror source passed to the mirroring command.
    #[serde(default)]
    pub upstream: Option<String>,
    /// Number of versions of each package to keep; unlimited when unset.
    #[serde(default)]
    pub retention: Option<u32>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 8197,
            cache_dir: default_cache_dir(),
            tmp_dir: std::env::temp_dir(),
            auth_token: None,
            extractor: ExtractorConfig::default(),
            mirror: MirrorConfig::default(),
            extensions: pkgrepo_storage::DEFAULT_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
            repos: BTreeMap::new(),
        }
    }
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self { command: None, args: vec!["-X".to_string()] }
    }
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            command: PathBuf::from("rsync"),
            args: vec!["-irz".to_string(), "--size-only".to_string()],
        }
    }
}

fn default_cache_dir() -> PathBuf {
    directories::BaseDirs::new()
        .map(|dirs| dirs.cache_dir().join(APPLICATION))
        .unwrap_or_else(|| std::env::temp_dir().join(APPLICATION))
}

/// Location of the configuration file used when none is specified.
pub fn default_config_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|dirs| dirs.config_dir().join(APPLICATION).join(CONFIG_FILENAME))
}

impl Config {
    /// Build the layered configuration sources without extracting them.
    ///
    /// An explicitly given file must exist; the default file is optional.
    pub fn figment(file: Option<&Path>) -> Result<Figment> {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));
        match file {
            Some(path) => {
                if !path.is_file() {
                    exn::bail!(ErrorKind::NotFound(path.to_path_buf()));
                }
                figment = Self::merge_file(figment, path)?;
            },
            None => {
                if let Some(path) = default_config_path().filter(|p| p.is_file()) {
                    figment = Self::merge_file(figment, &path)?;
                }
            },
        }
        Ok(figment.merge(Env::prefixed(ENV_PREFIX).split(ENV_SEPARATOR)))
    }

    fn merge_file(figment: Figment, path: &Path) -> Result<Figment> {
        let extension = path.extension().and_then(|e| e.to_str()).map(str::to_ascii_lowercase);
        Ok(match extension.as_deref() {
            Some("toml") => figment.merge(Toml::file(path)),
            Some("yaml" | "yml") => figment.merge(Yaml::file(path)),
            Some("json") => figment.merge(Json::file(path)),
            _ => exn::bail!(ErrorKind::UnsupportedFormat(path.to_path_buf())),
        })
    }

    /// Load and validate the configuration.
    #[instrument(level = "debug")]
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let config: Config = Self::figment(file)?.extract().or_raise(|| ErrorKind::Load)?;
        config.validate()?;
        tracing::debug!(repos = config.repos.len(), "Configuration loaded");
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.repos.is_empty() {
            exn::bail!(ErrorKind::Invalid("at least one repository must be configured".to_string()));
        }
        if self.extensions.is_empty() {
            exn::bail!(ErrorKind::Invalid("at least one package extension must be configured".to_string()));
        }
        for (id, repo) in &self.repos {
            if id.is_empty() || id.starts_with('.') || pkgrepo_storage::validate_filename(id).is_err() {
                exn::bail!(ErrorKind::Invalid(format!("repository id {id:?} is not a valid file name")));
            }
            if !repo.path.is_absolute() {
                exn::bail!(ErrorKind::Invalid(format!("repository {id}: path must be absolute")));
            }
            if !repo.mount.starts_with('/') {
                exn::bail!(ErrorKind::Invalid(format!("repository {id}: mount must begin with '/'")));
            }
            if repo.retention == Some(0) {
                exn::bail!(ErrorKind::Invalid(format!("repository {id}: retention must be at least 1")));
            }
        }
        Ok(())
    }

    /// The repositories to operate on: just `id` if given, otherwise all.
    pub fn select_repos(&self, id: Option<&str>) -> Result<Vec<(&str, &RepoConfig)>> {
        match id {
            Some(id) => match self.repos.get_key_value(id) {
                Some((id, repo)) => Ok(vec![(id.as_str(), repo)]),
                None => exn::bail!(ErrorKind::Invalid(format!("unknown repository {id:?}"))),
            },
            None => Ok(self.repos.iter().map(|(id, repo)| (id.as_str(), repo)).collect()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;
    use rstest::rstest;

    const MINIMAL: &str = r#"
        [repos.main]
        path = "/srv/packages/All"
        mount = "/main"
    "#;

    fn repo(path: &str, mount: &str, retention: Option<u32>) -> RepoConfig {
        RepoConfig {
            path: PathBuf::from(path),
            mount: mount.to_string(),
            upstream: None,
            retention,
        }
    }

    #[test]
    fn test_defaults() {
        Jail::expect_with(|jail| {
            jail.create_file("config.toml", MINIMAL)?;
            let config = Config::load(Some(Path::new("config.toml"))).unwrap();
            assert_eq!(config.address, IpAddr::V4(Ipv4Addr::UNSPECIFIED));
            assert_eq!(config.port, 8197);
            assert_eq!(config.extractor.command, None);
            assert_eq!(config.extractor.args, vec!["-X"]);
            assert_eq!(config.mirror.command, PathBuf::from("rsync"));
            assert_eq!(config.mirror.args, vec!["-irz", "--size-only"]);
            assert_eq!(config.extensions, vec!["tgz", "tbz", "tlz", "txz"]);
            assert_eq!(config.auth_token, None);
            assert_eq!(config.repos["main"], repo("/srv/packages/All", "/main", None));
            Ok(())
        });
    }

    #[test]
    fn test_environment_overrides_file() {
        Jail::expect_with(|jail| {
            jail.create_file("config.toml", MINIMAL)?;
            jail.set_env("PKGREPO_PORT", "9000");
            jail.set_env("PKGREPO_AUTH_TOKEN", "s3cret");
            jail.set_env("PKGREPO_REPOS__MAIN__RETENTION", "3");
            let config = Config::load(Some(Path::new("config.toml"))).unwrap();
            assert_eq!(config.port, 9000);
            assert_eq!(config.auth_token.as_deref(), Some("s3cret"));
            assert_eq!(config.repos["main"].retention, Some(3));
            Ok(())
        });
    }

    #[test]
    fn test_yaml_and_json_files() {
        Jail::expect_with(|jail| {
            jail.create_file("config.yaml", "repos:\n  main:\n    path: /srv/a\n    mount: /a\n")?;
            jail.create_file("config.json", r#"{"repos": {"main": {"path": "/srv/b", "mount": "/b"}}}"#)?;
            let yaml = Config::load(Some(Path::new("config.yaml"))).unwrap();
            assert_eq!(yaml.repos["main"].path, PathBuf::from("/srv/a"));
            let json = Config::load(Some(Path::new("config.json"))).unwrap();
            assert_eq!(json.repos["main"].mount, "/b");
            Ok(())
        });
    }

    #[test]
    fn test_missing_and_unsupported_files() {
        Jail::expect_with(|jail| {
            let err = Config::load(Some(Path::new("nope.toml"))).unwrap_err();
            assert_eq!(*err, ErrorKind::NotFound(PathBuf::from("nope.toml")));
            jail.create_file("config.ini", "port=1")?;
            let err = Config::load(Some(Path::new("config.ini"))).unwrap_err();
            assert_eq!(*err, ErrorKind::UnsupportedFormat(PathBuf::from("config.ini")));
            Ok(())
        });
    }

    #[test]
    fn test_malformed_file() {
        Jail::expect_with(|jail| {
            jail.create_file("config.toml", "[repos.main]\npath = \"/srv\"\nmount = [1, 2]\n")?;
            let err = Config::load(Some(Path::new("config.toml"))).unwrap_err();
            assert_eq!(*err, ErrorKind::Load);
            Ok(())
        });
    }

    #[rstest]
    #[case::relative_path("main", repo("srv/packages", "/main", None))]
    #[case::mount_without_slash("main", repo("/srv/packages", "main", None))]
    #[case::zero_retention("main", repo("/srv/packages", "/main", Some(0)))]
    #[case::id_with_separator("main/all", repo("/srv/packages", "/main", None))]
    #[case::hidden_id(".main", repo("/srv/packages", "/main", None))]
    #[case::empty_id("", repo("/srv/packages", "/main", None))]
    fn test_invalid_repos(#[case] id: &str, #[case] repo: RepoConfig) {
        let config = Config {
            repos: BTreeMap::from([(id.to_string(), repo)]),
            ..Config::default()
        };
        let err = config.validate().unwrap_err();
        assert!(matches!(&*err, ErrorKind::Invalid(_)));
    }

    #[test]
    fn test_no_repos_is_invalid() {
        assert!(Config::default().validate().is_err());
    }

    #[test]
    fn test_select_repos() {
        let config = Config {
            repos: BTreeMap::from([
                ("a".to_string(), repo("/srv/a", "/a", None)),
                ("b".to_string(), repo("/srv/b", "/b", Some(2))),
            ]),
            ..Config::default()
        };
        assert_eq!(config.select_repos(None).unwrap().len(), 2);
        let selected = config.select_repos(Some("b")).unwrap();
        assert_eq!(selected, vec![("b", &config.repos["b"])]);
        assert!(config.select_repos(Some("c")).is_err());
    }
}
